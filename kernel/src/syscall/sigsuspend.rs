// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::signal::{
        constants::{SIGKILL, SIGSTOP},
        sig_mask::SigSet,
    },
    sync::WaitQueue,
    thread::Thread,
};

pub fn sys_sigsuspend(thread: &Arc<Thread>, mask_addr: Vaddr) -> Result<isize> {
    let vm = thread.process().vm();
    let mut mask: SigSet = vm.read_val::<u64>(mask_addr)?.into();
    mask.remove_signal(SIGKILL);
    mask.remove_signal(SIGSTOP);

    let old_mask = thread.sig_mask.load();
    thread.sig_mask.store(mask);

    // Parks until a signal wakes us; the handler runs against the
    // temporary mask, then the original mask comes back.
    let waitq = Arc::new(WaitQueue::new());
    let res = waitq.wait(thread, None);

    thread.sig_mask.store(old_mask);
    match res {
        Err(e) if e.error() == Errno::EINTR => {
            return_errno_with_message!(Errno::EINTR, "sigsuspend always returns EINTR")
        }
        _ => return_errno_with_message!(Errno::EINTR, "sigsuspend always returns EINTR"),
    }
}
