// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::signal::{
        constants::{SIGKILL, SIGSTOP},
        sig_mask::SigSet,
    },
    thread::Thread,
};

pub const SIG_BLOCK: u32 = 0;
pub const SIG_UNBLOCK: u32 = 1;
pub const SIG_SETMASK: u32 = 2;

pub fn sys_sigprocmask(
    thread: &Arc<Thread>,
    how: u32,
    set_addr: Vaddr,
    oldset_addr: Vaddr,
) -> Result<isize> {
    let vm = thread.process().vm();
    let old_mask = thread.sig_mask.load();
    if oldset_addr != 0 {
        vm.write_val(oldset_addr, &old_mask.as_u64())?;
    }
    if set_addr != 0 {
        let mut set: SigSet = vm.read_val::<u64>(set_addr)?.into();
        // KILL and STOP are unmaskable regardless of caller intent.
        set.remove_signal(SIGKILL);
        set.remove_signal(SIGSTOP);
        match how {
            SIG_BLOCK => thread.sig_mask.block(set),
            SIG_UNBLOCK => thread.sig_mask.unblock(set),
            SIG_SETMASK => thread.sig_mask.store(set),
            _ => return_errno_with_message!(Errno::EINVAL, "invalid sigprocmask how"),
        }
    }
    Ok(0)
}
