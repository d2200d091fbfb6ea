// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, thread::Thread};

pub fn sys_sigpending(thread: &Arc<Thread>, set_addr: Vaddr) -> Result<isize> {
    let pending = thread.sig_pending.load().as_u64();
    thread.process().vm().write_val(set_addr, &pending)?;
    Ok(0)
}
