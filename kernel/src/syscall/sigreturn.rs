// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, process::signal, thread::Thread};

pub fn sys_sigreturn(thread: &Arc<Thread>) -> Result<isize> {
    signal::sigreturn(thread)?;
    // The restored trapframe already carries the interrupted syscall's
    // return value in the return register.
    Ok(thread.tf_user.lock().gpr[0] as isize)
}
