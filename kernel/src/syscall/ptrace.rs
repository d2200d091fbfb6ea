// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::{ptrace, table},
    thread::{PtraceState, Thread},
};

pub const PTRACE_ATTACH: u32 = 16;
pub const PTRACE_DETACH: u32 = 17;
pub const PTRACE_CONT: u32 = 7;

pub fn sys_ptrace(thread: &Arc<Thread>, request: u32, tid: u32) -> Result<isize> {
    let process = thread.process();
    let target = table::get_thread(tid)
        .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such thread"))?;
    match request {
        PTRACE_ATTACH => {
            if target.ptrace.lock().state != PtraceState::None {
                return_errno_with_message!(Errno::EPERM, "thread is already traced");
            }
            ptrace::thread_trace(&process, &target);
            Ok(0)
        }
        PTRACE_DETACH => {
            ptrace::thread_untrace(&target);
            ptrace::thread_ptrace_cont(&target);
            Ok(0)
        }
        PTRACE_CONT => {
            ptrace::thread_ptrace_cont(&target);
            Ok(0)
        }
        _ => return_errno_with_message!(Errno::ENOSYS, "unsupported ptrace request"),
    }
}
