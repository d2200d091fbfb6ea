// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::{wait4, ProcessFilter, WaitOptions},
    thread::Thread,
};

pub fn sys_wait4(
    thread: &Arc<Thread>,
    pid: i32,
    wstatus_addr: Vaddr,
    options: u32,
) -> Result<isize> {
    let process = thread.process();
    let filter = ProcessFilter::from_wait_pid(pid, &process);
    let options = WaitOptions::from_bits_truncate(options);
    let (child_pid, wstatus) = wait4(thread, filter, options)?;
    if wstatus_addr != 0 && child_pid != 0 {
        process.vm().write_val(wstatus_addr, &wstatus)?;
    }
    Ok(child_pid as isize)
}
