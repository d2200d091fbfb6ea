// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, process::table, thread::Thread};

pub const PRIO_PROCESS: i32 = 0;

pub fn sys_getpriority(thread: &Arc<Thread>, who: i32) -> Result<isize> {
    let process = if who == 0 {
        thread.process()
    } else {
        table::get_process(who as u32)
            .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process"))?
    };
    // The classic encoding: 20 - nice, so the result is always positive.
    Ok((20 - process.nice()) as isize)
}

pub fn sys_setpriority(thread: &Arc<Thread>, who: i32, nice: i32) -> Result<isize> {
    let current = thread.process();
    let process = if who == 0 {
        current.clone()
    } else {
        table::get_process(who as u32)
            .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process"))?
    };
    if nice < current.nice() && !current.credentials().is_root() {
        return_errno_with_message!(Errno::EACCES, "raising priority requires privilege");
    }
    process.set_nice(nice);
    Ok(0)
}
