// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, process::table, thread::Thread};

pub fn sys_setpgid(thread: &Arc<Thread>, pid: i32, pgid: i32) -> Result<isize> {
    let current = thread.process();
    let process = if pid == 0 {
        current.clone()
    } else {
        table::get_process(pid as u32)
            .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process"))?
    };
    if pgid < 0 {
        return_errno_with_message!(Errno::EINVAL, "negative pgid");
    }
    // Only the process itself and its parent may move it.
    let is_self = process.pid() == current.pid();
    let is_child = current.get_child(process.pid()).is_some();
    if !is_self && !is_child {
        return_errno_with_message!(Errno::ESRCH, "not current process nor a child");
    }
    let pgid = if pgid == 0 {
        process.pid()
    } else {
        pgid as u32
    };
    process.to_other_group(pgid)?;
    Ok(0)
}
