// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, process::table, thread::Thread};

pub fn sys_getpid(thread: &Arc<Thread>) -> Result<isize> {
    Ok(thread.process().pid() as isize)
}

pub fn sys_getppid(thread: &Arc<Thread>) -> Result<isize> {
    let ppid = thread
        .process()
        .parent()
        .map(|p| p.pid())
        .unwrap_or(0);
    Ok(ppid as isize)
}

pub fn sys_getpgrp(thread: &Arc<Thread>) -> Result<isize> {
    Ok(thread.process().pgid() as isize)
}

pub fn sys_getpgid(thread: &Arc<Thread>, pid: i32) -> Result<isize> {
    let process = if pid == 0 {
        thread.process()
    } else {
        table::get_process(pid as u32)
            .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process"))?
    };
    Ok(process.pgid() as isize)
}

pub fn sys_getsid(thread: &Arc<Thread>, pid: i32) -> Result<isize> {
    let process = if pid == 0 {
        thread.process()
    } else {
        table::get_process(pid as u32)
            .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process"))?
    };
    Ok(process.sid() as isize)
}

pub fn sys_gettid(thread: &Arc<Thread>) -> Result<isize> {
    Ok(thread.tid() as isize)
}
