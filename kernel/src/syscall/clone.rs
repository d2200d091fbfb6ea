// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::{uproc_clone, uthread_clone, CloneFlags},
    sched,
    thread::Thread,
};

pub fn sys_clone(thread: &Arc<Thread>, raw_flags: u64) -> Result<isize> {
    let flags = CloneFlags::from(raw_flags);
    let new_thread = if flags.contains(CloneFlags::CLONE_THREAD) {
        uthread_clone(thread, flags)?
    } else {
        uproc_clone(thread, flags)?
    };
    sched::sched_run(&new_thread);
    Ok(new_thread.tid() as isize)
}
