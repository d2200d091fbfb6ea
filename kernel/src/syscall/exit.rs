// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::{status, thread_exit},
    thread::Thread,
};

pub fn sys_exit(thread: &Arc<Thread>, exit_code: i32) -> Result<isize> {
    thread_exit(thread, status::wstatus_exited(exit_code))?;
    Ok(0)
}
