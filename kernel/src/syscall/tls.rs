// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, thread::Thread};

pub fn sys_settls(thread: &Arc<Thread>, tls: u64) -> Result<isize> {
    thread.set_tls(tls);
    thread.tf_user.lock().set_tls_pointer(tls);
    Ok(0)
}

pub fn sys_gettls(thread: &Arc<Thread>) -> Result<isize> {
    Ok(thread.tls() as isize)
}
