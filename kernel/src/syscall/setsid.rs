// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, thread::Thread};

pub fn sys_setsid(thread: &Arc<Thread>) -> Result<isize> {
    let session = thread.process().to_new_session()?;
    Ok(session.sid() as isize)
}
