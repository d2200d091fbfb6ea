// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, thread::Thread};

/// Advice is taken as a hint and currently ignored; the sanity checks are
/// still enforced so misuse fails loudly.
pub fn sys_madvise(thread: &Arc<Thread>, addr: Vaddr, len: usize, _advice: u32) -> Result<isize> {
    let _ = thread;
    if addr % PAGE_SIZE != 0 {
        return_errno_with_message!(Errno::EINVAL, "madvise address not page aligned");
    }
    if len == 0 {
        return Ok(0);
    }
    Ok(0)
}
