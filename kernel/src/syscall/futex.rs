// SPDX-License-Identifier: MPL-2.0

use super::nanosleep::CTimespec;
use crate::{
    prelude::*,
    process::futex::{futex_requeue, futex_wait, futex_wake},
    thread::Thread,
};

pub const FUTEX_WAIT: u32 = 0;
pub const FUTEX_WAKE: u32 = 1;
pub const FUTEX_REQUEUE: u32 = 3;
const FUTEX_OP_MASK: u32 = 0xF;

pub fn sys_futex(
    thread: &Arc<Thread>,
    uaddr: Vaddr,
    op: u32,
    val: i32,
    timeout_or_val2: Vaddr,
    uaddr2: Vaddr,
) -> Result<isize> {
    let vm = thread.process().vm();
    match op & FUTEX_OP_MASK {
        FUTEX_WAIT => {
            let timeout = if timeout_or_val2 != 0 {
                let ts: CTimespec = vm.read_val(timeout_or_val2)?;
                Some(ts.as_duration()?)
            } else {
                None
            };
            futex_wait(thread, &vm, uaddr, val, timeout)?;
            Ok(0)
        }
        FUTEX_WAKE => {
            let woken = futex_wake(&vm, uaddr, val.max(0) as usize)?;
            Ok(woken as isize)
        }
        FUTEX_REQUEUE => {
            let woken = futex_requeue(
                &vm,
                uaddr,
                val.max(0) as usize,
                timeout_or_val2,
                uaddr2,
            )?;
            Ok(woken as isize)
        }
        _ => return_errno_with_message!(Errno::ENOSYS, "unsupported futex op"),
    }
}
