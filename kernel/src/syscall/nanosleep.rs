// SPDX-License-Identifier: MPL-2.0

use bytemuck_derive::{Pod, Zeroable};

use crate::{prelude::*, thread::Thread};

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct CTimespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl CTimespec {
    pub fn as_duration(&self) -> Result<Duration> {
        if self.tv_sec < 0 || !(0..1_000_000_000).contains(&self.tv_nsec) {
            return_errno_with_message!(Errno::EINVAL, "malformed timespec");
        }
        Ok(Duration::new(self.tv_sec as u64, self.tv_nsec as u32))
    }
}

pub fn sys_nanosleep(thread: &Arc<Thread>, req_addr: Vaddr, rem_addr: Vaddr) -> Result<isize> {
    let vm = thread.process().vm();
    let req: CTimespec = vm.read_val(req_addr)?;
    let duration = req.as_duration()?;
    match thread.sleep(duration) {
        Ok(()) => {
            if rem_addr != 0 {
                vm.write_val(rem_addr, &CTimespec::default())?;
            }
            Ok(0)
        }
        Err(e) => {
            // The remaining time is an estimate; a precise value needs the
            // expiry bookkeeping of the timer wheel.
            if rem_addr != 0 {
                vm.write_val(rem_addr, &req)?;
            }
            Err(e)
        }
    }
}
