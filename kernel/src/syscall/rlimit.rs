// SPDX-License-Identifier: MPL-2.0

use bytemuck_derive::{Pod, Zeroable};

use crate::{prelude::*, process::rlimit::ResourceType, thread::Thread};

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct CRlimit {
    pub rlim_cur: u64,
    pub rlim_max: u64,
}

pub fn sys_getrlimit(thread: &Arc<Thread>, resource: u32, rlim_addr: Vaddr) -> Result<isize> {
    let resource = ResourceType::try_from(resource)?;
    let process = thread.process();
    let rlimit = {
        let limits = process.resource_limits().lock();
        let rl = limits.get_rlimit(resource);
        CRlimit {
            rlim_cur: rl.get_cur(),
            rlim_max: rl.get_max(),
        }
    };
    process.vm().write_val(rlim_addr, &rlimit)?;
    Ok(0)
}

pub fn sys_setrlimit(thread: &Arc<Thread>, resource: u32, rlim_addr: Vaddr) -> Result<isize> {
    let resource = ResourceType::try_from(resource)?;
    let process = thread.process();
    let new: CRlimit = process.vm().read_val(rlim_addr)?;
    process
        .resource_limits()
        .lock()
        .get_rlimit_mut(resource)
        .set(new.rlim_cur, new.rlim_max)?;
    Ok(0)
}
