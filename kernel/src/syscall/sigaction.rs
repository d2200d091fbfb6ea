// SPDX-License-Identifier: MPL-2.0

use bytemuck_derive::{Pod, Zeroable};

use crate::{
    prelude::*,
    process::signal::{
        constants::{SIGKILL, SIGSTOP},
        sig_action::{SigAction, SigActionFlags},
        sig_num::SigNum,
    },
    thread::Thread,
};

pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

/// The userspace `struct sigaction`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct CSigAction {
    pub handler: u64,
    pub flags: u32,
    _pad: u32,
    pub restorer: u64,
    pub mask: u64,
}

impl From<SigAction> for CSigAction {
    fn from(action: SigAction) -> Self {
        match action {
            SigAction::Dfl => CSigAction {
                handler: SIG_DFL,
                ..Default::default()
            },
            SigAction::Ign => CSigAction {
                handler: SIG_IGN,
                ..Default::default()
            },
            SigAction::User {
                handler_addr,
                flags,
                restorer_addr,
                mask,
            } => CSigAction {
                handler: handler_addr as u64,
                flags: flags.bits(),
                _pad: 0,
                restorer: restorer_addr as u64,
                mask: mask.as_u64(),
            },
        }
    }
}

impl From<CSigAction> for SigAction {
    fn from(c: CSigAction) -> Self {
        match c.handler {
            SIG_DFL => SigAction::Dfl,
            SIG_IGN => SigAction::Ign,
            _ => SigAction::User {
                handler_addr: c.handler as usize,
                flags: SigActionFlags::from_bits_truncate(c.flags),
                restorer_addr: c.restorer as usize,
                mask: c.mask.into(),
            },
        }
    }
}

pub fn sys_sigaction(
    thread: &Arc<Thread>,
    signum: u32,
    new_addr: Vaddr,
    old_addr: Vaddr,
) -> Result<isize> {
    let signum = SigNum::try_from(signum as u8)?;
    if signum == SIGKILL || signum == SIGSTOP {
        return_errno_with_message!(Errno::EINVAL, "cannot change KILL or STOP disposition");
    }
    let process = thread.process();
    let vm = process.vm();
    let mut dispositions = process.sig_dispositions().lock();
    let old = if new_addr != 0 {
        let c_action: CSigAction = vm.read_val(new_addr)?;
        dispositions.set(signum, c_action.into())
    } else {
        dispositions.get(signum)
    };
    drop(dispositions);
    if old_addr != 0 {
        vm.write_val(old_addr, &CSigAction::from(old))?;
    }
    Ok(0)
}
