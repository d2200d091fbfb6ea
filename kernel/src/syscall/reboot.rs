// SPDX-License-Identifier: MPL-2.0

use spin::Once;

use crate::{prelude::*, thread::Thread};

pub const REBOOT_CMD_RESTART: u32 = 0x0123_4567;
pub const REBOOT_CMD_POWER_OFF: u32 = 0x4321_fedc;

static REBOOT_HOOK: Once<fn(u32)> = Once::new();

/// Installs the platform power-control hook.
pub fn set_reboot_hook(f: fn(u32)) {
    REBOOT_HOOK.call_once(|| f);
}

pub fn sys_reboot(thread: &Arc<Thread>, cmd: u32) -> Result<isize> {
    if !thread.process().credentials().is_root() {
        return_errno_with_message!(Errno::EPERM, "reboot requires root");
    }
    match cmd {
        REBOOT_CMD_RESTART | REBOOT_CMD_POWER_OFF => {
            if let Some(f) = REBOOT_HOOK.get() {
                f(cmd);
            }
            Ok(0)
        }
        _ => return_errno_with_message!(Errno::EINVAL, "unknown reboot command"),
    }
}
