// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

pub type Uid = u32;
pub type Gid = u32;

/// The real, effective and saved user and group ids of a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ruid: Uid,
    pub euid: Uid,
    pub suid: Uid,
    pub rgid: Gid,
    pub egid: Gid,
    pub sgid: Gid,
}

impl Credentials {
    pub fn new_root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }

    /// `setuid`: root sets all three ids, anyone else may only switch to
    /// their real or saved id.
    pub fn setuid(&mut self, uid: Uid) -> Result<()> {
        if self.euid == 0 {
            self.ruid = uid;
            self.euid = uid;
            self.suid = uid;
            return Ok(());
        }
        if uid != self.ruid && uid != self.suid {
            return_errno_with_message!(Errno::EPERM, "setuid to a foreign uid");
        }
        self.euid = uid;
        Ok(())
    }

    pub fn seteuid(&mut self, uid: Uid) -> Result<()> {
        if self.euid != 0 && uid != self.ruid && uid != self.suid {
            return_errno_with_message!(Errno::EPERM, "seteuid to a foreign uid");
        }
        self.euid = uid;
        Ok(())
    }

    pub fn setgid(&mut self, gid: Gid) -> Result<()> {
        if self.euid == 0 {
            self.rgid = gid;
            self.egid = gid;
            self.sgid = gid;
            return Ok(());
        }
        if gid != self.rgid && gid != self.sgid {
            return_errno_with_message!(Errno::EPERM, "setgid to a foreign gid");
        }
        self.egid = gid;
        Ok(())
    }

    pub fn setegid(&mut self, gid: Gid) -> Result<()> {
        if self.euid != 0 && gid != self.rgid && gid != self.sgid {
            return_errno_with_message!(Errno::EPERM, "setegid to a foreign gid");
        }
        self.egid = gid;
        Ok(())
    }

    /// Whether a sender with these credentials may signal `target`.
    pub fn may_signal(&self, target: &Credentials) -> bool {
        self.euid == 0
            || self.ruid == target.ruid
            || self.ruid == target.suid
            || self.euid == target.ruid
            || self.euid == target.suid
    }
}
