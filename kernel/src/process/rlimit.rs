// SPDX-License-Identifier: MPL-2.0

use crate::{fs::FILE_TABLE_CAP, prelude::*, thread::USER_STACK_SIZE};

pub const RLIM_INFINITY: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResourceType {
    RlimitCpu = 0,
    RlimitFsize = 1,
    RlimitData = 2,
    RlimitStack = 3,
    RlimitCore = 4,
    RlimitRss = 5,
    RlimitNproc = 6,
    RlimitNofile = 7,
    RlimitMemlock = 8,
    RlimitAs = 9,
}

impl TryFrom<u32> for ResourceType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::RlimitCpu,
            1 => Self::RlimitFsize,
            2 => Self::RlimitData,
            3 => Self::RlimitStack,
            4 => Self::RlimitCore,
            5 => Self::RlimitRss,
            6 => Self::RlimitNproc,
            7 => Self::RlimitNofile,
            8 => Self::RlimitMemlock,
            9 => Self::RlimitAs,
            _ => return_errno_with_message!(Errno::EINVAL, "unknown resource type"),
        })
    }
}

pub const NR_RLIMITS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct RLimit64 {
    cur: u64,
    max: u64,
}

impl RLimit64 {
    pub fn new(cur: u64, max: u64) -> Self {
        Self { cur, max }
    }

    pub fn get_cur(&self) -> u64 {
        self.cur
    }

    pub fn get_max(&self) -> u64 {
        self.max
    }

    pub fn set(&mut self, cur: u64, max: u64) -> Result<()> {
        if cur > max {
            return_errno_with_message!(Errno::EINVAL, "soft limit above hard limit");
        }
        self.cur = cur;
        self.max = max;
        Ok(())
    }
}

impl Default for RLimit64 {
    fn default() -> Self {
        Self {
            cur: RLIM_INFINITY,
            max: RLIM_INFINITY,
        }
    }
}

#[derive(Clone)]
pub struct ResourceLimits {
    rlimits: [RLimit64; NR_RLIMITS],
}

impl ResourceLimits {
    pub fn get_rlimit(&self, resource: ResourceType) -> &RLimit64 {
        &self.rlimits[resource as usize]
    }

    pub fn get_rlimit_mut(&mut self, resource: ResourceType) -> &mut RLimit64 {
        &mut self.rlimits[resource as usize]
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        let mut rlimits = [RLimit64::default(); NR_RLIMITS];
        rlimits[ResourceType::RlimitStack as usize] =
            RLimit64::new(USER_STACK_SIZE as u64, RLIM_INFINITY);
        rlimits[ResourceType::RlimitNofile as usize] =
            RLimit64::new(FILE_TABLE_CAP as u64, FILE_TABLE_CAP as u64);
        ResourceLimits { rlimits }
    }
}
