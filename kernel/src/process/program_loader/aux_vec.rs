// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// Auxiliary vector keys delivered on the initial stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u64)]
pub enum AuxKey {
    AtNull = 0,
    AtPhdr = 3,
    AtPhent = 4,
    AtPhnum = 5,
    AtPagesz = 6,
    AtBase = 7,
    AtEntry = 9,
    AtUid = 11,
    AtEuid = 12,
    AtGid = 13,
    AtEgid = 14,
    AtHwcap = 16,
    AtRandom = 25,
    AtHwcap2 = 26,
}

/// The ordered key/value pairs pushed above the environment pointers.
#[derive(Debug, Clone, Default)]
pub struct AuxVec {
    table: Vec<(AuxKey, u64)>,
}

impl AuxVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: AuxKey, val: u64) -> Result<()> {
        if key == AuxKey::AtNull {
            return_errno_with_message!(Errno::EINVAL, "AT_NULL is implicit");
        }
        if let Some(entry) = self.table.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = val;
        } else {
            self.table.push((key, val));
        }
        Ok(())
    }

    pub fn get(&self, key: AuxKey) -> Option<u64> {
        self.table
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    pub fn table(&self) -> &[(AuxKey, u64)] {
        &self.table
    }

    /// Number of pairs on the stack, terminator included.
    pub fn stack_count(&self) -> usize {
        self.table.len() + 1
    }
}
