// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;

use crate::prelude::*;

bitflags! {
    #[derive(Default)]
    pub struct SigStackFlags: u32 {
        const SS_ONSTACK = 1;
        const SS_DISABLE = 2;
        const SS_AUTODISARM = 1 << 31;
    }
}

/// The per-thread alternate signal stack installed by `sigaltstack`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SigStack {
    pub sp: Vaddr,
    pub size: usize,
    pub flags: u32,
}

impl SigStack {
    pub fn new(sp: Vaddr, size: usize, flags: SigStackFlags) -> Self {
        Self {
            sp,
            size,
            flags: flags.bits(),
        }
    }

    pub fn flags(&self) -> SigStackFlags {
        SigStackFlags::from_bits_truncate(self.flags)
    }

    pub fn is_disabled(&self) -> bool {
        self.size == 0 || self.flags().contains(SigStackFlags::SS_DISABLE)
    }

    pub fn set_on_stack(&mut self, active: bool) {
        if active {
            self.flags |= SigStackFlags::SS_ONSTACK.bits();
        } else {
            self.flags &= !SigStackFlags::SS_ONSTACK.bits();
        }
    }
}
