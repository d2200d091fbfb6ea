// SPDX-License-Identifier: MPL-2.0

use super::{constants::MAX_STD_SIG_NUM, sig_action::SigAction, sig_num::SigNum};

/// The per-process signal disposition table, one entry per standard signal.
#[derive(Copy, Clone)]
pub struct SigDispositions {
    map: [SigAction; MAX_STD_SIG_NUM as usize],
}

impl Default for SigDispositions {
    fn default() -> Self {
        Self::new()
    }
}

impl SigDispositions {
    pub fn new() -> Self {
        Self {
            map: [SigAction::default(); MAX_STD_SIG_NUM as usize],
        }
    }

    pub fn get(&self, num: SigNum) -> SigAction {
        self.map[Self::num_to_idx(num)]
    }

    /// Replaces one entry, returning the old disposition.
    pub fn set(&mut self, num: SigNum, new_sig_action: SigAction) -> SigAction {
        let idx = Self::num_to_idx(num);
        core::mem::replace(&mut self.map[idx], new_sig_action)
    }

    pub fn set_default(&mut self, num: SigNum) {
        self.map[Self::num_to_idx(num)] = SigAction::Dfl;
    }

    /// Exec resets every caught signal back to the default action.
    pub fn inherit_on_exec(&mut self) {
        for action in self.map.iter_mut() {
            *action = SigAction::Dfl;
        }
    }

    fn num_to_idx(num: SigNum) -> usize {
        (num.as_u8() - 1) as usize
    }
}
