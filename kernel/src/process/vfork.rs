// SPDX-License-Identifier: MPL-2.0

//! The vfork relation: a symmetric pair of pointers between a vforking
//! parent and its not-yet-execed child.

use super::process::Process;
use crate::prelude::*;

/// Links `a` and `b` as vfork peers.
///
/// Both relation locks are taken in pid order so concurrent set/clear
/// pairs cannot interleave into a half-linked state.
pub fn set_vfork_rel(a: &Arc<Process>, b: &Arc<Process>) {
    let (first, second) = ordered(a, b);
    let mut first_rel = first.vfork_rel.lock();
    let mut second_rel = second.vfork_rel.lock();
    *first_rel = Arc::downgrade(second);
    *second_rel = Arc::downgrade(first);
}

/// Clears the relation from both sides and wakes the peer's vfork
/// sleepers. `process` is the side that finished (exec or exit).
pub fn proc_wakeup_vfork(process: &Arc<Process>, peer: &Arc<Process>) {
    {
        let (first, second) = ordered(process, peer);
        let mut first_rel = first.vfork_rel.lock();
        let mut second_rel = second.vfork_rel.lock();
        *first_rel = Weak::new();
        *second_rel = Weak::new();
    }
    peer.vfork_waitq.wake_all(0);
}

fn ordered<'a>(a: &'a Arc<Process>, b: &'a Arc<Process>) -> (&'a Arc<Process>, &'a Arc<Process>) {
    if a.pid() <= b.pid() {
        (a, b)
    } else {
        (b, a)
    }
}
