// SPDX-License-Identifier: MPL-2.0

use super::{group::ProcessGroup, Pgid, Process, Sid};
use crate::prelude::*;

/// A collection of related process groups.
///
/// The session leader is the process whose pid became the session id. A
/// session lives as long as its last group: the global table drops its
/// entry when the group map empties.
pub struct Session {
    sid: Sid,
    pub(super) inner: Mutex<Inner>,
}

pub(super) struct Inner {
    pub(super) process_groups: BTreeMap<Pgid, Arc<ProcessGroup>>,
    pub(super) leader: Option<Arc<Process>>,
}

impl Inner {
    pub(super) fn is_empty(&self) -> bool {
        self.process_groups.is_empty()
    }

    pub(super) fn remove_process(&mut self, process: &Arc<Process>) {
        if let Some(leader) = &self.leader {
            if Arc::ptr_eq(leader, process) {
                self.leader = None;
            }
        }
    }

    pub(super) fn remove_process_group(&mut self, pgid: &Pgid) {
        self.process_groups.remove(pgid);
    }
}

impl Session {
    /// Creates a new session containing only `group`.
    ///
    /// The caller sets the leader afterwards and publishes the session in
    /// the global table.
    pub(super) fn new(group: Arc<ProcessGroup>) -> Arc<Self> {
        let sid = group.pgid();
        let mut process_groups = BTreeMap::new();
        process_groups.insert(group.pgid(), group);
        Arc::new(Self {
            sid,
            inner: Mutex::new(Inner {
                process_groups,
                leader: None,
            }),
        })
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn leader(&self) -> Option<Arc<Process>> {
        self.inner.lock().leader.clone()
    }

    pub fn contains_process_group(&self, group: &Arc<ProcessGroup>) -> bool {
        self.inner
            .lock()
            .process_groups
            .contains_key(&group.pgid())
    }

    pub fn group_count(&self) -> usize {
        self.inner.lock().process_groups.len()
    }
}
