// SPDX-License-Identifier: MPL-2.0

use super::{session::Session, Pgid, Pid, Process};
use crate::prelude::*;

/// A process group: the unit job control acts on.
///
/// Groups hold strong references to member processes; the group itself is
/// kept alive by the global table until its last member leaves.
pub struct ProcessGroup {
    pgid: Pgid,
    pub(super) inner: Mutex<Inner>,
}

pub(super) struct Inner {
    pub(super) processes: BTreeMap<Pid, Arc<Process>>,
    pub(super) leader: Option<Arc<Process>>,
    pub(super) session: Weak<Session>,
}

impl Inner {
    pub(super) fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub(super) fn remove_process(&mut self, pid: &Pid) {
        self.processes.remove(pid);
        if let Some(leader) = &self.leader {
            if leader.pid() == *pid {
                self.leader = None;
            }
        }
    }
}

impl ProcessGroup {
    /// Creates a group with `process` as leader and only member.
    pub(super) fn new(process: Arc<Process>) -> Arc<Self> {
        let pgid = process.pid();
        let mut processes = BTreeMap::new();
        processes.insert(process.pid(), process.clone());
        Arc::new(Self {
            pgid,
            inner: Mutex::new(Inner {
                processes,
                leader: Some(process),
                session: Weak::new(),
            }),
        })
    }

    pub fn pgid(&self) -> Pgid {
        self.pgid
    }

    pub fn leader(&self) -> Option<Arc<Process>> {
        self.inner.lock().leader.clone()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.lock().session.upgrade()
    }

    pub fn contains_process(&self, pid: Pid) -> bool {
        self.inner.lock().processes.contains_key(&pid)
    }

    pub fn process_count(&self) -> usize {
        self.inner.lock().processes.len()
    }

    /// Posts a signal to every member of the group.
    pub fn broadcast_signal(
        &self,
        signum: super::signal::sig_num::SigNum,
    ) -> crate::Result<()> {
        let processes: Vec<_> = self.inner.lock().processes.values().cloned().collect();
        for process in processes {
            super::signal::proc_signal(&process, signum)?;
        }
        Ok(())
    }
}
