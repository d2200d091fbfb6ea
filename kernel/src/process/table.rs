// SPDX-License-Identifier: MPL-2.0

//! The global pid/pgid/sid/tid lookup tables.

use super::{group::ProcessGroup, session::Session, Pgid, Pid, Process, Sid};
use crate::{
    prelude::*,
    thread::{Thread, Tid},
};

static PROCESS_TABLE: Mutex<BTreeMap<Pid, Arc<Process>>> = Mutex::new(BTreeMap::new());
static GROUP_TABLE: Mutex<BTreeMap<Pgid, Arc<ProcessGroup>>> = Mutex::new(BTreeMap::new());
static SESSION_TABLE: Mutex<BTreeMap<Sid, Arc<Session>>> = Mutex::new(BTreeMap::new());
static THREAD_TABLE: Mutex<BTreeMap<Tid, Arc<Thread>>> = Mutex::new(BTreeMap::new());

pub fn get_process(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock().get(&pid).cloned()
}

pub fn get_process_group(pgid: Pgid) -> Option<Arc<ProcessGroup>> {
    GROUP_TABLE.lock().get(&pgid).cloned()
}

pub fn get_session(sid: Sid) -> Option<Arc<Session>> {
    SESSION_TABLE.lock().get(&sid).cloned()
}

pub fn get_thread(tid: Tid) -> Option<Arc<Thread>> {
    THREAD_TABLE.lock().get(&tid).cloned()
}

pub fn contains_process(pid: Pid) -> bool {
    PROCESS_TABLE.lock().contains_key(&pid)
}

pub fn process_count() -> usize {
    PROCESS_TABLE.lock().len()
}

/// Snapshot of all live processes, in pid order.
pub fn all_processes() -> Vec<Arc<Process>> {
    PROCESS_TABLE.lock().values().cloned().collect()
}

pub(super) fn process_table_mut() -> MutexGuard<'static, BTreeMap<Pid, Arc<Process>>> {
    PROCESS_TABLE.lock()
}

pub(super) fn group_table_mut() -> MutexGuard<'static, BTreeMap<Pgid, Arc<ProcessGroup>>> {
    GROUP_TABLE.lock()
}

pub(super) fn session_table_mut() -> MutexGuard<'static, BTreeMap<Sid, Arc<Session>>> {
    SESSION_TABLE.lock()
}

pub(super) fn thread_table_mut() -> MutexGuard<'static, BTreeMap<Tid, Arc<Thread>>> {
    THREAD_TABLE.lock()
}
