// SPDX-License-Identifier: MPL-2.0

#![allow(clippy::module_inception)]

use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use spin::Once;

use super::{
    credentials::Credentials,
    group::ProcessGroup,
    program_loader,
    rlimit::ResourceLimits,
    session::Session,
    signal::sig_dispositions::SigDispositions,
    status::ProcessState,
    table, Pgid, Pid, Sid,
};
use crate::{
    arch::{ArchSpec, Native},
    fs::{FileLike, FileTable, NodeHandle},
    prelude::*,
    sched,
    sync::WaitQueue,
    thread::{allocate_id, Thread, ThreadState, UserStack, USER_STACK_SIZE},
    vm::{VmPerms, VmSpace, USER_TOP},
};

#[derive(Default)]
pub struct ProcessStats {
    pub utime_ns: AtomicU64,
    pub stime_ns: AtomicU64,
    pub faults: AtomicU64,
    pub nsignals: AtomicU64,
}

/// A process: a set of threads sharing one address space, one descriptor
/// table and one signal disposition table.
pub struct Process {
    pid: Pid,
    name: RwLock<String>,
    vm: SpinLock<Arc<VmSpace>>,
    entry: SpinLock<u64>,

    threads: Mutex<Vec<Arc<Thread>>>,
    state: SpinLock<ProcessState>,
    pub(super) parent: SpinLock<Weak<Process>>,
    children: Mutex<BTreeMap<Pid, Arc<Process>>>,
    pub(super) process_group: Mutex<Weak<ProcessGroup>>,

    files: RwLock<FileTable>,
    credentials: SpinLock<Credentials>,
    umask: SpinLock<u16>,
    root: SpinLock<NodeHandle>,
    cwd: SpinLock<NodeHandle>,

    sig_dispositions: Mutex<SigDispositions>,
    resource_limits: Mutex<ResourceLimits>,
    nice: AtomicI32,

    pub(super) vfork_rel: SpinLock<Weak<Process>>,
    pub vfork_waitq: Arc<WaitQueue>,
    pub wait_waitq: Arc<WaitQueue>,

    pub(super) ptrace_tracees: Mutex<Vec<Weak<Thread>>>,

    pub stats: ProcessStats,
}

static INIT_PROCESS: Once<Weak<Process>> = Once::new();

/// Records the init process; its exit panics the kernel.
pub fn set_init_process(process: &Arc<Process>) {
    INIT_PROCESS.call_once(|| Arc::downgrade(process));
}

pub fn is_init_process(process: &Process) -> bool {
    INIT_PROCESS
        .get()
        .and_then(Weak::upgrade)
        .is_some_and(|init| init.pid() == process.pid())
}

impl Process {
    fn new(pid: Pid, name: &str, vm: Arc<VmSpace>, entry: u64) -> Arc<Self> {
        Arc::new(Self {
            pid,
            name: RwLock::new(name.to_string()),
            vm: SpinLock::new(vm),
            entry: SpinLock::new(entry),
            threads: Mutex::new(Vec::new()),
            state: SpinLock::new(ProcessState::Alive),
            parent: SpinLock::new(Weak::new()),
            children: Mutex::new(BTreeMap::new()),
            process_group: Mutex::new(Weak::new()),
            files: RwLock::new(FileTable::new()),
            credentials: SpinLock::new(Credentials::new_root()),
            umask: SpinLock::new(0o022),
            root: SpinLock::new(NodeHandle::root()),
            cwd: SpinLock::new(NodeHandle::root()),
            sig_dispositions: Mutex::new(SigDispositions::new()),
            resource_limits: Mutex::new(ResourceLimits::default()),
            nice: AtomicI32::new(0),
            vfork_rel: SpinLock::new(Weak::new()),
            vfork_waitq: Arc::new(WaitQueue::new()),
            wait_waitq: Arc::new(WaitQueue::new()),
            ptrace_tracees: Mutex::new(Vec::new()),
            stats: ProcessStats::default(),
        })
    }

    // *********** Basic accessors ***********

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn vm(&self) -> Arc<VmSpace> {
        self.vm.lock().clone()
    }

    pub(super) fn swap_vm(&self, new: Arc<VmSpace>) -> Arc<VmSpace> {
        core::mem::replace(&mut *self.vm.lock(), new)
    }

    pub fn entry(&self) -> u64 {
        *self.entry.lock()
    }

    pub fn set_entry(&self, entry: u64) {
        *self.entry.lock() = entry;
    }

    pub fn threads(&self) -> &Mutex<Vec<Arc<Thread>>> {
        &self.threads
    }

    /// The first thread ever inserted; its wstatus stands for the process.
    pub fn leader_thread(&self) -> Arc<Thread> {
        self.threads.lock()[0].clone()
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(super) fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == ProcessState::Zombie
    }

    // *********** Parent and children ***********

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    pub fn children(&self) -> &Mutex<BTreeMap<Pid, Arc<Process>>> {
        &self.children
    }

    pub fn get_child(&self, pid: Pid) -> Option<Arc<Process>> {
        self.children.lock().get(&pid).cloned()
    }

    pub fn get_thread(&self, tid: u32) -> Option<Arc<Thread>> {
        self.threads
            .lock()
            .iter()
            .find(|t| t.tid() == tid)
            .cloned()
    }

    // *********** Process group & session ***********

    pub fn pgid(&self) -> Pgid {
        self.process_group
            .lock()
            .upgrade()
            .map(|g| g.pgid())
            .unwrap_or(0)
    }

    pub fn process_group(&self) -> Option<Arc<ProcessGroup>> {
        self.process_group.lock().upgrade()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.process_group()?.session()
    }

    pub fn sid(&self) -> Sid {
        self.session().map(|s| s.sid()).unwrap_or(0)
    }

    fn is_group_leader(self: &Arc<Self>) -> bool {
        self.process_group()
            .and_then(|g| g.leader())
            .is_some_and(|leader| Arc::ptr_eq(self, &leader))
    }

    fn is_session_leader(self: &Arc<Self>) -> bool {
        self.session()
            .and_then(|s| s.leader())
            .is_some_and(|leader| Arc::ptr_eq(self, &leader))
    }

    /// `setsid`: moves the process into a fresh session, as the leader of
    /// a fresh group. Group leaders may not move.
    pub fn to_new_session(self: &Arc<Self>) -> Result<Arc<Session>> {
        if self.is_session_leader() {
            return Ok(self.session().unwrap());
        }
        if self.is_group_leader() {
            return_errno_with_message!(
                Errno::EPERM,
                "process group leader cannot be moved to new session"
            );
        }

        let old_session = self.session();

        // Lock order: session table -> group table -> group of process
        // -> group inner -> session inner
        let mut session_table_mut = table::session_table_mut();
        let mut group_table_mut = table::group_table_mut();
        let mut self_group_mut = self.process_group.lock();

        if session_table_mut.contains_key(&self.pid) || group_table_mut.contains_key(&self.pid) {
            return_errno_with_message!(Errno::EPERM, "session or group id already in use");
        }

        if let (Some(old_group), Some(old_session)) = (self_group_mut.upgrade(), old_session) {
            let mut group_inner = old_group.inner.lock();
            let mut session_inner = old_session.inner.lock();
            group_inner.remove_process(&self.pid);
            *self_group_mut = Weak::new();

            if group_inner.is_empty() {
                group_table_mut.remove(&old_group.pgid());
                session_inner.remove_process_group(&old_group.pgid());
                if session_inner.is_empty() {
                    session_table_mut.remove(&old_session.sid());
                }
            }
        }

        let new_group = ProcessGroup::new(self.clone());
        *self_group_mut = Arc::downgrade(&new_group);
        group_table_mut.insert(new_group.pgid(), new_group.clone());

        let new_session = Session::new(new_group.clone());
        new_group.inner.lock().session = Arc::downgrade(&new_session);
        new_session.inner.lock().leader = Some(self.clone());
        session_table_mut.insert(new_session.sid(), new_session.clone());

        Ok(new_session)
    }

    /// `setpgid`: moves the process to the group `pgid`, creating the
    /// group inside the current session when `pgid == pid`.
    pub fn to_other_group(self: &Arc<Self>, pgid: Pgid) -> Result<()> {
        if self.pgid() == pgid {
            return Ok(());
        }
        if self.is_session_leader() {
            return_errno_with_message!(Errno::EPERM, "session leader cannot change group");
        }

        if let Some(group) = table::get_process_group(pgid) {
            let session = self.session().ok_or(Error::new(Errno::EPERM))?;
            if !session.contains_process_group(&group) {
                return_errno_with_message!(
                    Errno::EPERM,
                    "group belongs to a different session"
                );
            }
            self.to_specified_group(&group)
        } else {
            if pgid != self.pid() {
                return_errno_with_message!(
                    Errno::EPERM,
                    "new group id must equal the process id"
                );
            }
            self.to_new_group()
        }
    }

    fn to_new_group(self: &Arc<Self>) -> Result<()> {
        let session = self.session().ok_or(Error::new(Errno::EPERM))?;
        let mut group_table_mut = table::group_table_mut();
        let mut self_group_mut = self.process_group.lock();

        if let Some(old_group) = self_group_mut.upgrade() {
            let mut group_inner = old_group.inner.lock();
            let mut session_inner = session.inner.lock();
            group_inner.remove_process(&self.pid);
            *self_group_mut = Weak::new();
            if group_inner.is_empty() {
                group_table_mut.remove(&old_group.pgid());
                session_inner.remove_process_group(&old_group.pgid());
            }
        }

        let new_group = ProcessGroup::new(self.clone());
        let mut new_group_inner = new_group.inner.lock();
        let mut session_inner = session.inner.lock();
        *self_group_mut = Arc::downgrade(&new_group);
        group_table_mut.insert(new_group.pgid(), new_group.clone());
        new_group_inner.session = Arc::downgrade(&session);
        session_inner
            .process_groups
            .insert(new_group.pgid(), new_group.clone());
        Ok(())
    }

    fn to_specified_group(self: &Arc<Self>, group: &Arc<ProcessGroup>) -> Result<()> {
        let mut group_table_mut = table::group_table_mut();
        let mut self_group_mut = self.process_group.lock();

        let mut group_inner = if let Some(old_group) = self_group_mut.upgrade() {
            // Lock order: group with the smaller pgid first.
            let (mut old_inner, new_inner) = match old_group.pgid().cmp(&group.pgid()) {
                core::cmp::Ordering::Equal => return Ok(()),
                core::cmp::Ordering::Less => (old_group.inner.lock(), group.inner.lock()),
                core::cmp::Ordering::Greater => {
                    let new_inner = group.inner.lock();
                    let old_inner = old_group.inner.lock();
                    (old_inner, new_inner)
                }
            };
            old_inner.remove_process(&self.pid);
            *self_group_mut = Weak::new();
            if old_inner.is_empty() {
                group_table_mut.remove(&old_group.pgid());
            }
            new_inner
        } else {
            group.inner.lock()
        };

        group_inner.processes.insert(self.pid, self.clone());
        *self_group_mut = Arc::downgrade(group);
        Ok(())
    }

    // *********** Files, credentials, limits ***********

    pub fn files(&self) -> &RwLock<FileTable> {
        &self.files
    }

    pub fn get_file(&self, fd: usize) -> Result<Arc<dyn FileLike>> {
        self.files.read().get(fd)
    }

    pub fn alloc_fd(&self, file: Arc<dyn FileLike>, cloexec: bool) -> Result<usize> {
        self.files.write().alloc_fd(file, cloexec)
    }

    pub fn free_fd(&self, fd: usize) -> Result<()> {
        let file = self.files.write().close(fd)?;
        drop(file);
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        *self.credentials.lock()
    }

    pub fn credentials_mut(&self) -> &SpinLock<Credentials> {
        &self.credentials
    }

    pub fn umask(&self) -> u16 {
        *self.umask.lock()
    }

    pub fn set_umask(&self, umask: u16) -> u16 {
        core::mem::replace(&mut *self.umask.lock(), umask & 0o777)
    }

    pub fn root(&self) -> NodeHandle {
        self.root.lock().clone()
    }

    pub fn cwd(&self) -> NodeHandle {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, cwd: NodeHandle) {
        *self.cwd.lock() = cwd;
    }

    pub fn sig_dispositions(&self) -> &Mutex<SigDispositions> {
        &self.sig_dispositions
    }

    pub fn resource_limits(&self) -> &Mutex<ResourceLimits> {
        &self.resource_limits
    }

    pub fn nice(&self) -> i32 {
        self.nice.load(Ordering::Relaxed)
    }

    pub fn set_nice(&self, nice: i32) {
        self.nice.store(nice.clamp(-20, 19), Ordering::Relaxed);
    }

    // *********** vfork relation ***********

    pub fn vfork_rel(&self) -> Option<Arc<Process>> {
        self.vfork_rel.lock().upgrade()
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

// *********** Construction ***********

/// Carves the user stack for a new thread out of `process`'s space.
pub(super) fn thread_create(process: &Arc<Process>, tid: u32, priority: u8) -> Result<Arc<Thread>> {
    let thread = Thread::alloc(tid, priority);
    let vm = process.vm();
    let stack_base = USER_TOP - USER_STACK_SIZE;
    let zone = match vm.alloc(stack_base, USER_STACK_SIZE, VmPerms::RW) {
        Ok(zone) => zone,
        // Another thread already owns the top-of-region slot; fall back to
        // any placement.
        Err(e) if e.error() == Errno::EEXIST => vm.alloc(0, USER_STACK_SIZE, VmPerms::RW)?,
        Err(e) => return Err(e),
    };
    thread.set_user_stack(UserStack {
        base: zone.addr,
        size: zone.size,
    });
    thread.set_process(process);
    Ok(thread)
}

/// Builds an unpublished process with its leader thread.
///
/// Everything fallible happens here, before any global structure learns
/// about the new process, so error paths never have to unpublish.
pub(super) fn proc_create(
    name: &str,
    vm: Arc<VmSpace>,
    entry: u64,
    priority: u8,
) -> Result<(Arc<Process>, Arc<Thread>)> {
    let pid = allocate_id();
    let process = Process::new(pid, name, vm, entry);
    let thread = thread_create(&process, pid, priority)?;
    process.threads.lock().push(thread.clone());
    Ok((process, thread))
}

/// Publishes a process as the leader of a fresh group in a fresh session.
pub(super) fn publish_new_session(process: &Arc<Process>) {
    // Lock order: session table -> group table -> process table
    // -> group of process -> group inner -> session inner
    let mut session_table_mut = table::session_table_mut();
    let mut group_table_mut = table::group_table_mut();
    let mut process_table_mut = table::process_table_mut();

    let group = ProcessGroup::new(process.clone());
    *process.process_group.lock() = Arc::downgrade(&group);
    group_table_mut.insert(group.pgid(), group.clone());

    let session = Session::new(group.clone());
    group.inner.lock().session = Arc::downgrade(&session);
    session.inner.lock().leader = Some(process.clone());
    session_table_mut.insert(session.sid(), session);

    process_table_mut.insert(process.pid(), process.clone());

    let mut thread_table_mut = table::thread_table_mut();
    for thread in process.threads.lock().iter() {
        thread_table_mut.insert(thread.tid(), thread.clone());
    }
}

/// Publishes a cloned child: parent's group, parent's child list, global
/// tables.
pub(super) fn publish_child(parent: &Arc<Process>, child: &Arc<Process>) {
    let group = parent.process_group().expect("parent has no group");

    let mut process_table_mut = table::process_table_mut();
    let mut group_inner = group.inner.lock();
    let mut child_group_mut = child.process_group.lock();
    let mut children_mut = parent.children.lock();

    *child.parent.lock() = Arc::downgrade(parent);
    children_mut.insert(child.pid(), child.clone());
    group_inner.processes.insert(child.pid(), child.clone());
    *child_group_mut = Arc::downgrade(&group);
    process_table_mut.insert(child.pid(), child.clone());

    let mut thread_table_mut = table::thread_table_mut();
    for thread in child.threads.lock().iter() {
        thread_table_mut.insert(thread.tid(), thread.clone());
    }
}

/// Duplicates `parent` into an unpublished child process, the core of the
/// non-`CLONE_THREAD` clone path.
pub(super) fn proc_create_duplicate(
    parent: &Arc<Process>,
    thread: &Arc<Thread>,
    flags: super::clone::CloneFlags,
) -> Result<(Arc<Process>, Arc<Thread>)> {
    use super::clone::CloneFlags;

    let vm = if flags.contains(CloneFlags::CLONE_VM) {
        parent.vm()
    } else {
        parent.vm().dup()?
    };

    let pid = allocate_id();
    let child = Process::new(pid, &parent.name(), vm, parent.entry());

    // Open files always share their descriptions, one refcount bump each.
    *child.files.write() = parent.files.read().duplicate();
    *child.credentials.lock() = parent.credentials();
    *child.umask.lock() = parent.umask();
    *child.root.lock() = parent.root();
    *child.cwd.lock() = parent.cwd();
    *child.sig_dispositions.lock() = *parent.sig_dispositions.lock();
    *child.resource_limits.lock() = parent.resource_limits.lock().clone();
    child.set_nice(parent.nice());

    let child_thread = super::clone::thread_duplicate(thread, pid)?;
    child_thread.set_process(&child);
    child.threads.lock().push(child_thread.clone());

    Ok((child, child_thread))
}

/// Unlinks a dead process from every global structure. The object itself
/// dies when the last `Arc` drops.
pub(crate) fn unlink_process(process: &Arc<Process>) {
    // Lock order mirrors publication.
    let mut session_table_mut = table::session_table_mut();
    let mut group_table_mut = table::group_table_mut();
    let mut process_table_mut = table::process_table_mut();

    process_table_mut.remove(&process.pid());

    {
        let mut thread_table_mut = table::thread_table_mut();
        for thread in process.threads.lock().iter() {
            thread_table_mut.remove(&thread.tid());
        }
    }

    if let Some(parent) = process.parent() {
        parent.children.lock().remove(&process.pid());
    }

    let group = process.process_group.lock().upgrade();
    if let Some(group) = group {
        let session = group.session();
        let mut group_inner = group.inner.lock();
        group_inner.remove_process(&process.pid());
        *process.process_group.lock() = Weak::new();
        if group_inner.is_empty() {
            group_table_mut.remove(&group.pgid());
            if let Some(session) = session {
                let mut session_inner = session.inner.lock();
                session_inner.remove_process(process);
                session_inner.remove_process_group(&group.pgid());
                if session_inner.is_empty() {
                    session_table_mut.remove(&session.sid());
                }
            }
        }
    }
}

// *********** Public constructors ***********

/// Creates a kernel process running `entry` with `PRI_KERN` priority.
pub fn kproc_create(
    name: &str,
    entry: u64,
    argv: &[&str],
    envp: &[&str],
) -> Result<Arc<Thread>> {
    let vm = VmSpace::new();
    let (process, thread) = proc_create(name, vm, entry, sched::PRI_KERN)?;
    Native::init_trapframe_kern(&mut thread.tf_user.lock());
    program_loader::push_init_args(&thread, &[], argv, envp, None)?;
    thread.transition(ThreadState::Paused);
    publish_new_session(&process);
    Ok(thread)
}

/// Creates a user process from an executable, delegating segment mapping
/// to the registered program loader.
pub fn uproc_create_elf(
    name: &str,
    file: &Arc<dyn FileLike>,
    argv: &[&str],
    envp: &[&str],
) -> Result<Arc<Thread>> {
    let vm = VmSpace::new();
    let info = program_loader::loader().load(file, &vm)?;
    let (process, thread) = proc_create(name, vm, info.real_entry, sched::PRI_USER)?;
    Native::init_trapframe_user(&mut thread.tf_user.lock());
    let auxv = program_loader::create_auxv(&process, &info)?;
    program_loader::push_init_args(&thread, &[], argv, envp, Some(&auxv))?;
    thread.transition(ThreadState::Paused);
    publish_new_session(&process);
    Ok(thread)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Builds and publishes a bare user process for tests.
    pub fn new_test_process(name: &str) -> (Arc<Process>, Arc<Thread>) {
        let vm = VmSpace::new();
        let (process, thread) = proc_create(name, vm, 0, sched::PRI_USER).unwrap();
        Native::init_trapframe_user(&mut thread.tf_user.lock());
        thread.transition(ThreadState::Running);
        publish_new_session(&process);
        (process, thread)
    }
}
