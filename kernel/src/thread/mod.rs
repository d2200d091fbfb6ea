// SPDX-License-Identifier: MPL-2.0

//! Kernel threads: the schedulable half of a process.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::{
    arch::Trapframe,
    cpu::CpuMask,
    prelude::*,
    process::{
        signal::sig_mask::AtomicSigMask,
        signal::sig_stack::SigStack,
        Process,
    },
    sync::WaitQueue,
};

pub type Tid = u32;

/// Default user stack size of a fresh thread.
pub const USER_STACK_SIZE: usize = 1024 * 1024;
/// Kernel interrupt stack size backing each thread.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

static ID_ALLOCATOR: AtomicU32 = AtomicU32::new(0);

/// Allocates a fresh pid/tid. Ids are shared between processes and
/// threads: a process leader's tid equals its pid.
pub fn allocate_id() -> Tid {
    ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst) + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Paused = 0,
    Running = 1,
    Waiting = 2,
    Stopped = 3,
    Zombie = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PtraceState {
    None = 0,
    Syscall = 1,
    Running = 2,
    Stopped = 3,
}

#[derive(Default)]
pub struct ThreadStats {
    pub utime_ns: AtomicU64,
    pub stime_ns: AtomicU64,
    pub faults: AtomicU64,
    pub nsignals: AtomicU64,
}

/// The ptrace attachment of one thread.
pub struct PtraceInfo {
    pub state: PtraceState,
    pub tracer: Weak<Process>,
    pub options: u32,
}

impl Default for PtraceInfo {
    fn default() -> Self {
        Self {
            state: PtraceState::None,
            tracer: Weak::new(),
            options: 0,
        }
    }
}

/// The user stack carved out of the owning process's address space.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserStack {
    pub base: Vaddr,
    pub size: usize,
}

pub struct Thread {
    tid: Tid,
    process: SpinLock<Weak<Process>>,

    pub tf_user: SpinLock<Trapframe>,
    pub tf_kern: SpinLock<Trapframe>,
    pub tf_nest_level: AtomicU32,

    /// Backing for the per-thread interrupt stack.
    #[allow(dead_code)]
    int_stack: Box<[u8]>,
    user_stack: SpinLock<UserStack>,

    pub sig_mask: AtomicSigMask,
    pub sig_pending: AtomicSigMask,
    pub sig_altstack: SpinLock<SigStack>,
    pub sig_altstack_nest: AtomicU32,

    tls: AtomicU64,
    affinity: SpinLock<CpuMask>,
    priority: AtomicU8,
    state: AtomicU8,

    pub ptrace: SpinLock<PtraceInfo>,
    pub ptrace_waitq: Arc<WaitQueue>,

    waitq: SpinLock<Option<Weak<WaitQueue>>>,
    pub wstatus: AtomicI32,
    pub waitable: AtomicBool,
    pub running_cpu: AtomicI32,

    pub stats: ThreadStats,
}

impl Thread {
    pub(crate) fn alloc(tid: Tid, priority: u8) -> Arc<Self> {
        Arc::new(Self {
            tid,
            process: SpinLock::new(Weak::new()),
            tf_user: SpinLock::new(Trapframe::default()),
            tf_kern: SpinLock::new(Trapframe::default()),
            tf_nest_level: AtomicU32::new(0),
            int_stack: vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice(),
            user_stack: SpinLock::new(UserStack::default()),
            sig_mask: AtomicSigMask::new_empty(),
            sig_pending: AtomicSigMask::new_empty(),
            sig_altstack: SpinLock::new(SigStack::default()),
            sig_altstack_nest: AtomicU32::new(0),
            tls: AtomicU64::new(0),
            affinity: SpinLock::new(CpuMask::full()),
            priority: AtomicU8::new(priority),
            state: AtomicU8::new(ThreadState::Paused as u8),
            ptrace: SpinLock::new(PtraceInfo::default()),
            ptrace_waitq: Arc::new(WaitQueue::new()),
            waitq: SpinLock::new(None),
            wstatus: AtomicI32::new(0),
            waitable: AtomicBool::new(false),
            running_cpu: AtomicI32::new(-1),
            stats: ThreadStats::default(),
        })
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn process(&self) -> Arc<Process> {
        self.process
            .lock()
            .upgrade()
            .expect("thread outlived its process")
    }

    pub fn weak_process(&self) -> Weak<Process> {
        self.process.lock().clone()
    }

    pub(crate) fn set_process(&self, process: &Arc<Process>) {
        *self.process.lock() = Arc::downgrade(process);
    }

    pub fn state(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            0 => ThreadState::Paused,
            1 => ThreadState::Running,
            2 => ThreadState::Waiting,
            3 => ThreadState::Stopped,
            _ => ThreadState::Zombie,
        }
    }

    pub fn transition(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == ThreadState::Zombie
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn affinity(&self) -> CpuMask {
        *self.affinity.lock()
    }

    pub fn set_affinity(&self, mask: CpuMask) {
        *self.affinity.lock() = mask;
    }

    pub fn tls(&self) -> u64 {
        self.tls.load(Ordering::Relaxed)
    }

    pub fn set_tls(&self, tls: u64) {
        self.tls.store(tls, Ordering::Relaxed);
    }

    pub fn user_stack(&self) -> UserStack {
        *self.user_stack.lock()
    }

    pub fn set_user_stack(&self, stack: UserStack) {
        *self.user_stack.lock() = stack;
    }

    pub fn waitq(&self) -> Option<Arc<WaitQueue>> {
        self.waitq.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_waitq(&self, waitq: Option<Weak<WaitQueue>>) {
        *self.waitq.lock() = waitq;
    }

    /// Sleeps for `duration`. A full sleep returns `Ok`; a signal cuts it
    /// short with `EINTR`.
    pub fn sleep(self: &Arc<Self>, duration: Duration) -> Result<()> {
        let waitq = Arc::new(WaitQueue::new());
        match waitq.wait(self, Some(duration)) {
            Err(e) if e.error() == Errno::ETIMEDOUT => Ok(()),
            other => other,
        }
    }

    #[cfg(test)]
    pub fn new_for_test(tid: Tid) -> Arc<Self> {
        let thread = Self::alloc(tid, crate::sched::PRI_USER);
        thread.transition(ThreadState::Running);
        thread
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("state", &self.state())
            .finish()
    }
}
