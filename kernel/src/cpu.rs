// SPDX-License-Identifier: MPL-2.0

//! Per-CPU bookkeeping: the running thread, the pinned idle thread, time
//! accumulators and the load-average triple.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Once;

use crate::{prelude::*, thread::Thread};

/// A set of CPU ids (up to 64 CPUs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask(u64);

impl CpuMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn full() -> Self {
        Self(u64::MAX)
    }

    pub fn set(&mut self, cpu: u32) {
        self.0 |= 1 << cpu;
    }

    pub fn contains(&self, cpu: u32) -> bool {
        self.0 & (1 << cpu) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}

pub struct Cpu {
    pub id: u32,
    current: SpinLock<Option<Arc<Thread>>>,
    idle: SpinLock<Option<Arc<Thread>>>,

    pub last_proc_time: SpinLock<Duration>,
    pub user_time_ns: AtomicU64,
    pub sys_time_ns: AtomicU64,
    pub idle_time_ns: AtomicU64,

    /// 16.16 fixed-point load averages over 1, 5 and 15 minutes.
    pub loadavg: [AtomicU32; 3],
    pub loadavg_time: SpinLock<Duration>,
    pub loadavg_last_idle: SpinLock<Duration>,
}

impl Cpu {
    fn new(id: u32) -> Self {
        Self {
            id,
            current: SpinLock::new(None),
            idle: SpinLock::new(None),
            last_proc_time: SpinLock::new(Duration::ZERO),
            user_time_ns: AtomicU64::new(0),
            sys_time_ns: AtomicU64::new(0),
            idle_time_ns: AtomicU64::new(0),
            loadavg: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            loadavg_time: SpinLock::new(Duration::ZERO),
            loadavg_last_idle: SpinLock::new(Duration::ZERO),
        }
    }

    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current.lock().clone()
    }

    pub fn set_current_thread(&self, thread: Option<Arc<Thread>>) {
        if let Some(thread) = &thread {
            thread.running_cpu.store(self.id as i32, Ordering::Relaxed);
        }
        *self.current.lock() = thread;
    }

    pub fn idle_thread(&self) -> Option<Arc<Thread>> {
        self.idle.lock().clone()
    }

    pub fn set_idle_thread(&self, thread: Arc<Thread>) {
        *self.idle.lock() = Some(thread);
    }

    pub fn is_idle(&self) -> bool {
        match (self.current_thread(), self.idle_thread()) {
            (Some(cur), Some(idle)) => cur.tid() == idle.tid(),
            _ => false,
        }
    }
}

static CPUS: Once<Vec<Cpu>> = Once::new();

/// Brings up the per-CPU state. Effective only once.
pub fn init(num_cpus: u32) {
    CPUS.call_once(|| (0..num_cpus).map(Cpu::new).collect());
}

pub fn cpus() -> &'static [Cpu] {
    CPUS.call_once(|| vec![Cpu::new(0)])
}

pub fn cpu(id: u32) -> &'static Cpu {
    &cpus()[id as usize]
}

/// The CPU executing the caller. Without a real per-CPU register this
/// resolves to the boot CPU; syscall paths that need precision take the
/// CPU explicitly.
pub fn current_cpu() -> &'static Cpu {
    cpu(0)
}

static SYNC_HOOK: Once<fn(CpuMask)> = Once::new();
static LAST_SYNC_MASK: AtomicU64 = AtomicU64::new(0);
static SYNC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Installs the IPI broadcast used by cross-CPU synchronization.
pub fn set_sync_hook(f: fn(CpuMask)) {
    SYNC_HOOK.call_once(|| f);
}

/// Synchronizes with every CPU in `mask` before returning. The interrupt
/// controller driver provides the actual IPI fence via [`set_sync_hook`].
pub fn cpu_sync(mask: CpuMask) {
    LAST_SYNC_MASK.store(mask.bits(), Ordering::SeqCst);
    SYNC_COUNT.fetch_add(1, Ordering::SeqCst);
    if let Some(f) = SYNC_HOOK.get() {
        f(mask);
    }
}

/// The mask passed to the most recent [`cpu_sync`].
pub fn last_sync_mask() -> CpuMask {
    CpuMask(LAST_SYNC_MASK.load(Ordering::SeqCst))
}

pub fn sync_count() -> u64 {
    SYNC_COUNT.load(Ordering::SeqCst)
}
