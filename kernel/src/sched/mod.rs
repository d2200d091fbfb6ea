// SPDX-License-Identifier: MPL-2.0

//! The scheduler surface the process core interacts with: a priority run
//! queue, per-CPU idle threads, CPU-time accounting and the load average.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::{
    cpu::Cpu,
    prelude::*,
    thread::{Thread, ThreadState},
    time,
};

/// Priority of kernel service threads.
pub const PRI_KERN: u8 = 16;
/// Priority of freshly created user threads.
pub const PRI_USER: u8 = 128;
/// Priority of the per-CPU idle threads; nothing may be lower.
pub const PRI_IDLE: u8 = 255;

static RUN_QUEUE: SpinLock<Vec<Arc<Thread>>> = SpinLock::new(Vec::new());
static RESCHED_COUNT: AtomicU64 = AtomicU64::new(0);

/// Makes `thread` runnable.
pub fn sched_run(thread: &Arc<Thread>) {
    if thread.is_zombie() {
        return;
    }
    thread.transition(ThreadState::Paused);
    let mut queue = RUN_QUEUE.lock();
    if queue.iter().any(|t| t.tid() == thread.tid()) {
        return;
    }
    let pos = queue
        .iter()
        .position(|t| t.priority() > thread.priority())
        .unwrap_or(queue.len());
    queue.insert(pos, thread.clone());
}

/// Removes `thread` from the run queue if present.
pub fn sched_dequeue(thread: &Arc<Thread>) {
    RUN_QUEUE.lock().retain(|t| t.tid() != thread.tid());
}

/// Picks the best runnable thread whose affinity allows `cpu`.
pub fn pick_next(cpu: &Cpu) -> Option<Arc<Thread>> {
    let mut queue = RUN_QUEUE.lock();
    let pos = queue
        .iter()
        .position(|t| t.affinity().contains(cpu.id))?;
    Some(queue.remove(pos))
}

/// Requests a reschedule of the current CPU.
pub fn resched() {
    RESCHED_COUNT.fetch_add(1, Ordering::SeqCst);
}

pub fn resched_count() -> u64 {
    RESCHED_COUNT.load(Ordering::SeqCst)
}

/// Creates and pins the idle thread of `cpu`.
pub fn setup_idle_thread(cpu: &Cpu) -> Arc<Thread> {
    let idle = Thread::alloc(crate::thread::allocate_id(), PRI_IDLE);
    let mut mask = crate::cpu::CpuMask::empty();
    mask.set(cpu.id);
    idle.set_affinity(mask);
    idle.transition(ThreadState::Running);
    cpu.set_idle_thread(idle.clone());
    idle
}

fn proc_time_diff(cpu: &Cpu) -> Duration {
    let now = time::now();
    let mut last = cpu.last_proc_time.lock();
    let diff = now.saturating_sub(*last);
    *last = now;
    diff
}

fn charge(counter: &AtomicU64, diff: Duration) {
    counter.fetch_add(diff.as_nanos() as u64, Ordering::Relaxed);
}

/// Accounts time on every kernel entry. At nest level 1 the elapsed slice
/// ran in user mode (or idle, on the idle thread); deeper nesting means
/// the slice was kernel time.
pub fn add_time_enter(cpu: &Cpu) {
    let Some(thread) = cpu.current_thread() else {
        return;
    };
    let diff = proc_time_diff(cpu);
    if thread.tf_nest_level.load(Ordering::Relaxed) == 1 {
        charge(&thread.stats.utime_ns, diff);
        if let Some(process) = thread.weak_process().upgrade() {
            charge(&process.stats.utime_ns, diff);
        }
        if cpu.is_idle() {
            charge(&cpu.idle_time_ns, diff);
        } else {
            charge(&cpu.user_time_ns, diff);
        }
    } else {
        charge(&thread.stats.stime_ns, diff);
        if let Some(process) = thread.weak_process().upgrade() {
            charge(&process.stats.stime_ns, diff);
        }
        charge(&cpu.sys_time_ns, diff);
    }
}

/// Accounts the kernel slice on every return to user mode.
pub fn add_time_leave(cpu: &Cpu) {
    let Some(thread) = cpu.current_thread() else {
        return;
    };
    let diff = proc_time_diff(cpu);
    charge(&thread.stats.stime_ns, diff);
    if let Some(process) = thread.weak_process().upgrade() {
        charge(&process.stats.stime_ns, diff);
    }
    charge(&cpu.sys_time_ns, diff);
}

/// One-second EWMA decay/charge pairs: `65536 / e^(1 / (60 * N))` for
/// N in {1, 5, 15} minutes, in 16.16 fixed point.
const LOADAVG_FACTORS: [(u64, u64); 3] = [(64452, 1084), (65317, 219), (65463, 73)];

/// Updates the per-CPU load averages once a second of wall time passed.
pub fn update_loadavg(cpu: &Cpu) {
    update_loadavg_at(cpu, time::now());
}

pub fn update_loadavg_at(cpu: &Cpu, now: Duration) {
    {
        let mut loadavg_time = cpu.loadavg_time.lock();
        if now.saturating_sub(*loadavg_time) < Duration::from_secs(1) {
            return;
        }
        *loadavg_time += Duration::from_secs(1);
    }

    let idle_utime = cpu
        .idle_thread()
        .map(|t| Duration::from_nanos(t.stats.utime_ns.load(Ordering::Relaxed)))
        .unwrap_or(Duration::ZERO);
    let idle_diff = {
        let mut last_idle = cpu.loadavg_last_idle.lock();
        let diff = idle_utime.saturating_sub(*last_idle);
        *last_idle = idle_utime;
        diff
    };

    // A fully idle second contributes 0; a fully busy one contributes the
    // whole 65536.
    let delta = if idle_diff.as_secs() > 0 {
        0
    } else {
        let scaled = idle_diff.subsec_nanos() as u64 / (1_000_000_000 / 65536);
        if scaled > 65536 {
            0
        } else {
            65536 - scaled
        }
    };

    for (slot, (decay, charge)) in cpu.loadavg.iter().zip(LOADAVG_FACTORS) {
        let old = slot.load(Ordering::Relaxed) as u64;
        slot.store(
            (((old * decay) + delta * charge) >> 16) as u32,
            Ordering::Relaxed,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{cpu, thread::allocate_id};

    #[test]
    fn run_queue_orders_by_priority() {
        let lo = Thread::alloc(allocate_id(), PRI_USER);
        let hi = Thread::alloc(allocate_id(), PRI_KERN);
        sched_run(&lo);
        sched_run(&hi);
        {
            let queue = RUN_QUEUE.lock();
            let pos_hi = queue.iter().position(|t| t.tid() == hi.tid()).unwrap();
            let pos_lo = queue.iter().position(|t| t.tid() == lo.tid()).unwrap();
            assert!(pos_hi < pos_lo);
        }
        sched_dequeue(&lo);
        sched_dequeue(&hi);
    }

    #[test]
    fn dequeue_removes() {
        let t = Thread::alloc(allocate_id(), PRI_USER);
        sched_run(&t);
        sched_dequeue(&t);
        assert!(!RUN_QUEUE.lock().iter().any(|q| q.tid() == t.tid()));
    }

    #[test]
    fn loadavg_busy_second_charges() {
        let cpu = cpu::cpu(0);
        // No idle thread progress at all: the CPU looked fully busy.
        let base = *cpu.loadavg_time.lock();
        update_loadavg_at(cpu, base + Duration::from_secs(2));
        let one = cpu.loadavg[0].load(Ordering::Relaxed) as u64;
        assert!(one > 0);
        // 1-minute average must move faster than the 15-minute one.
        let fifteen = cpu.loadavg[2].load(Ordering::Relaxed) as u64;
        assert!(one >= fifteen);
    }
}
