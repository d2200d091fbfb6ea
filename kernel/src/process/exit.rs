// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::Ordering;

use super::{
    process::{is_init_process, Process},
    ptrace, signal,
    signal::constants::{SIGCHLD, SIGKILL},
    status::ProcessState,
    vfork,
};
use crate::{
    cpu::{self, CpuMask},
    prelude::*,
    sched,
    thread::{Thread, ThreadState},
};

/// Terminates the whole process with the given wstatus.
///
/// Threads running on other CPUs are collected into a mask and a cross-CPU
/// sync is issued before any resource is torn down; waiting threads are
/// kicked out of their waitqueues with `-EINTR` and die on their way back
/// to user mode.
pub fn proc_exit(process: &Arc<Process>, wstatus: i32) -> Result<()> {
    if is_init_process(process) {
        panic!("init killed ({})", wstatus);
    }
    if process.is_zombie() {
        return Ok(());
    }

    process
        .leader_thread()
        .wstatus
        .store(wstatus, Ordering::Relaxed);
    process.set_state(ProcessState::Zombie);

    let current = cpu::current_cpu().current_thread();
    let mut sync_mask = CpuMask::empty();
    let mut sync_required = false;
    let threads = process.threads().lock().clone();
    for thread in threads.iter() {
        let is_current = current
            .as_ref()
            .is_some_and(|cur| cur.tid() == thread.tid());
        // The zombie state must be visible before any wakeup so a woken
        // waiter cannot transition itself back to running.
        let prior_state = thread.state();
        sched::sched_dequeue(thread);
        thread.transition(ThreadState::Zombie);
        ptrace::thread_untrace(thread);
        if is_current {
            continue;
        }
        match prior_state {
            ThreadState::Running => {
                let cpu_id = thread.running_cpu.load(Ordering::Relaxed);
                if cpu_id >= 0 {
                    sync_mask.set(cpu_id as u32);
                    sync_required = true;
                }
            }
            ThreadState::Waiting => {
                // The woken thread must unwind its own kernel stack; it
                // finds the zombie process state on the way out.
                if let Some(waitq) = thread.waitq() {
                    waitq.wake_thread(thread, -(Errno::EINTR as i32));
                }
            }
            ThreadState::Paused | ThreadState::Stopped | ThreadState::Zombie => {}
        }
    }
    if sync_required {
        cpu::cpu_sync(sync_mask);
    }

    // Release our tracees; EXITKILL ones die with us.
    let tracees: Vec<_> = process.ptrace_tracees.lock().drain(..).collect();
    for tracee in tracees.iter().filter_map(Weak::upgrade) {
        if let Some(waitq) = tracee.waitq() {
            if Arc::ptr_eq(&waitq, &tracee.ptrace_waitq) {
                waitq.wake_thread(&tracee, 0);
            }
        }
        let exitkill = tracee.ptrace.lock().options & ptrace::PTRACE_O_EXITKILL != 0;
        ptrace::thread_untrace(&tracee);
        if exitkill {
            if let Some(tracee_proc) = tracee.weak_process().upgrade() {
                signal::proc_signal(&tracee_proc, SIGKILL)?;
            }
        }
    }

    if let Some(peer) = process.vfork_rel() {
        vfork::proc_wakeup_vfork(process, &peer);
    }

    let files = process.files().write().close_all();
    drop(files);

    {
        let vm = process.vm();
        if Arc::strong_count(&vm) == 2 {
            // Only our own reference (plus this probe) is left.
            vm.arch_cleanup();
        }
    }

    if let Some(parent) = process.parent() {
        proc_wakeup_wait(&parent, &process.leader_thread())?;
    }

    if current.is_some_and(|cur| cur.weak_process().upgrade().is_some_and(|p| p.pid() == process.pid())) {
        sched::resched();
    }
    Ok(())
}

/// Terminates one thread; the leader takes the whole process with it.
pub fn thread_exit(thread: &Arc<Thread>, wstatus: i32) -> Result<()> {
    let process = thread.process();
    if thread.tid() == process.leader_thread().tid() {
        return proc_exit(&process, wstatus);
    }
    thread.wstatus.store(wstatus, Ordering::Relaxed);
    sched::sched_dequeue(thread);
    thread.transition(ThreadState::Zombie);
    ptrace::thread_untrace(thread);
    proc_wakeup_wait(&process, thread)?;
    let current = cpu::current_cpu().current_thread();
    if current.is_some_and(|cur| cur.tid() == thread.tid()) {
        sched::resched();
    }
    Ok(())
}

/// Marks `source` waitable, wakes `process`'s wait4 sleepers and posts
/// SIGCHLD.
pub(super) fn proc_wakeup_wait(process: &Arc<Process>, source: &Arc<Thread>) -> Result<()> {
    source.waitable.store(true, Ordering::Release);
    process.wait_waitq.wake_all(0);
    signal::proc_signal(process, SIGCHLD)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        fs::MemFile,
        process::{
            clone::{uproc_clone, CloneFlags},
            process::test_util::new_test_process,
            process::unlink_process,
            signal::constants::SIGCHLD,
            status,
        },
        sync::WaitQueue,
    };

    #[test]
    fn exit_reclaims_files_and_wakes_parent() {
        let (parent, parent_thread) = new_test_process("exit-parent");
        let child_thread = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
        let child = child_thread.process();

        let file = MemFile::new(vec![0u8; 4]);
        child.alloc_fd(file.clone(), false).unwrap();
        let refs_before = Arc::strong_count(&file);

        proc_exit(&child, status::wstatus_exited(3)).unwrap();

        assert!(child.is_zombie());
        assert!(child_thread.is_zombie());
        assert_eq!(Arc::strong_count(&file), refs_before - 1);
        assert!(child_thread.waitable.load(Ordering::Relaxed));
        // Parent got SIGCHLD.
        assert!(parent_thread.sig_pending.contains(SIGCHLD));

        unlink_process(&child);
        unlink_process(&parent);
    }

    #[test]
    fn exit_wakes_waiting_threads_with_eintr() {
        let (process, leader) = new_test_process("exit-waiters");
        let waitq = Arc::new(WaitQueue::new());
        let waiter_thread = {
            let process = process.clone();
            let waitq_clone = waitq.clone();
            let t2 = crate::process::clone::uthread_clone(&leader, CloneFlags::CLONE_VM).unwrap();
            let t2c = t2.clone();
            let join = std::thread::spawn(move || {
                let _ = process;
                waitq_clone.wait(&t2c, None)
            });
            while waitq.is_empty() {
                std::thread::yield_now();
            }
            (t2, join)
        };

        proc_exit(&process, status::wstatus_exited(0)).unwrap();
        let res = waiter_thread.1.join().unwrap();
        assert_eq!(res.unwrap_err().error(), Errno::EINTR);
        assert!(waiter_thread.0.is_zombie());
        unlink_process(&process);
    }

    #[test]
    fn exit_collects_running_cpus() {
        let (process, leader) = new_test_process("exit-ipi");
        let other = crate::process::clone::uthread_clone(&leader, CloneFlags::CLONE_VM).unwrap();
        other.transition(ThreadState::Running);
        other.running_cpu.store(0, Ordering::Relaxed);
        let syncs_before = cpu::sync_count();
        proc_exit(&process, status::wstatus_exited(0)).unwrap();
        assert!(cpu::sync_count() > syncs_before);
        assert!(cpu::last_sync_mask().contains(0));
        unlink_process(&process);
    }

    #[test]
    fn last_vm_user_triggers_arch_cleanup() {
        let (process, _t) = new_test_process("exit-vm");
        proc_exit(&process, status::wstatus_exited(0)).unwrap();
        assert!(process.vm().arch_cleaned());
        unlink_process(&process);
    }

    #[test]
    fn secondary_thread_exit_leaves_process_alive() {
        let (process, leader) = new_test_process("thread-exit");
        let second = crate::process::clone::uthread_clone(&leader, CloneFlags::CLONE_VM).unwrap();
        thread_exit(&second, status::wstatus_exited(0)).unwrap();
        assert!(second.is_zombie());
        assert!(!process.is_zombie());
        assert!(!leader.is_zombie());
        unlink_process(&process);
    }
}
