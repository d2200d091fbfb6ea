// SPDX-License-Identifier: MPL-2.0

use super::{exit::proc_wakeup_wait, process::Process, status::ProcessState};
use crate::{
    cpu::{self, CpuMask},
    prelude::*,
    sched,
    thread::{Thread, ThreadState},
};
use core::sync::atomic::Ordering;

/// Parks every thread of an alive process and notifies the parent.
pub fn proc_stop(process: &Arc<Process>) -> Result<()> {
    if process.state() != ProcessState::Alive {
        return Ok(());
    }
    process.set_state(ProcessState::Stopped);

    let current = cpu::current_cpu().current_thread();
    let mut sync_mask = CpuMask::empty();
    let mut sync_required = false;
    let threads = process.threads().lock().clone();
    for thread in threads.iter() {
        let is_current = current
            .as_ref()
            .is_some_and(|cur| cur.tid() == thread.tid());
        if is_current {
            continue;
        }
        match thread.state() {
            ThreadState::Running => {
                let cpu_id = thread.running_cpu.load(Ordering::Relaxed);
                if cpu_id >= 0 {
                    sync_mask.set(cpu_id as u32);
                    sync_required = true;
                }
                thread.transition(ThreadState::Stopped);
            }
            ThreadState::Paused => {
                thread_stop(thread)?;
            }
            // Waiting threads stay parked; they stop on wakeup.
            ThreadState::Waiting | ThreadState::Stopped | ThreadState::Zombie => {}
        }
    }
    if sync_required {
        cpu::cpu_sync(sync_mask);
    }

    if let Some(parent) = process.parent() {
        proc_wakeup_wait(&parent, &process.leader_thread())?;
    }
    Ok(())
}

/// Resumes a stopped process.
pub fn proc_cont(process: &Arc<Process>) -> Result<()> {
    if process.state() != ProcessState::Stopped {
        return Ok(());
    }
    process.set_state(ProcessState::Alive);
    let threads = process.threads().lock().clone();
    for thread in threads.iter() {
        thread_cont(thread)?;
    }
    Ok(())
}

pub fn thread_stop(thread: &Arc<Thread>) -> Result<()> {
    if thread.state() == ThreadState::Stopped {
        return Ok(());
    }
    thread.transition(ThreadState::Stopped);
    sched::sched_dequeue(thread);
    Ok(())
}

pub fn thread_cont(thread: &Arc<Thread>) -> Result<()> {
    if thread.state() != ThreadState::Stopped {
        return Ok(());
    }
    sched::sched_run(thread);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::process::{test_util::new_test_process, unlink_process};
    use crate::process::signal::constants::SIGCHLD;

    #[test]
    fn stop_then_cont_round_trip() {
        let (process, thread) = new_test_process("stop-cont");
        thread.transition(ThreadState::Paused);

        proc_stop(&process).unwrap();
        assert_eq!(process.state(), ProcessState::Stopped);
        assert_eq!(thread.state(), ThreadState::Stopped);

        proc_cont(&process).unwrap();
        assert_eq!(process.state(), ProcessState::Alive);
        assert_eq!(thread.state(), ThreadState::Paused);

        unlink_process(&process);
    }

    #[test]
    fn stop_notifies_parent_with_sigchld() {
        let (parent, parent_thread) = new_test_process("stop-parent");
        let child_thread = crate::process::clone::uproc_clone(
            &parent_thread,
            crate::process::clone::CloneFlags::empty(),
        )
        .unwrap();
        let child = child_thread.process();

        proc_stop(&child).unwrap();
        assert!(parent_thread.sig_pending.contains(SIGCHLD));
        assert!(child.leader_thread().waitable.load(Ordering::Relaxed));

        unlink_process(&child);
        unlink_process(&parent);
    }
}
