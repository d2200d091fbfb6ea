// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;
use core::sync::atomic::Ordering;

use super::{process, status::ProcessState, Pgid, Pid, Process};
use crate::{prelude::*, thread::Thread};

bitflags! {
    pub struct WaitOptions: u32 {
        const WNOHANG    = 0x1;
        const WUNTRACED  = 0x2;
        const WCONTINUED = 0x8;
    }
}

/// Which children a `wait4` call is willing to reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessFilter {
    Any,
    WithPid(Pid),
    WithPgid(Pgid),
}

impl ProcessFilter {
    /// Decodes the `pid` argument of `wait4`.
    pub fn from_wait_pid(pid: i32, caller: &Arc<Process>) -> Self {
        match pid {
            -1 => Self::Any,
            0 => Self::WithPgid(caller.pgid()),
            p if p > 0 => Self::WithPid(p as Pid),
            p => Self::WithPgid((-p) as Pgid),
        }
    }

    fn matches(&self, child: &Arc<Process>) -> bool {
        match self {
            Self::Any => true,
            Self::WithPid(pid) => child.pid() == *pid,
            Self::WithPgid(pgid) => child.pgid() == *pgid,
        }
    }
}

/// Waits for a child to change state.
///
/// Returns `(0, 0)` for `WNOHANG` with nothing to report. A reaped zombie
/// is unlinked from the global tables and the caller's child list before
/// the call returns.
pub fn wait4(
    thread: &Arc<Thread>,
    filter: ProcessFilter,
    options: WaitOptions,
) -> Result<(Pid, i32)> {
    let process = thread.process();
    if let Some(res) = scan_children(&process, filter, options) {
        return res;
    }
    if options.contains(WaitOptions::WNOHANG) {
        return Ok((0, 0));
    }
    // Parks until a child posts a state change; a signal interrupts with
    // EINTR, which every blocking syscall propagates.
    process
        .wait_waitq
        .clone()
        .wait_until(thread, || scan_children(&process, filter, options), None)?
}

fn scan_children(
    process: &Arc<Process>,
    filter: ProcessFilter,
    options: WaitOptions,
) -> Option<Result<(Pid, i32)>> {
    let children: Vec<Arc<Process>> = process
        .children()
        .lock()
        .values()
        .filter(|c| filter.matches(c))
        .cloned()
        .collect();
    if children.is_empty() {
        return Some(Err(Error::with_message(
            Errno::ECHILD,
            "no matching children to wait for",
        )));
    }

    for child in children.iter() {
        let leader = child.leader_thread();
        if !leader.waitable.load(Ordering::Acquire) {
            continue;
        }
        match child.state() {
            ProcessState::Zombie => {
                let wstatus = leader.wstatus.load(Ordering::Relaxed);
                leader.waitable.store(false, Ordering::Release);
                process::unlink_process(child);
                return Some(Ok((child.pid(), wstatus)));
            }
            ProcessState::Stopped if options.contains(WaitOptions::WUNTRACED) => {
                let wstatus = leader.wstatus.load(Ordering::Relaxed);
                leader.waitable.store(false, Ordering::Release);
                return Some(Ok((child.pid(), wstatus)));
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::{
        clone::{uproc_clone, CloneFlags},
        exit::proc_exit,
        process::test_util::new_test_process,
        process::unlink_process,
        signal::{constants::SIGUSR1, thread_signal},
        status, table,
    };

    #[test]
    fn wnohang_with_running_child() {
        let (parent, parent_thread) = new_test_process("wait-nohang");
        let child_thread = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
        let child = child_thread.process();

        let res = wait4(&parent_thread, ProcessFilter::Any, WaitOptions::WNOHANG).unwrap();
        assert_eq!(res, (0, 0));

        proc_exit(&child, status::wstatus_exited(9)).unwrap();
        let (pid, st) = wait4(&parent_thread, ProcessFilter::Any, WaitOptions::WNOHANG).unwrap();
        assert_eq!(pid, child.pid());
        assert_eq!(status::wexitstatus(st), 9);
        // Reaped: gone from the global table and the child list.
        assert!(table::get_process(child.pid()).is_none());
        assert!(parent.get_child(child.pid()).is_none());

        unlink_process(&parent);
    }

    #[test]
    fn no_children_is_echild() {
        let (process, thread) = new_test_process("wait-echild");
        let err = wait4(&thread, ProcessFilter::Any, WaitOptions::empty()).unwrap_err();
        assert_eq!(err.error(), Errno::ECHILD);
        unlink_process(&process);
    }

    #[test]
    fn blocking_wait_returns_exited_child() {
        let (parent, parent_thread) = new_test_process("wait-block");
        let child_thread = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
        let child = child_thread.process();
        let child_pid = child.pid();

        let pt = parent_thread.clone();
        let join = std::thread::spawn(move || wait4(&pt, ProcessFilter::Any, WaitOptions::empty()));
        while parent.wait_waitq.is_empty() {
            std::thread::yield_now();
        }
        proc_exit(&child, status::wstatus_exited(7)).unwrap();

        let (pid, st) = join.join().unwrap().unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status::wexitstatus(st), 7);
        unlink_process(&parent);
    }

    #[test]
    fn signal_interrupts_blocking_wait() {
        let (parent, parent_thread) = new_test_process("wait-eintr");
        let _child = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();

        let pt = parent_thread.clone();
        let join = std::thread::spawn(move || wait4(&pt, ProcessFilter::Any, WaitOptions::empty()));
        while parent.wait_waitq.is_empty() {
            std::thread::yield_now();
        }
        thread_signal(&parent_thread, SIGUSR1).unwrap();

        let err = join.join().unwrap().unwrap_err();
        assert_eq!(err.error(), Errno::EINTR);

        let child = _child.process();
        unlink_process(&child);
        unlink_process(&parent);
    }

    #[test]
    fn pid_filter_selects_one_child() {
        let (parent, parent_thread) = new_test_process("wait-filter");
        let c1 = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
        let c2 = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
        let p1 = c1.process();
        let p2 = c2.process();

        proc_exit(&p1, status::wstatus_exited(1)).unwrap();
        proc_exit(&p2, status::wstatus_exited(2)).unwrap();

        let (pid, st) = wait4(
            &parent_thread,
            ProcessFilter::WithPid(p2.pid()),
            WaitOptions::empty(),
        )
        .unwrap();
        assert_eq!(pid, p2.pid());
        assert_eq!(status::wexitstatus(st), 2);

        let (pid, st) = wait4(&parent_thread, ProcessFilter::Any, WaitOptions::empty()).unwrap();
        assert_eq!(pid, p1.pid());
        assert_eq!(status::wexitstatus(st), 1);

        unlink_process(&parent);
    }
}
