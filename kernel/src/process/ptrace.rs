// SPDX-License-Identifier: MPL-2.0

//! A minimal ptrace model: attach/detach bookkeeping and the signal-stop
//! handshake the delivery loop performs for traced threads.

use core::sync::atomic::Ordering;

use super::{process::Process, signal::sig_num::SigNum, status};
use crate::{
    prelude::*,
    thread::{PtraceState, Thread},
};

pub const PTRACE_O_EXITKILL: u32 = 0x0010_0000;

/// Attaches `tracee` to `tracer`.
pub fn thread_trace(tracer: &Arc<Process>, tracee: &Arc<Thread>) {
    {
        let mut ptrace = tracee.ptrace.lock();
        ptrace.tracer = Arc::downgrade(tracer);
        ptrace.state = PtraceState::Running;
    }
    tracer.ptrace_tracees.lock().push(Arc::downgrade(tracee));
}

/// Detaches `tracee` from its tracer, if any.
pub fn thread_untrace(tracee: &Arc<Thread>) {
    let tracer = {
        let mut ptrace = tracee.ptrace.lock();
        let tracer = ptrace.tracer.upgrade();
        ptrace.tracer = Weak::new();
        ptrace.state = PtraceState::None;
        tracer
    };
    if let Some(tracer) = tracer {
        tracer
            .ptrace_tracees
            .lock()
            .retain(|t| t.upgrade().is_some_and(|t| t.tid() != tracee.tid()));
    }
}

/// Enters a ptrace stop: reports `signum` through the wstatus, wakes the
/// tracer's wait4 and parks until the tracer resumes us.
pub fn thread_ptrace_stop(thread: &Arc<Thread>, signum: SigNum) {
    let tracer = {
        let mut ptrace = thread.ptrace.lock();
        ptrace.state = PtraceState::Stopped;
        ptrace.tracer.upgrade()
    };
    thread
        .wstatus
        .store(status::wstatus_stopped(signum), Ordering::Relaxed);
    if let Some(tracer) = tracer {
        let _ = super::exit::proc_wakeup_wait(&tracer, thread);
    }
    // Parks until the tracer flips the state back; the short timeout only
    // re-checks the state, it does not end the stop.
    while thread.ptrace.lock().state == PtraceState::Stopped {
        let _ = thread
            .ptrace_waitq
            .clone()
            .wait(thread, Some(Duration::from_millis(1)));
    }
}

/// Resumes a ptrace-stopped thread, optionally replacing the pending
/// signal set the tracer inspected.
pub fn thread_ptrace_cont(thread: &Arc<Thread>) {
    {
        let mut ptrace = thread.ptrace.lock();
        if ptrace.state == PtraceState::Stopped {
            ptrace.state = PtraceState::Running;
        }
    }
    thread.ptrace_waitq.wake_all(0);
}
