// SPDX-License-Identifier: MPL-2.0

//! Signal posting and delivery.
//!
//! Posting sets a bit in the target thread's pending set (masked signals
//! are dropped at post time, never at mask-application time) and kicks the
//! thread out of an interruptible wait. Delivery runs on the way back to
//! user mode: default actions are applied directly, user handlers get a
//! frame built on the user (or alternate signal) stack.

pub mod constants;
pub mod sig_action;
pub mod sig_dispositions;
pub mod sig_mask;
pub mod sig_num;
pub mod sig_stack;

use bytemuck_derive::{Pod, Zeroable};
use constants::*;
use sig_action::{SigAction, SigActionFlags, SigDefaultAction};
use sig_mask::SigSet;
use sig_num::SigNum;

use super::{exit, status, stop, Process};
use crate::{
    arch::{ArchSpec, Native, Trapframe},
    prelude::*,
    thread::{PtraceState, Thread, ThreadState},
};

/// The fixed part of `siginfo_t` handed to `SA_SIGINFO` handlers.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SigInfo {
    pub si_signo: i32,
    pub si_errno: i32,
    pub si_code: i32,
    pub si_pid: i32,
    pub si_uid: i32,
    _pad: i32,
    pub si_addr: u64,
}

impl SigInfo {
    pub fn new(signum: SigNum) -> Self {
        Self {
            si_signo: signum.as_u8() as i32,
            ..Default::default()
        }
    }
}

/// Posts `signum` to one specific thread.
///
/// A masked signal is dropped silently. A waiting thread is kicked with
/// `-EINTR` unless it is ptrace-stopped or blocked in vfork.
pub fn thread_signal(thread: &Arc<Thread>, signum: SigNum) -> Result<()> {
    if thread.sig_mask.contains(signum) {
        return Ok(());
    }
    thread.stats.nsignals.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    if let Some(process) = thread.weak_process().upgrade() {
        process
            .stats
            .nsignals
            .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    }
    thread.sig_pending.block(SigSet::from(signum));

    if let Some(waitq) = thread.waitq() {
        let ptrace_stopped = thread.ptrace.lock().state == PtraceState::Stopped;
        let vfork_blocked = thread.state() == ThreadState::Waiting
            && thread
                .weak_process()
                .upgrade()
                .is_some_and(|p| p.vfork_rel().is_some());
        if !ptrace_stopped && !vfork_blocked {
            waitq.wake_thread(thread, -(Errno::EINTR as i32));
        }
    }
    Ok(())
}

/// Posts a process-directed signal to the first thread that does not mask
/// it.
pub fn proc_signal(process: &Arc<Process>, signum: SigNum) -> Result<()> {
    let threads = process.threads().lock().clone();
    for thread in threads.iter() {
        if thread.sig_mask.contains(signum) {
            continue;
        }
        return thread_signal(thread, signum);
    }
    Ok(())
}

/// Delivers pending signals on return to user mode.
///
/// At most one user handler frame is built per call; default dispositions
/// may consume several signals before that.
pub fn handle_pending_signals(thread: &Arc<Thread>) -> Result<()> {
    handle_pending_signals_for::<Native>(thread)
}

pub(crate) fn handle_pending_signals_for<A: ArchSpec>(thread: &Arc<Thread>) -> Result<()> {
    if thread.is_zombie() {
        return Ok(());
    }
    if thread.sig_pending.load().is_empty() {
        return Ok(());
    }
    for raw in MIN_STD_SIG_NUM..=MAX_STD_SIG_NUM {
        let signum = SigNum::from_u8(raw);
        if !thread.sig_pending.contains(signum) {
            continue;
        }
        {
            let ptrace_state = thread.ptrace.lock().state;
            if ptrace_state == PtraceState::Syscall || ptrace_state == PtraceState::Running {
                super::ptrace::thread_ptrace_stop(thread, signum);
                // The tracer may have swallowed the signal while we were
                // stopped.
                if !thread.sig_pending.contains(signum) {
                    continue;
                }
            }
        }
        let outcome = handle_one_signal::<A>(thread, signum)?;
        thread.sig_pending.unblock(SigSet::from(signum));
        if outcome != Handled::Ignored {
            return Ok(());
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Handled {
    Ignored,
    Delivered,
}

fn handle_one_signal<A: ArchSpec>(thread: &Arc<Thread>, signum: SigNum) -> Result<Handled> {
    let process = thread.process();
    let action = process.sig_dispositions().lock().get(signum);
    match action {
        SigAction::Ign => Ok(Handled::Ignored),
        SigAction::Dfl => match SigDefaultAction::from_signum(signum) {
            SigDefaultAction::Ign => Ok(Handled::Ignored),
            SigDefaultAction::Term | SigDefaultAction::Core => {
                // Core dumping is a stub; both classes terminate.
                exit::proc_exit(&process, status::wstatus_signaled(signum))?;
                Ok(Handled::Delivered)
            }
            SigDefaultAction::Cont => {
                stop::proc_cont(&process)?;
                Ok(Handled::Delivered)
            }
            SigDefaultAction::Stop => {
                process
                    .leader_thread()
                    .wstatus
                    .store(status::wstatus_stopped(signum), core::sync::atomic::Ordering::Relaxed);
                stop::proc_stop(&process)?;
                Ok(Handled::Delivered)
            }
        },
        SigAction::User {
            handler_addr,
            flags,
            restorer_addr,
            mask,
        } => {
            let siginfo = SigInfo::new(signum);
            let frame = FrameSpec {
                signum,
                handler_addr,
                flags,
                restorer_addr,
                siginfo,
            };
            if create_signal_stack::<A>(thread, &frame).is_err() {
                // A stack we cannot write is a dead process.
                exit::proc_exit(&process, status::wstatus_signaled(SIGSEGV))?;
                return Ok(Handled::Delivered);
            }
            if flags.contains(SigActionFlags::SA_ONSTACK) {
                thread.sig_altstack.lock().set_on_stack(true);
                thread
                    .sig_altstack_nest
                    .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            }
            let mut new_mask = mask;
            new_mask.remove_signal(SIGKILL);
            new_mask.remove_signal(SIGSTOP);
            if !flags.contains(SigActionFlags::SA_NODEFER) {
                new_mask.add_signal(signum);
            }
            thread.sig_mask.store(new_mask);
            Ok(Handled::Delivered)
        }
    }
}

struct FrameSpec {
    signum: SigNum,
    handler_addr: usize,
    flags: SigActionFlags,
    restorer_addr: usize,
    siginfo: SigInfo,
}

const SIGMASK_SIZE: usize = core::mem::size_of::<u64>();
const TRAPFRAME_SIZE: usize = core::mem::size_of::<Trapframe>();

fn args_on_stack<A: ArchSpec>() -> usize {
    3usize.saturating_sub(A::REGISTER_PARAMETERS)
}

/// The distance from the frame base to the saved trapframe, needed again
/// by `sigreturn`. Arguments are always pushed, exactly so this does not
/// depend on the action's flags.
fn call_stack_size<A: ArchSpec>() -> usize {
    let mut size = args_on_stack::<A>() * core::mem::size_of::<usize>();
    if A::STACK_RETURN_ADDR {
        size += core::mem::size_of::<usize>();
    }
    size
}

/// Builds the signal frame on the user stack and redirects the user
/// trapframe into the handler.
fn create_signal_stack<A: ArchSpec>(thread: &Arc<Thread>, frame: &FrameSpec) -> Result<()> {
    let process = thread.process();
    let vm = process.vm();

    let sp = {
        let altstack = *thread.sig_altstack.lock();
        let nest = thread
            .sig_altstack_nest
            .load(core::sync::atomic::Ordering::Relaxed);
        if nest == 0 && frame.flags.contains(SigActionFlags::SA_ONSTACK) && !altstack.is_disabled()
        {
            altstack
                .sp
                .checked_add(altstack.size)
                .ok_or(Error::with_message(Errno::EFAULT, "sigaltstack overflow"))?
        } else {
            let sp = thread.tf_user.lock().stack_pointer() as usize;
            if sp < A::RED_ZONE {
                return_errno_with_message!(Errno::EFAULT, "stack pointer underflow");
            }
            sp - A::RED_ZONE
        }
    };

    let mut ctx_size = TRAPFRAME_SIZE + SIGMASK_SIZE;
    if frame.flags.contains(SigActionFlags::SA_SIGINFO) {
        ctx_size += core::mem::size_of::<SigInfo>();
    }
    ctx_size += args_on_stack::<A>() * core::mem::size_of::<usize>();
    ctx_size += (sp - ctx_size) % A::STACK_ALIGNMENT;
    if A::STACK_RETURN_ADDR {
        ctx_size += core::mem::size_of::<usize>();
    }
    if sp < ctx_size {
        return_errno_with_message!(Errno::EFAULT, "no room for signal frame");
    }

    let frame_base = sp - ctx_size;
    let ucontext_addr = frame_base + call_stack_size::<A>();
    let siginfo_addr = ucontext_addr + TRAPFRAME_SIZE + SIGMASK_SIZE;
    let with_info = frame.flags.contains(SigActionFlags::SA_SIGINFO);

    let mut dst = frame_base;
    if A::STACK_RETURN_ADDR {
        vm.write_val(dst, &(frame.restorer_addr as u64))?;
        dst += 8;
    }
    if A::REGISTER_PARAMETERS < 1 {
        vm.write_val(dst, &(frame.signum.as_u8() as u64))?;
        dst += 8;
    }
    if A::REGISTER_PARAMETERS < 2 {
        vm.write_val(dst, &(if with_info { siginfo_addr as u64 } else { 0 }))?;
        dst += 8;
    }
    if A::REGISTER_PARAMETERS < 3 {
        vm.write_val(dst, &(if with_info { ucontext_addr as u64 } else { 0 }))?;
        dst += 8;
    }

    let saved_tf = *thread.tf_user.lock();
    vm.write_val(dst, &saved_tf)?;
    dst += TRAPFRAME_SIZE;
    vm.write_val(dst, &thread.sig_mask.load().as_u64().to_le())?;
    dst += SIGMASK_SIZE;
    if with_info {
        vm.write_val(dst, &frame.siginfo)?;
    }

    let mut tf = thread.tf_user.lock();
    tf.set_stack_pointer(frame_base as u64);
    if !A::STACK_RETURN_ADDR {
        tf.set_return_address(frame.restorer_addr as u64);
    }
    if A::REGISTER_PARAMETERS >= 1 {
        tf.set_argument(0, frame.signum.as_u8() as u64);
    }
    if A::REGISTER_PARAMETERS >= 2 {
        tf.set_argument(1, if with_info { siginfo_addr as u64 } else { 0 });
    }
    if A::REGISTER_PARAMETERS >= 3 {
        tf.set_argument(2, if with_info { ucontext_addr as u64 } else { 0 });
    }
    tf.set_instruction_pointer(frame.handler_addr as u64);
    Ok(())
}

/// Restores the pre-delivery trapframe and signal mask.
pub fn sigreturn(thread: &Arc<Thread>) -> Result<()> {
    sigreturn_for::<Native>(thread)
}

pub(crate) fn sigreturn_for<A: ArchSpec>(thread: &Arc<Thread>) -> Result<()> {
    let process = thread.process();
    let vm = process.vm();

    let frame_base = thread.tf_user.lock().stack_pointer() as usize;
    let ucontext_addr = frame_base + call_stack_size::<A>();
    let saved_tf: Trapframe = vm.read_val(ucontext_addr)?;
    let saved_mask = u64::from_le(vm.read_val(ucontext_addr + TRAPFRAME_SIZE)?);

    let mut mask = SigSet::from(saved_mask);
    mask.remove_signal(SIGKILL);
    mask.remove_signal(SIGSTOP);
    thread.sig_mask.store(mask);
    *thread.tf_user.lock() = saved_tf;

    let nest = &thread.sig_altstack_nest;
    if nest.load(core::sync::atomic::Ordering::Relaxed) > 0
        && nest.fetch_sub(1, core::sync::atomic::Ordering::Relaxed) == 1
    {
        thread.sig_altstack.lock().set_on_stack(false);
    }
    Ok(())
}
