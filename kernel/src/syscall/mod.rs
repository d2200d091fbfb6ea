// SPDX-License-Identifier: MPL-2.0

//! The syscall boundary: number table, dispatch, and the errno
//! translation every handler's `Result` goes through.

mod clone;
mod execveat;
mod exit;
mod futex;
mod getpid;
mod getrusage;
mod kill;
mod madvise;
mod nanosleep;
mod priority;
mod ptrace;
mod reboot;
mod rlimit;
mod setpgid;
mod setsid;
mod sigaction;
mod sigaltstack;
mod sigpending;
mod sigprocmask;
mod sigreturn;
mod sigsuspend;
mod times;
mod tls;
mod wait4;

pub use clone::sys_clone;
pub use execveat::sys_execveat;
pub use exit::sys_exit;
pub use futex::sys_futex;
pub use getpid::{sys_getpgid, sys_getpgrp, sys_getpid, sys_getppid, sys_getsid, sys_gettid};
pub use getrusage::sys_getrusage;
pub use kill::sys_kill;
pub use madvise::sys_madvise;
pub use nanosleep::sys_nanosleep;
pub use priority::{sys_getpriority, sys_setpriority};
pub use ptrace::sys_ptrace;
pub use reboot::sys_reboot;
pub use rlimit::{sys_getrlimit, sys_setrlimit};
pub use setpgid::sys_setpgid;
pub use setsid::sys_setsid;
pub use sigaction::sys_sigaction;
pub use sigaltstack::sys_sigaltstack;
pub use sigpending::sys_sigpending;
pub use sigprocmask::sys_sigprocmask;
pub use sigreturn::sys_sigreturn;
pub use sigsuspend::sys_sigsuspend;
pub use times::sys_times;
pub use tls::{sys_gettls, sys_settls};
pub use wait4::sys_wait4;

use core::sync::atomic::Ordering;

use crate::{cpu, prelude::*, process::signal, sched, thread::Thread};

pub const SYS_EXIT: u64 = 1;
pub const SYS_CLONE: u64 = 2;
pub const SYS_KILL: u64 = 3;
pub const SYS_WAIT4: u64 = 4;
pub const SYS_EXECVEAT: u64 = 5;
pub const SYS_GETPID: u64 = 6;
pub const SYS_GETPPID: u64 = 7;
pub const SYS_GETPGRP: u64 = 8;
pub const SYS_SETSID: u64 = 9;
pub const SYS_GETPGID: u64 = 10;
pub const SYS_GETSID: u64 = 11;
pub const SYS_SETPGID: u64 = 12;
pub const SYS_SIGACTION: u64 = 13;
pub const SYS_SIGPROCMASK: u64 = 14;
pub const SYS_SIGALTSTACK: u64 = 15;
pub const SYS_SIGPENDING: u64 = 16;
pub const SYS_SIGRETURN: u64 = 17;
pub const SYS_SIGSUSPEND: u64 = 18;
pub const SYS_GETTID: u64 = 19;
pub const SYS_SETTLS: u64 = 20;
pub const SYS_GETTLS: u64 = 21;
pub const SYS_FUTEX: u64 = 22;
pub const SYS_NANOSLEEP: u64 = 23;
pub const SYS_GETRUSAGE: u64 = 24;
pub const SYS_GETRLIMIT: u64 = 25;
pub const SYS_SETRLIMIT: u64 = 26;
pub const SYS_GETPRIORITY: u64 = 27;
pub const SYS_SETPRIORITY: u64 = 28;
pub const SYS_TIMES: u64 = 29;
pub const SYS_PTRACE: u64 = 30;
pub const SYS_MADVISE: u64 = 31;
pub const SYS_REBOOT: u64 = 32;

/// Handles one syscall for `thread`.
///
/// Wraps the handler with the CPU-time accounting hooks and runs the
/// pending-signal delivery that precedes any return to user mode. The
/// returned value is what lands in the syscall-return register.
pub fn dispatch(thread: &Arc<Thread>, num: u64, args: [u64; 6]) -> isize {
    let cpu = cpu::current_cpu();
    thread.tf_nest_level.fetch_add(1, Ordering::Relaxed);
    sched::add_time_enter(cpu);

    let res = do_dispatch(thread, num, args);

    let ret = match res {
        Ok(val) => val,
        Err(e) => {
            debug!(
                "syscall {} failed: {:?} ({})",
                num,
                e.error(),
                e.message().unwrap_or("")
            );
            e.as_neg_errno()
        }
    };

    let _ = signal::handle_pending_signals(thread);
    sched::add_time_leave(cpu);
    thread.tf_nest_level.fetch_sub(1, Ordering::Relaxed);
    ret
}

fn do_dispatch(thread: &Arc<Thread>, num: u64, args: [u64; 6]) -> Result<isize> {
    match num {
        SYS_EXIT => sys_exit(thread, args[0] as i32),
        SYS_CLONE => sys_clone(thread, args[0]),
        SYS_KILL => sys_kill(thread, args[0] as i32, args[1] as u32),
        SYS_WAIT4 => sys_wait4(thread, args[0] as i32, args[1] as Vaddr, args[2] as u32),
        SYS_EXECVEAT => sys_execveat(thread, args[0] as Vaddr, args[1] as Vaddr, args[2] as Vaddr),
        SYS_GETPID => sys_getpid(thread),
        SYS_GETPPID => sys_getppid(thread),
        SYS_GETPGRP => sys_getpgrp(thread),
        SYS_SETSID => sys_setsid(thread),
        SYS_GETPGID => sys_getpgid(thread, args[0] as i32),
        SYS_GETSID => sys_getsid(thread, args[0] as i32),
        SYS_SETPGID => sys_setpgid(thread, args[0] as i32, args[1] as i32),
        SYS_SIGACTION => {
            sys_sigaction(thread, args[0] as u32, args[1] as Vaddr, args[2] as Vaddr)
        }
        SYS_SIGPROCMASK => {
            sys_sigprocmask(thread, args[0] as u32, args[1] as Vaddr, args[2] as Vaddr)
        }
        SYS_SIGALTSTACK => sys_sigaltstack(thread, args[0] as Vaddr, args[1] as Vaddr),
        SYS_SIGPENDING => sys_sigpending(thread, args[0] as Vaddr),
        SYS_SIGRETURN => sys_sigreturn(thread),
        SYS_SIGSUSPEND => sys_sigsuspend(thread, args[0] as Vaddr),
        SYS_GETTID => sys_gettid(thread),
        SYS_SETTLS => sys_settls(thread, args[0]),
        SYS_GETTLS => sys_gettls(thread),
        SYS_FUTEX => sys_futex(
            thread,
            args[0] as Vaddr,
            args[1] as u32,
            args[2] as i32,
            args[3] as Vaddr,
            args[4] as Vaddr,
        ),
        SYS_NANOSLEEP => sys_nanosleep(thread, args[0] as Vaddr, args[1] as Vaddr),
        SYS_GETRUSAGE => sys_getrusage(thread, args[0] as i32, args[1] as Vaddr),
        SYS_GETRLIMIT => sys_getrlimit(thread, args[0] as u32, args[1] as Vaddr),
        SYS_SETRLIMIT => sys_setrlimit(thread, args[0] as u32, args[1] as Vaddr),
        SYS_GETPRIORITY => sys_getpriority(thread, args[0] as i32),
        SYS_SETPRIORITY => sys_setpriority(thread, args[0] as i32, args[1] as i32),
        SYS_TIMES => sys_times(thread, args[0] as Vaddr),
        SYS_PTRACE => sys_ptrace(thread, args[0] as u32, args[1] as u32),
        SYS_MADVISE => sys_madvise(thread, args[0] as Vaddr, args[1] as usize, args[2] as u32),
        SYS_REBOOT => sys_reboot(thread, args[0] as u32),
        _ => return_errno_with_message!(Errno::ENOSYS, "unknown syscall number"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::{test_util::new_test_process, unlink_process};

    #[test]
    fn unknown_number_is_enosys() {
        let (process, thread) = new_test_process("sys-enosys");
        let ret = dispatch(&thread, 0xdead, [0; 6]);
        assert_eq!(ret, -(Errno::ENOSYS as i32 as isize));
        unlink_process(&process);
    }

    #[test]
    fn getpid_family() {
        let (process, thread) = new_test_process("sys-ids");
        assert_eq!(
            dispatch(&thread, SYS_GETPID, [0; 6]),
            process.pid() as isize
        );
        assert_eq!(
            dispatch(&thread, SYS_GETTID, [0; 6]),
            thread.tid() as isize
        );
        assert_eq!(
            dispatch(&thread, SYS_GETPGRP, [0; 6]),
            process.pgid() as isize
        );
        unlink_process(&process);
    }
}
