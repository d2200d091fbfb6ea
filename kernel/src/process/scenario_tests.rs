// SPDX-License-Identifier: MPL-2.0

//! End-to-end lifecycle scenarios stitching clone, exec, signals and wait
//! together.

use core::sync::atomic::Ordering;

use super::{
    clone::{uproc_clone, CloneFlags},
    exit::proc_exit,
    process::test_util::new_test_process,
    process::unlink_process,
    program_loader::{self, ElfInfo, FileResolver, ProgramLoader},
    signal::{
        constants::*,
        handle_pending_signals,
        sig_action::{SigAction, SigActionFlags},
        sig_mask::SigSet,
        sigreturn, thread_signal, SigInfo,
    },
    status, table, wait,
    wait::{ProcessFilter, WaitOptions},
};
use crate::{
    fs::{FileLike, MemFile},
    prelude::*,
    process::signal::sig_stack::{SigStack, SigStackFlags},
    vm::{VmPerms, VmSpace},
};

struct StubLoader;

impl ProgramLoader for StubLoader {
    fn load(&self, _file: &Arc<dyn FileLike>, vm: &Arc<VmSpace>) -> Result<ElfInfo> {
        vm.alloc(0x40_0000, PAGE_SIZE, VmPerms::READ | VmPerms::EXEC)?;
        Ok(ElfInfo {
            entry: 0x40_0100,
            real_entry: 0x40_0100,
            base_addr: 0x40_0000,
            phaddr: 0x40_0040,
            phnum: 2,
            phent: 56,
        })
    }
}

struct StubResolver;

impl FileResolver for StubResolver {
    fn open(&self, _path: &str) -> Result<Arc<dyn FileLike>> {
        Ok(MemFile::new(b"\x7fELF".to_vec()))
    }
}

fn install_stubs() {
    program_loader::set_loader(Arc::new(StubLoader));
    program_loader::set_file_resolver(Arc::new(StubResolver));
}

#[test]
fn fork_exec_wait_round_trip() {
    install_stubs();
    let (parent, parent_thread) = new_test_process("init-like");

    // clone(0): fresh address space, new pid.
    let child_thread = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
    let child = child_thread.process();
    assert!(child.pid() > parent.pid());
    assert_eq!(child_thread.tid(), child.pid());

    // execve("/bin/sh").
    let exe: Arc<dyn FileLike> = MemFile::new(b"\x7fELF...".to_vec());
    program_loader::uproc_execve(
        &child_thread,
        &exe,
        "/bin/sh",
        &["sh"],
        &["PATH=/bin"],
    )
    .unwrap();
    assert_eq!(child.name(), "sh");

    // Parent blocks in wait4 until the child exits with code 7.
    let pt = parent_thread.clone();
    let waiter = std::thread::spawn(move || wait::wait4(&pt, ProcessFilter::Any, WaitOptions::empty()));
    while parent.wait_waitq.is_empty() {
        std::thread::yield_now();
    }
    proc_exit(&child, status::wstatus_exited(7)).unwrap();

    let (pid, wstatus) = waiter.join().unwrap().unwrap();
    assert_eq!(pid, child.pid());
    assert!(status::wifexited(wstatus));
    assert_eq!(status::wexitstatus(wstatus), 7);

    // Post-wait the child is gone from the global process list.
    assert!(table::get_process(child.pid()).is_none());

    unlink_process(&parent);
}

#[test]
fn sigusr1_on_altstack_delivers_and_returns() {
    let (process, thread) = new_test_process("sig-onstack");
    let vm = process.vm();

    // An alternate stack at A..A+S plus a handler address.
    let alt_base = 0x30_0000;
    let alt_size = 4 * PAGE_SIZE;
    vm.alloc(alt_base, alt_size, VmPerms::RW).unwrap();
    *thread.sig_altstack.lock() = SigStack::new(alt_base, alt_size, SigStackFlags::empty());

    let handler = 0x40_2000u64;
    let restorer = 0x40_3000u64;
    process.sig_dispositions().lock().set(
        SIGUSR1,
        SigAction::User {
            handler_addr: handler as usize,
            flags: SigActionFlags::SA_ONSTACK | SigActionFlags::SA_SIGINFO,
            restorer_addr: restorer as usize,
            mask: SigSet::from(SIGUSR2),
        },
    );

    // A recognizable pre-delivery register file.
    let original_tf = {
        let mut tf = thread.tf_user.lock();
        tf.set_instruction_pointer(0x41_0000);
        tf.set_stack_pointer((thread.user_stack().base + thread.user_stack().size - 64) as u64);
        tf.set_argument(0, 0xdead);
        *tf
    };
    let original_mask = thread.sig_mask.load();

    thread_signal(&thread, SIGUSR1).unwrap();
    handle_pending_signals(&thread).unwrap();

    let tf = *thread.tf_user.lock();
    assert_eq!(tf.ip, handler);
    let sp = tf.sp as usize;
    assert!(sp >= alt_base && sp < alt_base + alt_size);
    // Handler runs with {USR1, USR2} blocked.
    assert!(thread.sig_mask.contains(SIGUSR1));
    assert!(thread.sig_mask.contains(SIGUSR2));
    assert_eq!(thread.sig_altstack_nest.load(Ordering::Relaxed), 1);
    // SA_SIGINFO passes signum + siginfo pointer.
    assert_eq!(tf.gpr[0], SIGUSR1.as_u8() as u64);
    let siginfo: SigInfo = vm.read_val(tf.gpr[1] as usize).unwrap();
    assert_eq!(siginfo.si_signo, SIGUSR1.as_u8() as i32);

    sigreturn(&thread).unwrap();
    // Trapframe and mask are bit-identical to the pre-delivery state.
    assert_eq!(*thread.tf_user.lock(), original_tf);
    assert_eq!(thread.sig_mask.load(), original_mask);
    assert_eq!(thread.sig_altstack_nest.load(Ordering::Relaxed), 0);
    assert!(!thread
        .sig_altstack
        .lock()
        .flags()
        .contains(SigStackFlags::SS_ONSTACK));

    unlink_process(&process);
}

#[test]
fn masked_signal_is_dropped_at_post_time() {
    let (process, thread) = new_test_process("sig-masked");
    thread.sig_mask.block(SigSet::from(SIGUSR1));
    thread_signal(&thread, SIGUSR1).unwrap();
    assert!(!thread.sig_pending.contains(SIGUSR1));
    // Unmasking later does not resurrect it.
    thread.sig_mask.unblock(SigSet::from(SIGUSR1));
    assert!(!thread.sig_pending.contains(SIGUSR1));
    unlink_process(&process);
}

#[test]
fn default_term_disposition_kills_process() {
    let (process, thread) = new_test_process("sig-term");
    thread_signal(&thread, SIGTERM).unwrap();
    handle_pending_signals(&thread).unwrap();
    assert!(process.is_zombie());
    let wstatus = process.leader_thread().wstatus.load(Ordering::Relaxed);
    assert!(status::wifsignaled(wstatus));
    assert_eq!(status::wtermsig(wstatus), SIGTERM.as_u8() as i32);
    unlink_process(&process);
}

#[test]
fn default_ignore_disposition_is_silent() {
    let (process, thread) = new_test_process("sig-ign");
    thread_signal(&thread, SIGWINCH).unwrap();
    handle_pending_signals(&thread).unwrap();
    assert!(!process.is_zombie());
    assert!(!thread.sig_pending.contains(SIGWINCH));
    unlink_process(&process);
}

#[test]
fn stop_and_cont_via_signals() {
    let (parent, parent_thread) = new_test_process("job-parent");
    let child_thread = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
    let child = child_thread.process();

    thread_signal(&child_thread, SIGSTOP).unwrap();
    handle_pending_signals(&child_thread).unwrap();
    assert_eq!(child.state(), super::ProcessState::Stopped);

    // WUNTRACED reports the stop.
    let (pid, wstatus) = wait::wait4(
        &parent_thread,
        ProcessFilter::WithPid(child.pid()),
        WaitOptions::WNOHANG | WaitOptions::WUNTRACED,
    )
    .unwrap();
    assert_eq!(pid, child.pid());
    assert!(status::wifstopped(wstatus));
    assert_eq!(status::wstopsig(wstatus), SIGSTOP.as_u8() as i32);

    thread_signal(&child_thread, SIGCONT).unwrap();
    handle_pending_signals(&child_thread).unwrap();
    assert_eq!(child.state(), super::ProcessState::Alive);

    unlink_process(&child);
    unlink_process(&parent);
}

#[test]
fn signal_wakes_blocked_wait4_then_wait_succeeds() {
    let (parent, parent_thread) = new_test_process("wait-interrupt");
    let child_thread = uproc_clone(&parent_thread, CloneFlags::empty()).unwrap();
    let child = child_thread.process();

    // Parent blocks in wait4.
    let pt = parent_thread.clone();
    let waiter =
        std::thread::spawn(move || wait::wait4(&pt, ProcessFilter::Any, WaitOptions::empty()));
    while parent.wait_waitq.is_empty() {
        std::thread::yield_now();
    }

    // A second thread signals the parent; its disposition is a user
    // handler so the wait returns EINTR instead of dying.
    parent.sig_dispositions().lock().set(
        SIGUSR1,
        SigAction::User {
            handler_addr: 0x40_1000,
            flags: SigActionFlags::empty(),
            restorer_addr: 0x40_1100,
            mask: SigSet::new_empty(),
        },
    );
    thread_signal(&parent_thread, SIGUSR1).unwrap();
    let err = waiter.join().unwrap().unwrap_err();
    assert_eq!(err.error(), Errno::EINTR);

    // After the handler would have run, wait4 succeeds normally.
    proc_exit(&child, status::wstatus_exited(3)).unwrap();
    let (pid, wstatus) =
        wait::wait4(&parent_thread, ProcessFilter::Any, WaitOptions::empty()).unwrap();
    assert_eq!(pid, child.pid());
    assert_eq!(status::wexitstatus(wstatus), 3);

    unlink_process(&parent);
}

#[test]
fn vfork_child_exit_wakes_parent() {
    let (parent, parent_thread) = new_test_process("vfork-parent");
    let child_thread = uproc_clone(
        &parent_thread,
        CloneFlags::CLONE_VM | CloneFlags::CLONE_VFORK,
    )
    .unwrap();
    let child = child_thread.process();
    assert_eq!(parent.vfork_rel().unwrap().pid(), child.pid());

    // Parent parks on its vfork queue, as the vfork syscall would.
    let parent2 = parent.clone();
    let pt = parent_thread.clone();
    let join = std::thread::spawn(move || parent2.vfork_waitq.clone().wait(&pt, None));
    while parent.vfork_waitq.is_empty() {
        std::thread::yield_now();
    }

    proc_exit(&child, status::wstatus_exited(0)).unwrap();
    join.join().unwrap().unwrap();
    assert!(parent.vfork_rel().is_none());
    assert!(child.vfork_rel().is_none());

    unlink_process(&child);
    unlink_process(&parent);
}

#[test]
fn i386_signal_frame_spills_arguments() {
    use crate::arch::I386;
    let (process, thread) = new_test_process("sig-i386");
    let vm = process.vm();

    process.sig_dispositions().lock().set(
        SIGUSR2,
        SigAction::User {
            handler_addr: 0x50_0000,
            flags: SigActionFlags::SA_SIGINFO,
            restorer_addr: 0x50_1000,
            mask: SigSet::new_empty(),
        },
    );
    {
        let mut tf = thread.tf_user.lock();
        tf.set_stack_pointer((thread.user_stack().base + thread.user_stack().size - 128) as u64);
    }
    thread_signal(&thread, SIGUSR2).unwrap();
    super::signal::handle_pending_signals_for::<I386>(&thread).unwrap();

    let tf = *thread.tf_user.lock();
    let sp = tf.sp as usize;
    // [restorer][signum][siginfo*][ucontext*] on the stack.
    assert_eq!(vm.read_val::<u64>(sp).unwrap(), 0x50_1000);
    assert_eq!(vm.read_val::<u64>(sp + 8).unwrap(), SIGUSR2.as_u8() as u64);
    let siginfo_ptr = vm.read_val::<u64>(sp + 16).unwrap() as usize;
    let ucontext_ptr = vm.read_val::<u64>(sp + 24).unwrap() as usize;
    assert_eq!(ucontext_ptr, sp + 32);
    let siginfo: SigInfo = vm.read_val(siginfo_ptr).unwrap();
    assert_eq!(siginfo.si_signo, SIGUSR2.as_u8() as i32);

    super::signal::sigreturn_for::<I386>(&thread).unwrap();
    unlink_process(&process);
}
