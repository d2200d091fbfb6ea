// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;

use super::{
    process::{proc_create_duplicate, publish_child},
    vfork,
};
use crate::{
    prelude::*,
    thread::{allocate_id, Thread, ThreadState},
};

bitflags! {
    pub struct CloneFlags: u32 {
        const CLONE_VM      = 0x00000100; /* Set if VM shared between processes.  */
        const CLONE_FS      = 0x00000200; /* Set if fs info shared between processes.  */
        const CLONE_FILES   = 0x00000400; /* Set if open files shared between processes.  */
        const CLONE_SIGHAND = 0x00000800; /* Set if signal handlers shared.  */
        const CLONE_VFORK   = 0x00004000; /* Set if the parent wants the child to wake it up on mm_release.  */
        const CLONE_THREAD  = 0x00010000; /* Set to add to same thread group.  */
        const CLONE_SETTLS  = 0x00080000; /* Set TLS info.  */
    }
}

impl From<u64> for CloneFlags {
    fn from(flags: u64) -> Self {
        CloneFlags::from_bits_truncate((flags & 0xffff_ffff) as u32)
    }
}

/// `clone` without `CLONE_THREAD`: duplicates the calling thread's whole
/// process.
///
/// With `CLONE_VM` the child shares the parent's address space, otherwise
/// it gets a full copy. Open files always share their descriptions (one
/// refcount bump per open file); signal dispositions are copied.
pub fn uproc_clone(thread: &Arc<Thread>, flags: CloneFlags) -> Result<Arc<Thread>> {
    let parent = thread.process();

    let (child, child_thread) = proc_create_duplicate(&parent, thread, flags)?;

    publish_child(&parent, &child);

    if flags.contains(CloneFlags::CLONE_VFORK) {
        vfork::set_vfork_rel(&parent, &child);
    }

    Ok(child_thread)
}

/// `clone` with `CLONE_THREAD`: adds a thread to the calling process.
///
/// The new thread implicitly shares the address space; it gets a fresh tid
/// and shares the caller's user stack the way the caller's trapframe left
/// it (callers pass a new stack pointer through the trapframe).
pub fn uthread_clone(thread: &Arc<Thread>, flags: CloneFlags) -> Result<Arc<Thread>> {
    let process = thread.process();
    let new_thread = thread_duplicate(thread, allocate_id())?;
    let _ = flags;
    new_thread.set_process(&process);
    process.threads().lock().push(new_thread.clone());
    super::table::thread_table_mut().insert(new_thread.tid(), new_thread.clone());
    Ok(new_thread)
}

/// Copies the scheduling and signal identity of `thread` into a fresh
/// thread object sharing its user stack.
pub(super) fn thread_duplicate(thread: &Arc<Thread>, tid: u32) -> Result<Arc<Thread>> {
    let new_thread = Thread::alloc(tid, thread.priority());
    *new_thread.tf_user.lock() = *thread.tf_user.lock();
    {
        let mut tf = new_thread.tf_user.lock();
        // The child observes a zero return value from the syscall.
        tf.set_syscall_ret(0);
    }
    *new_thread.tf_kern.lock() = *thread.tf_kern.lock();
    new_thread.tf_nest_level.store(
        thread.tf_nest_level.load(core::sync::atomic::Ordering::Relaxed),
        core::sync::atomic::Ordering::Relaxed,
    );
    new_thread.set_user_stack(thread.user_stack());
    new_thread.sig_mask.store(thread.sig_mask.load());
    *new_thread.sig_altstack.lock() = *thread.sig_altstack.lock();
    new_thread.sig_altstack_nest.store(
        thread
            .sig_altstack_nest
            .load(core::sync::atomic::Ordering::Relaxed),
        core::sync::atomic::Ordering::Relaxed,
    );
    new_thread.set_tls(thread.tls());
    new_thread.set_affinity(thread.affinity());
    new_thread.transition(ThreadState::Paused);
    Ok(new_thread)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::{process::test_util::new_test_process, process::unlink_process, table};
    use crate::vm::VmPerms;

    #[test]
    fn plain_clone_copies_address_space() {
        let (parent, thread) = new_test_process("clone-parent");
        let vm = parent.vm();
        vm.alloc(0x7000_0000, crate::prelude::PAGE_SIZE, VmPerms::RW)
            .unwrap();
        vm.write_val(0x7000_0000, &0xabcdu64).unwrap();

        let child_thread = uproc_clone(&thread, CloneFlags::empty()).unwrap();
        let child = child_thread.process();
        assert!(child.pid() > parent.pid());
        assert_eq!(child_thread.tid(), child.pid());

        // Address spaces are distinct copies.
        child.vm().write_val(0x7000_0000, &0x1234u64).unwrap();
        assert_eq!(vm.read_val::<u64>(0x7000_0000).unwrap(), 0xabcd);

        // The child is in the parent's group and child list.
        assert_eq!(child.pgid(), parent.pgid());
        assert!(parent.get_child(child.pid()).is_some());
        assert!(table::get_process(child.pid()).is_some());

        unlink_process(&child);
        unlink_process(&parent);
    }

    #[test]
    fn clone_vm_shares_address_space() {
        let (parent, thread) = new_test_process("clone-vm");
        let child_thread = uproc_clone(&thread, CloneFlags::CLONE_VM).unwrap();
        let child = child_thread.process();
        assert!(Arc::ptr_eq(&parent.vm(), &child.vm()));
        assert!(Arc::strong_count(&parent.vm()) >= 2);
        unlink_process(&child);
        unlink_process(&parent);
    }

    #[test]
    fn files_are_duplicated_with_refcount_bump() {
        let (parent, thread) = new_test_process("clone-files");
        let file = crate::fs::MemFile::new(vec![1, 2, 3]);
        parent.alloc_fd(file.clone(), false).unwrap();
        let before = Arc::strong_count(&file);

        let child_thread = uproc_clone(&thread, CloneFlags::empty()).unwrap();
        let child = child_thread.process();
        assert_eq!(Arc::strong_count(&file), before + 1);
        assert!(child.get_file(0).is_ok());

        unlink_process(&child);
        unlink_process(&parent);
    }

    #[test]
    fn thread_clone_joins_process() {
        let (process, thread) = new_test_process("thread-clone");
        let new_thread = uthread_clone(&thread, CloneFlags::CLONE_VM).unwrap();
        assert_ne!(new_thread.tid(), thread.tid());
        assert_eq!(new_thread.process().pid(), process.pid());
        assert_eq!(process.threads().lock().len(), 2);
        assert_eq!(new_thread.user_stack().base, thread.user_stack().base);
        unlink_process(&process);
    }
}
