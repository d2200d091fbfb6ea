// SPDX-License-Identifier: MPL-2.0

use bytemuck_derive::{Pod, Zeroable};

use crate::{
    prelude::*,
    process::signal::sig_stack::{SigStack, SigStackFlags},
    thread::Thread,
};

/// Smallest usable alternate stack.
pub const MINSIGSTKSZ: usize = 2048;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct CStack {
    pub ss_sp: u64,
    pub ss_flags: u32,
    _pad: u32,
    pub ss_size: u64,
}

pub fn sys_sigaltstack(thread: &Arc<Thread>, new_addr: Vaddr, old_addr: Vaddr) -> Result<isize> {
    let vm = thread.process().vm();
    let old = *thread.sig_altstack.lock();
    if old_addr != 0 {
        let c_old = CStack {
            ss_sp: old.sp as u64,
            ss_flags: old.flags,
            _pad: 0,
            ss_size: old.size as u64,
        };
        vm.write_val(old_addr, &c_old)?;
    }
    if new_addr != 0 {
        if old.flags().contains(SigStackFlags::SS_ONSTACK) {
            return_errno_with_message!(Errno::EPERM, "alternate stack is in use");
        }
        let c_new: CStack = vm.read_val(new_addr)?;
        let flags = SigStackFlags::from_bits_truncate(c_new.ss_flags);
        if !flags.contains(SigStackFlags::SS_DISABLE) && (c_new.ss_size as usize) < MINSIGSTKSZ {
            return_errno_with_message!(Errno::ENOMEM, "alternate stack too small");
        }
        *thread.sig_altstack.lock() =
            SigStack::new(c_new.ss_sp as usize, c_new.ss_size as usize, flags);
    }
    Ok(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        process::{test_util::new_test_process, unlink_process},
        vm::VmPerms,
    };

    #[test]
    fn install_and_query() {
        let (process, thread) = new_test_process("sigaltstack");
        let vm = process.vm();
        vm.alloc(0x6000, PAGE_SIZE, VmPerms::RW).unwrap();
        let new = CStack {
            ss_sp: 0x20_0000,
            ss_flags: 0,
            _pad: 0,
            ss_size: 0x4000,
        };
        vm.write_val(0x6000, &new).unwrap();
        sys_sigaltstack(&thread, 0x6000, 0).unwrap();
        sys_sigaltstack(&thread, 0, 0x6100).unwrap();
        let back: CStack = vm.read_val(0x6100).unwrap();
        assert_eq!(back.ss_sp, 0x20_0000);
        assert_eq!(back.ss_size, 0x4000);
        unlink_process(&process);
    }

    #[test]
    fn undersized_stack_is_enomem() {
        let (process, thread) = new_test_process("sigaltstack-small");
        let vm = process.vm();
        vm.alloc(0x6000, PAGE_SIZE, VmPerms::RW).unwrap();
        let new = CStack {
            ss_sp: 0x20_0000,
            ss_flags: 0,
            _pad: 0,
            ss_size: 64,
        };
        vm.write_val(0x6000, &new).unwrap();
        assert_eq!(
            sys_sigaltstack(&thread, 0x6000, 0).unwrap_err().error(),
            Errno::ENOMEM
        );
        unlink_process(&process);
    }
}
