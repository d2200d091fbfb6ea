// SPDX-License-Identifier: MPL-2.0

//! The architecture seam.
//!
//! Everything the process core needs to know about a CPU architecture is
//! captured by [`ArchSpec`]: stack/ABI constants for building entry and
//! signal frames, trapframe initialization, and hardware capability words.
//! [`Native`] is the personality of the build target; the other
//! personalities stay available so frame layouts can be exercised for every
//! ABI from one host.

mod aarch64;

pub use aarch64::{decode_hwcaps, Aarch64IdRegs};
use bytemuck_derive::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// A saved user or kernel register file.
///
/// The layout is deliberately architecture-neutral: `gpr[0..REGISTER_PARAMETERS]`
/// are the argument registers of the ABI, `gpr[0]` doubles as the syscall
/// return register.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Trapframe {
    pub gpr: [u64; 16],
    pub ip: u64,
    pub sp: u64,
    pub ret_addr: u64,
    pub tls: u64,
    pub flags: u64,
}

// Saved frames are copied to user stacks in whole words.
const_assert_eq!(core::mem::size_of::<Trapframe>() % 8, 0);

/// Flag bit marking a user-mode frame.
const TF_USER: u64 = 1 << 0;
/// Flag bit marking interrupts enabled on return.
const TF_INTERRUPTS: u64 = 1 << 1;

impl Trapframe {
    pub fn set_instruction_pointer(&mut self, ip: u64) {
        self.ip = ip;
    }

    pub fn set_stack_pointer(&mut self, sp: u64) {
        self.sp = sp;
    }

    pub fn set_return_address(&mut self, addr: u64) {
        self.ret_addr = addr;
    }

    pub fn set_tls_pointer(&mut self, tls: u64) {
        self.tls = tls;
    }

    pub fn set_syscall_ret(&mut self, val: u64) {
        self.gpr[0] = val;
    }

    pub fn set_argument(&mut self, n: usize, val: u64) {
        debug_assert!(n < 4);
        self.gpr[n] = val;
    }

    pub fn stack_pointer(&self) -> u64 {
        self.sp
    }
}

/// The per-architecture constants and trapframe conventions.
pub trait ArchSpec {
    const NAME: &'static str;
    /// Required alignment of the stack pointer at function entry.
    const STACK_ALIGNMENT: usize;
    /// Whether the return address of a call lives on the stack (as opposed
    /// to a link register).
    const STACK_RETURN_ADDR: bool;
    /// How many call arguments are passed in registers (capped at 4 here).
    const REGISTER_PARAMETERS: usize;
    /// Whether static TLS grows down from the thread pointer.
    const TLS_GROWS_DOWN: bool;
    /// Bytes below the stack pointer the ABI lets leaf code scribble on.
    const RED_ZONE: usize;

    fn init_trapframe_user(tf: &mut Trapframe) {
        *tf = Trapframe::zeroed_frame();
        tf.flags = TF_USER | TF_INTERRUPTS;
    }

    fn init_trapframe_kern(tf: &mut Trapframe) {
        *tf = Trapframe::zeroed_frame();
        tf.flags = TF_INTERRUPTS;
    }

    /// The `AT_HWCAP`/`AT_HWCAP2` words for the running machine.
    fn hwcaps() -> (u64, u64) {
        (0, 0)
    }
}

impl Trapframe {
    fn zeroed_frame() -> Self {
        Self::default()
    }
}

pub struct Amd64;

impl ArchSpec for Amd64 {
    const NAME: &'static str = "amd64";
    const STACK_ALIGNMENT: usize = 16;
    const STACK_RETURN_ADDR: bool = true;
    const REGISTER_PARAMETERS: usize = 4;
    const TLS_GROWS_DOWN: bool = true;
    const RED_ZONE: usize = 128;
}

pub struct I386;

impl ArchSpec for I386 {
    const NAME: &'static str = "i386";
    const STACK_ALIGNMENT: usize = 4;
    const STACK_RETURN_ADDR: bool = true;
    const REGISTER_PARAMETERS: usize = 0;
    const TLS_GROWS_DOWN: bool = true;
    const RED_ZONE: usize = 0;
}

pub struct Aarch64;

impl ArchSpec for Aarch64 {
    const NAME: &'static str = "aarch64";
    const STACK_ALIGNMENT: usize = 16;
    const STACK_RETURN_ADDR: bool = false;
    const REGISTER_PARAMETERS: usize = 4;
    const TLS_GROWS_DOWN: bool = false;
    const RED_ZONE: usize = 0;

    fn hwcaps() -> (u64, u64) {
        decode_hwcaps(&Aarch64IdRegs::read())
    }
}

pub struct Riscv64;

impl ArchSpec for Riscv64 {
    const NAME: &'static str = "riscv64";
    const STACK_ALIGNMENT: usize = 16;
    const STACK_RETURN_ADDR: bool = false;
    const REGISTER_PARAMETERS: usize = 4;
    const TLS_GROWS_DOWN: bool = false;
    const RED_ZONE: usize = 0;
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        pub type Native = Aarch64;
    } else if #[cfg(target_arch = "riscv64")] {
        pub type Native = Riscv64;
    } else if #[cfg(target_arch = "x86")] {
        pub type Native = I386;
    } else {
        pub type Native = Amd64;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trapframe_round_trips_through_bytes() {
        let mut tf = Trapframe::default();
        Amd64::init_trapframe_user(&mut tf);
        tf.set_instruction_pointer(0x40_1000);
        tf.set_stack_pointer(0x7fff_f000);
        tf.set_argument(0, 11);
        let bytes = bytemuck::bytes_of(&tf);
        let back: Trapframe = *bytemuck::from_bytes(bytes);
        assert_eq!(back, tf);
        assert_eq!(back.flags & TF_USER, TF_USER);
    }
}
