// SPDX-License-Identifier: MPL-2.0

//! The initial user stack.
//!
//! From low address to high: spilled entry arguments (for ABIs that pass
//! few in registers), the auxiliary pairs terminated by `AT_NULL`, the
//! NULL-terminated envp pointer array, the NULL-terminated argv pointer
//! array, then the string bytes themselves with argv text on top. The
//! final stack pointer lands on the architecture's alignment, minus the
//! return-address slot where calls leave it on the stack.

use super::aux_vec::{AuxKey, AuxVec};
use crate::{
    arch::ArchSpec,
    prelude::*,
    thread::UserStack,
    util::random,
    vm::VmSpace,
};

const WORD: usize = core::mem::size_of::<u64>();

/// Where everything ended up, for loading the entry trapframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStackLayout {
    pub sp: Vaddr,
    pub argc: usize,
    pub argv_ptr: Vaddr,
    pub envp_ptr: Vaddr,
    pub auxv_ptr: Vaddr,
}

fn strings_size(list: &[&str]) -> usize {
    list.iter().map(|s| s.len() + 1).sum()
}

fn spilled_args<A: ArchSpec>() -> usize {
    4usize.saturating_sub(A::REGISTER_PARAMETERS)
}

/// Writes argv/envp/auxv onto a fresh stack, returning the entry layout.
///
/// Fails with `E2BIG` when the arguments cannot fit the stack zone.
pub fn write_init_stack<A: ArchSpec>(
    vm: &Arc<VmSpace>,
    stack: UserStack,
    pre_argv: &[&str],
    argv: &[&str],
    envp: &[&str],
    auxv: Option<&AuxVec>,
) -> Result<InitStackLayout> {
    let top = stack.base + stack.size;
    let mut auxv = auxv.cloned();
    if let Some(auxv) = &mut auxv {
        // Reserve the AT_RANDOM slot now; the real pointer is patched in
        // once the bytes land on the stack.
        auxv.set(AuxKey::AtRandom, 0)?;
    }

    let random_size = if auxv.is_some() { 16 } else { 0 };
    let total_size = {
        let str_size = strings_size(argv) + strings_size(pre_argv) + strings_size(envp);
        let ptr_size = (pre_argv.len() + argv.len() + 1 + envp.len() + 1) * WORD;
        let aux_size = auxv.as_ref().map(|a| a.stack_count() * 2 * WORD).unwrap_or(0);
        let mut total = str_size + random_size + ptr_size + aux_size + spilled_args::<A>() * WORD;
        let pad = total % A::STACK_ALIGNMENT;
        if pad != 0 {
            total += A::STACK_ALIGNMENT - pad;
        }
        if A::STACK_RETURN_ADDR {
            total += WORD;
        }
        total
    };
    if total_size >= stack.size {
        return_errno_with_message!(Errno::E2BIG, "arguments overflow the user stack");
    }

    let mut p = top;
    let mut push_cstr = |p: &mut Vaddr, s: &str| -> Result<Vaddr> {
        *p -= s.len() + 1;
        vm.write_bytes(*p, s.as_bytes())?;
        vm.write_val(*p + s.len(), &0u8)?;
        Ok(*p)
    };

    // String bytes, argv text topmost.
    let mut argv_addrs = Vec::with_capacity(argv.len());
    for s in argv.iter().rev() {
        argv_addrs.push(push_cstr(&mut p, s)?);
    }
    argv_addrs.reverse();
    let mut pre_addrs = Vec::with_capacity(pre_argv.len());
    for s in pre_argv.iter().rev() {
        pre_addrs.push(push_cstr(&mut p, s)?);
    }
    pre_addrs.reverse();
    let mut envp_addrs = Vec::with_capacity(envp.len());
    for s in envp.iter().rev() {
        envp_addrs.push(push_cstr(&mut p, s)?);
    }
    envp_addrs.reverse();

    if let Some(auxv) = &mut auxv {
        let mut bytes = [0u8; 16];
        random::getrandom(&mut bytes);
        p -= 16;
        vm.write_bytes(p, &bytes)?;
        auxv.set(AuxKey::AtRandom, p as u64)?;
    }

    let mut push_word = |p: &mut Vaddr, val: u64| -> Result<()> {
        *p -= WORD;
        vm.write_val(*p, &val)
    };

    // argv pointer array: pre-argv entries first, NULL-terminated.
    push_word(&mut p, 0)?;
    for addr in argv_addrs.iter().rev() {
        push_word(&mut p, *addr as u64)?;
    }
    for addr in pre_addrs.iter().rev() {
        push_word(&mut p, *addr as u64)?;
    }
    let argv_ptr = p;

    push_word(&mut p, 0)?;
    for addr in envp_addrs.iter().rev() {
        push_word(&mut p, *addr as u64)?;
    }
    let envp_ptr = p;

    if let Some(auxv) = &auxv {
        push_word(&mut p, 0)?;
        push_word(&mut p, AuxKey::AtNull as u64)?;
        for (key, val) in auxv.table().iter().rev() {
            push_word(&mut p, *val)?;
            push_word(&mut p, *key as u64)?;
        }
    }
    let auxv_ptr = p;

    let argc = pre_argv.len() + argv.len();
    if A::REGISTER_PARAMETERS < 1 {
        push_word(&mut p, auxv_ptr as u64)?;
    }
    if A::REGISTER_PARAMETERS < 2 {
        push_word(&mut p, envp_ptr as u64)?;
    }
    if A::REGISTER_PARAMETERS < 3 {
        push_word(&mut p, argv_ptr as u64)?;
    }
    if A::REGISTER_PARAMETERS < 4 {
        push_word(&mut p, argc as u64)?;
    }

    p -= p % A::STACK_ALIGNMENT;
    if A::STACK_RETURN_ADDR {
        push_word(&mut p, 0)?;
    }

    debug_assert_eq!(top - p, total_size);

    Ok(InitStackLayout {
        sp: p,
        argc,
        argv_ptr,
        envp_ptr,
        auxv_ptr,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        arch::{Aarch64, Amd64, I386},
        vm::VmPerms,
    };

    fn stack_space(size: usize) -> (Arc<VmSpace>, UserStack) {
        let vm = VmSpace::new();
        let base = 0x100_0000;
        vm.alloc(base, size, VmPerms::RW).unwrap();
        (vm, UserStack { base, size })
    }

    fn read_word(vm: &Arc<VmSpace>, addr: Vaddr) -> u64 {
        vm.read_val(addr).unwrap()
    }

    fn read_cstr(vm: &Arc<VmSpace>, addr: Vaddr) -> String {
        let cstr = vm.read_cstring(addr, 256).unwrap();
        cstr.to_str().unwrap().to_string()
    }

    #[test]
    fn amd64_layout_round_trips() {
        let (vm, stack) = stack_space(64 * 1024);
        let mut auxv = AuxVec::new();
        auxv.set(AuxKey::AtEntry, 0x40_1000).unwrap();
        auxv.set(AuxKey::AtPagesz, 4096).unwrap();

        let layout = write_init_stack::<Amd64>(
            &vm,
            stack,
            &[],
            &["sh", "-c", "true"],
            &["PATH=/bin", "HOME=/root"],
            Some(&auxv),
        )
        .unwrap();

        assert_eq!(layout.argc, 3);
        // Entry alignment: sp + ret-addr slot hits the ABI alignment.
        assert_eq!((layout.sp + 8) % 16, 0);

        // argv strings read back in order through the pointer array.
        for (i, expect) in ["sh", "-c", "true"].iter().enumerate() {
            let ptr = read_word(&vm, layout.argv_ptr + i * 8) as usize;
            assert_eq!(read_cstr(&vm, ptr), *expect);
        }
        assert_eq!(read_word(&vm, layout.argv_ptr + 3 * 8), 0);

        for (i, expect) in ["PATH=/bin", "HOME=/root"].iter().enumerate() {
            let ptr = read_word(&vm, layout.envp_ptr + i * 8) as usize;
            assert_eq!(read_cstr(&vm, ptr), *expect);
        }
        assert_eq!(read_word(&vm, layout.envp_ptr + 2 * 8), 0);

        // auxv pairs end with AT_NULL and carry AT_RANDOM.
        let mut found_random = false;
        let mut idx = 0;
        loop {
            let key = read_word(&vm, layout.auxv_ptr + idx * 16);
            if key == AuxKey::AtNull as u64 {
                break;
            }
            if key == AuxKey::AtRandom as u64 {
                let ptr = read_word(&vm, layout.auxv_ptr + idx * 16 + 8) as usize;
                assert!(ptr > stack.base && ptr < stack.base + stack.size);
                found_random = true;
            }
            idx += 1;
        }
        assert!(found_random);
    }

    #[test]
    fn pre_argv_prepends_interpreter() {
        let (vm, stack) = stack_space(64 * 1024);
        let layout = write_init_stack::<Amd64>(
            &vm,
            stack,
            &["/bin/sh", "/tmp/script"],
            &["arg1"],
            &[],
            None,
        )
        .unwrap();
        assert_eq!(layout.argc, 3);
        let a0 = read_word(&vm, layout.argv_ptr) as usize;
        let a1 = read_word(&vm, layout.argv_ptr + 8) as usize;
        let a2 = read_word(&vm, layout.argv_ptr + 16) as usize;
        assert_eq!(read_cstr(&vm, a0), "/bin/sh");
        assert_eq!(read_cstr(&vm, a1), "/tmp/script");
        assert_eq!(read_cstr(&vm, a2), "arg1");
    }

    #[test]
    fn i386_spills_all_four_arguments() {
        let (vm, stack) = stack_space(64 * 1024);
        let layout =
            write_init_stack::<I386>(&vm, stack, &[], &["init"], &["TERM=vt100"], None).unwrap();
        // [ret][argc][argv][envp][auxv] from the stack pointer up.
        assert_eq!(read_word(&vm, layout.sp), 0);
        assert_eq!(read_word(&vm, layout.sp + 8), 1);
        assert_eq!(read_word(&vm, layout.sp + 16), layout.argv_ptr as u64);
        assert_eq!(read_word(&vm, layout.sp + 24), layout.envp_ptr as u64);
        assert_eq!(read_word(&vm, layout.sp + 32), layout.auxv_ptr as u64);
    }

    #[test]
    fn aarch64_keeps_args_in_registers() {
        let (vm, stack) = stack_space(64 * 1024);
        let layout =
            write_init_stack::<Aarch64>(&vm, stack, &[], &["init"], &[], None).unwrap();
        // No ret-addr slot, no spill: sp points at the auxv area directly.
        assert_eq!(layout.sp % 16, 0);
        assert_eq!(layout.auxv_ptr, layout.envp_ptr);
    }

    #[test]
    fn oversized_arguments_are_e2big() {
        let (vm, stack) = stack_space(2 * PAGE_SIZE);
        let big = "x".repeat(3 * PAGE_SIZE);
        let err = write_init_stack::<Amd64>(&vm, stack, &[], &[&big], &[], None).unwrap_err();
        assert_eq!(err.error(), Errno::E2BIG);
    }
}
