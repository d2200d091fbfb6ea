// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::program_loader::{self, uproc_execve},
    thread::Thread,
};

const PATH_MAX: usize = 4096;
const ARG_MAX: usize = 128;
const ARG_LEN_MAX: usize = 2048;

fn read_user_strings(
    vm: &Arc<crate::vm::VmSpace>,
    mut array_addr: Vaddr,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    loop {
        let ptr: u64 = vm.read_val(array_addr)?;
        if ptr == 0 {
            break;
        }
        if out.len() >= ARG_MAX {
            return_errno_with_message!(Errno::E2BIG, "too many argument strings");
        }
        let s = vm.read_cstring(ptr as usize, ARG_LEN_MAX)?;
        out.push(s.to_str()?.to_string());
        array_addr += core::mem::size_of::<u64>();
    }
    Ok(out)
}

pub fn sys_execveat(
    thread: &Arc<Thread>,
    path_addr: Vaddr,
    argv_addr: Vaddr,
    envp_addr: Vaddr,
) -> Result<isize> {
    let process = thread.process();
    let vm = process.vm();
    let path = vm.read_cstring(path_addr, PATH_MAX)?;
    let path = path.to_str()?.to_string();
    let argv = read_user_strings(&vm, argv_addr)?;
    let envp = read_user_strings(&vm, envp_addr)?;

    let file = program_loader::resolve_file(&path)?;
    let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    let envp_refs: Vec<&str> = envp.iter().map(String::as_str).collect();
    uproc_execve(thread, &file, &path, &argv_refs, &envp_refs)?;
    Ok(0)
}
