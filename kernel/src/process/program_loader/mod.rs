// SPDX-License-Identifier: MPL-2.0

//! Program loading: execve, shebang scripts and the ELF loader seam.

pub mod aux_vec;
pub mod init_stack;

mod shebang;

use aux_vec::{AuxKey, AuxVec};
pub use init_stack::{write_init_stack, InitStackLayout};
pub use shebang::parse_shebang;
use xmas_elf::{
    header,
    program::{self, ProgramHeader},
    ElfFile,
};

use super::process::Process;
use crate::{
    arch::{ArchSpec, Native},
    fs::FileLike,
    prelude::*,
    thread::{Thread, UserStack, USER_STACK_SIZE},
    vm::{VmPerms, VmSpace, USER_TOP},
};

/// What the ELF collaborator reports back after mapping an image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfInfo {
    /// The file's own entry point, relocated.
    pub entry: u64,
    /// Where execution actually starts (the interpreter's entry when an
    /// interpreter is mapped).
    pub real_entry: u64,
    /// Load base handed to the dynamic linker through `AT_BASE`.
    pub base_addr: u64,
    pub phaddr: u64,
    pub phnum: u64,
    pub phent: u64,
}

/// Maps executables into an address space. `execve` and process creation
/// delegate all ELF knowledge through this seam.
pub trait ProgramLoader: Send + Sync {
    fn load(&self, file: &Arc<dyn FileLike>, vm: &Arc<VmSpace>) -> Result<ElfInfo>;
}

/// Resolves interpreter paths for `#!` scripts.
pub trait FileResolver: Send + Sync {
    fn open(&self, path: &str) -> Result<Arc<dyn FileLike>>;
}

static LOADER: RwLock<Option<Arc<dyn ProgramLoader>>> = RwLock::new(None);
static RESOLVER: RwLock<Option<Arc<dyn FileResolver>>> = RwLock::new(None);

pub fn set_loader(loader: Arc<dyn ProgramLoader>) {
    *LOADER.write() = Some(loader);
}

pub fn loader() -> Arc<dyn ProgramLoader> {
    LOADER
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(ElfLoader))
}

pub fn set_file_resolver(resolver: Arc<dyn FileResolver>) {
    *RESOLVER.write() = Some(resolver);
}

fn resolver() -> Result<Arc<dyn FileResolver>> {
    RESOLVER
        .read()
        .clone()
        .ok_or_else(|| Error::with_message(Errno::ENOENT, "no file resolver installed"))
}

/// Opens an executable path through the installed resolver.
pub fn resolve_file(path: &str) -> Result<Arc<dyn FileLike>> {
    resolver()?.open(path)
}

/// The built-in static-executable loader.
///
/// Segments are copied into fresh zones; `ET_DYN` images are slid to a
/// fixed base. Demand paging belongs to the external vm engine, not here.
pub struct ElfLoader;

const ET_DYN_BASE: usize = 0x4000_0000;

impl ProgramLoader for ElfLoader {
    fn load(&self, file: &Arc<dyn FileLike>, vm: &Arc<VmSpace>) -> Result<ElfInfo> {
        let image = {
            let mut buf = vec![0u8; file.len()];
            let n = file.read_at(0, &mut buf)?;
            buf.truncate(n);
            buf
        };
        let elf = ElfFile::new(&image)
            .map_err(|_| Error::with_message(Errno::ENOEXEC, "malformed ELF image"))?;

        let base = match elf.header.pt2.type_().as_type() {
            header::Type::Executable => 0,
            header::Type::SharedObject => ET_DYN_BASE,
            _ => return_errno_with_message!(Errno::ENOEXEC, "not an executable ELF type"),
        };

        for ph in elf.program_iter() {
            let ProgramHeader::Ph64(ph) = ph else {
                return_errno_with_message!(Errno::ENOEXEC, "only 64-bit images are supported");
            };
            if ph.get_type().map_err(|_| Error::new(Errno::ENOEXEC))? != program::Type::Load {
                continue;
            }
            let vaddr = base + ph.virtual_addr as usize;
            let zone_base = vaddr & !(PAGE_SIZE - 1);
            let zone_size =
                (vaddr + ph.mem_size as usize - zone_base + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
            vm.alloc(zone_base, zone_size, segment_perms(ph.flags))?;
            let start = ph.offset as usize;
            let end = start + ph.file_size as usize;
            if end > image.len() {
                return_errno_with_message!(Errno::ENOEXEC, "segment exceeds the image");
            }
            vm.write_bytes(vaddr, &image[start..end])?;
        }

        let entry = base as u64 + elf.header.pt2.entry_point();
        Ok(ElfInfo {
            entry,
            real_entry: entry,
            base_addr: base as u64,
            phaddr: base as u64 + elf.header.pt2.ph_offset(),
            phnum: elf.header.pt2.ph_count() as u64,
            phent: elf.header.pt2.ph_entry_size() as u64,
        })
    }
}

fn segment_perms(flags: program::Flags) -> VmPerms {
    let mut perms = VmPerms::empty();
    if flags.is_read() {
        perms |= VmPerms::READ;
    }
    if flags.is_write() {
        perms |= VmPerms::WRITE;
    }
    if flags.is_execute() {
        perms |= VmPerms::EXEC;
    }
    perms
}

/// Builds the auxiliary vector for a fresh image.
pub fn create_auxv(process: &Arc<Process>, info: &ElfInfo) -> Result<AuxVec> {
    let creds = process.credentials();
    let (hwcap, hwcap2) = Native::hwcaps();
    let mut auxv = AuxVec::new();
    auxv.set(AuxKey::AtEntry, info.entry)?;
    auxv.set(AuxKey::AtBase, info.base_addr)?;
    auxv.set(AuxKey::AtPagesz, PAGE_SIZE as u64)?;
    auxv.set(AuxKey::AtPhdr, info.phaddr)?;
    auxv.set(AuxKey::AtPhnum, info.phnum)?;
    auxv.set(AuxKey::AtPhent, info.phent)?;
    auxv.set(AuxKey::AtUid, creds.ruid as u64)?;
    auxv.set(AuxKey::AtEuid, creds.euid as u64)?;
    auxv.set(AuxKey::AtGid, creds.rgid as u64)?;
    auxv.set(AuxKey::AtEgid, creds.egid as u64)?;
    auxv.set(AuxKey::AtHwcap, hwcap)?;
    auxv.set(AuxKey::AtHwcap2, hwcap2)?;
    // AT_RANDOM is patched in by the stack writer once the bytes land on
    // the stack.
    Ok(auxv)
}

/// Writes the initial stack and loads the entry registers.
pub fn push_init_args(
    thread: &Arc<Thread>,
    pre_argv: &[&str],
    argv: &[&str],
    envp: &[&str],
    auxv: Option<&AuxVec>,
) -> Result<InitStackLayout> {
    let process = thread.process();
    let vm = process.vm();
    let layout =
        write_init_stack::<Native>(&vm, thread.user_stack(), pre_argv, argv, envp, auxv)?;

    let mut tf = thread.tf_user.lock();
    tf.set_instruction_pointer(process.entry());
    tf.set_stack_pointer(layout.sp as u64);
    if Native::REGISTER_PARAMETERS >= 1 {
        tf.set_argument(0, layout.argc as u64);
    }
    if Native::REGISTER_PARAMETERS >= 2 {
        tf.set_argument(1, layout.argv_ptr as u64);
    }
    if Native::REGISTER_PARAMETERS >= 3 {
        tf.set_argument(2, layout.envp_ptr as u64);
    }
    if Native::REGISTER_PARAMETERS >= 4 {
        tf.set_argument(3, layout.auxv_ptr as u64);
    }
    Ok(layout)
}

/// Replaces the calling process's image.
///
/// The new address space is fully constructed before anything of the old
/// image is touched, so a failing exec leaves the caller intact.
pub fn uproc_execve(
    thread: &Arc<Thread>,
    file: &Arc<dyn FileLike>,
    path: &str,
    argv: &[&str],
    envp: &[&str],
) -> Result<()> {
    let process = thread.process();
    let new_vm = VmSpace::new();

    let stack_zone = new_vm.alloc(USER_TOP - USER_STACK_SIZE, USER_STACK_SIZE, VmPerms::RW)?;
    let stack = UserStack {
        base: stack_zone.addr,
        size: stack_zone.size,
    };

    let mut magic = [0u8; 4];
    let n = file.read_at(0, &mut magic)?;

    let (info, layout) = if n >= 2 && &magic[..2] == b"#!" {
        let interp = parse_shebang(file)?;
        let interp_file = resolver()?.open(&interp.interpreter)?;
        let info = loader().load(&interp_file, &new_vm)?;

        let mut pre: Vec<&str> = Vec::with_capacity(3);
        pre.push(interp.interpreter.as_str());
        if let Some(arg) = &interp.argument {
            pre.push(arg.as_str());
        }
        pre.push(path);
        // The script's own argv[0] is replaced by the path above.
        let rest = if argv.is_empty() { argv } else { &argv[1..] };

        let auxv = create_auxv(&process, &info)?;
        let layout =
            write_init_stack::<Native>(&new_vm, stack, &pre, rest, envp, Some(&auxv))?;
        (info, layout)
    } else {
        let info = loader().load(file, &new_vm)?;
        let auxv = create_auxv(&process, &info)?;
        let layout = write_init_stack::<Native>(&new_vm, stack, &[], argv, envp, Some(&auxv))?;
        (info, layout)
    };

    // Point of no return: commit the new image.
    let new_name = argv.first().copied().unwrap_or(path);
    process.set_name(new_name);
    process.set_entry(info.real_entry);
    let old_vm = process.swap_vm(new_vm);
    thread.set_user_stack(stack);

    {
        let mut tf = thread.tf_user.lock();
        Native::init_trapframe_user(&mut tf);
        tf.set_instruction_pointer(info.real_entry);
        tf.set_stack_pointer(layout.sp as u64);
        if Native::REGISTER_PARAMETERS >= 1 {
            tf.set_argument(0, layout.argc as u64);
        }
        if Native::REGISTER_PARAMETERS >= 2 {
            tf.set_argument(1, layout.argv_ptr as u64);
        }
        if Native::REGISTER_PARAMETERS >= 3 {
            tf.set_argument(2, layout.envp_ptr as u64);
        }
        if Native::REGISTER_PARAMETERS >= 4 {
            tf.set_argument(3, layout.auxv_ptr as u64);
        }
    }

    drop(old_vm);

    let closed = process.files().write().close_cloexec();
    drop(closed);
    process.sig_dispositions().lock().inherit_on_exec();

    // Exec ends a vfork relation.
    if let Some(peer) = process.vfork_rel() {
        super::vfork::proc_wakeup_vfork(&process, &peer);
    }
    Ok(())
}
