// SPDX-License-Identifier: MPL-2.0

//! ELF object loading, dependency resolution, symbol search, relocation
//! and teardown.

use alloc::{format, string::String, vec::Vec};

use log::debug;

use crate::{
    defs::*,
    hash::{elf_hash, gnu_hash},
    mem,
    reloc::{self, RelocKind, RelocWidth},
    sys::{Prot, Sys},
    tls::TlsState,
    LdError,
};

pub type ObjId = usize;

/// Pointers into an object's `PT_DYNAMIC`, collected in one pass.
#[derive(Debug, Default, Clone)]
pub struct DynInfo {
    pub strtab: Option<u64>,
    pub strsz: Option<u64>,
    pub symtab: Option<u64>,
    pub syment: Option<u64>,
    pub hash: Option<u64>,
    pub gnu_hash: Option<u64>,
    pub rel: Option<u64>,
    pub relsz: Option<u64>,
    pub relent: Option<u64>,
    pub rela: Option<u64>,
    pub relasz: Option<u64>,
    pub relaent: Option<u64>,
    pub jmprel: Option<u64>,
    pub pltrel: Option<u64>,
    pub pltrelsz: Option<u64>,
    pub init: Option<u64>,
    pub fini: Option<u64>,
    pub init_array: Option<u64>,
    pub init_arraysz: Option<u64>,
    pub fini_array: Option<u64>,
    pub fini_arraysz: Option<u64>,
    pub flags_1: Option<u64>,
    pub bind_now: bool,
}

/// A loaded (or loading) ELF object.
pub struct ElfObject {
    pub path: String,
    pub from_auxv: bool,
    pub machine: u16,
    pub entry: u64,
    pub phdrs: Vec<Phdr>,
    /// Load bias: file vaddr + `vaddr` = memory address.
    pub vaddr: usize,
    pub vaddr_min: usize,
    pub vaddr_max: usize,
    pub vsize: usize,
    pub pt_phdr: Option<Phdr>,
    pub pt_tls: Option<Phdr>,
    pub pt_dynamic: Option<Phdr>,
    pub pt_gnu_stack: Option<Phdr>,
    pub pt_gnu_relro: Option<Phdr>,
    pub dyn_info: DynInfo,
    /// Edges to dependencies; each edge holds one refcount on the dep and
    /// is mirrored in the dep's `parents`.
    pub neededs: Vec<ObjId>,
    pub parents: Vec<ObjId>,
    pub loaded: bool,
    pub has_tls_module: bool,
    pub tls_module: usize,
    pub tls_offset: usize,
    pub refcount: usize,
}

impl ElfObject {
    fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            from_auxv: false,
            machine: ELF_EM,
            entry: 0,
            phdrs: Vec::new(),
            vaddr: 0,
            vaddr_min: 0,
            vaddr_max: 0,
            vsize: 0,
            pt_phdr: None,
            pt_tls: None,
            pt_dynamic: None,
            pt_gnu_stack: None,
            pt_gnu_relro: None,
            dyn_info: DynInfo::default(),
            neededs: Vec::new(),
            parents: Vec::new(),
            loaded: false,
            has_tls_module: false,
            tls_module: 0,
            tls_offset: 0,
            refcount: 0,
        }
    }

    fn strtab(&self) -> usize {
        self.vaddr + self.dyn_info.strtab.unwrap_or(0) as usize
    }

    fn symtab(&self) -> usize {
        self.vaddr + self.dyn_info.symtab.unwrap_or(0) as usize
    }

    fn syment(&self) -> usize {
        self.dyn_info.syment.unwrap_or(core::mem::size_of::<Sym>() as u64) as usize
    }

    fn sym(&self, index: usize) -> Sym {
        mem::read(self.symtab() + index * self.syment())
    }
}

/// Everything behind the one linker lock.
pub struct LinkerState {
    objects: Vec<Option<ElfObject>>,
    /// Insertion order; the first entry is the main executable.
    pub order: Vec<ObjId>,
    pub tls: TlsState,
    /// Set while the kernel-mapped initial image is being wired up.
    pub initial_elf: bool,
}

impl LinkerState {
    pub fn new(tls_grows_down: bool) -> Self {
        Self {
            objects: Vec::new(),
            order: Vec::new(),
            tls: TlsState::new(tls_grows_down),
            initial_elf: false,
        }
    }

    pub fn obj(&self, id: ObjId) -> &ElfObject {
        self.objects[id].as_ref().expect("stale object id")
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut ElfObject {
        self.objects[id].as_mut().expect("stale object id")
    }

    pub fn is_live(&self, id: ObjId) -> bool {
        self.objects.get(id).is_some_and(Option::is_some)
    }

    pub fn first(&self) -> Option<ObjId> {
        self.order.first().copied()
    }

    pub(crate) fn alloc(&mut self, path: &str) -> ObjId {
        let mut obj = ElfObject::new(path);
        obj.refcount = 1;
        let id = self.objects.len();
        self.objects.push(Some(obj));
        self.order.push(id);
        id
    }

    fn find(&mut self, path: &str) -> Option<ObjId> {
        let id = self
            .order
            .iter()
            .copied()
            .find(|id| self.obj(*id).path == path)?;
        self.obj_mut(id).refcount += 1;
        Some(id)
    }
}

fn page_align_down(v: usize, page: usize) -> usize {
    v & !(page - 1)
}

fn page_align_up(v: usize, page: usize) -> usize {
    (v + page - 1) & !(page - 1)
}

/// `(aligned_addr, aligned_size)` covering a program header's memory.
fn phdr_vmap(phdr: &Phdr, page: usize) -> (usize, usize) {
    let addr = page_align_down(phdr.p_vaddr as usize, page);
    let mut size = phdr.p_memsz as usize;
    size += phdr.p_vaddr as usize - addr;
    size = page_align_up(size, page);
    (addr, size)
}

fn prot_of(flags: u32) -> Prot {
    let mut prot = Prot::empty();
    if flags & PF_R != 0 {
        prot |= Prot::READ;
    }
    if flags & PF_W != 0 {
        prot |= Prot::WRITE;
    }
    if flags & PF_X != 0 {
        prot |= Prot::EXEC;
    }
    prot
}

// ************ Loading ************

fn elf_read(state: &mut LinkerState, sys: &dyn Sys, id: ObjId, fd: usize) -> Result<(), LdError> {
    let mut ehdr_bytes = [0u8; core::mem::size_of::<Ehdr>()];
    let n = sys.read_at(fd, 0, &mut ehdr_bytes)?;
    if n != ehdr_bytes.len() {
        return Err(LdError::Io("short header read".into()));
    }
    let ehdr: Ehdr = bytemuck::pod_read_unaligned(&ehdr_bytes);

    if ehdr.e_ident[0..4] != ELFMAG {
        return Err(LdError::BadMagic);
    }
    if ehdr.e_ident[4] != ELFCLASS64 {
        return Err(LdError::BadClass);
    }
    if ehdr.e_ident[5] != ELFDATA2LSB {
        return Err(LdError::BadData);
    }
    if ehdr.e_ident[6] != EV_CURRENT {
        return Err(LdError::BadVersion);
    }
    if ehdr.e_type != ET_DYN {
        return Err(LdError::NotDynamic);
    }
    if ehdr.e_machine != ELF_EM {
        return Err(LdError::BadMachine);
    }
    if ehdr.e_version != EV_CURRENT as u32 {
        return Err(LdError::BadVersion);
    }
    if ehdr.e_phentsize as usize != core::mem::size_of::<Phdr>() {
        return Err(LdError::BadPhdr("invalid program entry size"));
    }

    let mut phdrs = Vec::with_capacity(ehdr.e_phnum as usize);
    for i in 0..ehdr.e_phnum as usize {
        let mut bytes = [0u8; core::mem::size_of::<Phdr>()];
        let off = ehdr.e_phoff + (i * core::mem::size_of::<Phdr>()) as u64;
        if sys.read_at(fd, off, &mut bytes)? != bytes.len() {
            return Err(LdError::Io("short phdr read".into()));
        }
        phdrs.push(bytemuck::pod_read_unaligned::<Phdr>(&bytes));
    }

    let obj = state.obj_mut(id);
    obj.entry = ehdr.e_entry;
    obj.machine = ehdr.e_machine;
    obj.phdrs = phdrs;
    Ok(())
}

fn elf_parse(state: &mut LinkerState, sys: &dyn Sys, id: ObjId) -> Result<(), LdError> {
    let page = sys.page_size();
    let is_first = state.first() == Some(id);
    let obj = state.obj_mut(id);

    for phdr in obj.phdrs.clone() {
        if phdr.p_align == 0 && phdr.p_type == PT_LOAD {
            return Err(LdError::BadPhdr("invalid p_align"));
        }
        let slot = match phdr.p_type {
            PT_PHDR => Some((&mut obj.pt_phdr, "multiple PT_PHDR")),
            PT_TLS => Some((&mut obj.pt_tls, "multiple PT_TLS")),
            PT_DYNAMIC => Some((&mut obj.pt_dynamic, "multiple PT_DYNAMIC")),
            PT_GNU_STACK => Some((&mut obj.pt_gnu_stack, "multiple PT_GNU_STACK")),
            PT_GNU_RELRO => Some((&mut obj.pt_gnu_relro, "multiple PT_GNU_RELRO")),
            _ => None,
        };
        if let Some((slot, dup_msg)) = slot {
            if slot.is_some() {
                return Err(LdError::BadPhdr(dup_msg));
            }
            *slot = Some(phdr);
        }
    }

    // PT_PHDR belongs to the main executable and only there.
    if obj.pt_phdr.is_some() && !is_first {
        return Err(LdError::BadPhdr("unexpected PT_PHDR"));
    }
    if obj.pt_phdr.is_none() && is_first {
        return Err(LdError::BadPhdr("no PT_PHDR"));
    }
    if obj.pt_dynamic.is_none() {
        return Err(LdError::BadPhdr("no PT_DYNAMIC"));
    }
    let Some(stack) = obj.pt_gnu_stack else {
        return Err(LdError::BadPhdr("no PT_GNU_STACK"));
    };
    if obj.pt_gnu_relro.is_none() {
        return Err(LdError::BadPhdr("no PT_GNU_RELRO"));
    }
    if stack.p_flags != PF_R | PF_W {
        return Err(LdError::BadPhdr("invalid stack protection"));
    }

    let mut vaddr_min = usize::MAX;
    let mut vaddr_max = 0usize;
    for phdr in obj.phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
        let (mut addr, mut size) = phdr_vmap(phdr, page);
        let align = phdr.p_align as usize;
        let misalign = addr % align.max(1);
        addr -= misalign;
        size += misalign;
        size = size.next_multiple_of(align.max(1));
        vaddr_min = vaddr_min.min(addr);
        vaddr_max = vaddr_max.max(addr + size);
    }
    if vaddr_min >= vaddr_max {
        return Err(LdError::BadPhdr("invalid PT_LOAD mapping"));
    }
    obj.vaddr_min = vaddr_min;
    obj.vaddr_max = vaddr_max;
    obj.vsize = vaddr_max - vaddr_min;
    Ok(())
}

fn handle_pt_load(
    sys: &dyn Sys,
    base: usize,
    phdr: &Phdr,
    fd: usize,
) -> Result<(), LdError> {
    if phdr.p_filesz > phdr.p_memsz {
        return Err(LdError::BadPhdr("PT_LOAD p_filesz > p_memsz"));
    }
    let page = sys.page_size();
    let (addr, size) = phdr_vmap(phdr, page);
    let offset = page_align_down(phdr.p_offset as usize, page);
    let prefix = phdr.p_vaddr as usize - addr;
    let fsize = prefix + phdr.p_filesz as usize;
    let fmemsz = page_align_up(fsize, page);
    if fmemsz > size {
        return Err(LdError::BadPhdr("PT_LOAD file size > memory size"));
    }
    let dst = base + addr;
    let prot = prot_of(phdr.p_flags);
    sys.map_file_fixed(dst, fmemsz, prot, fd, offset as u64)?;
    if prot.contains(Prot::WRITE) {
        if prefix > 0 {
            mem::write_zero(dst, prefix);
        }
        if fmemsz != fsize {
            mem::write_zero(dst + fsize, fmemsz - fsize);
        }
    }
    if size != fmemsz {
        sys.map_anon_fixed(dst + fmemsz, size - fmemsz, prot)?;
    }
    Ok(())
}

fn elf_map(state: &mut LinkerState, sys: &dyn Sys, id: ObjId, fd: usize) -> Result<(), LdError> {
    let vsize = state.obj(id).vsize;
    let base = sys.map_reserve(vsize)?;
    // The whole file is visible read-only at the base; PT_LOADs overlay
    // their exact protections.
    sys.map_file_fixed(base, vsize, Prot::READ, fd, 0)?;
    state.obj_mut(id).vaddr = base;
    for phdr in state.obj(id).phdrs.clone() {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        handle_pt_load(sys, base, &phdr, fd)?;
    }
    Ok(())
}

// ************ Dynamic section ************

fn set_once(slot: &mut Option<u64>, val: u64, msg: &'static str) -> Result<(), LdError> {
    if slot.is_some() {
        return Err(LdError::BadDynamic(msg));
    }
    *slot = Some(val);
    Ok(())
}

fn elf_dynamic(
    state: &mut LinkerState,
    sys: &dyn Sys,
    id: ObjId,
) -> Result<(), LdError> {
    let is_first = state.first() == Some(id);
    let (dyn_base, dyn_size) = {
        let obj = state.obj(id);
        let pt = obj.pt_dynamic.as_ref().unwrap();
        (obj.vaddr + pt.p_vaddr as usize, pt.p_filesz as usize)
    };

    let mut info = DynInfo::default();
    let mut needed_offsets: Vec<u64> = Vec::new();
    let mut pos = 0;
    while pos < dyn_size {
        let entry: Dyn = mem::read(dyn_base + pos);
        pos += core::mem::size_of::<Dyn>();
        match entry.d_tag {
            DT_NULL => break,
            DT_STRTAB => set_once(&mut info.strtab, entry.d_val, "multiple DT_STRTAB")?,
            DT_STRSZ => set_once(&mut info.strsz, entry.d_val, "multiple DT_STRSZ")?,
            DT_SYMTAB => set_once(&mut info.symtab, entry.d_val, "multiple DT_SYMTAB")?,
            DT_SYMENT => set_once(&mut info.syment, entry.d_val, "multiple DT_SYMENT")?,
            DT_HASH => set_once(&mut info.hash, entry.d_val, "multiple DT_HASH")?,
            DT_GNU_HASH => set_once(&mut info.gnu_hash, entry.d_val, "multiple DT_GNU_HASH")?,
            DT_REL => set_once(&mut info.rel, entry.d_val, "multiple DT_REL")?,
            DT_RELSZ => set_once(&mut info.relsz, entry.d_val, "multiple DT_RELSZ")?,
            DT_RELENT => set_once(&mut info.relent, entry.d_val, "multiple DT_RELENT")?,
            DT_RELA => set_once(&mut info.rela, entry.d_val, "multiple DT_RELA")?,
            DT_RELASZ => set_once(&mut info.relasz, entry.d_val, "multiple DT_RELASZ")?,
            DT_RELAENT => set_once(&mut info.relaent, entry.d_val, "multiple DT_RELAENT")?,
            DT_JMPREL => set_once(&mut info.jmprel, entry.d_val, "multiple DT_JMPREL")?,
            DT_PLTREL => set_once(&mut info.pltrel, entry.d_val, "multiple DT_PLTREL")?,
            DT_PLTRELSZ => set_once(&mut info.pltrelsz, entry.d_val, "multiple DT_PLTRELSZ")?,
            DT_INIT => set_once(&mut info.init, entry.d_val, "multiple DT_INIT")?,
            DT_FINI => set_once(&mut info.fini, entry.d_val, "multiple DT_FINI")?,
            DT_INIT_ARRAY => {
                set_once(&mut info.init_array, entry.d_val, "multiple DT_INIT_ARRAY")?
            }
            DT_INIT_ARRAYSZ => set_once(
                &mut info.init_arraysz,
                entry.d_val,
                "multiple DT_INIT_ARRAYSZ",
            )?,
            DT_FINI_ARRAY => {
                set_once(&mut info.fini_array, entry.d_val, "multiple DT_FINI_ARRAY")?
            }
            DT_FINI_ARRAYSZ => set_once(
                &mut info.fini_arraysz,
                entry.d_val,
                "multiple DT_FINI_ARRAYSZ",
            )?,
            DT_FLAGS_1 => set_once(&mut info.flags_1, entry.d_val, "multiple DT_FLAGS_1")?,
            DT_BIND_NOW => info.bind_now = true,
            DT_FLAGS => return Err(LdError::BadDynamic("unexpected DT_FLAGS")),
            DT_NEEDED => needed_offsets.push(entry.d_val),
            DT_SONAME | DT_DEBUG | DT_TEXTREL | DT_RELACOUNT | DT_PLTGOT | DT_RPATH
            | DT_RELCOUNT | DT_VERSYM | DT_VERDEF | DT_VERDEFNUM | DT_VERNEED
            | DT_VERNEEDNUM => {}
            _ => return Err(LdError::BadDynamic("unhandled dyn tag")),
        }
    }

    if info.strtab.is_none() {
        return Err(LdError::BadDynamic("no DT_STRTAB"));
    }
    if info.strsz.is_none() {
        return Err(LdError::BadDynamic("no DT_STRSZ"));
    }
    if info.symtab.is_none() {
        return Err(LdError::BadDynamic("no DT_SYMTAB"));
    }
    if info.syment.is_none() {
        return Err(LdError::BadDynamic("no DT_SYMENT"));
    }
    if info.hash.is_none() {
        return Err(LdError::BadDynamic("no DT_HASH"));
    }
    if info.jmprel.is_some() && (info.pltrel.is_none() || info.pltrelsz.is_none()) {
        return Err(LdError::BadDynamic("no DT_PLTREL on DT_JMPREL"));
    }
    if info.rel.is_some() && (info.relsz.is_none() || info.relent.is_none()) {
        return Err(LdError::BadDynamic("no DT_RELSZ on DT_REL"));
    }
    if info.rela.is_some() && (info.relasz.is_none() || info.relaent.is_none()) {
        return Err(LdError::BadDynamic("no DT_RELASZ on DT_RELA"));
    }
    let Some(flags_1) = info.flags_1 else {
        return Err(LdError::BadDynamic("no DT_FLAGS_1"));
    };
    if flags_1 & DF_1_NOW == 0 {
        return Err(LdError::BadDynamic("no DF_1_NOW"));
    }
    if flags_1 & DF_1_PIE != 0 {
        if !is_first {
            return Err(LdError::BadDynamic("unexpected DF_1_PIE"));
        }
    } else if is_first {
        return Err(LdError::BadDynamic("no DF_1_PIE"));
    }
    if !info.bind_now {
        return Err(LdError::BadDynamic("no DT_BIND_NOW"));
    }

    state.obj_mut(id).dyn_info = info;

    for str_off in needed_offsets {
        let name_addr = state.obj(id).strtab() + str_off as usize;
        let name = mem::read_cstr(name_addr);
        let Some(dep) = load_needed(state, sys, &name)? else {
            continue; // the ld.so.1 sentinel
        };
        state.obj_mut(id).neededs.push(dep);
        state.obj_mut(dep).parents.push(id);
    }
    Ok(())
}

fn load_needed(
    state: &mut LinkerState,
    sys: &dyn Sys,
    name: &str,
) -> Result<Option<ObjId>, LdError> {
    if name == "ld.so.1" {
        return Ok(None);
    }
    if name.contains('/') {
        return Err(LdError::BadDynamic("invalid DT_NEEDED file"));
    }
    let library_path = sys
        .getenv("LD_LIBRARY_PATH")
        .unwrap_or_else(|| String::from("/lib"));
    for dir in library_path.split(':').filter(|d| !d.is_empty()) {
        let path = format!("{}/{}", dir, name);
        if let Some(dep) = state.find(&path) {
            return Ok(Some(dep));
        }
        if let Ok(fd) = sys.open(&path) {
            let dep = elf_from_fd(state, sys, &path, fd);
            sys.close(fd);
            return dep.map(Some);
        }
    }
    Err(LdError::NotFound(name.into()))
}

// ************ Symbol search ************

fn test_sym(
    obj: &ElfObject,
    sym: &Sym,
    name: &str,
    type_: u8,
) -> Option<usize> {
    if sym.st_shndx == SHN_UNDEF {
        return None;
    }
    if sym.bind() != STB_GLOBAL {
        return None;
    }
    if sym.type_() != type_ {
        return None;
    }
    if !mem::cstr_eq(obj.strtab() + sym.st_name as usize, name) {
        return None;
    }
    Some(obj.vaddr + sym.st_value as usize)
}

fn find_sym_sysv(obj: &ElfObject, name: &str, type_: u8) -> Option<usize> {
    let hashtab = obj.vaddr + obj.dyn_info.hash? as usize;
    let nbucket: u32 = mem::read(hashtab);
    let nchain: u32 = mem::read(hashtab + 4);
    let buckets = hashtab + 8;
    let chains = buckets + nbucket as usize * 4;
    let hash = elf_hash(name);
    let mut i: u32 = mem::read(buckets + (hash % nbucket.max(1)) as usize * 4);
    while i != 0 && i < nchain {
        let sym = obj.sym(i as usize);
        if let Some(addr) = test_sym(obj, &sym, name, type_) {
            return Some(addr);
        }
        i = mem::read(chains + i as usize * 4);
    }
    None
}

fn find_sym_gnu(obj: &ElfObject, name: &str, type_: u8) -> Option<usize> {
    let hashtab = obj.vaddr + obj.dyn_info.gnu_hash? as usize;
    let nbucket: u32 = mem::read(hashtab);
    let symoffset: u32 = mem::read(hashtab + 4);
    let bloom_size: u32 = mem::read(hashtab + 8);
    let bloom_shift: u32 = mem::read(hashtab + 12);
    let bloom = hashtab + 16;
    let buckets = bloom + bloom_size as usize * 8;
    let chains = buckets + nbucket as usize * 4;

    let hash = gnu_hash(name);
    let word_bits = 64u32;
    let bloom_word: u64 = mem::read(bloom + ((hash / word_bits) % bloom_size.max(1)) as usize * 8);
    let mask = (1u64 << (hash % word_bits)) | (1u64 << ((hash >> bloom_shift) % word_bits));
    if bloom_word & mask != mask {
        return None;
    }

    let mut i: u32 = mem::read(buckets + (hash % nbucket.max(1)) as usize * 4);
    if i < symoffset {
        return None;
    }
    loop {
        let chain_hash: u32 = mem::read(chains + (i - symoffset) as usize * 4);
        if (hash | 1) == (chain_hash | 1) {
            let sym = obj.sym(i as usize);
            if let Some(addr) = test_sym(obj, &sym, name, type_) {
                return Some(addr);
            }
        }
        if chain_hash & 1 != 0 {
            return None;
        }
        i += 1;
    }
}

/// Searches an object, then its direct dependencies in declaration order.
pub fn find_elf_sym(
    state: &LinkerState,
    id: ObjId,
    name: &str,
    type_: u8,
) -> Option<(ObjId, usize)> {
    let obj = state.obj(id);
    let found = if obj.dyn_info.gnu_hash.is_some() {
        find_sym_gnu(obj, name, type_)
    } else {
        find_sym_sysv(obj, name, type_)
    };
    if let Some(addr) = found {
        return Some((id, addr));
    }
    for dep in &obj.neededs {
        if let Some(hit) = find_elf_sym(state, *dep, name, type_) {
            return Some(hit);
        }
    }
    None
}

/// Resolves the symbol a relocation refers to.
fn get_rel_sym(
    state: &LinkerState,
    sys: &dyn Sys,
    id: ObjId,
    symidx: usize,
) -> Result<(ObjId, usize), LdError> {
    let obj = state.obj(id);
    let sym = obj.sym(symidx);
    if sym.st_shndx != SHN_UNDEF {
        return Ok((id, obj.vaddr + sym.st_value as usize));
    }
    let name = mem::read_cstr(obj.strtab() + sym.st_name as usize);
    for dep in &obj.neededs {
        if let Some((owner, addr)) = find_elf_sym(state, *dep, &name, sym.type_()) {
            return Ok((owner, addr));
        }
    }
    if let Some(addr) = sys.native_symbol(&name) {
        return Ok((id, addr));
    }
    if sym.bind() == STB_WEAK {
        return Ok((id, 0));
    }
    Err(LdError::SymbolNotFound(name))
}

// ************ Relocation ************

fn apply_reloc(
    state: &LinkerState,
    sys: &dyn Sys,
    id: ObjId,
    r_offset: u64,
    r_info: u64,
    addend: Option<i64>,
) -> Result<(), LdError> {
    let obj = state.obj(id);
    let addr = obj.vaddr + r_offset as usize;
    let addend = addend.unwrap_or_else(|| mem::read::<u64>(addr) as i64);
    let raw_type = r_type(r_info);
    let symidx = r_sym(r_info) as usize;
    let Some((kind, width)) = reloc::decode(obj.machine, raw_type) else {
        return Err(LdError::UnhandledReloc(raw_type));
    };

    let store = |value: u64| match width {
        RelocWidth::W64 => mem::write(addr, &value),
        RelocWidth::W32 => mem::write(addr, &(value as u32)),
    };

    match kind {
        RelocKind::None => {}
        RelocKind::Relative => store((obj.vaddr as i64 + addend) as u64),
        RelocKind::JmpSlot | RelocKind::GlobDat => {
            let (_, sym) = get_rel_sym(state, sys, id, symidx)?;
            store(sym as u64);
        }
        RelocKind::Abs => {
            let (_, sym) = get_rel_sym(state, sys, id, symidx)?;
            store((sym as i64 + addend) as u64);
        }
        RelocKind::Pc32 => {
            let (_, sym) = get_rel_sym(state, sys, id, symidx)?;
            store((sym as i64 - r_offset as i64 - obj.vaddr as i64 + addend) as u64);
        }
        RelocKind::TlsDtpMod => {
            // Symbol index zero refers to this object's own TLS module.
            let owner = if symidx != 0 {
                get_rel_sym(state, sys, id, symidx)?.0
            } else {
                id
            };
            let owner_obj = state.obj(owner);
            if !owner_obj.has_tls_module {
                return Err(LdError::BadDynamic("TLS reloc without PT_TLS"));
            }
            store(owner_obj.tls_module as u64);
        }
        RelocKind::TlsDtpOff => {
            let (owner, sym) = get_rel_sym(state, sys, id, symidx)?;
            let owner_obj = state.obj(owner);
            if owner_obj.pt_tls.is_none() {
                return Err(LdError::BadDynamic("TLS reloc without PT_TLS"));
            }
            store((sym - owner_obj.vaddr) as u64);
        }
        RelocKind::TlsTpOff => {
            let (owner, sym) = get_rel_sym(state, sys, id, symidx)?;
            let owner_obj = state.obj(owner);
            if owner_obj.pt_tls.is_none() {
                return Err(LdError::BadDynamic("TLS reloc without PT_TLS"));
            }
            let mut value =
                (sym as i64 - owner_obj.vaddr as i64 - owner_obj.tls_offset as i64) as u64;
            if reloc::tpoff_negated(obj.machine) {
                value = (value as u32).wrapping_neg() as u64;
            }
            store(value);
        }
    }
    Ok(())
}

fn elf_resolve(state: &LinkerState, sys: &dyn Sys, id: ObjId) -> Result<(), LdError> {
    let info = state.obj(id).dyn_info.clone();
    let vaddr = state.obj(id).vaddr;

    if let (Some(rel), Some(relsz), Some(relent)) = (info.rel, info.relsz, info.relent) {
        let mut off = 0;
        while off < relsz {
            let r: Rel = mem::read(vaddr + (rel + off) as usize);
            apply_reloc(state, sys, id, r.r_offset, r.r_info, None)?;
            off += relent;
        }
    }
    if let (Some(rela), Some(relasz), Some(relaent)) = (info.rela, info.relasz, info.relaent) {
        let mut off = 0;
        while off < relasz {
            let r: Rela = mem::read(vaddr + (rela + off) as usize);
            apply_reloc(state, sys, id, r.r_offset, r.r_info, Some(r.r_addend))?;
            off += relaent;
        }
    }
    if let (Some(jmprel), Some(pltrelsz), Some(pltrel)) =
        (info.jmprel, info.pltrelsz, info.pltrel)
    {
        match pltrel as i64 {
            DT_REL => {
                let ent = core::mem::size_of::<Rel>() as u64;
                let mut off = 0;
                while off < pltrelsz {
                    let r: Rel = mem::read(vaddr + (jmprel + off) as usize);
                    apply_reloc(state, sys, id, r.r_offset, r.r_info, None)?;
                    off += ent;
                }
            }
            DT_RELA => {
                let ent = core::mem::size_of::<Rela>() as u64;
                let mut off = 0;
                while off < pltrelsz {
                    let r: Rela = mem::read(vaddr + (jmprel + off) as usize);
                    apply_reloc(state, sys, id, r.r_offset, r.r_info, Some(r.r_addend))?;
                    off += ent;
                }
            }
            _ => return Err(LdError::BadDynamic("unhandled DT_PLTREL type")),
        }
    }
    Ok(())
}

fn elf_protect(state: &LinkerState, sys: &dyn Sys, id: ObjId) -> Result<(), LdError> {
    let obj = state.obj(id);
    let relro = obj.pt_gnu_relro.as_ref().unwrap();
    let (addr, size) = phdr_vmap(relro, sys.page_size());
    sys.protect(obj.vaddr + addr, size, Prot::READ)
}

fn elf_init(state: &LinkerState, sys: &dyn Sys, id: ObjId) {
    let obj = state.obj(id);
    if let Some(init) = obj.dyn_info.init {
        sys.call_fn(obj.vaddr + init as usize);
    }
    if let (Some(array), Some(size)) = (obj.dyn_info.init_array, obj.dyn_info.init_arraysz) {
        let mut off = 0;
        while off < size as usize {
            let f: u64 = mem::read(obj.vaddr + array as usize + off);
            sys.call_fn(f as usize);
            off += core::mem::size_of::<u64>();
        }
    }
}

fn elf_fini(state: &LinkerState, sys: &dyn Sys, id: ObjId) {
    let obj = state.obj(id);
    if let (Some(array), Some(size)) = (obj.dyn_info.fini_array, obj.dyn_info.fini_arraysz) {
        let mut off = size as usize;
        while off >= core::mem::size_of::<u64>() {
            let f: u64 = mem::read(obj.vaddr + array as usize + off - core::mem::size_of::<u64>());
            sys.call_fn(f as usize);
            off -= core::mem::size_of::<u64>();
        }
    }
    if let Some(fini) = obj.dyn_info.fini {
        sys.call_fn(obj.vaddr + fini as usize);
    }
}

/// Resolves, protects and initializes an object after its dependencies.
pub fn elf_finalize(state: &mut LinkerState, sys: &dyn Sys, id: ObjId) -> Result<(), LdError> {
    if state.obj(id).loaded {
        return Ok(());
    }
    for dep in state.obj(id).neededs.clone() {
        elf_finalize(state, sys, dep)?;
    }
    elf_resolve(state, sys, id)?;
    elf_protect(state, sys, id)?;
    elf_init(state, sys, id);
    state.obj_mut(id).loaded = true;
    Ok(())
}

// ************ Entry points ************

/// Loads an object from an open file.
pub fn elf_from_fd(
    state: &mut LinkerState,
    sys: &dyn Sys,
    path: &str,
    fd: usize,
) -> Result<ObjId, LdError> {
    let id = state.alloc(path);
    let res = (|| -> Result<(), LdError> {
        elf_read(state, sys, id, fd)?;
        elf_parse(state, sys, id)?;
        elf_map(state, sys, id, fd)?;
        elf_dynamic(state, sys, id)?;
        if !state.initial_elf {
            crate::tls::create_dynamic_tls(state, id)?;
            elf_finalize(state, sys, id)?;
        }
        Ok(())
    })();
    match res {
        Ok(()) => Ok(id),
        Err(e) => {
            elf_free(state, sys, id);
            Err(e)
        }
    }
}

/// Loads an object by path, deduplicating against live objects.
pub fn elf_from_path(
    state: &mut LinkerState,
    sys: &dyn Sys,
    path: &str,
) -> Result<ObjId, LdError> {
    if let Some(id) = state.find(path) {
        return Ok(id);
    }
    let fd = sys.open(path)?;
    let res = elf_from_fd(state, sys, path, fd);
    sys.close(fd);
    res
}

/// Wires up the main executable the kernel already mapped, using the
/// auxv-provided program header location.
pub fn elf_from_auxv(
    state: &mut LinkerState,
    sys: &dyn Sys,
    path: &str,
) -> Result<ObjId, LdError> {
    state.initial_elf = true;
    let id = state.alloc(path);
    let res = (|| -> Result<(), LdError> {
        let phdr_addr = sys.getauxval(AT_PHDR) as usize;
        let phnum = sys.getauxval(AT_PHNUM) as usize;
        let phent = sys.getauxval(AT_PHENT) as usize;
        if phent != core::mem::size_of::<Phdr>() || phdr_addr == 0 {
            return Err(LdError::BadPhdr("invalid program entry size"));
        }
        let mut phdrs = Vec::with_capacity(phnum);
        for i in 0..phnum {
            phdrs.push(mem::read::<Phdr>(phdr_addr + i * phent));
        }
        {
            let obj = state.obj_mut(id);
            obj.from_auxv = true;
            obj.refcount += 1;
            obj.phdrs = phdrs;
        }
        elf_parse(state, sys, id)?;
        {
            let obj = state.obj_mut(id);
            let pt_phdr = obj.pt_phdr.as_ref().unwrap();
            obj.vaddr = phdr_addr - pt_phdr.p_vaddr as usize;
        }
        elf_dynamic(state, sys, id)?;
        crate::tls::create_initial_tls(state, sys, id)?;
        elf_finalize(state, sys, id)?;
        Ok(())
    })();
    state.initial_elf = false;
    match res {
        Ok(()) => Ok(id),
        Err(e) => {
            elf_free(state, sys, id);
            Err(e)
        }
    }
}

/// Drops one reference; the last one runs fini, releases dependency
/// edges, frees TLS backing and unmaps the image.
pub fn elf_free(state: &mut LinkerState, sys: &dyn Sys, id: ObjId) {
    {
        let obj = state.obj_mut(id);
        obj.refcount -= 1;
        if obj.refcount > 0 {
            return;
        }
    }
    if state.obj(id).loaded {
        elf_fini(state, sys, id);
    }
    let neededs = core::mem::take(&mut state.obj_mut(id).neededs);
    for dep in neededs {
        if state.is_live(dep) {
            state.obj_mut(dep).parents.retain(|p| *p != id);
            elf_free(state, sys, dep);
        }
    }
    {
        let obj = state.obj(id);
        if obj.vaddr != 0 && !obj.from_auxv {
            sys.unmap(obj.vaddr, obj.vsize);
        }
    }
    if state.obj(id).has_tls_module {
        crate::tls::cleanup_dynamic_tls(state, id);
    }
    debug!("released {}", state.obj(id).path);
    state.order.retain(|o| *o != id);
    state.objects[id] = None;
}
