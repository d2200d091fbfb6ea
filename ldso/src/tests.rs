// SPDX-License-Identifier: MPL-2.0

//! Hosted linker tests over synthetic ET_DYN images.

use alloc::vec::Vec;

use crate::{
    api::{Linker, RTLD_NOW},
    defs::*,
    elf::LinkerState,
    hash::gnu_hash,
    sys::mock::MockSys,
    tls, LdError,
};

// Fixed section layout inside the fixture image (offset == vaddr).
const PHDR_OFF: u64 = 0x40;
const DYN_OFF: u64 = 0x1000;
const HASH_OFF: u64 = 0x1200;
const GNU_HASH_OFF: u64 = 0x1280;
const SYM_OFF: u64 = 0x1300;
const STR_OFF: u64 = 0x1500;
const RELA_OFF: u64 = 0x1600;
const DATA_OFF: u64 = 0x1800;
const TLS_OFF: u64 = 0x1900;
const FILE_SIZE: usize = 0x2000;
const MEM_SIZE: u64 = 0x2400;

fn rel_relative() -> u32 {
    match ELF_EM {
        EM_AARCH64 => 1027,
        EM_RISCV => 3,
        _ => 8,
    }
}

fn rel_glob_dat() -> u32 {
    match ELF_EM {
        EM_AARCH64 => 1025,
        EM_RISCV => 2, // R_RISCV_64 stands in; no distinct GLOB_DAT width
        _ => 6,
    }
}

#[derive(Clone, Copy)]
struct FxSym {
    name: &'static str,
    value: u64,
    bind: u8,
    type_: u8,
    shndx: u16,
}

#[derive(Default)]
struct Fixture {
    pie: bool,
    with_phdr: bool,
    symbols: Vec<FxSym>,
    needed: Vec<&'static str>,
    rela: Vec<(u64, u32, u32, i64)>,
    init: Option<u64>,
    fini: Option<u64>,
    tls: Option<(Vec<u8>, u64)>,
    skip_df_1_now: bool,
    gnu_hash_table: bool,
    empty_sysv_buckets: bool,
}

fn put<T: bytemuck::Pod>(image: &mut [u8], off: u64, val: &T) {
    let bytes = bytemuck::bytes_of(val);
    image[off as usize..off as usize + bytes.len()].copy_from_slice(bytes);
}

fn build(fx: &Fixture) -> Vec<u8> {
    let mut image = alloc::vec![0u8; FILE_SIZE];

    // String table: "\0" then symbol names then needed names.
    let mut strtab = alloc::vec![0u8];
    let mut sym_name_offs = Vec::new();
    for sym in &fx.symbols {
        sym_name_offs.push(strtab.len() as u32);
        strtab.extend_from_slice(sym.name.as_bytes());
        strtab.push(0);
    }
    let mut needed_offs = Vec::new();
    for name in &fx.needed {
        needed_offs.push(strtab.len() as u64);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }
    image[STR_OFF as usize..STR_OFF as usize + strtab.len()].copy_from_slice(&strtab);

    // Symbol table: null entry + declared symbols.
    let nsyms = fx.symbols.len() + 1;
    for (i, sym) in fx.symbols.iter().enumerate() {
        put(
            &mut image,
            SYM_OFF + ((i + 1) * core::mem::size_of::<Sym>()) as u64,
            &Sym {
                st_name: sym_name_offs[i],
                st_info: (sym.bind << 4) | sym.type_,
                st_other: 0,
                st_shndx: sym.shndx,
                st_value: sym.value,
                st_size: 0,
            },
        );
    }

    // SysV hash: one bucket, chain per symbol.
    put(&mut image, HASH_OFF, &1u32); // nbucket
    put(&mut image, HASH_OFF + 4, &(nsyms as u32)); // nchain
    let first = if fx.empty_sysv_buckets || fx.symbols.is_empty() {
        0u32
    } else {
        1u32
    };
    put(&mut image, HASH_OFF + 8, &first); // bucket[0]
    for i in 1..nsyms {
        let next = if i + 1 < nsyms { (i + 1) as u32 } else { 0u32 };
        put(&mut image, HASH_OFF + 12 + (i as u64) * 4, &next);
    }

    // Optional GNU hash: all-ones bloom, one bucket, symoffset 1.
    if fx.gnu_hash_table {
        put(&mut image, GNU_HASH_OFF, &1u32); // nbucket
        put(&mut image, GNU_HASH_OFF + 4, &1u32); // symoffset
        put(&mut image, GNU_HASH_OFF + 8, &1u32); // bloom_size
        put(&mut image, GNU_HASH_OFF + 12, &6u32); // bloom_shift
        put(&mut image, GNU_HASH_OFF + 16, &u64::MAX); // bloom[0]
        put(&mut image, GNU_HASH_OFF + 24, &1u32); // bucket[0]
        for (i, sym) in fx.symbols.iter().enumerate() {
            let mut h = gnu_hash(sym.name);
            if i + 1 == fx.symbols.len() {
                h |= 1;
            } else {
                h &= !1;
            }
            put(&mut image, GNU_HASH_OFF + 28 + (i as u64) * 4, &h);
        }
    }

    // Relocations.
    for (i, (offset, type_, sym, addend)) in fx.rela.iter().enumerate() {
        put(
            &mut image,
            RELA_OFF + (i * core::mem::size_of::<Rela>()) as u64,
            &Rela {
                r_offset: *offset,
                r_info: (*sym as u64) << 32 | *type_ as u64,
                r_addend: *addend,
            },
        );
    }

    // TLS initial image.
    if let Some((init_image, _memsz)) = &fx.tls {
        image[TLS_OFF as usize..TLS_OFF as usize + init_image.len()]
            .copy_from_slice(init_image);
    }

    // Dynamic section.
    let mut dynamic: Vec<Dyn> = Vec::new();
    let mut tag = |t: i64, v: u64| dynamic.push(Dyn { d_tag: t, d_val: v });
    for off in &needed_offs {
        tag(DT_NEEDED, *off);
    }
    tag(DT_STRTAB, STR_OFF);
    tag(DT_STRSZ, strtab.len() as u64);
    tag(DT_SYMTAB, SYM_OFF);
    tag(DT_SYMENT, core::mem::size_of::<Sym>() as u64);
    tag(DT_HASH, HASH_OFF);
    if fx.gnu_hash_table {
        tag(DT_GNU_HASH, GNU_HASH_OFF);
    }
    if !fx.rela.is_empty() {
        tag(DT_RELA, RELA_OFF);
        tag(DT_RELASZ, (fx.rela.len() * core::mem::size_of::<Rela>()) as u64);
        tag(DT_RELAENT, core::mem::size_of::<Rela>() as u64);
    }
    if let Some(init) = fx.init {
        tag(DT_INIT, init);
    }
    if let Some(fini) = fx.fini {
        tag(DT_FINI, fini);
    }
    let mut flags_1 = if fx.skip_df_1_now { 0 } else { DF_1_NOW };
    if fx.pie {
        flags_1 |= DF_1_PIE;
    }
    tag(DT_FLAGS_1, flags_1);
    tag(DT_BIND_NOW, 1);
    tag(DT_NULL, 0);
    for (i, d) in dynamic.iter().enumerate() {
        put(
            &mut image,
            DYN_OFF + (i * core::mem::size_of::<Dyn>()) as u64,
            d,
        );
    }

    // Program headers.
    let mut phdrs: Vec<Phdr> = Vec::new();
    if fx.with_phdr {
        phdrs.push(Phdr {
            p_type: PT_PHDR,
            p_flags: PF_R,
            p_offset: PHDR_OFF,
            p_vaddr: PHDR_OFF,
            p_paddr: PHDR_OFF,
            p_filesz: 0,
            p_memsz: 0,
            p_align: 8,
        });
    }
    phdrs.push(Phdr {
        p_type: PT_LOAD,
        p_flags: PF_R | PF_W | PF_X,
        p_offset: 0,
        p_vaddr: 0,
        p_paddr: 0,
        p_filesz: FILE_SIZE as u64,
        p_memsz: MEM_SIZE,
        p_align: 0x1000,
    });
    phdrs.push(Phdr {
        p_type: PT_DYNAMIC,
        p_flags: PF_R,
        p_offset: DYN_OFF,
        p_vaddr: DYN_OFF,
        p_paddr: DYN_OFF,
        p_filesz: (dynamic.len() * core::mem::size_of::<Dyn>()) as u64,
        p_memsz: (dynamic.len() * core::mem::size_of::<Dyn>()) as u64,
        p_align: 8,
    });
    phdrs.push(Phdr {
        p_type: PT_GNU_STACK,
        p_flags: PF_R | PF_W,
        p_align: 16,
        ..Default::default()
    });
    phdrs.push(Phdr {
        p_type: PT_GNU_RELRO,
        p_flags: PF_R,
        p_offset: DYN_OFF,
        p_vaddr: DYN_OFF,
        p_paddr: DYN_OFF,
        p_filesz: 0x100,
        p_memsz: 0x100,
        p_align: 1,
    });
    if let Some((init_image, memsz)) = &fx.tls {
        phdrs.push(Phdr {
            p_type: PT_TLS,
            p_flags: PF_R,
            p_offset: TLS_OFF,
            p_vaddr: TLS_OFF,
            p_paddr: TLS_OFF,
            p_filesz: init_image.len() as u64,
            p_memsz: *memsz,
            p_align: 8,
        });
    }
    // Fix up the PT_PHDR size now that the count is known.
    let phdr_bytes = (phdrs.len() * core::mem::size_of::<Phdr>()) as u64;
    if fx.with_phdr {
        phdrs[0].p_filesz = phdr_bytes;
        phdrs[0].p_memsz = phdr_bytes;
    }
    for (i, p) in phdrs.iter().enumerate() {
        put(
            &mut image,
            PHDR_OFF + (i * core::mem::size_of::<Phdr>()) as u64,
            p,
        );
    }

    // The ELF header.
    let mut e_ident = [0u8; EI_NIDENT];
    e_ident[0..4].copy_from_slice(&ELFMAG);
    e_ident[4] = ELFCLASS64;
    e_ident[5] = ELFDATA2LSB;
    e_ident[6] = EV_CURRENT;
    put(
        &mut image,
        0,
        &Ehdr {
            e_ident,
            e_type: ET_DYN,
            e_machine: ELF_EM,
            e_version: EV_CURRENT as u32,
            e_entry: 0,
            e_phoff: PHDR_OFF,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: core::mem::size_of::<Ehdr>() as u16,
            e_phentsize: core::mem::size_of::<Phdr>() as u16,
            e_phnum: phdrs.len() as u16,
            e_shentsize: 64,
            e_shnum: 0,
            e_shstrndx: 0,
        },
    );
    image
}

fn main_fixture() -> Fixture {
    Fixture {
        pie: true,
        with_phdr: true,
        ..Default::default()
    }
}

fn linker_with(files: &[(&str, Fixture)]) -> Linker<MockSys> {
    let sys = MockSys::new();
    for (path, fx) in files {
        sys.add_file(path, build(fx));
    }
    Linker::new(sys, true)
}

#[test]
fn dlopen_dlsym_and_dlerror() {
    let mut fx = main_fixture();
    fx.symbols.push(FxSym {
        name: "foo",
        value: 0x1000,
        bind: STB_GLOBAL,
        type_: STT_FUNC,
        shndx: 1,
    });
    let linker = linker_with(&[("/lib/libA.so", fx)]);

    let handle = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap();
    let base = linker.load_base(handle).unwrap();
    assert_eq!(linker.dl_sym(handle, "foo"), Some(base + 0x1000));

    // A missing symbol reports once through dlerror, then the slot is
    // clear again.
    assert_eq!(linker.dl_sym(handle, "missing"), None);
    let err = linker.dl_error().unwrap();
    assert!(err.contains("missing"));
    assert_eq!(linker.dl_error(), None);
}

#[test]
fn dlopen_needs_exactly_one_binding_mode() {
    let linker = linker_with(&[("/lib/libA.so", main_fixture())]);
    assert!(linker.dl_open(Some("/lib/libA.so"), 0).is_err());
    assert!(linker
        .dl_open(Some("/lib/libA.so"), RTLD_NOW | crate::api::RTLD_LAZY)
        .is_err());
}

#[test]
fn df_1_now_is_mandatory() {
    let mut fx = main_fixture();
    fx.skip_df_1_now = true;
    let linker = linker_with(&[("/lib/libA.so", fx)]);
    let err = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap_err();
    assert_eq!(err, LdError::BadDynamic("no DF_1_NOW"));
}

#[test]
fn relative_relocation_applies_load_bias() {
    let mut fx = main_fixture();
    fx.rela.push((DATA_OFF, rel_relative(), 0, 0x1234));
    let linker = linker_with(&[("/lib/libA.so", fx)]);
    let handle = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap();
    let base = linker.load_base(handle).unwrap();
    let value: u64 = crate::mem::read(base + DATA_OFF as usize);
    assert_eq!(value, base as u64 + 0x1234);
}

#[test]
fn weak_undefined_resolves_to_zero() {
    let mut fx = main_fixture();
    fx.symbols.push(FxSym {
        name: "maybe",
        value: 0,
        bind: STB_WEAK,
        type_: STT_FUNC,
        shndx: SHN_UNDEF,
    });
    // The load succeeding at all shows the weak-zero rule applied; a
    // strong symbol here fails (see below).
    fx.rela.push((DATA_OFF + 8, rel_glob_dat(), 1, 0));
    let linker = linker_with(&[("/lib/libA.so", fx)]);
    let handle = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap();
    let base = linker.load_base(handle).unwrap();
    let value: u64 = crate::mem::read(base + DATA_OFF as usize + 8);
    assert_eq!(value, 0);
}

#[test]
fn undefined_strong_symbol_fails_load() {
    let mut fx = main_fixture();
    fx.symbols.push(FxSym {
        name: "required",
        value: 0,
        bind: STB_GLOBAL,
        type_: STT_FUNC,
        shndx: SHN_UNDEF,
    });
    fx.rela.push((DATA_OFF, rel_glob_dat(), 1, 0));
    let linker = linker_with(&[("/lib/libA.so", fx)]);
    let err = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap_err();
    assert_eq!(err, LdError::SymbolNotFound("required".into()));
}

#[test]
fn needed_deps_load_init_order_and_teardown() {
    let mut main = main_fixture();
    main.needed.push("libdep.so");
    main.init = Some(0x111);
    main.fini = Some(0x119);

    let mut dep = Fixture::default();
    dep.init = Some(0x222);
    dep.fini = Some(0x229);
    dep.symbols.push(FxSym {
        name: "dep_fn",
        value: 0x1040,
        bind: STB_GLOBAL,
        type_: STT_FUNC,
        shndx: 1,
    });

    let linker = linker_with(&[("/lib/libmain.so", main), ("/lib/libdep.so", dep)]);
    let handle = linker.dl_open(Some("/lib/libmain.so"), RTLD_NOW).unwrap();

    // The dependency's symbols are visible through the parent.
    let mut dep_base = 0;
    linker.dl_iterate_phdr(|info| {
        if info.name.contains("libdep") {
            dep_base = info.addr;
        }
        0
    });
    assert_ne!(dep_base, 0);
    assert_eq!(linker.dl_sym(handle, "dep_fn"), Some(dep_base + 0x1040));

    // Init ran dependencies-first.
    let main_base = linker.load_base(handle).unwrap();
    let called = linker.sys().called_fns();
    assert_eq!(called, alloc::vec![dep_base + 0x222, main_base + 0x111]);

    // Closing the parent releases the dependency too; fini runs
    // top-down.
    linker.dl_close(handle).unwrap();
    assert!(!linker.is_live(handle));
    let called = linker.sys().called_fns();
    assert_eq!(
        called[2..],
        [main_base + 0x119, dep_base + 0x229]
    );
}

#[test]
fn dedup_by_path_bumps_refcount() {
    let linker = linker_with(&[("/lib/libA.so", main_fixture())]);
    let h1 = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap();
    let h2 = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap();
    assert_eq!(h1, h2);
    assert_eq!(linker.refcount(h1), Some(2));
    linker.dl_close(h1).unwrap();
    assert!(linker.is_live(h1));
    linker.dl_close(h2).unwrap();
    assert!(!linker.is_live(h1));
}

#[test]
fn gnu_hash_lookup_bypasses_sysv() {
    let mut fx = main_fixture();
    fx.symbols.push(FxSym {
        name: "ghashed",
        value: 0x1080,
        bind: STB_GLOBAL,
        type_: STT_FUNC,
        shndx: 1,
    });
    fx.gnu_hash_table = true;
    // With a broken SysV table, only the GNU path can find the symbol.
    fx.empty_sysv_buckets = true;
    let linker = linker_with(&[("/lib/libA.so", fx)]);
    let handle = linker.dl_open(Some("/lib/libA.so"), RTLD_NOW).unwrap();
    let base = linker.load_base(handle).unwrap();
    assert_eq!(linker.dl_sym(handle, "ghashed"), Some(base + 0x1080));
}

#[test]
fn dynamic_tls_module_ids_and_unload() {
    let mut lib = main_fixture();
    lib.tls = Some((alloc::vec![0xAA, 0xBB], 8));
    let linker = linker_with(&[("/lib/libtls.so", lib)]);
    let handle = linker.dl_open(Some("/lib/libtls.so"), RTLD_NOW).unwrap();

    let mut modid = 0;
    linker.dl_iterate_phdr(|info| {
        modid = info.tls_modid;
        0
    });
    // Lowest free dynamic id: 1.
    assert_eq!(modid, 1);
    linker.dl_close(handle).unwrap();
}

#[test]
fn initial_tls_layout_grows_down_and_up() {
    for grows_down in [true, false] {
        let sys = MockSys::new();
        let mut state = LinkerState::new(grows_down);

        // Two fake objects with TLS images backed by leaked buffers.
        let main_img: &'static mut [u8] = alloc::vec![1u8, 2, 3, 4].leak();
        let dep_img: &'static mut [u8] = alloc::vec![9u8, 9].leak();

        let main_id = state.alloc("main");
        let dep_id = state.alloc("dep");
        {
            let obj = state.obj_mut(main_id);
            obj.vaddr = main_img.as_ptr() as usize;
            obj.pt_tls = Some(Phdr {
                p_type: PT_TLS,
                p_vaddr: 0,
                p_filesz: 4,
                p_memsz: 16,
                p_align: 8,
                ..Default::default()
            });
            obj.neededs.push(dep_id);
        }
        {
            let obj = state.obj_mut(dep_id);
            obj.vaddr = dep_img.as_ptr() as usize;
            obj.pt_tls = Some(Phdr {
                p_type: PT_TLS,
                p_vaddr: 0,
                p_filesz: 2,
                p_memsz: 24,
                p_align: 8,
                ..Default::default()
            });
        }

        tls::create_initial_tls(&mut state, &sys, main_id).unwrap();

        // Dense module ids from 1, in dependency order.
        assert_eq!(state.obj(main_id).tls_module, 1);
        assert_eq!(state.obj(dep_id).tls_module, 2);
        if grows_down {
            assert_eq!(state.obj(main_id).tls_offset, 16);
            assert_eq!(state.obj(dep_id).tls_offset, 40);
        } else {
            assert_eq!(state.obj(main_id).tls_offset, 0);
            assert_eq!(state.obj(dep_id).tls_offset, 16);
        }

        let block = &state.tls.blocks[0];
        assert_eq!(block.initial_mods_count, 3);
        assert_eq!(block.initial_size, 40);
        // The thread pointer was installed.
        assert_eq!(sys.tls_ptr(), Some(block.thread_pointer()));
        // Initial module data sits inside the static allocation and
        // carries the init image followed by zeros.
        for id in [main_id, dep_id] {
            let module = block.mods[state.obj(id).tls_module];
            assert!(block.contains_static(module.data));
        }
        let main_mod = block.mods[1];
        let bytes = crate::mem::read_bytes(main_mod.data, 5);
        assert_eq!(bytes, alloc::vec![1, 2, 3, 4, 0]);

        // A duplicated block mirrors the layout at fresh addresses.
        let block_thread_pointer = block.thread_pointer();
        let tp2 = tls::tls_block_alloc(&mut state).unwrap();
        assert_ne!(tp2, block_thread_pointer);
        let dup = state
            .tls
            .blocks
            .iter()
            .find(|b| b.thread_pointer() == tp2)
            .unwrap();
        let dup_main = dup.mods[1];
        assert!(dup.contains_static(dup_main.data));
        assert_eq!(crate::mem::read_bytes(dup_main.data, 4), alloc::vec![1, 2, 3, 4]);
        tls::tls_block_free(&mut state, tp2);
        assert_eq!(state.tls.blocks.len(), 1);
    }
}
