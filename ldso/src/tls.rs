// SPDX-License-Identifier: MPL-2.0

//! Thread-local storage blocks.
//!
//! Initial TLS gathers the PT_TLS images of every object loaded before
//! `main` into one static allocation; objects loaded with `dl_open`
//! later get per-thread heap backing. On i386/amd64 the static area
//! grows down from the thread pointer, on arm/aarch64/riscv it grows up.

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};

use crate::{
    elf::{LinkerState, ObjId},
    mem,
    sys::Sys,
    LdError,
};

/// Size reserved for the thread control block at the thread pointer.
pub const TCB_SIZE: usize = 64;

/// One module's slot inside a thread's TLS block.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsModule {
    /// Address of the module's data for this thread (0 = not present).
    pub data: usize,
    pub elf: Option<ObjId>,
}

/// One thread's TLS block.
pub struct TlsBlock {
    /// Owns `initial_size + TCB_SIZE` bytes.
    allocation: Box<[u8]>,
    /// The thread-pointer (TCB) address inside the allocation.
    pub static_ptr: usize,
    /// Start of the static module area.
    pub initial_data: usize,
    pub initial_size: usize,
    pub initial_mods_count: usize,
    pub mods: Vec<TlsModule>,
    /// Heap backing for dynamically loaded modules, by module id.
    dyn_data: BTreeMap<usize, Box<[u8]>>,
}

impl TlsBlock {
    fn allocate(static_size: usize, grows_down: bool) -> Self {
        let allocation = alloc::vec![0u8; static_size + TCB_SIZE].into_boxed_slice();
        let base = allocation.as_ptr() as usize;
        let (static_ptr, initial_data) = if grows_down {
            // TCB at the end; data grows down from it.
            (base + static_size, base)
        } else {
            // TCB at the start; data grows up behind it.
            (base, base + TCB_SIZE)
        };
        Self {
            allocation,
            static_ptr,
            initial_data,
            initial_size: static_size,
            initial_mods_count: 0,
            mods: Vec::new(),
            dyn_data: BTreeMap::new(),
        }
    }

    /// The value handed to `settls`.
    pub fn thread_pointer(&self) -> usize {
        self.static_ptr
    }

    /// Whether `addr` lies inside the static allocation.
    pub fn contains_static(&self, addr: usize) -> bool {
        let base = self.allocation.as_ptr() as usize;
        addr >= base && addr < base + self.allocation.len()
    }
}

/// The process-wide list of TLS blocks, one per thread.
pub struct TlsState {
    pub blocks: Vec<TlsBlock>,
    grows_down: bool,
}

impl TlsState {
    pub fn new(grows_down: bool) -> Self {
        Self {
            blocks: Vec::new(),
            grows_down,
        }
    }

    pub fn grows_down(&self) -> bool {
        self.grows_down
    }
}

fn init_tls_data(state: &LinkerState, module: &TlsModule) {
    let Some(elf) = module.elf else {
        return;
    };
    let obj = state.obj(elf);
    let Some(pt_tls) = obj.pt_tls else {
        return;
    };
    let image = mem::read_bytes(obj.vaddr + pt_tls.p_vaddr as usize, pt_tls.p_filesz as usize);
    mem::write_bytes(module.data, &image);
    mem::write_zero(
        module.data + pt_tls.p_filesz as usize,
        (pt_tls.p_memsz - pt_tls.p_filesz) as usize,
    );
}

/// Walks the dependency graph in declaration order, assigning dense
/// module ids (from 1) and running prefix/suffix offsets.
fn generate_initial_offsets(
    state: &mut LinkerState,
    id: ObjId,
    total_size: &mut usize,
    mods_count: &mut usize,
) {
    let grows_down = state.tls.grows_down();
    {
        let obj = state.obj_mut(id);
        if obj.pt_tls.is_some() && !obj.has_tls_module {
            obj.has_tls_module = true;
            obj.tls_module = *mods_count;
            *mods_count += 1;
            let memsz = obj.pt_tls.as_ref().unwrap().p_memsz as usize;
            if grows_down {
                *total_size += memsz;
                obj.tls_offset = *total_size;
            } else {
                obj.tls_offset = *total_size;
                *total_size += memsz;
            }
        }
    }
    for dep in state.obj(id).neededs.clone() {
        generate_initial_offsets(state, dep, total_size, mods_count);
    }
}

fn generate_initial_pointers(state: &LinkerState, id: ObjId, block: &mut TlsBlock) {
    let obj = state.obj(id);
    if obj.pt_tls.is_some() {
        let data = if state.tls.grows_down() {
            block.static_ptr - obj.tls_offset
        } else {
            block.initial_data + obj.tls_offset
        };
        let module = TlsModule {
            data,
            elf: Some(id),
        };
        block.mods[obj.tls_module] = module;
        init_tls_data(state, &module);
    }
    for dep in &obj.neededs {
        generate_initial_pointers(state, *dep, block);
    }
}

/// Builds the initial TLS block from every PT_TLS visible from `root`
/// and installs it as the caller's thread pointer.
pub fn create_initial_tls(
    state: &mut LinkerState,
    sys: &dyn Sys,
    root: ObjId,
) -> Result<(), LdError> {
    let mut total_size = 0;
    let mut mods_count = 1;
    generate_initial_offsets(state, root, &mut total_size, &mut mods_count);

    let mut block = TlsBlock::allocate(total_size, state.tls.grows_down());
    block.initial_mods_count = mods_count;
    block.mods = alloc::vec![TlsModule::default(); mods_count];
    if total_size > 0 {
        generate_initial_pointers(state, root, &mut block);
    }
    sys.settls(block.thread_pointer())?;
    state.tls.blocks.push(block);
    Ok(())
}

/// Gives a dlopened object a fresh module id and extends every live
/// thread's block with heap backing for it.
pub fn create_dynamic_tls(state: &mut LinkerState, id: ObjId) -> Result<(), LdError> {
    let Some(pt_tls) = state.obj(id).pt_tls else {
        return Ok(());
    };
    let memsz = pt_tls.p_memsz as usize;

    // Lowest unoccupied slot at or after 1; initial ids are never reused.
    let module = {
        let occupied = |m: usize| {
            state
                .tls
                .blocks
                .iter()
                .any(|b| b.mods.get(m).is_some_and(|slot| slot.data != 0))
        };
        let mut m = 1;
        while occupied(m) {
            m += 1;
        }
        m
    };
    {
        let obj = state.obj_mut(id);
        obj.tls_module = module;
        obj.tls_offset = memsz;
        obj.has_tls_module = true;
    }

    for i in 0..state.tls.blocks.len() {
        let data_ptr = {
            let block = &mut state.tls.blocks[i];
            if block.mods.len() <= module {
                block.mods.resize(module + 1, TlsModule::default());
            }
            let backing = alloc::vec![0u8; memsz].into_boxed_slice();
            let ptr = backing.as_ptr() as usize;
            block.dyn_data.insert(module, backing);
            block.mods[module] = TlsModule {
                data: ptr,
                elf: Some(id),
            };
            ptr
        };
        let module_slot = TlsModule {
            data: data_ptr,
            elf: Some(id),
        };
        init_tls_data(state, &module_slot);
    }
    Ok(())
}

/// Frees a dynamic module's backing in every live block.
pub fn cleanup_dynamic_tls(state: &mut LinkerState, id: ObjId) {
    let module = state.obj(id).tls_module;
    for block in state.tls.blocks.iter_mut() {
        if module >= block.mods.len() || module < block.initial_mods_count {
            continue;
        }
        block.dyn_data.remove(&module);
        block.mods[module] = TlsModule::default();
    }
}

/// Duplicates the calling thread's block for a new thread.
pub fn tls_block_alloc(state: &mut LinkerState) -> Result<usize, LdError> {
    let grows_down = state.tls.grows_down();
    let (initial_size, initial_mods_count, mods_template) = {
        let Some(src) = state.tls.blocks.first() else {
            return Err(LdError::NoMemory);
        };
        (src.initial_size, src.initial_mods_count, src.mods.clone())
    };

    let mut dup = TlsBlock::allocate(initial_size, grows_down);
    dup.initial_mods_count = initial_mods_count;
    dup.mods = alloc::vec![TlsModule::default(); mods_template.len()];

    // Static modules point into the fresh allocation at the original
    // offsets.
    for (i, slot) in mods_template.iter().enumerate().take(initial_mods_count) {
        let Some(elf) = slot.elf else {
            continue;
        };
        let obj = state.obj(elf);
        let data = if grows_down {
            dup.static_ptr - obj.tls_offset
        } else {
            dup.initial_data + obj.tls_offset
        };
        let module = TlsModule {
            data,
            elf: Some(elf),
        };
        dup.mods[i] = module;
        init_tls_data(state, &module);
    }

    // Dynamic modules get fresh heap backing.
    for (i, slot) in mods_template.iter().enumerate().skip(initial_mods_count) {
        let Some(elf) = slot.elf else {
            continue;
        };
        let obj = state.obj(elf);
        let Some(pt_tls) = obj.pt_tls else {
            continue;
        };
        let backing = alloc::vec![0u8; pt_tls.p_memsz as usize].into_boxed_slice();
        let ptr = backing.as_ptr() as usize;
        dup.dyn_data.insert(i, backing);
        let module = TlsModule {
            data: ptr,
            elf: Some(elf),
        };
        dup.mods[i] = module;
        init_tls_data(state, &module);
    }

    let tp = dup.thread_pointer();
    state.tls.blocks.push(dup);
    Ok(tp)
}

/// Releases a thread's block.
pub fn tls_block_free(state: &mut LinkerState, thread_pointer: usize) {
    state
        .tls
        .blocks
        .retain(|b| b.thread_pointer() != thread_pointer);
}
