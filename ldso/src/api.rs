// SPDX-License-Identifier: MPL-2.0

//! The `dl_*` entry points.
//!
//! One non-reentrant lock guards the whole linker; the error slot is
//! process-wide, single-entry, read-and-clear.

use alloc::{format, string::String, vec::Vec};

use spin::Mutex;

use crate::{
    defs::{Phdr, STT_FUNC, STT_OBJECT},
    elf::{self, LinkerState, ObjId},
    sys::Sys,
    tls, LdError,
};

pub const RTLD_LAZY: u32 = 0x1;
pub const RTLD_NOW: u32 = 0x2;

/// A loaded object handle, as `dlopen` returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlHandle(pub ObjId);

/// What `dl_iterate_phdr` reports per object.
pub struct DlPhdrInfo {
    pub addr: usize,
    pub name: String,
    pub phdrs: Vec<Phdr>,
    pub tls_modid: usize,
    pub tls_data: usize,
}

struct Inner {
    state: LinkerState,
    err: Option<String>,
}

/// The dynamic linker.
pub struct Linker<S: Sys> {
    sys: S,
    inner: Mutex<Inner>,
}

impl<S: Sys> Linker<S> {
    pub fn new(sys: S, tls_grows_down: bool) -> Self {
        Self {
            sys,
            inner: Mutex::new(Inner {
                state: LinkerState::new(tls_grows_down),
                err: None,
            }),
        }
    }

    pub fn sys(&self) -> &S {
        &self.sys
    }

    fn fail<T>(inner: &mut Inner, err: LdError) -> Result<T, LdError> {
        inner.err = Some(format!("{}", err));
        Err(err)
    }

    /// Wires up the kernel-mapped main executable from auxv and runs its
    /// initializers. Called once before `main`.
    pub fn load_initial(&self, path: &str) -> Result<DlHandle, LdError> {
        let mut inner = self.inner.lock();
        match elf::elf_from_auxv(&mut inner.state, &self.sys, path) {
            Ok(id) => Ok(DlHandle(id)),
            Err(e) => Self::fail(&mut inner, e),
        }
    }

    /// `dlopen`. `None` returns the main program's handle.
    pub fn dl_open(&self, filename: Option<&str>, flags: u32) -> Result<DlHandle, LdError> {
        let mut inner = self.inner.lock();
        let Some(filename) = filename else {
            return inner
                .state
                .first()
                .map(DlHandle)
                .ok_or(LdError::InvalidHandle);
        };
        // Exactly one binding mode must be requested.
        let mode = flags & (RTLD_LAZY | RTLD_NOW);
        if mode == 0 || mode == (RTLD_LAZY | RTLD_NOW) {
            return Self::fail(&mut inner, LdError::BadDynamic("invalid dlopen flags"));
        }
        match elf::elf_from_path(&mut inner.state, &self.sys, filename) {
            Ok(id) => Ok(DlHandle(id)),
            Err(e) => Self::fail(&mut inner, e),
        }
    }

    /// `dlclose`.
    pub fn dl_close(&self, handle: DlHandle) -> Result<(), LdError> {
        let mut inner = self.inner.lock();
        if !inner.state.is_live(handle.0) {
            return Self::fail(&mut inner, LdError::InvalidHandle);
        }
        elf::elf_free(&mut inner.state, &self.sys, handle.0);
        Ok(())
    }

    /// `dlsym`: functions first, then data objects.
    pub fn dl_sym(&self, handle: DlHandle, name: &str) -> Option<usize> {
        let mut inner = self.inner.lock();
        if !inner.state.is_live(handle.0) {
            inner.err = Some(format!("{}", LdError::InvalidHandle));
            return None;
        }
        let hit = elf::find_elf_sym(&inner.state, handle.0, name, STT_FUNC)
            .or_else(|| elf::find_elf_sym(&inner.state, handle.0, name, STT_OBJECT));
        match hit {
            Some((_, addr)) => Some(addr),
            None => {
                inner.err = Some(format!("{}", LdError::SymbolNotFound(name.into())));
                None
            }
        }
    }

    /// `dlerror`: returns and clears the last error message.
    pub fn dl_error(&self) -> Option<String> {
        self.inner.lock().err.take()
    }

    /// `dl_iterate_phdr`: walks every live object in load order until
    /// `cb` returns nonzero.
    pub fn dl_iterate_phdr(&self, mut cb: impl FnMut(&DlPhdrInfo) -> i32) -> i32 {
        let inner = self.inner.lock();
        let mut ret = 0;
        for id in inner.state.order.clone() {
            let obj = inner.state.obj(id);
            let (tls_modid, tls_data) = if obj.has_tls_module {
                let data = inner
                    .state
                    .tls
                    .blocks
                    .first()
                    .and_then(|b| b.mods.get(obj.tls_module))
                    .map(|m| m.data)
                    .unwrap_or(0);
                (obj.tls_module, data)
            } else {
                (0, 0)
            };
            let info = DlPhdrInfo {
                addr: obj.vaddr,
                name: obj.path.clone(),
                phdrs: obj.phdrs.clone(),
                tls_modid,
                tls_data,
            };
            ret = cb(&info);
            if ret != 0 {
                break;
            }
        }
        ret
    }

    /// Allocates a TLS block for a new thread.
    pub fn dl_tls_alloc(&self) -> Result<usize, LdError> {
        let mut inner = self.inner.lock();
        tls::tls_block_alloc(&mut inner.state)
    }

    /// Frees a thread's TLS block.
    pub fn dl_tls_free(&self, thread_pointer: usize) {
        let mut inner = self.inner.lock();
        tls::tls_block_free(&mut inner.state, thread_pointer);
    }

    /// Installs a TLS block as the caller's thread pointer.
    pub fn dl_tls_set(&self, thread_pointer: usize) -> Result<(), LdError> {
        self.sys.settls(thread_pointer)
    }

    /// The load bias of an object, for tests and debuggers.
    pub fn load_base(&self, handle: DlHandle) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .state
            .is_live(handle.0)
            .then(|| inner.state.obj(handle.0).vaddr)
    }

    /// The refcount of an object, for tests and debuggers.
    pub fn refcount(&self, handle: DlHandle) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .state
            .is_live(handle.0)
            .then(|| inner.state.obj(handle.0).refcount)
    }

    pub fn is_live(&self, handle: DlHandle) -> bool {
        self.inner.lock().state.is_live(handle.0)
    }
}
