// SPDX-License-Identifier: MPL-2.0

//! The OS surface the linker consumes.
//!
//! The real implementation is a thin wrapper over the mmap/open/settls
//! syscalls. Hosted tests substitute [`MockSys`], which backs mappings
//! with real heap memory so relocated images are genuinely readable and
//! writable.

use alloc::string::String;

use bitflags::bitflags;

use crate::LdError;

bitflags! {
    pub struct Prot: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

pub type Fd = usize;

pub trait Sys {
    fn open(&self, path: &str) -> Result<Fd, LdError>;
    fn read_at(&self, fd: Fd, offset: u64, buf: &mut [u8]) -> Result<usize, LdError>;
    fn close(&self, fd: Fd);

    /// Reserves `size` bytes of address space and returns the base.
    fn map_reserve(&self, size: usize) -> Result<usize, LdError>;
    /// Maps file content over `[addr, addr + size)`.
    fn map_file_fixed(
        &self,
        addr: usize,
        size: usize,
        prot: Prot,
        fd: Fd,
        offset: u64,
    ) -> Result<(), LdError>;
    /// Maps zero pages over `[addr, addr + size)`.
    fn map_anon_fixed(&self, addr: usize, size: usize, prot: Prot) -> Result<(), LdError>;
    fn unmap(&self, addr: usize, size: usize);
    fn protect(&self, addr: usize, size: usize, prot: Prot) -> Result<(), LdError>;

    fn getenv(&self, name: &str) -> Option<String>;
    fn page_size(&self) -> usize;
    fn getauxval(&self, key: u64) -> u64;

    /// Installs the thread pointer.
    fn settls(&self, ptr: usize) -> Result<(), LdError>;

    /// Calls an init/fini function at `addr`.
    fn call_fn(&self, addr: usize);

    /// Symbols the linker itself exports to its loadees (`dl_open` and
    /// friends).
    fn native_symbol(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }
}

#[cfg(test)]
pub mod mock {
    //! A hosted `Sys` with in-memory files and heap-backed mappings.

    #![allow(unsafe_code)]

    use alloc::{collections::BTreeMap, string::String, vec::Vec};
    use std::sync::Mutex;

    use super::{Fd, Prot, Sys};
    use crate::LdError;

    pub const MOCK_PAGE_SIZE: usize = 4096;

    #[derive(Default)]
    struct MockState {
        files: BTreeMap<String, Vec<u8>>,
        open_files: BTreeMap<Fd, String>,
        next_fd: Fd,
        reservations: Vec<(usize, usize)>,
        pub protects: Vec<(usize, usize, u32)>,
        env: BTreeMap<String, String>,
        tls_ptr: Option<usize>,
        called_fns: Vec<usize>,
    }

    #[derive(Default)]
    pub struct MockSys {
        state: Mutex<MockState>,
    }

    impl MockSys {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_file(&self, path: &str, bytes: Vec<u8>) {
            self.state
                .lock()
                .unwrap()
                .files
                .insert(path.into(), bytes);
        }

        pub fn set_env(&self, name: &str, value: &str) {
            self.state
                .lock()
                .unwrap()
                .env
                .insert(name.into(), value.into());
        }

        pub fn tls_ptr(&self) -> Option<usize> {
            self.state.lock().unwrap().tls_ptr
        }

        pub fn called_fns(&self) -> Vec<usize> {
            self.state.lock().unwrap().called_fns.clone()
        }

        pub fn protect_calls(&self) -> Vec<(usize, usize, u32)> {
            self.state.lock().unwrap().protects.clone()
        }
    }

    impl Sys for MockSys {
        fn open(&self, path: &str) -> Result<Fd, LdError> {
            let mut state = self.state.lock().unwrap();
            if !state.files.contains_key(path) {
                return Err(LdError::NotFound(path.into()));
            }
            state.next_fd += 1;
            let fd = state.next_fd;
            state.open_files.insert(fd, path.into());
            Ok(fd)
        }

        fn read_at(&self, fd: Fd, offset: u64, buf: &mut [u8]) -> Result<usize, LdError> {
            let state = self.state.lock().unwrap();
            let path = state
                .open_files
                .get(&fd)
                .ok_or_else(|| LdError::Io("bad fd".into()))?;
            let data = &state.files[path];
            let offset = offset as usize;
            if offset >= data.len() {
                return Ok(0);
            }
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            Ok(n)
        }

        fn close(&self, fd: Fd) {
            self.state.lock().unwrap().open_files.remove(&fd);
        }

        fn map_reserve(&self, size: usize) -> Result<usize, LdError> {
            let size = size.max(1).next_multiple_of(MOCK_PAGE_SIZE);
            let layout =
                core::alloc::Layout::from_size_align(size, MOCK_PAGE_SIZE).unwrap();
            // SAFETY: non-zero, aligned layout.
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(LdError::NoMemory);
            }
            self.state
                .lock()
                .unwrap()
                .reservations
                .push((ptr as usize, size));
            Ok(ptr as usize)
        }

        fn map_file_fixed(
            &self,
            addr: usize,
            size: usize,
            _prot: Prot,
            fd: Fd,
            offset: u64,
        ) -> Result<(), LdError> {
            let state = self.state.lock().unwrap();
            let path = state
                .open_files
                .get(&fd)
                .ok_or_else(|| LdError::Io("bad fd".into()))?;
            let data = &state.files[path];
            let offset = offset as usize;
            let n = size.min(data.len().saturating_sub(offset));
            // SAFETY: `addr` came from map_reserve, which allocated at
            // least this range.
            unsafe {
                core::ptr::copy_nonoverlapping(data[offset..].as_ptr(), addr as *mut u8, n);
                core::ptr::write_bytes((addr + n) as *mut u8, 0, size - n);
            }
            Ok(())
        }

        fn map_anon_fixed(&self, addr: usize, size: usize, _prot: Prot) -> Result<(), LdError> {
            // SAFETY: as in `map_file_fixed`.
            unsafe {
                core::ptr::write_bytes(addr as *mut u8, 0, size);
            }
            Ok(())
        }

        fn unmap(&self, _addr: usize, _size: usize) {
            // Reservations are leaked; tests do not recycle address space.
        }

        fn protect(&self, addr: usize, size: usize, prot: Prot) -> Result<(), LdError> {
            self.state
                .lock()
                .unwrap()
                .protects
                .push((addr, size, prot.bits()));
            Ok(())
        }

        fn getenv(&self, name: &str) -> Option<String> {
            self.state.lock().unwrap().env.get(name).cloned()
        }

        fn page_size(&self) -> usize {
            MOCK_PAGE_SIZE
        }

        fn getauxval(&self, _key: u64) -> u64 {
            0
        }

        fn settls(&self, ptr: usize) -> Result<(), LdError> {
            self.state.lock().unwrap().tls_ptr = Some(ptr);
            Ok(())
        }

        fn call_fn(&self, addr: usize) {
            self.state.lock().unwrap().called_fns.push(addr);
        }
    }
}
