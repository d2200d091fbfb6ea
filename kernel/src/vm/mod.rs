// SPDX-License-Identifier: MPL-2.0

//! The user address-space contract.
//!
//! The real paging engine lives outside this crate; process code only needs
//! zone allocation, typed access to user memory, copy-duplication for fork
//! and refcounted sharing for `CLONE_VM`. [`VmSpace`] realizes exactly that
//! surface over a sparse page store, so the whole process core (init stack,
//! signal frames, execve) exercises real memory in hosted tests.

use alloc::ffi::CString;
use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use bytemuck::Pod;

use crate::prelude::*;

pub type Vaddr = usize;

/// The base of user mappings.
pub const USER_BASE: Vaddr = 0x1_0000;
/// One past the highest user address.
pub const USER_TOP: Vaddr = 0x7fff_ffff_f000;

bitflags! {
    pub struct VmPerms: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

impl VmPerms {
    pub const RW: VmPerms = VmPerms::from_bits_truncate(0b011);
}

/// One mapped range of user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmZone {
    pub addr: Vaddr,
    pub size: usize,
    pub perms: VmPerms,
}

impl VmZone {
    fn contains(&self, addr: Vaddr, len: usize) -> bool {
        addr >= self.addr && addr + len <= self.addr + self.size
    }
}

#[derive(Default)]
struct VmSpaceInner {
    zones: BTreeMap<Vaddr, VmZone>,
    pages: BTreeMap<Vaddr, Box<[u8; PAGE_SIZE]>>,
}

impl VmSpaceInner {
    fn zone_of(&self, addr: Vaddr, len: usize) -> Option<&VmZone> {
        let (_, zone) = self.zones.range(..=addr).next_back()?;
        zone.contains(addr, len).then_some(zone)
    }

    fn overlaps(&self, addr: Vaddr, size: usize) -> bool {
        self.zones
            .values()
            .any(|z| addr < z.addr + z.size && z.addr < addr + size)
    }

    fn page_mut(&mut self, base: Vaddr) -> &mut [u8; PAGE_SIZE] {
        self.pages
            .entry(base)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]))
    }
}

/// A process address space.
///
/// Shared between clones via `Arc`; the strong count is the space's
/// refcount, so `Arc::strong_count == 1` is the "last user" condition
/// `proc_exit` checks before running the architecture teardown.
pub struct VmSpace {
    inner: Mutex<VmSpaceInner>,
    arch_cleaned: AtomicBool,
}

impl VmSpace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VmSpaceInner::default()),
            arch_cleaned: AtomicBool::new(false),
        })
    }

    /// The user region available for zone placement.
    pub fn region(&self) -> (Vaddr, usize) {
        (USER_BASE, USER_TOP - USER_BASE)
    }

    /// Maps a zone. `addr == 0` asks for any placement.
    pub fn alloc(&self, addr: Vaddr, size: usize, perms: VmPerms) -> Result<VmZone> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return_errno_with_message!(Errno::EINVAL, "zone size not page aligned");
        }
        let mut inner = self.inner.lock();
        let addr = if addr != 0 {
            if addr % PAGE_SIZE != 0 {
                return_errno_with_message!(Errno::EINVAL, "zone base not page aligned");
            }
            if inner.overlaps(addr, size) {
                return_errno_with_message!(Errno::EEXIST, "zone overlaps existing mapping");
            }
            addr
        } else {
            let next_free = inner
                .zones
                .values()
                .map(|z| z.addr + z.size)
                .max()
                .unwrap_or(USER_BASE);
            if next_free + size > USER_TOP {
                return_errno!(Errno::ENOMEM);
            }
            next_free
        };
        let zone = VmZone { addr, size, perms };
        inner.zones.insert(addr, zone);
        Ok(zone)
    }

    pub fn protect(&self, addr: Vaddr, size: usize, perms: VmPerms) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(zone) = inner.zones.values_mut().find(|z| z.contains(addr, size)) else {
            return_errno!(Errno::EFAULT);
        };
        zone.perms = perms;
        Ok(())
    }

    pub fn write_bytes(&self, addr: Vaddr, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.zone_of(addr, bytes.len()).is_none() {
            return_errno_with_message!(Errno::EFAULT, "write outside any zone");
        }
        let mut pos = 0;
        while pos < bytes.len() {
            let cur = addr + pos;
            let base = cur & !(PAGE_SIZE - 1);
            let off = cur - base;
            let chunk = (PAGE_SIZE - off).min(bytes.len() - pos);
            inner.page_mut(base)[off..off + chunk].copy_from_slice(&bytes[pos..pos + chunk]);
            pos += chunk;
        }
        Ok(())
    }

    pub fn read_bytes(&self, addr: Vaddr, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.zone_of(addr, buf.len()).is_none() {
            return_errno_with_message!(Errno::EFAULT, "read outside any zone");
        }
        let mut pos = 0;
        while pos < buf.len() {
            let cur = addr + pos;
            let base = cur & !(PAGE_SIZE - 1);
            let off = cur - base;
            let chunk = (PAGE_SIZE - off).min(buf.len() - pos);
            match inner.pages.get(&base) {
                Some(page) => buf[pos..pos + chunk].copy_from_slice(&page[off..off + chunk]),
                None => buf[pos..pos + chunk].fill(0),
            }
            pos += chunk;
        }
        Ok(())
    }

    pub fn write_val<T: Pod>(&self, addr: Vaddr, val: &T) -> Result<()> {
        self.write_bytes(addr, bytemuck::bytes_of(val))
    }

    pub fn read_val<T: Pod>(&self, addr: Vaddr) -> Result<T> {
        let mut val = T::zeroed();
        self.read_bytes(addr, bytemuck::bytes_of_mut(&mut val))?;
        Ok(val)
    }

    /// Reads a NUL-terminated string of at most `max` bytes.
    pub fn read_cstring(&self, addr: Vaddr, max: usize) -> Result<CString> {
        let mut bytes = Vec::new();
        for i in 0..max {
            let b: u8 = self.read_val(addr + i)?;
            if b == 0 {
                return Ok(CString::new(bytes)?);
            }
            bytes.push(b);
        }
        return_errno_with_message!(Errno::ENAMETOOLONG, "unterminated user string");
    }

    /// Deep-copies every zone and page (the non-`CLONE_VM` clone path).
    pub fn dup(&self) -> Result<Arc<VmSpace>> {
        let inner = self.inner.lock();
        let copy = VmSpaceInner {
            zones: inner.zones.clone(),
            pages: inner
                .pages
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        };
        Ok(Arc::new(Self {
            inner: Mutex::new(copy),
            arch_cleaned: AtomicBool::new(false),
        }))
    }

    pub fn zone_count(&self) -> usize {
        self.inner.lock().zones.len()
    }

    /// Architecture teardown, run once when the last user exits.
    pub fn arch_cleanup(&self) {
        self.arch_cleaned.store(true, Ordering::Release);
    }

    pub fn arch_cleaned(&self) -> bool {
        self.arch_cleaned.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zone_checked_access() {
        let vm = VmSpace::new();
        assert_eq!(
            vm.write_bytes(0x5000, b"x").unwrap_err().error(),
            Errno::EFAULT
        );
        let zone = vm.alloc(0x5000, PAGE_SIZE, VmPerms::RW).unwrap();
        assert_eq!(zone.addr, 0x5000);
        vm.write_bytes(0x5100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        vm.read_bytes(0x5100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn cross_page_write() {
        let vm = VmSpace::new();
        vm.alloc(0x10000, 2 * PAGE_SIZE, VmPerms::RW).unwrap();
        let addr = 0x10000 + PAGE_SIZE - 3;
        vm.write_bytes(addr, b"abcdef").unwrap();
        let mut buf = [0u8; 6];
        vm.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn dup_is_independent() {
        let vm = VmSpace::new();
        vm.alloc(0x8000, PAGE_SIZE, VmPerms::RW).unwrap();
        vm.write_val(0x8000, &42u64).unwrap();
        let copy = vm.dup().unwrap();
        copy.write_val(0x8000, &7u64).unwrap();
        assert_eq!(vm.read_val::<u64>(0x8000).unwrap(), 42);
        assert_eq!(copy.read_val::<u64>(0x8000).unwrap(), 7);
    }

    #[test]
    fn unwritten_pages_read_zero() {
        let vm = VmSpace::new();
        vm.alloc(0x4000, PAGE_SIZE, VmPerms::RW).unwrap();
        assert_eq!(vm.read_val::<u64>(0x4100).unwrap(), 0);
    }
}
