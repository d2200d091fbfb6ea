// SPDX-License-Identifier: MPL-2.0

//! Raw access to mapped object memory.
//!
//! The linker reads symbol tables and writes relocations inside images it
//! mapped itself; every address derives from a live mapping it owns.

#![allow(unsafe_code)]

use alloc::{string::String, vec::Vec};

use bytemuck::Pod;

/// Reads a `T` at `addr`.
pub fn read<T: Pod>(addr: usize) -> T {
    let mut val = T::zeroed();
    let dst = bytemuck::bytes_of_mut(&mut val);
    // SAFETY: the caller derives `addr` from a mapping it owns.
    unsafe {
        core::ptr::copy_nonoverlapping(addr as *const u8, dst.as_mut_ptr(), dst.len());
    }
    val
}

/// Writes a `T` at `addr`.
pub fn write<T: Pod>(addr: usize, val: &T) {
    let src = bytemuck::bytes_of(val);
    // SAFETY: as in `read`.
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), addr as *mut u8, src.len());
    }
}

/// Copies `len` bytes out of a mapping.
pub fn read_bytes(addr: usize, len: usize) -> Vec<u8> {
    let mut out = alloc::vec![0u8; len];
    // SAFETY: as in `read`.
    unsafe {
        core::ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), len);
    }
    out
}

/// Zero-fills `[addr, addr + len)`.
pub fn write_zero(addr: usize, len: usize) {
    // SAFETY: as in `read`.
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0, len);
    }
}

/// Copies `src` into the mapping at `addr`.
pub fn write_bytes(addr: usize, src: &[u8]) {
    // SAFETY: as in `read`.
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), addr as *mut u8, src.len());
    }
}

/// Reads the NUL-terminated string at `addr`.
pub fn read_cstr(addr: usize) -> String {
    let mut bytes = Vec::new();
    let mut p = addr;
    loop {
        let b: u8 = read(p);
        if b == 0 {
            break;
        }
        bytes.push(b);
        p += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Compares the NUL-terminated string at `addr` against `name`.
pub fn cstr_eq(addr: usize, name: &str) -> bool {
    let mut p = addr;
    for expect in name.bytes() {
        let b: u8 = read(p);
        if b != expect {
            return false;
        }
        p += 1;
    }
    read::<u8>(p) == 0
}
