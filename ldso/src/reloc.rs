// SPDX-License-Identifier: MPL-2.0

//! Relocation kinds and their application.

use crate::defs::*;

/// The architecture-independent relocation classes the linker handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    None,
    Relative,
    JmpSlot,
    GlobDat,
    Abs,
    Pc32,
    TlsDtpMod,
    TlsDtpOff,
    TlsTpOff,
}

/// Width of the relocated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocWidth {
    W32,
    W64,
}

/// Decodes a raw relocation type for `machine`.
pub fn decode(machine: u16, raw: u32) -> Option<(RelocKind, RelocWidth)> {
    use RelocKind::*;
    use RelocWidth::*;
    match machine {
        EM_X86_64 => Some(match raw {
            0 => (None, W64),
            1 => (Abs, W64),       // R_X86_64_64
            2 => (Pc32, W32),      // R_X86_64_PC32
            6 => (GlobDat, W64),   // R_X86_64_GLOB_DAT
            7 => (JmpSlot, W64),   // R_X86_64_JUMP_SLOT
            8 => (Relative, W64),  // R_X86_64_RELATIVE
            16 => (TlsDtpMod, W64),
            17 => (TlsDtpOff, W64),
            18 => (TlsTpOff, W64),
            _ => return Option::None,
        }),
        EM_386 => Some(match raw {
            0 => (None, W32),
            1 => (Abs, W32),      // R_386_32
            2 => (Pc32, W32),     // R_386_PC32
            6 => (GlobDat, W32),  // R_386_GLOB_DAT
            7 => (JmpSlot, W32),  // R_386_JMP_SLOT
            8 => (Relative, W32), // R_386_RELATIVE
            14 => (TlsTpOff, W32),
            35 => (TlsDtpMod, W32),
            36 => (TlsDtpOff, W32),
            _ => return Option::None,
        }),
        EM_AARCH64 => Some(match raw {
            0 => (None, W64),
            257 => (Abs, W64),       // R_AARCH64_ABS64
            1025 => (GlobDat, W64),  // R_AARCH64_GLOB_DAT
            1026 => (JmpSlot, W64),  // R_AARCH64_JUMP_SLOT
            1027 => (Relative, W64), // R_AARCH64_RELATIVE
            1028 => (TlsDtpMod, W64),
            1029 => (TlsDtpOff, W64),
            1030 => (TlsTpOff, W64),
            _ => return Option::None,
        }),
        EM_RISCV => Some(match raw {
            0 => (None, W64),
            2 => (Abs, W64),      // R_RISCV_64
            3 => (Relative, W64), // R_RISCV_RELATIVE
            5 => (JmpSlot, W64),  // R_RISCV_JUMP_SLOT
            10 => (TlsDtpMod, W64),
            12 => (TlsDtpOff, W64),
            11 => (TlsTpOff, W64),
            _ => return Option::None,
        }),
        _ => Option::None,
    }
}

/// Whether the TPOFF result is negated (i386 only).
pub fn tpoff_negated(machine: u16) -> bool {
    machine == EM_386
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn amd64_decodes_the_minimum_set() {
        assert_eq!(
            decode(EM_X86_64, 8),
            Some((RelocKind::Relative, RelocWidth::W64))
        );
        assert_eq!(
            decode(EM_X86_64, 7),
            Some((RelocKind::JmpSlot, RelocWidth::W64))
        );
        assert_eq!(decode(EM_X86_64, 0xFFFF), None);
    }

    #[test]
    fn i386_tpoff_negates() {
        assert!(tpoff_negated(EM_386));
        assert!(!tpoff_negated(EM_X86_64));
    }
}
