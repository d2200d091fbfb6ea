// SPDX-License-Identifier: MPL-2.0

//! The kernel entropy pool.
//!
//! Entropy drivers (the virtio-entropy device among them) register a
//! collector; until one shows up, reads fall back to a seeded xorshift so
//! early consumers (`AT_RANDOM`) still get differing bytes.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

/// A blocking entropy source; fills `buf` and returns the byte count.
pub type CollectFn = fn(&mut [u8]) -> usize;

static COLLECTOR: RwLock<Option<CollectFn>> = RwLock::new(None);
static FALLBACK_STATE: AtomicU64 = AtomicU64::new(0x9e37_79b9_7f4a_7c15);

/// Registers the hardware entropy collector.
pub fn register_collector(f: CollectFn) {
    *COLLECTOR.write() = Some(f);
}

/// Fills `buf` with random bytes.
pub fn getrandom(buf: &mut [u8]) {
    if let Some(f) = *COLLECTOR.read() {
        let mut filled = 0;
        while filled < buf.len() {
            let n = f(&mut buf[filled..]);
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == buf.len() {
            return;
        }
    }
    for chunk in buf.chunks_mut(8) {
        let mut x = FALLBACK_STATE.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        FALLBACK_STATE.store(x, Ordering::Relaxed);
        let bytes = x.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fallback_produces_differing_blocks() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        getrandom(&mut a);
        getrandom(&mut b);
        assert_ne!(a, b);
        assert_ne!(a, [0u8; 16]);
    }
}
