// SPDX-License-Identifier: MPL-2.0

//! The monotonic clock contract.
//!
//! The timer driver installs the real source at boot. Until then reads fall
//! back to a coarse logical tick so timeouts still make progress, which is
//! also what the hosted tests rely on for determinism.

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

use spin::Once;

static CLOCK_SOURCE: Once<fn() -> Duration> = Once::new();
static FALLBACK_TICKS: AtomicU64 = AtomicU64::new(0);

/// Nanoseconds a fallback tick advances per read.
const FALLBACK_TICK_NS: u64 = 1_000;

/// Installs the monotonic clock source. Effective only once.
pub fn set_clock_source(f: fn() -> Duration) {
    CLOCK_SOURCE.call_once(|| f);
}

/// Time elapsed since boot.
pub fn now() -> Duration {
    if let Some(f) = CLOCK_SOURCE.get() {
        f()
    } else {
        let ticks = FALLBACK_TICKS.fetch_add(1, Ordering::Relaxed) + 1;
        Duration::from_nanos(ticks * FALLBACK_TICK_NS)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fallback_clock_is_monotonic() {
        let a = now();
        let b = now();
        assert!(b > a);
    }
}
