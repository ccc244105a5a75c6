//! Master clock (component C2): a single atomic frame cursor shared by the
//! realtime callback (advances it) and the control thread (reads/resets it).

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic sample-count cursor along the timeline.
///
/// Only the realtime callback calls `advance`; only the control thread
/// calls `set_position`, and only while the transport is not Playing (spec
/// §4.2) — the type itself doesn't enforce that, callers must.
#[derive(Default)]
pub struct MasterClock {
    position: AtomicI64,
}

impl MasterClock {
    pub fn new() -> Self {
        Self {
            position: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    #[inline]
    pub fn advance(&self, frames: i64) {
        self.position.fetch_add(frames, Ordering::AcqRel);
    }

    #[inline]
    pub fn set_position(&self, frames: i64) {
        self.position.store(frames, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_accumulates() {
        let clock = MasterClock::new();
        clock.advance(512);
        clock.advance(512);
        assert_eq!(clock.position(), 1024);
    }

    #[test]
    fn set_position_overrides() {
        let clock = MasterClock::new();
        clock.advance(1000);
        clock.set_position(0);
        assert_eq!(clock.position(), 0);
    }
}
