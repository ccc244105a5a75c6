//! Transport state machine (component C4): `{Stopped, Playing, Paused,
//! Recording}`, read by the realtime callback via a single atomic.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
    Recording = 3,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            3 => TransportState::Recording,
            _ => TransportState::Stopped,
        }
    }
}

pub struct TransportController {
    state: AtomicU8,
}

impl TransportController {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransportState::Stopped as u8),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Transitions to `Playing`. Legal from `Stopped` or `Paused`; from
    /// `Stopped` the caller is responsible for seeking the clock to zero
    /// first (spec §4.4 — "Play from Stopped starts from zero").
    pub fn play(&self) {
        self.state.store(TransportState::Playing as u8, Ordering::Release);
    }

    /// Legal only from `Playing`; no-op otherwise (mirrors `Stop`'s
    /// idempotence requirement in spec §8 invariant 10).
    pub fn pause(&self) {
        if self.state() == TransportState::Playing {
            self.state.store(TransportState::Paused as u8, Ordering::Release);
        }
    }

    /// Forces `Stopped` from any state. Idempotent.
    pub fn stop(&self) {
        self.state.store(TransportState::Stopped as u8, Ordering::Release);
    }

    pub fn set_recording(&self, recording: bool) {
        if recording {
            self.state.store(TransportState::Recording as u8, Ordering::Release);
        } else {
            self.state.store(TransportState::Stopped as u8, Ordering::Release);
        }
    }
}

impl Default for TransportController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let t = TransportController::new();
        t.play();
        t.stop();
        t.stop();
        assert_eq!(t.state(), TransportState::Stopped);
    }

    #[test]
    fn pause_only_applies_while_playing() {
        let t = TransportController::new();
        t.pause();
        assert_eq!(t.state(), TransportState::Stopped);
        t.play();
        t.pause();
        assert_eq!(t.state(), TransportState::Paused);
    }
}
