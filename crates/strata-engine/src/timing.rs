//! Sample↔millisecond conversion and duration cache (component C3).

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

pub struct TimingManager {
    sample_rate: AtomicU32,
    total_duration_frames: AtomicI64,
}

impl TimingManager {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: AtomicU32::new(sample_rate),
            total_duration_frames: AtomicI64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    pub fn ms_to_frames(&self, ms: f64) -> i64 {
        (ms * self.sample_rate() as f64 / 1000.0).round() as i64
    }

    pub fn frames_to_ms(&self, frames: i64) -> f64 {
        frames as f64 * 1000.0 / self.sample_rate() as f64
    }

    pub fn set_total_duration_frames(&self, frames: i64) {
        self.total_duration_frames.store(frames, Ordering::Release);
    }

    pub fn total_duration_frames(&self) -> i64 {
        self.total_duration_frames.load(Ordering::Acquire)
    }

    pub fn duration_ms(&self) -> f64 {
        self.frames_to_ms(self.total_duration_frames())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_one_sample() {
        let timing = TimingManager::new(48_000);
        let frames = timing.ms_to_frames(1234.5);
        let ms = timing.frames_to_ms(frames);
        assert!((ms - 1234.5).abs() < 1000.0 / 48_000.0);
    }

    #[test]
    fn duration_cache_tracks_max_of_loaded_tracks() {
        let timing = TimingManager::new(44_100);
        timing.set_total_duration_frames(44_100 * 5);
        assert!((timing.duration_ms() - 5000.0).abs() < 1e-6);
    }
}
