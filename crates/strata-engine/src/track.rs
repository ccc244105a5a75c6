//! Track (component C8): owns a decoder, a ring buffer, a streaming
//! thread, and a `TimeStretch` effect.
//!
//! The streaming-thread/condvar shape is grounded on the teacher's general
//! producer pattern in `rf_audio::engine::AudioEngine::start` (a named
//! background thread feeding a shared buffer, parked on a condvar when
//! there's nothing to do) combined with the ring buffer from
//! `rf_audio::ringbuf`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex as PlMutex;

use strata_core::{Channels, EngineError, EngineResult};
use strata_audio::RingBuffer;
use strata_dsp::TimeStretch;

use crate::decoder::{open_decoder, Decoder};

/// Frames decoded per streaming-thread iteration (spec §4.8 example: 4096).
const DECODE_BLOCK_FRAMES: usize = 4096;
const RING_SECONDS: f64 = 1.0;
const PARAM_EPSILON: f64 = 1e-4;

#[inline]
fn load_f64(a: &AtomicU64) -> f64 {
    f64::from_bits(a.load(Ordering::Acquire))
}

#[inline]
fn store_f64(a: &AtomicU64, v: f64) {
    a.store(v.to_bits(), Ordering::Release);
}

struct Shared {
    decoder: PlMutex<Box<dyn Decoder>>,
    ring: RingBuffer,
    shutdown: AtomicBool,
    /// Set while a seek is reconfiguring the decoder/ring/effect; the
    /// streaming thread must not touch any of them while this is true.
    paused: AtomicBool,
    wake: Condvar,
    wake_lock: Mutex<()>,
}

pub struct Track {
    pub id: String,
    pub channels: Channels,
    pub source_sample_rate: u32,
    pub source_frames: u64,

    pub volume_bits: AtomicU64,
    pub pan_bits: AtomicU64,
    pub muted: AtomicBool,
    pub solo: AtomicBool,
    pub start_time_samples: AtomicI64,
    pub loaded: AtomicBool,

    time_stretch: PlMutex<TimeStretch>,
    shared: Arc<Shared>,
    streaming_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Track {
    pub fn load(
        id: String,
        path: &Path,
        start_time_samples: i64,
        max_block_frames: usize,
    ) -> EngineResult<Self> {
        let decoder = open_decoder(path)?;
        let format = decoder.format();
        let channels = Channels::from_count(format.channels)
            .ok_or_else(|| EngineError::UnsupportedFormat("only mono/stereo supported".into()))?;

        let ring_capacity =
            (format.sample_rate as f64 * RING_SECONDS) as usize * format.channels;
        let ring = RingBuffer::new(ring_capacity.max(DECODE_BLOCK_FRAMES * format.channels * 2));

        let shared = Arc::new(Shared {
            decoder: PlMutex::new(decoder),
            ring,
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            wake: Condvar::new(),
            wake_lock: Mutex::new(()),
        });

        let thread_shared = Arc::clone(&shared);
        let channels_count = format.channels;
        let thread_id = id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("strata-track-{id}"))
            .spawn(move || {
                log::debug!("track {thread_id}: streaming thread started");
                streaming_loop(thread_shared, channels_count);
                log::debug!("track {thread_id}: streaming thread exiting");
            })
            .expect("failed to spawn track streaming thread");

        let time_stretch = TimeStretch::new(format.sample_rate as f64, channels, max_block_frames);

        Ok(Self {
            id,
            channels,
            source_sample_rate: format.sample_rate,
            source_frames: format.total_frames,
            volume_bits: AtomicU64::new(1.0_f64.to_bits()),
            pan_bits: AtomicU64::new(0.0_f64.to_bits()),
            muted: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            start_time_samples: AtomicI64::new(start_time_samples),
            loaded: AtomicBool::new(true),
            time_stretch: PlMutex::new(time_stretch),
            shared,
            streaming_thread: Mutex::new(Some(handle)),
        })
    }

    pub fn volume(&self) -> f64 {
        load_f64(&self.volume_bits)
    }
    pub fn set_volume(&self, v: f64) {
        store_f64(&self.volume_bits, v.clamp(0.0, 2.0));
    }
    pub fn pan(&self) -> f64 {
        load_f64(&self.pan_bits)
    }
    pub fn set_pan(&self, v: f64) {
        store_f64(&self.pan_bits, v.clamp(-1.0, 1.0));
    }
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
    pub fn set_muted(&self, m: bool) {
        self.muted.store(m, Ordering::Release);
    }
    pub fn is_solo(&self) -> bool {
        self.solo.load(Ordering::Acquire)
    }
    pub fn set_solo(&self, s: bool) {
        self.solo.store(s, Ordering::Release);
    }
    pub fn start_time(&self) -> i64 {
        self.start_time_samples.load(Ordering::Acquire)
    }

    pub fn pitch_semitones(&self) -> f64 {
        self.time_stretch.lock().pitch_semitones()
    }
    pub fn set_pitch_semitones(&self, v: f64) {
        self.time_stretch.lock().set_pitch_semitones(v);
    }
    pub fn stretch(&self) -> f64 {
        self.time_stretch.lock().stretch()
    }
    pub fn set_stretch(&self, v: f64) {
        self.time_stretch.lock().set_stretch(v);
    }

    /// Realtime-path read (spec §4.8 `ReadSamples`). `frames` is a frame
    /// count; `dst` must hold at least `frames * channels` samples.
    pub fn read_samples(&self, dst: &mut [f32], frames: usize) {
        let n = frames * self.channels.count();
        if self.is_muted() || !self.loaded.load(Ordering::Acquire) {
            dst[..n].fill(0.0);
            return;
        }

        let read = self.shared.ring.read(&mut dst[..n]);
        if read < n {
            dst[read..n].fill(0.0);
        }

        let mut ts = self.time_stretch.lock();
        if ts.is_active() {
            // Process in place: copy to a local scratch is unnecessary
            // since input/output frame counts are equal in the baseline
            // contract (spec §4.7 Open Question decision).
            let input = dst[..n].to_vec();
            ts.process(&input, frames, &mut dst[..n], frames);
        }
        drop(ts);

        apply_volume_and_pan(
            &mut dst[..n],
            frames,
            self.channels,
            self.volume(),
            self.pan(),
        );
    }

    /// Seeks to a local frame index already translated by the caller
    /// (spec §4.8 `Seek`). Pauses streaming, resets the ring buffer and
    /// the effect, reseeks the decoder, then resumes.
    ///
    /// Callers must ensure the realtime consumer (the output stream) is
    /// not concurrently calling `read_samples` on this track — the ring
    /// buffer's `clear()` has no synchronization against an in-flight
    /// `read()`. The engine enforces this by stopping the output stream
    /// before calling `seek_local` and restarting it afterward (spec §4.1:
    /// "Reset() ... used after seek, which also stops the realtime
    /// consumer").
    pub fn seek_local(&self, target_frame: i64) -> bool {
        self.shared.paused.store(true, Ordering::Release);
        let target = target_frame.max(0) as u64;
        let ok = {
            let mut decoder = self.shared.decoder.lock();
            decoder.seek(target)
        };
        self.shared.ring.clear();
        self.time_stretch.lock().reset();
        self.shared.paused.store(false, Ordering::Release);
        self.shared.wake.notify_all();
        ok
    }

    pub fn unload(&self) {
        self.loaded.store(false, Ordering::Release);
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(handle) = self.streaming_thread.lock().unwrap().take() {
            log::debug!("track {}: joining streaming thread", self.id);
            let _ = handle.join();
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.unload();
    }
}

fn streaming_loop(shared: Arc<Shared>, channels: usize) {
    let mut staging = vec![0.0f32; DECODE_BLOCK_FRAMES * channels];

    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        let free_frames = shared.ring.available_write() / channels;
        if free_frames < DECODE_BLOCK_FRAMES {
            let guard = shared.wake_lock.lock().unwrap();
            let _ = shared
                .wake
                .wait_timeout(guard, Duration::from_millis(10))
                .unwrap();
            continue;
        }

        let decoded = {
            let mut decoder = shared.decoder.lock();
            decoder.read(&mut staging, DECODE_BLOCK_FRAMES)
        };

        if decoded == 0 {
            // End of stream: park until seek or shutdown.
            let guard = shared.wake_lock.lock().unwrap();
            let _ = shared
                .wake
                .wait_timeout(guard, Duration::from_millis(50))
                .unwrap();
            continue;
        }

        let mut written = 0usize;
        let samples = decoded * channels;
        while written < samples && !shared.shutdown.load(Ordering::Acquire) {
            written += shared.ring.write(&staging[written..samples]);
            if written < samples {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }
}

fn apply_volume_and_pan(buf: &mut [f32], frames: usize, channels: Channels, volume: f64, pan: f64) {
    let volume = volume as f32;
    match channels {
        Channels::Mono => {
            for s in buf.iter_mut().take(frames) {
                *s *= volume;
            }
        }
        Channels::Stereo => {
            let left_gain = (((pan + 1.0) * std::f64::consts::FRAC_PI_4).cos() * volume as f64) as f32;
            let right_gain = (((pan + 1.0) * std::f64::consts::FRAC_PI_4).sin() * volume as f64) as f32;
            for f in 0..frames {
                buf[f * 2] *= left_gain;
                buf[f * 2 + 1] *= right_gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::apply_volume_and_pan;
    use strata_core::Channels;

    #[test]
    fn equal_power_pan_preserves_unit_energy_at_center() {
        let mut buf = [1.0f32, 1.0];
        apply_volume_and_pan(&mut buf, 1, Channels::Stereo, 1.0, 0.0);
        let energy = (buf[0] * buf[0] + buf[1] * buf[1]).sqrt();
        assert!((energy - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mono_volume_scales_linearly() {
        let mut buf = [0.5f32; 4];
        apply_volume_and_pan(&mut buf, 4, Channels::Mono, 0.5, 0.0);
        assert!(buf.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
