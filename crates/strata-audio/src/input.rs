//! Microphone input (component C11).
//!
//! Grounded on `rf_audio::stream::build_input_stream` for pushing captured
//! samples into an `rtrb` SPSC queue from the cpal callback, and on
//! `rf_audio::engine::MeterData` for the atomic-bits-as-f64 peak-level
//! meter the control thread polls via `GetInputLevel`.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer as RtrbRingBuffer};

use strata_core::{Channels, SampleRate};

use crate::error::{AudioError, AudioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MicrophoneState {
    Stopped = 0,
    Capturing = 1,
}

impl MicrophoneState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MicrophoneState::Capturing,
            _ => MicrophoneState::Stopped,
        }
    }
}

#[inline]
fn load_f64(a: &AtomicU64) -> f64 {
    f64::from_bits(a.load(Ordering::Acquire))
}

#[inline]
fn store_f64(a: &AtomicU64, v: f64) {
    a.store(v.to_bits(), Ordering::Release);
}

const QUEUE_CAPACITY: usize = 1 << 16;
/// Per-block decay factor applied to the meter's peak-hold value, chosen so
/// a transient peak decays to inaudible within roughly 300ms at typical
/// block rates (same shape as rf_audio's meter ballistics).
const METER_DECAY: f64 = 0.97;

/// Opens a capture stream and exposes it to the control thread as a pull
/// queue (`drain`) plus a decaying peak meter.
pub struct MicrophoneInput {
    stream: Mutex<Option<Stream>>,
    consumer: Mutex<Option<Consumer<f32>>>,
    state: AtomicU8,
    gain_bits: Arc<AtomicU64>,
    peak_bits: Arc<AtomicU64>,
    channels: Channels,
}

impl MicrophoneInput {
    pub fn new(channels: Channels) -> Self {
        Self {
            stream: Mutex::new(None),
            consumer: Mutex::new(None),
            state: AtomicU8::new(MicrophoneState::Stopped as u8),
            gain_bits: Arc::new(AtomicU64::new(1.0_f64.to_bits())),
            peak_bits: Arc::new(AtomicU64::new(0.0_f64.to_bits())),
            channels,
        }
    }

    pub fn state(&self) -> MicrophoneState {
        MicrophoneState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_gain(&self, gain: f64) {
        store_f64(&self.gain_bits, gain.max(0.0));
    }

    pub fn gain(&self) -> f64 {
        load_f64(&self.gain_bits)
    }

    /// Current peak input level in `[0, 1]`, decaying between reads
    /// (spec §6 `GetInputLevel`).
    pub fn level(&self) -> f64 {
        load_f64(&self.peak_bits)
    }

    pub fn start(&self, device_name: Option<&str>, sample_rate: SampleRate) -> AudioResult<()> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(AudioError::NoDevice)?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?;

        let config = StreamConfig {
            channels: self.channels.count() as u16,
            sample_rate: cpal::SampleRate(sample_rate.as_u32()),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, consumer) = RtrbRingBuffer::<f32>::new(QUEUE_CAPACITY);
        let producer = Mutex::new(producer);
        let gain_bits = Arc::clone(&self.gain_bits);
        let peak_bits = Arc::clone(&self.peak_bits);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        push_captured(data, &producer, &gain_bits, &peak_bits);
                    },
                    move |err| log::error!("input stream error: {err}"),
                    None,
                )
                .map_err(|e| AudioError::StreamBuildError(e.to_string()))?,
            other => {
                return Err(AudioError::ConfigError(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        *self.consumer.lock() = Some(consumer);
        *self.stream.lock() = Some(stream);
        self.state
            .store(MicrophoneState::Capturing as u8, Ordering::Release);
        Ok(())
    }

    pub fn stop(&self) {
        *self.stream.lock() = None;
        *self.consumer.lock() = None;
        self.state
            .store(MicrophoneState::Stopped as u8, Ordering::Release);
    }

    /// Drains up to `dst.len()` captured samples into `dst`. Returns the
    /// number of samples written. Called from the control/recording thread,
    /// never from the realtime output callback.
    pub fn drain(&self, dst: &mut [f32]) -> usize {
        let mut guard = self.consumer.lock();
        let Some(consumer) = guard.as_mut() else {
            return 0;
        };
        let mut n = 0;
        while n < dst.len() {
            match consumer.pop() {
                Ok(sample) => {
                    dst[n] = sample;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        n
    }
}

fn push_captured(
    data: &[f32],
    producer: &Mutex<Producer<f32>>,
    gain_bits: &AtomicU64,
    peak_bits: &AtomicU64,
) {
    let gain = load_f64(gain_bits) as f32;
    let mut block_peak = 0.0f32;
    let mut producer = producer.lock();
    let mut dropped = 0u32;
    for &s in data {
        let v = s * gain;
        block_peak = block_peak.max(v.abs());
        if producer.push(v).is_err() {
            dropped += 1;
        }
    }
    if dropped > 0 {
        log::warn!("input ring buffer overrun: dropped {dropped} captured sample(s)");
    }

    let prev = load_f64(peak_bits);
    let decayed = prev * METER_DECAY;
    let next = decayed.max(block_peak as f64);
    store_f64(peak_bits, next);
}

impl Default for MicrophoneInput {
    fn default() -> Self {
        Self::new(Channels::Mono)
    }
}

impl Drop for MicrophoneInput {
    fn drop(&mut self) {
        self.stop();
    }
}
