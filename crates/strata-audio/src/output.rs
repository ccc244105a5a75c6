//! Output driver (component C10): opens a cpal output stream and pulls
//! mixed audio from the engine on every callback.
//!
//! Grounded on `rf_audio::stream::build_output_stream` for the cpal
//! stream-build shape and on `rf_audio::engine::AudioEngine::start`/`stop`
//! for the device-loss recovery pattern (stop, reselect device, rebuild,
//! with a single-flight "already recovering" guard so a flurry of cpal
//! error callbacks doesn't spawn overlapping recovery attempts).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;

use strata_core::{Channels, SampleRate};

use crate::error::{AudioError, AudioResult};

/// Whether the stream was opened for exclusive (lowest-latency) or shared
/// access to the device (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputState {
    Stopped = 0,
    Running = 1,
    Recovering = 2,
    Failed = 3,
}

impl OutputState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => OutputState::Running,
            2 => OutputState::Recovering,
            3 => OutputState::Failed,
            _ => OutputState::Stopped,
        }
    }
}

/// The callback the driver pulls mixed audio through on every device
/// buffer. Must never block or allocate (spec §5: realtime path).
pub type PullCallback = Box<dyn FnMut(&mut [f32], usize) + Send + 'static>;

const MAX_RETRIES: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

struct Inner {
    stream: Option<Stream>,
    device_name: Option<String>,
    sample_rate: SampleRate,
    channels: Channels,
}

/// Owns the live output stream and recovers it on device-lost errors.
///
/// Always constructed via `OutputDriver::new`, which wires a self-`Weak`
/// (via `Arc::new_cyclic`) so the cpal error callback can spawn a recovery
/// attempt without the caller needing to thread an `Arc` through `start`.
pub struct OutputDriver {
    inner: Mutex<Inner>,
    state: AtomicU8,
    recovering: AtomicBool,
    callback: Arc<Mutex<Option<PullCallback>>>,
    self_ref: Weak<OutputDriver>,
}

impl OutputDriver {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(Inner {
                stream: None,
                device_name: None,
                sample_rate: SampleRate::default(),
                channels: Channels::Stereo,
            }),
            state: AtomicU8::new(OutputState::Stopped as u8),
            recovering: AtomicBool::new(false),
            callback: Arc::new(Mutex::new(None)),
            self_ref: weak.clone(),
        })
    }

    pub fn state(&self) -> OutputState {
        OutputState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Opens the named device (or the host default if `None`) and starts
    /// pulling audio through `pull` on every callback.
    pub fn start(
        &self,
        device_name: Option<&str>,
        sample_rate: SampleRate,
        channels: Channels,
        mode: StreamMode,
        pull: PullCallback,
    ) -> AudioResult<()> {
        *self.callback.lock() = Some(pull);

        let mut inner = self.inner.lock();
        inner.device_name = device_name.map(|s| s.to_string());
        inner.sample_rate = sample_rate;
        inner.channels = channels;

        let stream = self.build_stream(&inner, mode)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        inner.stream = Some(stream);
        self.state.store(OutputState::Running as u8, Ordering::Release);
        Ok(())
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stream = None;
        self.state.store(OutputState::Stopped as u8, Ordering::Release);
    }

    fn build_stream(&self, inner: &Inner, mode: StreamMode) -> AudioResult<Stream> {
        let host = cpal::default_host();
        let device = match &inner.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(name.clone()))?,
            None => host.default_output_device().ok_or(AudioError::NoDevice)?,
        };

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?;

        // Exclusive mode asks for the device's native rate/format; shared
        // mode accepts whatever cpal/the OS mixer already negotiated.
        let config = match mode {
            StreamMode::Exclusive => StreamConfig {
                channels: inner.channels.count() as u16,
                sample_rate: cpal::SampleRate(inner.sample_rate.as_u32()),
                buffer_size: cpal::BufferSize::Default,
            },
            StreamMode::Shared => supported.config(),
        };

        let callback = Arc::clone(&self.callback);
        let channels = inner.channels.count();
        let weak_self = self.self_ref.clone();

        let err_callback = move |err: cpal::StreamError| {
            log::error!("output stream error: {err}");
            if let Some(driver) = weak_self.upgrade() {
                std::thread::spawn(move || {
                    if let Err(e) = driver.recover() {
                        log::error!("output stream recovery failed: {e}");
                    }
                });
            }
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        if let Some(cb) = callback.lock().as_mut() {
                            let frames = data.len() / channels;
                            cb(data, frames);
                        } else {
                            data.fill(0.0);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| AudioError::StreamBuildError(e.to_string()))?,
            other => {
                return Err(AudioError::ConfigError(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };

        Ok(stream)
    }

    /// Attempts to rebuild the stream after a device-lost error, retrying
    /// with backoff up to `MAX_RETRIES` times. Guarded so overlapping calls
    /// (from a burst of cpal error callbacks) collapse into one attempt.
    pub fn recover(&self) -> AudioResult<()> {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.state.store(OutputState::Recovering as u8, Ordering::Release);

        let result = (|| {
            let mut last_err = AudioError::NoDevice;
            for attempt in 0..MAX_RETRIES {
                std::thread::sleep(RETRY_BACKOFF * attempt.max(1));
                let inner = self.inner.lock();
                match self.build_stream(&inner, StreamMode::Shared) {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            last_err = AudioError::StreamError(e.to_string());
                            continue;
                        }
                        drop(inner);
                        self.inner.lock().stream = Some(stream);
                        return Ok(());
                    }
                    Err(e) => last_err = e,
                }
            }
            Err(last_err)
        })();

        self.recovering.store(false, Ordering::Release);
        match &result {
            Ok(()) => self.state.store(OutputState::Running as u8, Ordering::Release),
            Err(_) => self.state.store(OutputState::Failed as u8, Ordering::Release),
        }
        result
    }
}

impl Drop for OutputDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
