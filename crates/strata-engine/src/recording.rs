//! Recording pipeline (component C12): drains the microphone ring buffer on
//! a worker thread and feeds an `Encoder`, anchored to the master clock.
//!
//! Grounded on `rf_file::recording`'s `RecordingConfig`/`RecordingState`/
//! `RecordingStats` shape, adapted to this engine's `MicrophoneInput` +
//! `Encoder` instead of `rf_file`'s own capture path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use strata_audio::MicrophoneInput;
use strata_core::{Channels, EngineError, EngineResult, SampleRate};

use crate::clock::MasterClock;
use crate::encoder::{create_encoder, Encoder, EncoderConfig, OutputFormat};
use crate::transport::{TransportController, TransportState};

#[derive(Debug, Clone, Serialize)]
pub struct RecordingConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub format: OutputFormat,
    pub bitrate_kbps: Option<u32>,
    pub quality: Option<String>,
    pub bits_per_sample: u16,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            format: OutputFormat::Wav,
            bitrate_kbps: None,
            quality: None,
            bits_per_sample: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingResult {
    pub uri: String,
    pub duration_ms: f64,
    pub start_time_ms: f64,
    pub start_time_samples: i64,
    pub sample_rate: u32,
    pub channels: usize,
    pub format: String,
    pub bitrate: Option<u32>,
    pub file_size: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

struct RecordingMeta {
    path: PathBuf,
    start_time_samples: i64,
    sample_rate: u32,
    channels: usize,
    format: OutputFormat,
    bitrate: Option<u32>,
}

struct WorkerHandle {
    join: JoinHandle<EngineResult<u64>>,
}

pub struct RecordingPipeline {
    output_dir: PathBuf,
    mic: Arc<MicrophoneInput>,
    worker: Mutex<Option<WorkerHandle>>,
    shutdown: Arc<AtomicBool>,
    frames_written: Arc<AtomicU64>,
    active: AtomicBool,
    meta: Mutex<Option<RecordingMeta>>,
    transport: Arc<TransportController>,
}

fn recording_file_name(ext: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("recording_{}.{}", now.as_millis(), ext)
}

impl RecordingPipeline {
    pub fn new(output_dir: PathBuf, transport: Arc<TransportController>) -> Self {
        Self {
            output_dir,
            mic: Arc::new(MicrophoneInput::new(Channels::Mono)),
            worker: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            frames_written: Arc::new(AtomicU64::new(0)),
            active: AtomicBool::new(false),
            meta: Mutex::new(None),
            transport,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn input_level(&self) -> f64 {
        self.mic.level()
    }

    pub fn set_recording_volume(&self, gain: f64) {
        self.mic.set_gain(gain);
    }

    /// Starts a recording session (spec §4.12). Fails with `InvalidState`
    /// if one is already running.
    pub fn start(
        &self,
        device_name: Option<&str>,
        config: RecordingConfig,
        clock: &MasterClock,
        is_playing: bool,
    ) -> EngineResult<PathBuf> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(EngineError::InvalidState(
                "a recording is already in progress".into(),
            ));
        }

        let start_time_samples = if is_playing { clock.position() } else { 0 };

        log::info!(
            "recording: starting capture on {} at {} Hz, {} channel(s)",
            device_name.unwrap_or("default device"),
            config.sample_rate,
            config.channels
        );

        if let Err(e) = self.mic.start(device_name, SampleRate(config.sample_rate)) {
            self.active.store(false, Ordering::Release);
            return Err(EngineError::RecordingFailed(e.to_string()));
        }

        let requested_path = self
            .output_dir
            .join(recording_file_name(config.format.extension()));

        let bitrate = config
            .bitrate_kbps
            .or_else(|| config.quality.as_deref().map(EncoderConfig::bitrate_from_quality));

        let encoder_config = EncoderConfig {
            format: config.format,
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate_kbps: bitrate,
            bits_per_sample: config.bits_per_sample,
        };

        let (encoder, encoder_config, path) = match create_encoder(&requested_path, encoder_config)
        {
            Ok(v) => v,
            Err(e) => {
                self.mic.stop();
                self.active.store(false, Ordering::Release);
                return Err(e);
            }
        };

        self.shutdown.store(false, Ordering::Release);
        self.frames_written.store(0, Ordering::Release);

        // A session that starts while the transport is already Playing stays
        // Playing (recording runs alongside playback, spec §4.12); a
        // record-only session transitions the transport to Recording.
        if !is_playing {
            self.transport.set_recording(true);
        }

        let mic = Arc::clone(&self.mic);
        let shutdown = Arc::clone(&self.shutdown);
        let frames_written = Arc::clone(&self.frames_written);
        let channels = config.channels;

        let join = std::thread::Builder::new()
            .name("strata-recording-worker".into())
            .spawn(move || recording_worker(mic, encoder, shutdown, frames_written, channels))
            .expect("failed to spawn recording worker");

        *self.worker.lock().unwrap() = Some(WorkerHandle { join });
        *self.meta.lock().unwrap() = Some(RecordingMeta {
            path: path.clone(),
            start_time_samples,
            sample_rate: config.sample_rate,
            channels: config.channels,
            format: encoder_config.format,
            bitrate: encoder_config.bitrate_kbps,
        });

        Ok(path)
    }

    /// Stops the session, flushes and closes the encoder, and returns the
    /// recording result (spec §4.12 / §6 schema).
    pub fn stop(&self) -> RecordingResult {
        log::info!("recording: stopping capture");
        self.shutdown.store(true, Ordering::Release);

        let worker = self.worker.lock().unwrap().take();
        let close_result = worker.and_then(|w| w.join.join().ok());

        self.mic.stop();
        self.active.store(false, Ordering::Release);
        if self.transport.state() == TransportState::Recording {
            self.transport.set_recording(false);
        }

        let meta = self.meta.lock().unwrap().take();

        let Some(meta) = meta else {
            return RecordingResult {
                uri: String::new(),
                duration_ms: 0.0,
                start_time_ms: 0.0,
                start_time_samples: 0,
                sample_rate: 0,
                channels: 0,
                format: "wav".into(),
                bitrate: None,
                file_size: 0,
                success: false,
                error_message: Some("no recording in progress".into()),
            };
        };

        let frames = self.frames_written.load(Ordering::Acquire);
        let duration_ms = frames as f64 * 1000.0 / meta.sample_rate.max(1) as f64;
        let start_time_ms =
            meta.start_time_samples as f64 * 1000.0 / meta.sample_rate.max(1) as f64;

        match close_result {
            Some(Ok(file_size)) => RecordingResult {
                uri: meta.path.display().to_string(),
                duration_ms,
                start_time_ms,
                start_time_samples: meta.start_time_samples,
                sample_rate: meta.sample_rate,
                channels: meta.channels,
                format: meta.format.extension().to_string(),
                bitrate: meta.bitrate,
                file_size,
                success: true,
                error_message: None,
            },
            Some(Err(e)) => RecordingResult {
                uri: meta.path.display().to_string(),
                duration_ms,
                start_time_ms,
                start_time_samples: meta.start_time_samples,
                sample_rate: meta.sample_rate,
                channels: meta.channels,
                format: meta.format.extension().to_string(),
                bitrate: meta.bitrate,
                file_size: std::fs::metadata(&meta.path).map(|m| m.len()).unwrap_or(0),
                success: false,
                error_message: Some(e.to_string()),
            },
            None => RecordingResult {
                uri: meta.path.display().to_string(),
                duration_ms,
                start_time_ms,
                start_time_samples: meta.start_time_samples,
                sample_rate: meta.sample_rate,
                channels: meta.channels,
                format: meta.format.extension().to_string(),
                bitrate: meta.bitrate,
                file_size: 0,
                success: false,
                error_message: Some("recording worker panicked".into()),
            },
        }
    }
}

fn recording_worker(
    mic: Arc<MicrophoneInput>,
    mut encoder: Box<dyn Encoder>,
    shutdown: Arc<AtomicBool>,
    frames_written: Arc<AtomicU64>,
    channels: usize,
) -> EngineResult<u64> {
    log::debug!("recording: worker thread started");
    let mut staging = vec![0.0f32; 4096 * channels];

    loop {
        let n = mic.drain(&mut staging);
        if n > 0 {
            let frames = n / channels;
            if frames > 0 {
                encoder.write(&staging[..frames * channels], frames)?;
                frames_written.fetch_add(frames as u64, Ordering::AcqRel);
            }
        }

        if shutdown.load(Ordering::Acquire) && n == 0 {
            break;
        }
        if n == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    log::debug!("recording: worker thread exiting");
    encoder.close()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_mono_wav_48k() {
        let config = RecordingConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.format, OutputFormat::Wav);
    }

    #[test]
    fn stop_without_start_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            RecordingPipeline::new(dir.path().to_path_buf(), Arc::new(TransportController::new()));
        let result = pipeline.stop();
        assert!(!result.success);
    }
}
