//! Extraction pipeline (component C13): offline render loop driving the
//! same mixer graph in pull mode, writing through an `Encoder`.
//!
//! Grounded on `rf_offline`'s job/worker split (`rf_offline::pipeline`):
//! a single background worker drains a FIFO of jobs, each producing a
//! completion callback; here the "render" step reuses `MultiTrackMixer`
//! and `Track::read_samples` directly instead of `rf_offline`'s batch
//! decode-whole-file-then-process approach, so extraction honors the same
//! mix rules as realtime playback (spec §4.13).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;

use strata_audio::OutputDriver;
use strata_core::{EngineError, EngineResult};

use crate::clock::MasterClock;
use crate::encoder::{create_encoder, EncoderConfig, OutputFormat};
use crate::engine::build_pull_callback;
use crate::mixer::MultiTrackMixer;
use crate::timing::TimingManager;
use crate::track::Track;
use crate::transport::TransportController;

const RENDER_BLOCK_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTarget {
    SingleTrack,
    Mix,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub track_id: Option<String>,
    pub uri: String,
    pub duration_ms: f64,
    pub file_size: u64,
    pub format: String,
    pub bitrate: Option<u32>,
    pub success: bool,
    pub error_message: Option<String>,
}

pub type ProgressCallback = Box<dyn Fn(f64) + Send>;
pub type CompletionCallback = Box<dyn Fn(ExtractionResult) + Send>;

/// Handles the extraction worker needs to suspend realtime playback for the
/// duration of a job and restore it afterward (spec §4.13/§9: extraction
/// shares `Track` instances with the live mixer, so it must not run
/// concurrently with the realtime output callback reading the same tracks).
pub struct PlaybackSuspend {
    pub output: Arc<OutputDriver>,
    pub transport: Arc<TransportController>,
    pub clock: Arc<MasterClock>,
    pub mixer: Arc<MultiTrackMixer>,
    pub timing: Arc<TimingManager>,
}

/// Stops the output stream and pauses the transport if it was playing,
/// returning whether it was. Safe to call even if nothing is playing.
fn suspend_playback(suspend: &PlaybackSuspend) -> bool {
    let was_playing = suspend.transport.is_playing();
    if was_playing {
        suspend.output.stop();
        suspend.transport.pause();
    }
    was_playing
}

/// Reseeks every live track to the clock's paused position (extraction's
/// own render pass displaced their ring buffers/decoders) and restarts
/// output, undoing `suspend_playback`.
fn resume_playback(suspend: &PlaybackSuspend, was_playing: bool) {
    if !was_playing {
        return;
    }
    let frame = suspend.clock.position();
    for id in suspend.mixer.track_ids() {
        if let Some(track) = suspend.mixer.track(&id) {
            let local = (frame - track.start_time()).max(0);
            track.seek_local(local);
        }
    }
    suspend.transport.play();
    let pull = build_pull_callback(
        Arc::clone(&suspend.mixer),
        Arc::clone(&suspend.clock),
        Arc::clone(&suspend.transport),
        Arc::clone(&suspend.timing),
    );
    if let Err(e) = suspend.output.start(
        None,
        strata_core::SampleRate(suspend.timing.sample_rate()),
        strata_core::Channels::Stereo,
        strata_audio::StreamMode::Exclusive,
        pull,
    ) {
        log::error!("extraction: failed to resume playback after job: {e}");
    }
}

struct Job {
    id: u64,
    track_id: Option<String>,
    tracks: Vec<Arc<Track>>,
    target: ExtractionTarget,
    path: PathBuf,
    encoder_config: EncoderConfig,
    cancel: Arc<AtomicBool>,
    progress_cb: Option<ProgressCallback>,
    completion_cb: Option<CompletionCallback>,
}

/// Serializes extraction jobs on one background worker (spec §4.13:
/// "Extraction jobs are serialized by a single worker thread").
pub struct ExtractionPipeline {
    sender: Sender<Job>,
    next_id: AtomicU64,
    cancels: Mutex<std::collections::HashMap<u64, Arc<AtomicBool>>>,
    running: Arc<AtomicBool>,
}

impl ExtractionPipeline {
    pub fn new(suspend: PlaybackSuspend) -> Self {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = bounded(64);
        let running = Arc::new(AtomicBool::new(false));
        let worker_running = Arc::clone(&running);

        std::thread::Builder::new()
            .name("strata-extraction-worker".into())
            .spawn(move || {
                log::debug!("extraction: worker thread started");
                for job in receiver.iter() {
                    worker_running.store(true, Ordering::Release);
                    let was_playing = suspend_playback(&suspend);
                    run_job(job);
                    resume_playback(&suspend, was_playing);
                    worker_running.store(false, Ordering::Release);
                }
                log::debug!("extraction: worker thread exiting");
            })
            .expect("failed to spawn extraction worker");

        Self {
            sender,
            next_id: AtomicU64::new(1),
            cancels: Mutex::new(std::collections::HashMap::new()),
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_track(
        &self,
        track: Arc<Track>,
        path: PathBuf,
        format: OutputFormat,
        bitrate_kbps: Option<u32>,
        progress_cb: Option<ProgressCallback>,
        completion_cb: Option<CompletionCallback>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels.lock().unwrap().insert(id, Arc::clone(&cancel));

        let encoder_config = EncoderConfig {
            format,
            sample_rate: track.source_sample_rate,
            channels: track.channels.count(),
            bitrate_kbps,
            bits_per_sample: 16,
        };

        let job = Job {
            id,
            track_id: Some(track.id.clone()),
            tracks: vec![track],
            target: ExtractionTarget::SingleTrack,
            path,
            encoder_config,
            cancel,
            progress_cb,
            completion_cb,
        };
        let _ = self.sender.send(job);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_mix(
        &self,
        tracks: Vec<Arc<Track>>,
        path: PathBuf,
        format: OutputFormat,
        sample_rate: u32,
        bitrate_kbps: Option<u32>,
        progress_cb: Option<ProgressCallback>,
        completion_cb: Option<CompletionCallback>,
    ) -> EngineResult<u64> {
        if tracks.is_empty() {
            return Err(EngineError::InvalidArgument("no tracks to extract".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels.lock().unwrap().insert(id, Arc::clone(&cancel));

        let encoder_config = EncoderConfig {
            format,
            sample_rate,
            channels: 2,
            bitrate_kbps,
            bits_per_sample: 16,
        };

        let job = Job {
            id,
            track_id: None,
            tracks,
            target: ExtractionTarget::Mix,
            path,
            encoder_config,
            cancel,
            progress_cb,
            completion_cb,
        };
        let _ = self.sender.send(job);
        Ok(id)
    }

    /// Sets the job's cancel flag; returns whether a matching job exists.
    pub fn cancel(&self, id: u64) -> bool {
        if let Some(flag) = self.cancels.lock().unwrap().get(&id) {
            flag.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }
}

fn run_job(job: Job) {
    let Job {
        id: _,
        track_id,
        tracks,
        target,
        path,
        encoder_config,
        cancel,
        progress_cb,
        completion_cb,
    } = job;

    let result = render(&tracks, target, &path, encoder_config, &cancel, progress_cb.as_deref());

    let extraction_result = match result {
        Ok((duration_ms, file_size, final_config, final_path)) => ExtractionResult {
            track_id,
            uri: final_path.display().to_string(),
            duration_ms,
            file_size,
            format: final_config.format.extension().to_string(),
            bitrate: final_config.bitrate_kbps,
            success: true,
            error_message: None,
        },
        Err(e) => ExtractionResult {
            track_id,
            uri: path.display().to_string(),
            duration_ms: 0.0,
            file_size: 0,
            format: encoder_config.format.extension().to_string(),
            bitrate: encoder_config.bitrate_kbps,
            success: false,
            error_message: Some(e.to_string()),
        },
    };

    if let Some(cb) = completion_cb {
        cb(extraction_result);
    }
}

fn render(
    tracks: &[Arc<Track>],
    target: ExtractionTarget,
    path: &std::path::Path,
    encoder_config: EncoderConfig,
    cancel: &AtomicBool,
    progress_cb: Option<&ProgressCallback>,
) -> EngineResult<(f64, u64, EncoderConfig, PathBuf)> {
    for track in tracks {
        if !track.seek_local(0) {
            return Err(EngineError::SeekFailed(format!(
                "failed to seek track {} to 0 for extraction",
                track.id
            )));
        }
    }

    let total_frames: i64 = match target {
        ExtractionTarget::SingleTrack => tracks[0].source_frames as i64,
        ExtractionTarget::Mix => tracks
            .iter()
            .map(|t| t.start_time() + t.source_frames as i64)
            .max()
            .unwrap_or(0),
    };

    let (mut encoder, encoder_config, out_path) = create_encoder(path, encoder_config)?;
    let channels = encoder_config.channels;
    let mut block = vec![0.0f32; RENDER_BLOCK_FRAMES * channels];

    let mixer = if target == ExtractionTarget::Mix {
        let mixer = MultiTrackMixer::new(RENDER_BLOCK_FRAMES);
        for t in tracks {
            mixer.add_track(Arc::clone(t), RENDER_BLOCK_FRAMES);
        }
        Some(mixer)
    } else {
        None
    };

    let mut processed: i64 = 0;
    while processed < total_frames {
        if cancel.load(Ordering::Acquire) {
            let _ = encoder.close();
            let _ = std::fs::remove_file(&out_path);
            return Err(EngineError::ExtractionFailed("cancelled".into()));
        }

        let remaining = (total_frames - processed) as usize;
        let block_frames = RENDER_BLOCK_FRAMES.min(remaining);

        match &mixer {
            Some(mixer) => mixer.mix(&mut block[..block_frames * 2], block_frames, processed),
            None => tracks[0].read_samples(&mut block[..block_frames * channels], block_frames),
        }

        encoder.write(&block[..block_frames * channels], block_frames)?;
        processed += block_frames as i64;

        if let Some(cb) = progress_cb {
            cb(processed as f64 / total_frames.max(1) as f64);
        }
    }

    let sample_rate = encoder_config.sample_rate;
    let file_size = encoder.close()?;
    let duration_ms = total_frames as f64 * 1000.0 / sample_rate.max(1) as f64;
    Ok((duration_ms, file_size, encoder_config, out_path))
}
