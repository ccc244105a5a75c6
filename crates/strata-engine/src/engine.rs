//! AudioEngine façade (component C14): composes every other component
//! behind a single control-plane API (spec §4.14 / §6).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use strata_audio::{OutputDriver, OutputState, StreamMode};
use strata_core::{Channels, EngineError, EngineResult, SampleRate};

use crate::clock::MasterClock;
use crate::encoder::OutputFormat;
use crate::extraction::{
    CompletionCallback, ExtractionPipeline, ExtractionResult, PlaybackSuspend, ProgressCallback,
};
use crate::mixer::MultiTrackMixer;
use crate::recording::{RecordingConfig, RecordingPipeline, RecordingResult};
use crate::timing::TimingManager;
use crate::track::Track;
use crate::transport::{TransportController, TransportState};

const MAX_BLOCK_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub sample_rate: u32,
    pub max_tracks: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            max_tracks: 32,
        }
    }
}

pub type ErrorCallback = Box<dyn Fn(&EngineError) + Send + Sync>;

struct LastError {
    code: String,
    message: String,
}

/// Composes C1–C13 behind one façade. Owns the mixer, output driver,
/// clock, timing, transport, and track map exclusively (spec §3
/// "Ownership").
pub struct AudioEngine {
    settings: EngineSettings,
    max_tracks: usize,
    clock: Arc<MasterClock>,
    timing: Arc<TimingManager>,
    transport: Arc<TransportController>,
    mixer: Arc<MultiTrackMixer>,
    output: Arc<OutputDriver>,
    recording: RecordingPipeline,
    extraction: ExtractionPipeline,
    last_error: Mutex<Option<LastError>>,
    error_callback: RwLock<Option<ErrorCallback>>,
    initialized: AtomicBool,
}

impl AudioEngine {
    pub fn new() -> Self {
        let clock = Arc::new(MasterClock::new());
        let timing = Arc::new(TimingManager::new(48_000));
        let transport = Arc::new(TransportController::new());
        let mixer = Arc::new(MultiTrackMixer::new(MAX_BLOCK_FRAMES));
        let output = OutputDriver::new();

        // Extraction shares these handles so a job can suspend realtime
        // playback for its duration and restore it afterward (spec
        // §4.13/§9: extraction is exclusive with live playback by default).
        let extraction = ExtractionPipeline::new(PlaybackSuspend {
            output: Arc::clone(&output),
            transport: Arc::clone(&transport),
            clock: Arc::clone(&clock),
            mixer: Arc::clone(&mixer),
            timing: Arc::clone(&timing),
        });

        Self {
            settings: EngineSettings::default(),
            max_tracks: 32,
            clock,
            timing,
            transport,
            mixer,
            output,
            recording: RecordingPipeline::new(std::env::temp_dir(), Arc::clone(&transport)),
            extraction,
            last_error: Mutex::new(None),
            error_callback: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn initialize(&mut self, settings: EngineSettings) -> EngineResult<()> {
        self.settings = settings;
        self.max_tracks = settings.max_tracks;
        self.timing.set_sample_rate(settings.sample_rate);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn release(&mut self) {
        // Extraction jobs are cooperative: a fresh engine (dropping this
        // one's ExtractionPipeline) simply stops enqueuing new ones. There
        // is no "cancel all" — callers track their own job ids.
        self.transport.stop();
        self.output.stop();
        self.mixer.clear();
        self.initialized.store(false, Ordering::Release);
    }

    fn require_initialized(&self) -> EngineResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(self.record_error(EngineError::NotInitialized))
        }
    }

    fn record_error(&self, err: EngineError) -> EngineError {
        *self.last_error.lock() = Some(LastError {
            code: error_code(&err),
            message: err.to_string(),
        });
        if let Some(cb) = self.error_callback.read().as_ref() {
            cb(&err);
        }
        err
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        *self.error_callback.write() = Some(cb);
    }

    pub fn last_error_code(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|e| e.code.clone())
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|e| e.message.clone())
    }

    // -- Tracks --------------------------------------------------------

    pub fn load_track(&self, id: &str, path: &Path, start_ms: f64) -> EngineResult<()> {
        self.require_initialized()?;
        if id.is_empty() {
            return Err(self.record_error(EngineError::InvalidArgument("track id is empty".into())));
        }
        if !path.exists() {
            return Err(self.record_error(EngineError::InvalidArgument(format!(
                "path does not exist: {}",
                path.display()
            ))));
        }
        if self.mixer.track_ids().len() >= self.max_tracks {
            return Err(self.record_error(EngineError::TrackLimitReached(self.max_tracks)));
        }

        let start_time_samples = self.timing.ms_to_frames(start_ms);
        let track = Track::load(id.to_string(), path, start_time_samples, MAX_BLOCK_FRAMES)
            .map_err(|e| self.record_error(e))?;

        // If the clock is already past this track's start, seek it forward
        // so a live add doesn't restart already-played material (spec
        // §4.14 / §9 Open Question).
        let current = self.clock.position();
        if current > start_time_samples {
            track.seek_local(current - start_time_samples);
        }

        self.mixer.add_track(Arc::new(track), MAX_BLOCK_FRAMES);
        self.recompute_duration();
        Ok(())
    }

    pub fn unload_track(&self, id: &str) -> EngineResult<()> {
        self.require_initialized()?;
        match self.mixer.remove_track(id) {
            Some(track) => {
                track.unload();
                self.recompute_duration();
                Ok(())
            }
            None => Err(self.record_error(EngineError::TrackNotFound(id.to_string()))),
        }
    }

    pub fn unload_all_tracks(&self) {
        self.mixer.clear();
        self.timing.set_total_duration_frames(0);
    }

    pub fn loaded_track_ids(&self) -> Vec<String> {
        self.mixer.track_ids()
    }

    fn recompute_duration(&self) {
        self.timing
            .set_total_duration_frames(self.mixer.total_duration_frames());
    }

    // -- Transport -------------------------------------------------------

    pub fn play(&self) -> EngineResult<()> {
        self.require_initialized()?;
        if self.transport.state() == TransportState::Stopped {
            self.clock.set_position(0);
        }
        self.transport.play();
        self.ensure_output_started()
    }

    pub fn pause(&self) -> EngineResult<()> {
        self.require_initialized()?;
        self.transport.pause();
        Ok(())
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.require_initialized()?;
        // Tear the output stream down before reseeking tracks: a track's
        // ring buffer and decoder are only safe to reset once the realtime
        // consumer (the output callback) can no longer be mid-read (spec
        // §4.1/§5: seek "also stops the realtime consumer").
        self.output.stop();
        self.transport.stop();
        self.clock.set_position(0);
        for id in self.mixer.track_ids() {
            if let Some(track) = self.mixer.track(&id) {
                track.seek_local(-track.start_time());
            }
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn seek(&self, ms: f64) -> EngineResult<()> {
        self.require_initialized()?;
        if ms < 0.0 || ms > self.timing.duration_ms() {
            return Err(self.record_error(EngineError::InvalidArgument(format!(
                "seek target {ms}ms out of range [0, {}]",
                self.timing.duration_ms()
            ))));
        }
        let frame = self.timing.ms_to_frames(ms);

        // Stop the output stream first so no callback can observe a
        // half-seeked track: reseeking a track resets its ring buffer and
        // decoder, which is only safe once the realtime consumer has
        // stopped pulling from it (spec §4.1/§5).
        let was_playing = self.transport.is_playing();
        self.output.stop();

        self.clock.set_position(frame);
        let result = (|| {
            for id in self.mixer.track_ids() {
                if let Some(track) = self.mixer.track(&id) {
                    let local = (frame - track.start_time()).max(0);
                    if !track.seek_local(local) {
                        return Err(EngineError::SeekFailed(format!(
                            "failed to seek track {id}"
                        )));
                    }
                }
            }
            Ok(())
        })();

        if was_playing {
            self.ensure_output_started()?;
        }

        result.map_err(|e| self.record_error(e))
    }

    pub fn current_position_ms(&self) -> f64 {
        self.timing.frames_to_ms(self.clock.position())
    }

    pub fn duration_ms(&self) -> f64 {
        self.timing.duration_ms()
    }

    fn ensure_output_started(&self) -> EngineResult<()> {
        if self.output.state() == OutputState::Running {
            return Ok(());
        }
        log::info!(
            "playback: starting output stream at {} Hz",
            self.timing.sample_rate()
        );
        let pull = build_pull_callback(
            Arc::clone(&self.mixer),
            Arc::clone(&self.clock),
            Arc::clone(&self.transport),
            Arc::clone(&self.timing),
        );
        self.output
            .start(
                None,
                SampleRate(self.timing.sample_rate()),
                Channels::Stereo,
                StreamMode::Exclusive,
                pull,
            )
            .map_err(|e| self.record_error(EngineError::StreamError(e.to_string())))
    }

    // -- Mixing / effects -------------------------------------------------

    pub fn set_track_volume(&self, id: &str, v: f64) -> EngineResult<()> {
        self.with_track(id, |t| t.set_volume(v))
    }
    pub fn set_track_muted(&self, id: &str, m: bool) -> EngineResult<()> {
        self.with_track(id, |t| t.set_muted(m))
    }
    pub fn set_track_solo(&self, id: &str, s: bool) -> EngineResult<()> {
        self.with_track(id, |t| t.set_solo(s))
    }
    pub fn set_track_pan(&self, id: &str, v: f64) -> EngineResult<()> {
        self.with_track(id, |t| t.set_pan(v))
    }
    pub fn set_track_pitch(&self, id: &str, semitones: f64) -> EngineResult<()> {
        self.with_track(id, |t| t.set_pitch_semitones(semitones))
    }
    pub fn set_track_speed(&self, id: &str, stretch: f64) -> EngineResult<()> {
        self.with_track(id, |t| t.set_stretch(stretch))
    }
    pub fn track_pitch(&self, id: &str) -> EngineResult<f64> {
        self.with_track_ret(id, |t| t.pitch_semitones())
    }
    pub fn track_speed(&self, id: &str) -> EngineResult<f64> {
        self.with_track_ret(id, |t| t.stretch())
    }

    pub fn set_master_volume(&self, v: f64) {
        self.mixer.set_master_gain(v);
    }
    pub fn master_volume(&self) -> f64 {
        self.mixer.master_gain()
    }

    /// Broadcasts a pitch setting to every loaded track's effect.
    pub fn set_pitch(&self, semitones: f64) {
        for id in self.mixer.track_ids() {
            if let Some(t) = self.mixer.track(&id) {
                t.set_pitch_semitones(semitones);
            }
        }
    }

    /// Broadcasts a speed (stretch) setting to every loaded track's effect.
    pub fn set_speed(&self, stretch: f64) {
        for id in self.mixer.track_ids() {
            if let Some(t) = self.mixer.track(&id) {
                t.set_stretch(stretch);
            }
        }
    }

    fn with_track(&self, id: &str, f: impl FnOnce(&Track)) -> EngineResult<()> {
        match self.mixer.track(id) {
            Some(t) => {
                f(&t);
                Ok(())
            }
            None => Err(self.record_error(EngineError::TrackNotFound(id.to_string()))),
        }
    }

    fn with_track_ret<T>(&self, id: &str, f: impl FnOnce(&Track) -> T) -> EngineResult<T> {
        match self.mixer.track(id) {
            Some(t) => Ok(f(&t)),
            None => Err(self.record_error(EngineError::TrackNotFound(id.to_string()))),
        }
    }

    // -- Recording ---------------------------------------------------------

    pub fn set_recording_output_dir(&mut self, dir: PathBuf) {
        self.recording = RecordingPipeline::new(dir, Arc::clone(&self.transport));
    }

    pub fn start_recording(
        &self,
        device_name: Option<&str>,
        config: RecordingConfig,
    ) -> EngineResult<PathBuf> {
        self.require_initialized()?;
        self.recording
            .start(device_name, config, &self.clock, self.is_playing())
            .map_err(|e| self.record_error(e))
    }

    pub fn stop_recording(&self) -> RecordingResult {
        self.recording.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn input_level(&self) -> f64 {
        self.recording.input_level()
    }

    pub fn set_recording_volume(&self, gain: f64) {
        self.recording.set_recording_volume(gain);
    }

    // -- Extraction ----------------------------------------------------

    pub fn start_extract_track(
        &self,
        id: &str,
        path: PathBuf,
        format: OutputFormat,
        bitrate_kbps: Option<u32>,
        progress_cb: Option<ProgressCallback>,
        completion_cb: Option<CompletionCallback>,
    ) -> EngineResult<u64> {
        let track = self
            .mixer
            .track(id)
            .ok_or_else(|| self.record_error(EngineError::TrackNotFound(id.to_string())))?;
        Ok(self.extraction.enqueue_track(
            track,
            path,
            format,
            bitrate_kbps,
            progress_cb,
            completion_cb,
        ))
    }

    pub fn start_extract_all(
        &self,
        path: PathBuf,
        format: OutputFormat,
        bitrate_kbps: Option<u32>,
        progress_cb: Option<ProgressCallback>,
        completion_cb: Option<CompletionCallback>,
    ) -> EngineResult<u64> {
        let tracks: Vec<Arc<Track>> = self
            .mixer
            .track_ids()
            .iter()
            .filter_map(|id| self.mixer.track(id))
            .collect();
        if tracks.is_empty() {
            return Err(self.record_error(EngineError::InvalidArgument("no tracks loaded".into())));
        }
        self.extraction.enqueue_mix(
            tracks,
            path,
            format,
            self.timing.sample_rate(),
            bitrate_kbps,
            progress_cb,
            completion_cb,
        )
    }

    pub fn cancel_extraction(&self, id: u64) -> bool {
        self.extraction.cancel(id)
    }

    pub fn is_extraction_running(&self) -> bool {
        self.extraction.is_running()
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the realtime pull callback handed to `OutputDriver::start`:
/// silence while not playing, otherwise mix one block at the clock's
/// current position and advance it, stopping transport at end of timeline.
///
/// Shared by normal playback startup and by extraction's post-job resume
/// (`extraction::resume_playback`) so both construct an identical callback.
pub(crate) fn build_pull_callback(
    mixer: Arc<MultiTrackMixer>,
    clock: Arc<MasterClock>,
    transport: Arc<TransportController>,
    timing: Arc<TimingManager>,
) -> Box<dyn FnMut(&mut [f32], usize) + Send> {
    Box::new(move |out, frames| {
        if !transport.is_playing() {
            out[..frames * 2].fill(0.0);
            return;
        }
        let t0 = clock.position();
        mixer.mix(out, frames, t0);
        clock.advance(frames as i64);
        if t0 + frames as i64 >= timing.total_duration_frames() {
            transport.stop();
        }
    })
}

fn error_code(err: &EngineError) -> String {
    match err {
        EngineError::NotInitialized => "NotInitialized",
        EngineError::InvalidArgument(_) => "InvalidArgument",
        EngineError::InvalidState(_) => "InvalidState",
        EngineError::TrackNotFound(_) => "TrackNotFound",
        EngineError::TrackLimitReached(_) => "TrackLimitReached",
        EngineError::UnsupportedFormat(_) => "UnsupportedFormat",
        EngineError::DecoderOpenFailed(_) => "DecoderOpenFailed",
        EngineError::SeekFailed(_) => "SeekFailed",
        EngineError::StreamError(_) => "StreamError",
        EngineError::RecordingFailed(_) => "RecordingFailed",
        EngineError::ExtractionFailed(_) => "ExtractionFailed",
        EngineError::PermissionDenied(_) => "PermissionDenied",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_before_initialize_fail() {
        let engine = AudioEngine::new();
        let err = engine.play().unwrap_err();
        assert_eq!(err, EngineError::NotInitialized);
    }

    #[test]
    fn unload_all_is_idempotent() {
        let mut engine = AudioEngine::new();
        engine.initialize(EngineSettings::default()).unwrap();
        engine.unload_all_tracks();
        engine.unload_all_tracks();
        assert!(engine.loaded_track_ids().is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = AudioEngine::new();
        engine.initialize(EngineSettings::default()).unwrap();
        engine.stop().unwrap();
        engine.stop().unwrap();
        assert!(!engine.is_playing());
    }
}
