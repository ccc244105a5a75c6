//! Integration tests for the end-to-end scenarios in spec §8.
//!
//! These avoid opening a real audio device (`AudioEngine::play` would
//! start a live cpal stream, which needs hardware the test host may not
//! have) and instead exercise the same code paths that drive it: loading
//! tracks through the real decoder, mixing through the real mixer, and
//! running the real extraction pipeline end-to-end against synthetic WAV
//! fixtures.

use std::sync::mpsc;
use std::time::Duration;

use strata_engine::{AudioEngine, EngineSettings, ExtractionResult, OutputFormat};

fn write_sine_wav(path: &std::path::Path, seconds: f64, sample_rate: u32, freq: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let n = (seconds * sample_rate as f64) as usize;
    for i in 0..n {
        let t = i as f64 / sample_rate as f64;
        let s = (2.0 * std::f64::consts::PI * freq * t).sin();
        writer.write_sample((s * i16::MAX as f64) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn engine_with(sample_rate: u32) -> AudioEngine {
    let mut engine = AudioEngine::new();
    engine
        .initialize(EngineSettings {
            sample_rate,
            max_tracks: 8,
        })
        .unwrap();
    engine
}

/// S1 (load & smoke), restricted to the parts that don't need a live
/// output device: loading reports a sane duration and no errors.
#[test]
fn s1_load_reports_duration_and_no_errors() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.wav");
    let b = dir.path().join("b.wav");
    write_sine_wav(&a, 5.0, 44_100, 440.0);
    write_sine_wav(&b, 6.0, 44_100, 220.0);

    let engine = engine_with(44_100);
    engine.load_track("a", &a, 0.0).unwrap();
    engine.load_track("b", &b, 0.0).unwrap();

    assert!(engine.duration_ms() > 0.0);
    assert!(engine.last_error_code().is_none());
    assert_eq!(engine.loaded_track_ids().len(), 2);
}

/// Invariant 2 (spec §8): a track with a start time in the future
/// contributes nothing to a block entirely before it.
#[test]
fn track_before_its_start_contributes_silence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.wav");
    write_sine_wav(&path, 2.0, 44_100, 440.0);

    let engine = engine_with(44_100);
    engine.load_track("late", &path, 1000.0).unwrap();

    // The engine doesn't expose the mixer directly; this is covered at
    // the unit level in mixer::tests, and here we only assert loading
    // with a future start time succeeds and doesn't affect duration
    // accounting negatively.
    assert!(engine.duration_ms() >= 2000.0);
}

/// Invariant 10: repeated Stop / UnloadAllTracks calls are no-ops after
/// the first.
#[test]
fn stop_and_unload_all_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.wav");
    write_sine_wav(&path, 1.0, 44_100, 440.0);

    let engine = engine_with(44_100);
    engine.load_track("t", &path, 0.0).unwrap();

    engine.stop().unwrap();
    engine.stop().unwrap();
    assert!(!engine.is_playing());

    engine.unload_all_tracks();
    engine.unload_all_tracks();
    assert!(engine.loaded_track_ids().is_empty());
}

/// S6. Extraction output: a loaded track extracted to WAV produces a file
/// whose duration is within spec §8 invariant 9's 200ms tolerance of the
/// source.
#[test]
fn s6_extraction_output_matches_source_duration() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.wav");
    write_sine_wav(&source, 3.0, 44_100, 440.0);
    let out = dir.path().join("extracted.wav");

    let engine = engine_with(44_100);
    engine.load_track("t", &source, 0.0).unwrap();

    let (tx, rx) = mpsc::channel::<ExtractionResult>();
    engine
        .start_extract_track(
            "t",
            out.clone(),
            OutputFormat::Wav,
            None,
            None,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )
        .unwrap();

    let result = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("extraction did not complete in time");

    assert!(result.success, "extraction failed: {:?}", result.error_message);
    assert!(out.exists());
    assert!(result.file_size > 0);
    assert!((result.duration_ms - 3000.0).abs() <= 200.0);
}

/// TrackNotFound surfaces for operations against an unknown track id.
#[test]
fn unknown_track_id_surfaces_track_not_found() {
    let engine = engine_with(44_100);
    let err = engine.set_track_volume("missing", 0.5).unwrap_err();
    assert_eq!(err, strata_core::EngineError::TrackNotFound("missing".into()));
}
