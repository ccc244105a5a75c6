//! Streaming decoder (component C5).
//!
//! Grounded on `rf_offline::decoder::AudioDecoder`'s symphonia plumbing
//! (probe by extension, pick the first audio track, `AudioBufferRef`
//! normalization per sample format) but reshaped into a pull/streaming
//! interface: `rf_offline`'s decoder reads an entire file up front, while
//! `Decoder::read` here decodes packet-by-packet and buffers the leftover
//! samples of a packet across calls, since a caller's requested frame count
//! rarely lines up with a codec's native packet size.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder as SymphoniaDecoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use strata_core::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct DecoderFormat {
    pub sample_rate: u32,
    pub channels: usize,
    pub total_frames: u64,
}

/// Capability set for reading interleaved float32 frames from a source,
/// with seek (spec §4.5).
pub trait Decoder: Send {
    fn format(&self) -> DecoderFormat;

    /// Reads up to `frames` interleaved frames into `dst` (which must hold
    /// at least `frames * channels` samples). Returns the number of frames
    /// actually read; fewer than requested signals end-of-stream.
    fn read(&mut self, dst: &mut [f32], frames: usize) -> usize;

    /// Seeks to an absolute frame index. Returns whether the seek
    /// succeeded.
    fn seek(&mut self, frame: u64) -> bool;

    fn is_open(&self) -> bool;
}

/// Opens `path`, sniffing the container/codec from its extension (spec
/// §4.5: "Implementations select by file extension or sniffed magic
/// bytes" — symphonia's probe additionally sniffs magic bytes when the
/// extension hint doesn't resolve unambiguously).
pub fn open_decoder(path: &Path) -> EngineResult<Box<dyn Decoder>> {
    let file = File::open(path)
        .map_err(|e| EngineError::DecoderOpenFailed(format!("{}: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &Default::default(),
            &Default::default(),
        )
        .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.sample_rate.is_some())
        .ok_or_else(|| EngineError::UnsupportedFormat("no decodable audio track".into()))?
        .clone();

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::DecoderOpenFailed(e.to_string()))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(2);
    let total_frames = track.codec_params.n_frames.unwrap_or(0);
    let track_id = track.id;

    Ok(Box::new(SymphoniaStreamDecoder {
        format,
        decoder,
        track_id,
        sample_rate,
        channels,
        total_frames,
        pending: Vec::new(),
        pending_offset: 0,
        open: true,
    }))
}

struct SymphoniaStreamDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    total_frames: u64,
    /// Interleaved samples left over from the last decoded packet that
    /// didn't fit the caller's requested frame count.
    pending: Vec<f32>,
    pending_offset: usize,
    open: bool,
}

impl SymphoniaStreamDecoder {
    fn pending_frames_available(&self) -> usize {
        (self.pending.len() - self.pending_offset) / self.channels
    }

    fn drain_pending(&mut self, dst: &mut [f32], frames: usize) -> usize {
        let available = self.pending_frames_available();
        let take_frames = frames.min(available);
        let take_samples = take_frames * self.channels;
        let start = self.pending_offset;
        dst[..take_samples].copy_from_slice(&self.pending[start..start + take_samples]);
        self.pending_offset += take_samples;
        if self.pending_offset >= self.pending.len() {
            self.pending.clear();
            self.pending_offset = 0;
        }
        take_frames
    }

    fn decode_next_packet(&mut self) -> bool {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => {
                    return false
                }
                Err(_) => return false,
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    append_interleaved(&decoded, &mut self.pending);
                    return true;
                }
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}

impl Decoder for SymphoniaStreamDecoder {
    fn format(&self) -> DecoderFormat {
        DecoderFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            total_frames: self.total_frames,
        }
    }

    fn read(&mut self, dst: &mut [f32], frames: usize) -> usize {
        if !self.open {
            return 0;
        }
        let mut filled = 0;
        while filled < frames {
            if self.pending_frames_available() == 0 && !self.decode_next_packet() {
                break;
            }
            let n = self.drain_pending(
                &mut dst[filled * self.channels..],
                frames - filled,
            );
            if n == 0 {
                break;
            }
            filled += n;
        }
        filled
    }

    fn seek(&mut self, frame: u64) -> bool {
        if self.sample_rate == 0 {
            return false;
        }
        let time = Time::new(
            frame / self.sample_rate as u64,
            (frame % self.sample_rate as u64) as f64 / self.sample_rate as f64,
        );
        match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(_) => {
                self.decoder.reset();
                self.pending.clear();
                self.pending_offset = 0;
                true
            }
            Err(_) => false,
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn append_interleaved(buf: &AudioBufferRef, out: &mut Vec<f32>) {
    match buf {
        AudioBufferRef::F32(b) => push_planar(b, out),
        AudioBufferRef::F64(b) => push_planar_convert(b, out, |s| s as f32),
        AudioBufferRef::S16(b) => push_planar_convert(b, out, |s| s as f32 / i16::MAX as f32),
        AudioBufferRef::S32(b) => push_planar_convert(b, out, |s| s as f32 / i32::MAX as f32),
        AudioBufferRef::U8(b) => {
            push_planar_convert(b, out, |s| (s as f32 - 128.0) / 128.0)
        }
        _ => {}
    }
}

fn push_planar(buf: &symphonia::core::audio::AudioBuffer<f32>, out: &mut Vec<f32>) {
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    out.reserve(frames * channels);
    for f in 0..frames {
        for ch in 0..channels {
            out.push(buf.chan(ch)[f]);
        }
    }
}

fn push_planar_convert<S, F>(
    buf: &symphonia::core::audio::AudioBuffer<S>,
    out: &mut Vec<f32>,
    convert: F,
) where
    S: symphonia::core::sample::Sample + Copy,
    F: Fn(S) -> f32,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    out.reserve(frames * channels);
    for f in 0..frames {
        for ch in 0..channels {
            out.push(convert(buf.chan(ch)[f]));
        }
    }
}
