//! strata-engine: timeline, mixer, streaming tracks, recording and
//! extraction pipelines, and the `AudioEngine` façade that composes them
//! (spec components C2–C9, C12–C14).

mod clock;
mod decoder;
mod encoder;
mod engine;
mod extraction;
mod mixer;
mod recording;
mod timing;
mod track;
mod transport;

pub use clock::MasterClock;
pub use decoder::{open_decoder, Decoder, DecoderFormat};
pub use encoder::{create_encoder, Encoder, EncoderConfig, OutputFormat};
pub use engine::{AudioEngine, ErrorCallback, EngineSettings};
pub use extraction::{
    CompletionCallback, ExtractionPipeline, ExtractionResult, ExtractionTarget, ProgressCallback,
};
pub use mixer::MultiTrackMixer;
pub use recording::{RecordingConfig, RecordingPipeline, RecordingResult};
pub use timing::TimingManager;
pub use track::Track;
pub use transport::{TransportController, TransportState};
