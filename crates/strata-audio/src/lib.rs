//! strata-audio: the lock-free ring buffer (C1), device enumeration, the
//! output driver (C10) and microphone input (C11) of the Strata engine.
//!
//! Grounded on the teacher's `rf_audio` crate: `ringbuf.rs` for the SPSC
//! ring buffer shape, `device.rs` for backend/device enumeration, and
//! `stream.rs` + `engine.rs` for the cpal stream-build and callback-error
//! recovery pattern.

mod device;
mod error;
mod input;
mod output;
mod ringbuf;

pub use device::{list_input_devices, list_output_devices, DeviceInfo};
pub use error::{AudioError, AudioResult};
pub use input::{MicrophoneInput, MicrophoneState};
pub use output::{OutputDriver, OutputState, StreamMode};
pub use ringbuf::RingBuffer;
