//! strata-dsp: the real-time pitch/stretch unit (spec §4.7, component C7).

mod time_stretch;

pub use time_stretch::TimeStretch;
