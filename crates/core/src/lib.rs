//! Core library for the spectral equalizer.
//!
//! The crate implements a block-based real-time signal path: captured audio is
//! transformed into the frequency domain, scaled per band, passed through a
//! short block delay and transformed back for playback. Each module owns one
//! stage; [`pipeline`] composes them and runs the loop against a
//! [`device`] backend while a [`ParameterStore`] carries gain changes in from
//! the control surface.

pub mod bands;
pub mod config;
pub mod delay;
pub mod device;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod transform;

pub use bands::BandRanges;
pub use config::{AudioConfig, DeviceId, EqualizerConfig};
pub use delay::{DelayConfig, DelayLine};
#[cfg(feature = "cpal")]
pub use device::{list_devices, CpalBackend, DeviceListing};
pub use device::{AudioBackend, AudioStream, MemoryBackend, MemorySink, ToneGenerator};
pub use error::{EqError, Result};
pub use params::{control_to_gain, Band, BandGains, ParameterStore};
pub use pipeline::{AudioPipeline, BlockProcessor, PipelineState, PipelineStats, StopHandle};
pub use transform::{SpectralBlock, SpectralTransform};
