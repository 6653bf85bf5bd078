//! Device layer the pipeline reads from and writes to.
//!
//! A backend opens one duplex [`AudioStream`] for a given [`AudioConfig`]. The
//! stream exposes blocking, interleaved `f32` reads and writes; the pipeline
//! owns it exclusively for its whole lifetime.

#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod memory;

#[cfg(feature = "cpal")]
pub use cpal_backend::{list_devices, CpalBackend, CpalStream, DeviceListing};
pub use memory::{MemoryBackend, MemorySink, MemoryStream, ToneGenerator};

use crate::{AudioConfig, Result};

/// Opens duplex streams.
pub trait AudioBackend {
    type Stream: AudioStream + Send + 'static;

    /// Acquires the configured input and output devices. Fails with
    /// [`EqError::Device`](crate::EqError::Device) when the format, rate or
    /// channel count cannot be honoured.
    fn open(&mut self, config: &AudioConfig) -> Result<Self::Stream>;
}

/// An open duplex connection.
pub trait AudioStream {
    /// Fills `block` with the next captured samples, blocking until enough are
    /// available.
    fn read(&mut self, block: &mut [f32]) -> Result<()>;

    /// Queues `block` for playback, blocking until it is accepted.
    fn write(&mut self, block: &[f32]) -> Result<()>;

    /// Releases the devices. Calling it more than once has no further effect.
    fn close(&mut self);
}

/// Owns a stream and closes it when dropped, so every exit path releases the
/// devices exactly once.
pub(crate) struct StreamGuard {
    stream: Box<dyn AudioStream + Send>,
    closed: bool,
}

impl StreamGuard {
    pub(crate) fn new(stream: Box<dyn AudioStream + Send>) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub(crate) fn read(&mut self, block: &mut [f32]) -> Result<()> {
        self.stream.read(block)
    }

    pub(crate) fn write(&mut self, block: &[f32]) -> Result<()> {
        self.stream.write(block)
    }

    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stream.close();
            tracing::debug!("audio stream closed");
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.close();
    }
}
