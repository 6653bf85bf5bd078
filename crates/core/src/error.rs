use crate::{params::Band, pipeline::PipelineState};

/// Result alias that carries the custom [`EqError`] type.
pub type Result<T> = std::result::Result<T, EqError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum EqError {
    /// A block handed to the transform does not match the configured length.
    #[error("expected a block of {expected} samples, got {actual}")]
    Shape { expected: usize, actual: usize },
    /// The device layer could not open a stream with the requested format.
    #[error("audio device error: {0}")]
    Device(String),
    /// A read or write failed while the pipeline was running.
    #[error("audio stream I/O error: {0}")]
    StreamIo(String),
    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("gain for {band} band must be a finite non-negative number, got {value}")]
    InvalidGain { band: Band, value: f32 },
    /// The pipeline was asked to do something its current state does not allow.
    #[error("cannot {operation} while the pipeline is {state}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl EqError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn device<T: std::fmt::Display>(err: T) -> Self {
        Self::Device(err.to_string())
    }

    pub fn stream_io<T: std::fmt::Display>(err: T) -> Self {
        Self::StreamIo(err.to_string())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&str> for EqError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for EqError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
