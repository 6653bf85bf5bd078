use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{BandGains, BandRanges, DelayConfig, EqError, Result};

/// Top-level configuration structure for the equalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerConfig {
    pub audio: AudioConfig,
    pub bands: BandRanges,
    pub delay: DelayConfig,
    pub gains: BandGains,
}

impl EqualizerConfig {
    /// Loads a configuration file. Files ending in `.json` are parsed as JSON,
    /// anything else as TOML. Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.bands.validate()?;
        self.delay.validate()?;
        self.gains
            .validate()
            .map_err(|err| EqError::config(err.to_string()))
    }
}

/// Configuration specific to the device streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block; one frame holds one sample per channel.
    pub block_size: usize,
    /// Capture device, host default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<DeviceId>,
    /// Playback device, host default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<DeviceId>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            block_size: 1024,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EqError::config("sample_rate must be non-zero"));
        }
        if self.channels == 0 {
            return Err(EqError::config("channels must be non-zero"));
        }
        if self.block_size == 0 {
            return Err(EqError::config("block_size must be non-zero"));
        }
        Ok(())
    }

    /// Number of interleaved samples in one block.
    pub fn block_len(&self) -> usize {
        self.block_size * usize::from(self.channels)
    }

    /// Wall-clock duration of one block.
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate))
    }
}

/// Identifies a device either by its position in the host's device list or
/// by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Index(usize),
    Name(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Index(index) => write!(f, "#{index}"),
            DeviceId::Name(name) => f.write_str(name),
        }
    }
}

impl std::str::FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(index) => DeviceId::Index(index),
            Err(_) => DeviceId::Name(s.to_string()),
        })
    }
}
