use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{EqError, Result};

/// Upper end of the integer control range exposed by the control surface.
pub const CONTROL_MAX: u8 = 100;

/// One of the three fixed frequency bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Low,
    Mid,
    High,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Low, Band::Mid, Band::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Band::Low => "low",
            Band::Mid => "mid",
            Band::High => "high",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = EqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Band::Low),
            "mid" | "m" => Ok(Band::Mid),
            "high" | "h" => Ok(Band::High),
            other => Err(EqError::msg(format!("unknown band `{other}`"))),
        }
    }
}

/// Gain triple applied to the low, mid and high bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandGains {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl Default for BandGains {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl BandGains {
    pub fn new(low: f32, mid: f32, high: f32) -> Self {
        Self { low, mid, high }
    }

    pub fn uniform(gain: f32) -> Self {
        Self::new(gain, gain, gain)
    }

    pub fn get(&self, band: Band) -> f32 {
        match band {
            Band::Low => self.low,
            Band::Mid => self.mid,
            Band::High => self.high,
        }
    }

    pub fn set(&mut self, band: Band, value: f32) {
        match band {
            Band::Low => self.low = value,
            Band::Mid => self.mid = value,
            Band::High => self.high = value,
        }
    }

    /// Checks that every gain is finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for band in Band::ALL {
            check_gain(band, self.get(band))?;
        }
        Ok(())
    }
}

/// Maps a 0-100 control position onto a 0.0-1.0 gain. Positions above the
/// control range saturate at unity.
pub fn control_to_gain(position: u8) -> f32 {
    f32::from(position.min(CONTROL_MAX)) / f32::from(CONTROL_MAX)
}

fn check_gain(band: Band, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EqError::InvalidGain { band, value })
    }
}

/// Thread-safe holder of the current [`BandGains`].
///
/// Cloning yields another handle onto the same gains. Writers replace a single
/// field under the lock and readers copy the whole triple out, so a snapshot
/// never observes a half-applied update.
#[derive(Clone, Default)]
pub struct ParameterStore {
    shared: Arc<Mutex<BandGains>>,
}

impl ParameterStore {
    pub fn new(initial: BandGains) -> Result<Self> {
        initial.validate()?;
        Ok(Self {
            shared: Arc::new(Mutex::new(initial)),
        })
    }

    /// Updates the gain of one band. Values have no upper bound.
    pub fn set_gain(&self, band: Band, value: f32) -> Result<()> {
        check_gain(band, value)?;
        self.lock().set(band, value);
        tracing::info!(%band, gain = value, "band gain updated");
        Ok(())
    }

    /// Replaces all three gains in one update.
    pub fn set_gains(&self, gains: BandGains) -> Result<()> {
        gains.validate()?;
        *self.lock() = gains;
        tracing::info!(low = gains.low, mid = gains.mid, high = gains.high, "band gains replaced");
        Ok(())
    }

    /// Updates a band from a 0-100 control position.
    pub fn set_control(&self, band: Band, position: u8) -> Result<()> {
        self.set_gain(band, control_to_gain(position))
    }

    /// Returns a consistent copy of all three gains.
    pub fn snapshot(&self) -> BandGains {
        *self.lock()
    }

    // A writer cannot leave the triple half-written, so a poisoned lock still
    // guards a valid value.
    fn lock(&self) -> MutexGuard<'_, BandGains> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("gains", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn defaults_to_unity_gain() {
        let store = ParameterStore::default();
        assert_eq!(store.snapshot(), BandGains::uniform(1.0));
    }

    #[test]
    fn updates_single_band() {
        let store = ParameterStore::default();
        store.set_gain(Band::Mid, 0.25).unwrap();

        let gains = store.snapshot();
        assert_eq!(gains, BandGains::new(1.0, 0.25, 1.0));
    }

    #[test]
    fn accepts_gains_above_unity_and_rejects_negative() {
        let store = ParameterStore::default();
        store.set_gain(Band::High, 3.5).unwrap();
        assert_eq!(store.snapshot().high, 3.5);

        let err = store.set_gain(Band::Low, -0.1).unwrap_err();
        assert!(matches!(err, EqError::InvalidGain { band: Band::Low, .. }));
        assert!(store.set_gain(Band::Low, f32::NAN).is_err());
        assert_eq!(store.snapshot().low, 1.0);
    }

    #[test]
    fn maps_control_positions() {
        assert_eq!(control_to_gain(0), 0.0);
        assert_eq!(control_to_gain(50), 0.5);
        assert_eq!(control_to_gain(100), 1.0);
        assert_eq!(control_to_gain(200), 1.0);

        let store = ParameterStore::default();
        store.set_control(Band::Low, 30).unwrap();
        assert!((store.snapshot().low - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_band_names() {
        assert_eq!("LOW".parse::<Band>().unwrap(), Band::Low);
        assert_eq!(" m ".parse::<Band>().unwrap(), Band::Mid);
        assert_eq!("high".parse::<Band>().unwrap(), Band::High);
        assert!("treble".parse::<Band>().is_err());
    }

    #[test]
    fn snapshots_never_tear_under_concurrent_writes() {
        let store = ParameterStore::default();
        let writer = store.clone();

        // A torn read would show differing fields.
        let handle = thread::spawn(move || {
            for step in 0..2_000u32 {
                writer
                    .set_gains(BandGains::uniform((step % 7) as f32))
                    .unwrap();
            }
        });

        for _ in 0..2_000 {
            let gains = store.snapshot();
            assert_eq!(gains.low, gains.mid);
            assert_eq!(gains.mid, gains.high);
        }
        handle.join().unwrap();
    }
}
