use std::ops::Range;

use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::{Band, BandGains, EqError, Result};

/// Coefficient index intervals of the three bands.
///
/// The intervals must be contiguous (`low.end == mid.start`,
/// `mid.end == high.start`). Indices below `low.start` are scaled with the low
/// gain and indices at or beyond `high.end` with the high gain, so every
/// coefficient of a block of any length falls into exactly one band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandRanges {
    pub low: Range<usize>,
    pub mid: Range<usize>,
    pub high: Range<usize>,
}

impl Default for BandRanges {
    fn default() -> Self {
        Self {
            low: 0..200,
            mid: 200..2000,
            high: 2000..10_000,
        }
    }
}

impl BandRanges {
    pub fn validate(&self) -> Result<()> {
        for (band, range) in [
            (Band::Low, &self.low),
            (Band::Mid, &self.mid),
            (Band::High, &self.high),
        ] {
            if range.start > range.end {
                return Err(EqError::config(format!(
                    "{band} band range {}..{} is reversed",
                    range.start, range.end
                )));
            }
        }

        if self.low.end != self.mid.start || self.mid.end != self.high.start {
            return Err(EqError::config(format!(
                "band ranges must be contiguous, got {:?}, {:?}, {:?}",
                self.low, self.mid, self.high
            )));
        }

        Ok(())
    }

    /// Returns the band that owns coefficient `index`.
    pub fn band_of(&self, index: usize) -> Band {
        if index < self.low.end {
            Band::Low
        } else if index < self.mid.end {
            Band::Mid
        } else {
            Band::High
        }
    }

    /// Scales every coefficient of `spectrum` by the gain of its band.
    ///
    /// `gains` is taken by value so the whole block sees one snapshot.
    pub fn apply(&self, spectrum: &mut [Complex32], gains: BandGains) {
        let len = spectrum.len();
        let low_end = self.low.end.min(len);
        let mid_end = self.mid.end.clamp(low_end, len);

        let (low, rest) = spectrum.split_at_mut(low_end);
        let (mid, high) = rest.split_at_mut(mid_end - low_end);

        scale(low, gains.low);
        scale(mid, gains.mid);
        scale(high, gains.high);
    }
}

/// Multiplies every coefficient by a real factor, preserving phase.
pub fn scale(coefficients: &mut [Complex32], factor: f32) {
    for coefficient in coefficients {
        *coefficient *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(len: usize) -> Vec<Complex32> {
        vec![Complex32::new(1.0, -1.0); len]
    }

    #[test]
    fn default_ranges_are_valid() {
        BandRanges::default().validate().unwrap();
    }

    #[test]
    fn rejects_gaps_and_reversed_ranges() {
        let gap = BandRanges {
            low: 0..100,
            mid: 200..2000,
            high: 2000..10_000,
        };
        assert!(matches!(gap.validate().unwrap_err(), EqError::Config(_)));

        let reversed = BandRanges {
            low: 0..200,
            mid: 200..100,
            high: 100..10_000,
        };
        assert!(reversed.validate().is_err());
    }

    #[test]
    fn resolves_boundary_indices() {
        let ranges = BandRanges::default();
        assert_eq!(ranges.band_of(0), Band::Low);
        assert_eq!(ranges.band_of(199), Band::Low);
        assert_eq!(ranges.band_of(200), Band::Mid);
        assert_eq!(ranges.band_of(1999), Band::Mid);
        assert_eq!(ranges.band_of(2000), Band::High);
        assert_eq!(ranges.band_of(9999), Band::High);
        assert_eq!(ranges.band_of(10_000), Band::High);
        assert_eq!(ranges.band_of(50_000), Band::High);
    }

    #[test]
    fn every_index_is_scaled_exactly_once() {
        let ranges = BandRanges::default();
        let gains = BandGains::new(2.0, 3.0, 5.0);

        for len in [16, 200, 2048, 12_000] {
            let mut spectrum = ones(len);
            ranges.apply(&mut spectrum, gains);

            for (index, bin) in spectrum.iter().enumerate() {
                let expected = gains.get(ranges.band_of(index));
                assert_eq!(*bin, Complex32::new(expected, -expected), "index {index}");
            }
        }
    }

    #[test]
    fn pre_low_region_uses_low_gain() {
        let ranges = BandRanges {
            low: 4..8,
            mid: 8..12,
            high: 12..16,
        };
        ranges.validate().unwrap();

        let mut spectrum = ones(20);
        ranges.apply(&mut spectrum, BandGains::new(0.5, 0.0, 2.0));

        assert!(spectrum[..8].iter().all(|bin| bin.re == 0.5));
        assert!(spectrum[8..12].iter().all(|bin| bin.re == 0.0));
        assert!(spectrum[12..].iter().all(|bin| bin.re == 2.0));
    }

    #[test]
    fn scaling_preserves_phase() {
        let mut spectrum = vec![Complex32::new(3.0, 4.0)];
        scale(&mut spectrum, 0.5);

        assert!((spectrum[0].norm() - 2.5).abs() < 1e-6);
        assert!((spectrum[0].arg() - 4.0_f32.atan2(3.0)).abs() < 1e-6);
    }
}
