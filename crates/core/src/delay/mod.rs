use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{bands::scale, EqError, Result, SpectralBlock};

/// Settings of the block delay effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Number of blocks held back before the delay engages.
    pub capacity: usize,
    /// Fraction of amplitude removed from a block when it is re-emitted.
    pub delay_value: f32,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            delay_value: 0.2,
        }
    }
}

impl DelayConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.delay_value) {
            return Err(EqError::config(format!(
                "delay_value must lie in [0, 1], got {}",
                self.delay_value
            )));
        }
        Ok(())
    }

    /// Factor applied to a block leaving the delay buffer.
    pub fn attenuation(&self) -> f32 {
        1.0 - self.delay_value
    }
}

/// Bounded FIFO of spectral blocks.
///
/// Until the buffer holds more than `capacity` blocks every pushed block is
/// passed straight through. After that each push returns the oldest buffered
/// block scaled by the attenuation factor, giving a fixed latency of
/// `capacity` blocks.
#[derive(Debug)]
pub struct DelayLine {
    buffer: VecDeque<SpectralBlock>,
    capacity: usize,
    attenuation: f32,
}

impl DelayLine {
    pub fn new(config: &DelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: VecDeque::with_capacity(config.capacity + 1),
            capacity: config.capacity,
            attenuation: config.attenuation(),
        })
    }

    /// Buffers `spectrum` and returns the block to emit this cycle.
    ///
    /// While filling, the returned block is a copy of the input, which itself
    /// stays queued for a later cycle.
    pub fn push(&mut self, spectrum: SpectralBlock) -> SpectralBlock {
        self.buffer.push_back(spectrum);

        if self.buffer.len() > self.capacity {
            if let Some(mut delayed) = self.buffer.pop_front() {
                scale(&mut delayed, self.attenuation);
                return delayed;
            }
        }

        self.buffer.back().cloned().unwrap_or_default()
    }

    /// Whether the delay has reached steady state.
    pub fn is_engaged(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use rustfft::num_complex::Complex32;

    use super::*;

    fn block(tag: f32) -> SpectralBlock {
        vec![Complex32::new(tag, -tag); 4]
    }

    fn line() -> DelayLine {
        DelayLine::new(&DelayConfig::default()).unwrap()
    }

    #[test]
    fn passes_input_through_while_filling() {
        let mut delay = line();

        for tag in 1..=5 {
            let out = delay.push(block(tag as f32));
            assert_eq!(out, block(tag as f32));
            assert!(delay.len() <= delay.capacity());
        }
        assert!(delay.is_engaged());
    }

    #[test]
    fn emits_oldest_block_attenuated_in_fifo_order() {
        let mut delay = line();
        for tag in 1..=5 {
            delay.push(block(tag as f32));
        }

        for (tag, expected) in (6..=9).zip(1..=4) {
            let out = delay.push(block(tag as f32));
            let scaled = expected as f32 * 0.8;
            for bin in &out {
                assert!((bin.re - scaled).abs() < 1e-6);
                assert!((bin.im + scaled).abs() < 1e-6);
            }
            assert_eq!(delay.len(), delay.capacity());
        }
    }

    #[test]
    fn zero_capacity_emits_every_block_attenuated() {
        let mut delay = DelayLine::new(&DelayConfig {
            capacity: 0,
            delay_value: 0.5,
        })
        .unwrap();

        let out = delay.push(block(2.0));
        assert_eq!(out, block(1.0));
        assert!(delay.is_empty());
    }

    #[test]
    fn rejects_delay_values_outside_unit_range() {
        let config = DelayConfig {
            capacity: 5,
            delay_value: 1.5,
        };
        assert!(matches!(
            DelayLine::new(&config).unwrap_err(),
            EqError::Config(_)
        ));
    }
}
