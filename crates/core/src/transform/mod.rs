use std::{fmt, sync::Arc};

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

use crate::{EqError, Result};

/// Complex frequency-domain coefficients, one per sample of the source block.
pub type SpectralBlock = Vec<Complex32>;

/// Forward/inverse transform over blocks of one fixed length.
///
/// Plans are built once up front; the scratch buffer is shared by both
/// directions so a steady-state cycle never allocates.
pub struct SpectralTransform {
    len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl SpectralTransform {
    /// Plans a transform for blocks of `len` samples.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(EqError::config("transform length must be non-zero"));
        }

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Ok(Self {
            len,
            forward,
            inverse,
            scratch: vec![Complex32::default(); scratch_len],
        })
    }

    /// Number of samples (and coefficients) per block.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transforms a block of real samples into a freshly allocated spectrum.
    pub fn forward(&mut self, block: &[f32]) -> Result<SpectralBlock> {
        let mut spectrum = vec![Complex32::default(); self.len];
        self.forward_into(block, &mut spectrum)?;
        Ok(spectrum)
    }

    /// Transforms `block` into the caller-provided `spectrum` buffer.
    pub fn forward_into(&mut self, block: &[f32], spectrum: &mut [Complex32]) -> Result<()> {
        self.check_len(block.len())?;
        self.check_len(spectrum.len())?;

        for (bin, sample) in spectrum.iter_mut().zip(block) {
            *bin = Complex32::new(*sample, 0.0);
        }
        self.forward.process_with_scratch(spectrum, &mut self.scratch);
        Ok(())
    }

    /// Transforms a spectrum back into real samples.
    pub fn inverse(&mut self, spectrum: &[Complex32]) -> Result<Vec<f32>> {
        let mut work = spectrum.to_vec();
        let mut block = vec![0.0; self.len];
        self.inverse_into(&mut work, &mut block)?;
        Ok(block)
    }

    /// Inverse-transforms `spectrum` in place and writes the real part of the
    /// normalised result into `block`. The residual imaginary component left
    /// by rounding is discarded.
    pub fn inverse_into(&mut self, spectrum: &mut [Complex32], block: &mut [f32]) -> Result<()> {
        self.check_len(spectrum.len())?;
        self.check_len(block.len())?;

        self.inverse.process_with_scratch(spectrum, &mut self.scratch);
        let scale = 1.0 / self.len as f32;
        for (sample, bin) in block.iter_mut().zip(spectrum.iter()) {
            *sample = bin.re * scale;
        }
        Ok(())
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual == self.len {
            Ok(())
        } else {
            Err(EqError::Shape {
                expected: self.len,
                actual,
            })
        }
    }
}

impl fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn pseudo_random_block(len: usize) -> Vec<f32> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn inverse_reproduces_forward_input() {
        let mut transform = SpectralTransform::new(2048).unwrap();
        let block = pseudo_random_block(2048);

        let spectrum = transform.forward(&block).unwrap();
        let restored = transform.inverse(&spectrum).unwrap();

        for (a, b) in block.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn spectrum_has_one_coefficient_per_sample() {
        let mut transform = SpectralTransform::new(64).unwrap();
        let spectrum = transform.forward(&[0.5; 64]).unwrap();

        assert_eq!(spectrum.len(), 64);
        assert!((spectrum[0].re - 32.0).abs() < 1e-4);
        assert!(spectrum[1..].iter().all(|bin| bin.norm() < 1e-4));
    }

    #[test]
    fn sinusoid_lands_in_its_bin_and_mirror() {
        let len = 256;
        let mut transform = SpectralTransform::new(len).unwrap();
        let block: Vec<f32> = (0..len)
            .map(|n| (2.0 * PI * 8.0 * n as f32 / len as f32).sin())
            .collect();

        let spectrum = transform.forward(&block).unwrap();

        assert!((spectrum[8].norm() - len as f32 / 2.0).abs() < 1e-2);
        assert!((spectrum[len - 8].norm() - len as f32 / 2.0).abs() < 1e-2);
    }

    #[test]
    fn rejects_blocks_of_the_wrong_length() {
        let mut transform = SpectralTransform::new(32).unwrap();

        let err = transform.forward(&[0.0; 16]).unwrap_err();
        assert!(matches!(
            err,
            EqError::Shape {
                expected: 32,
                actual: 16
            }
        ));

        let err = transform.inverse(&[Complex32::default(); 31]).unwrap_err();
        assert!(matches!(err, EqError::Shape { actual: 31, .. }));
    }

    #[test]
    fn zero_length_is_a_configuration_error() {
        assert!(matches!(
            SpectralTransform::new(0).unwrap_err(),
            EqError::Config(_)
        ));
    }
}
