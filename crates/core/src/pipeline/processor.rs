use crate::{
    BandGains, BandRanges, DelayLine, EqError, EqualizerConfig, Result, SpectralBlock,
    SpectralTransform,
};

/// One cycle of the signal path without any device attached:
/// forward transform, band gains, delay, inverse transform.
///
/// Spectral buffers are recycled between cycles, so once the delay line is
/// full the processor does not allocate.
#[derive(Debug)]
pub struct BlockProcessor {
    transform: SpectralTransform,
    bands: BandRanges,
    delay: DelayLine,
    spare: SpectralBlock,
}

impl BlockProcessor {
    pub fn new(config: &EqualizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transform: SpectralTransform::new(config.audio.block_len())?,
            bands: config.bands.clone(),
            delay: DelayLine::new(&config.delay)?,
            spare: SpectralBlock::new(),
        })
    }

    /// Interleaved samples consumed and produced per cycle.
    pub fn block_len(&self) -> usize {
        self.transform.len()
    }

    pub fn delay(&self) -> &DelayLine {
        &self.delay
    }

    /// Processes `input` with one snapshot of `gains` and writes the emitted
    /// block to `output`. Shape errors are reported before any state changes.
    pub fn process(&mut self, input: &[f32], gains: BandGains, output: &mut [f32]) -> Result<()> {
        let expected = self.block_len();
        for actual in [input.len(), output.len()] {
            if actual != expected {
                return Err(EqError::Shape { expected, actual });
            }
        }

        let mut spectrum = std::mem::take(&mut self.spare);
        spectrum.resize(expected, Default::default());
        self.transform.forward_into(input, &mut spectrum)?;
        self.bands.apply(&mut spectrum, gains);

        let mut emitted = self.delay.push(spectrum);
        self.transform.inverse_into(&mut emitted, output)?;
        self.spare = emitted;
        Ok(())
    }
}
