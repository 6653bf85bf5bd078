use std::{
    collections::VecDeque,
    f32::consts::TAU,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use super::{AudioBackend, AudioStream};
use crate::{AudioConfig, EqError, Result};

/// Continuous sine source written identically to every channel.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency: f32,
    amplitude: f32,
    phase: f32,
}

impl ToneGenerator {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
            phase: 0.0,
        }
    }

    /// Fills an interleaved block, continuing the phase of the previous call.
    pub fn fill(&mut self, block: &mut [f32], sample_rate: u32, channels: u16) {
        let step = TAU * self.frequency / sample_rate as f32;
        for frame in block.chunks_mut(usize::from(channels.max(1))) {
            let value = self.amplitude * self.phase.sin();
            frame.fill(value);
            self.phase = (self.phase + step) % TAU;
        }
    }
}

enum Source {
    Blocks(VecDeque<Vec<f32>>),
    Tone(ToneGenerator),
}

/// Shared view over everything written to a [`MemoryStream`].
#[derive(Clone)]
pub struct MemorySink {
    blocks: Arc<Mutex<VecDeque<Vec<f32>>>>,
    retain: Arc<AtomicUsize>,
    written: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            blocks: Arc::default(),
            retain: Arc::new(AtomicUsize::new(usize::MAX)),
            written: Arc::default(),
            closed: Arc::default(),
        }
    }
}

impl MemorySink {
    /// Copies out the retained blocks, oldest first.
    pub fn blocks(&self) -> Vec<Vec<f32>> {
        self.lock().iter().cloned().collect()
    }

    /// Total number of blocks written, including ones no longer retained.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Acquire)
    }

    /// Whether the stream feeding this sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn push(&self, block: &[f32]) {
        let retain = self.retain.load(Ordering::Relaxed);
        if retain > 0 {
            let mut blocks = self.lock();
            if blocks.len() >= retain {
                blocks.pop_front();
            }
            blocks.push_back(block.to_vec());
        }
        self.written.fetch_add(1, Ordering::AcqRel);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<f32>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySink")
            .field("written", &self.written())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// In-process backend with a scripted or synthetic input and a capturing
/// output. Supports fault injection at open, read and write.
pub struct MemoryBackend {
    source: Option<Source>,
    sink: MemorySink,
    paced: bool,
    open_error: Option<String>,
    fail_read_at: Option<usize>,
    fail_write_at: Option<usize>,
}

impl MemoryBackend {
    /// Input yields `blocks` in order, then fails as exhausted.
    pub fn with_blocks<I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        Self::with_source(Source::Blocks(blocks.into_iter().collect()))
    }

    /// Input yields an endless tone.
    pub fn with_tone(tone: ToneGenerator) -> Self {
        Self::with_source(Source::Tone(tone))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source: Some(source),
            sink: MemorySink::default(),
            paced: false,
            open_error: None,
            fail_read_at: None,
            fail_write_at: None,
        }
    }

    /// Throttles reads to the wall-clock duration of a block.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Keeps only the most recent `blocks` written blocks.
    pub fn retain_output(self, blocks: usize) -> Self {
        self.sink.retain.store(blocks, Ordering::Relaxed);
        self
    }

    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    /// The read with zero-based index `reads` fails.
    pub fn fail_read_after(mut self, reads: usize) -> Self {
        self.fail_read_at = Some(reads);
        self
    }

    /// The write with zero-based index `writes` fails.
    pub fn fail_write_after(mut self, writes: usize) -> Self {
        self.fail_write_at = Some(writes);
        self
    }

    pub fn sink(&self) -> MemorySink {
        self.sink.clone()
    }
}

impl AudioBackend for MemoryBackend {
    type Stream = MemoryStream;

    fn open(&mut self, config: &AudioConfig) -> Result<MemoryStream> {
        if let Some(message) = &self.open_error {
            return Err(EqError::Device(message.clone()));
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| EqError::Device("memory backend has already been opened".into()))?;

        Ok(MemoryStream {
            source,
            sink: self.sink.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            block_duration: self.paced.then(|| config.block_duration()),
            deadline: None,
            reads: 0,
            writes: 0,
            fail_read_at: self.fail_read_at,
            fail_write_at: self.fail_write_at,
            closed: false,
        })
    }
}

/// Stream opened by [`MemoryBackend`].
pub struct MemoryStream {
    source: Source,
    sink: MemorySink,
    sample_rate: u32,
    channels: u16,
    block_duration: Option<Duration>,
    deadline: Option<Instant>,
    reads: usize,
    writes: usize,
    fail_read_at: Option<usize>,
    fail_write_at: Option<usize>,
    closed: bool,
}

impl MemoryStream {
    fn pace(&mut self) {
        let Some(period) = self.block_duration else {
            return;
        };
        let now = Instant::now();
        let deadline = self.deadline.unwrap_or(now) + period;
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.deadline = Some(deadline);
    }
}

impl AudioStream for MemoryStream {
    fn read(&mut self, block: &mut [f32]) -> Result<()> {
        if self.closed {
            return Err(EqError::StreamIo("read from a closed stream".into()));
        }
        if self.fail_read_at == Some(self.reads) {
            return Err(EqError::StreamIo(format!("injected read failure at block {}", self.reads)));
        }
        self.pace();

        match &mut self.source {
            Source::Blocks(blocks) => {
                let next = blocks
                    .pop_front()
                    .ok_or_else(|| EqError::StreamIo("input exhausted".into()))?;
                if next.len() != block.len() {
                    return Err(EqError::StreamIo(format!(
                        "scripted block holds {} samples, expected {}",
                        next.len(),
                        block.len()
                    )));
                }
                block.copy_from_slice(&next);
            }
            Source::Tone(tone) => tone.fill(block, self.sample_rate, self.channels),
        }

        self.reads += 1;
        Ok(())
    }

    fn write(&mut self, block: &[f32]) -> Result<()> {
        if self.closed {
            return Err(EqError::StreamIo("write to a closed stream".into()));
        }
        if self.fail_write_at == Some(self.writes) {
            return Err(EqError::StreamIo(format!(
                "injected write failure at block {}",
                self.writes
            )));
        }

        self.sink.push(block);
        self.writes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.sink.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8,
            channels: 2,
            block_size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn replays_scripted_blocks_then_reports_exhaustion() {
        let mut backend = MemoryBackend::with_blocks(vec![vec![1.0; 8], vec![2.0; 8]]);
        let mut stream = backend.open(&config()).unwrap();
        let mut block = vec![0.0; 8];

        stream.read(&mut block).unwrap();
        assert_eq!(block, vec![1.0; 8]);
        stream.read(&mut block).unwrap();
        assert_eq!(block, vec![2.0; 8]);
        assert!(matches!(stream.read(&mut block), Err(EqError::StreamIo(_))));
    }

    #[test]
    fn captures_written_blocks_and_close() {
        let mut backend = MemoryBackend::with_blocks(Vec::new()).retain_output(2);
        let sink = backend.sink();
        let mut stream = backend.open(&config()).unwrap();

        for value in 0..3 {
            stream.write(&[value as f32; 8]).unwrap();
        }
        stream.close();
        stream.close();

        assert_eq!(sink.written(), 3);
        assert_eq!(sink.blocks(), vec![vec![1.0; 8], vec![2.0; 8]]);
        assert!(sink.is_closed());
        assert!(stream.write(&[0.0; 8]).is_err());
    }

    #[test]
    fn injects_failures() {
        let mut backend = MemoryBackend::with_blocks(Vec::new()).failing_open("no such device");
        assert!(matches!(backend.open(&config()), Err(EqError::Device(_))));

        let mut backend = MemoryBackend::with_tone(ToneGenerator::new(1.0, 1.0))
            .fail_read_after(1)
            .fail_write_after(0);
        let mut stream = backend.open(&config()).unwrap();
        let mut block = vec![0.0; 8];

        stream.read(&mut block).unwrap();
        assert!(stream.read(&mut block).is_err());
        assert!(stream.write(&block).is_err());
    }

    #[test]
    fn opens_only_once() {
        let mut backend = MemoryBackend::with_blocks(Vec::new());
        backend.open(&config()).unwrap();
        assert!(matches!(backend.open(&config()), Err(EqError::Device(_))));
    }

    #[test]
    fn tone_is_identical_across_channels_and_continuous() {
        let mut tone = ToneGenerator::new(1.0, 0.5);
        let mut first = vec![0.0; 8];
        let mut second = vec![0.0; 8];
        tone.fill(&mut first, 8, 2);
        tone.fill(&mut second, 8, 2);

        for frame in first.chunks(2).chain(second.chunks(2)) {
            assert_eq!(frame[0], frame[1]);
        }
        // A quarter period in, the sine peaks.
        assert!((first[4] - 0.5).abs() < 1e-6);
        // Half a period later it is at its trough.
        assert!(second[0].abs() < 1e-5);
        assert!((second[4] + 0.5).abs() < 1e-5);
    }
}
