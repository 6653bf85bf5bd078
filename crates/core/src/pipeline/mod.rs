//! Streaming orchestrator.
//!
//! An [`AudioPipeline`] moves through `Idle → Opened → Running → Stopped`.
//! Once running, a dedicated thread repeats one cycle per block: read from the
//! stream, process with the current gains, write back. The loop checks the
//! stop signal between cycles only, so in-flight device I/O always completes
//! or fails before the pipeline stops. `Stopped` is terminal.

mod processor;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

pub use processor::BlockProcessor;

use crate::{
    device::{AudioBackend, StreamGuard},
    EqError, EqualizerConfig, ParameterStore, Result,
};

/// Lifecycle of an [`AudioPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opened,
    Running,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "idle",
            PipelineState::Opened => "opened",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        })
    }
}

/// Cooperative stop signal shared with the processing loop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Asks the loop to finish after its current cycle.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Counters published by the processing loop. Levels are stored as `f32`
/// bits so readers never block the audio thread.
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks: AtomicU64,
    input_rms: AtomicU32,
    output_rms: AtomicU32,
    delay_engaged: AtomicBool,
}

impl PipelineStats {
    /// Number of completed cycles.
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Acquire)
    }

    /// RMS level of the most recently captured block.
    pub fn input_rms(&self) -> f32 {
        f32::from_bits(self.input_rms.load(Ordering::Relaxed))
    }

    /// RMS level of the most recently played block.
    pub fn output_rms(&self) -> f32 {
        f32::from_bits(self.output_rms.load(Ordering::Relaxed))
    }

    /// Whether the delay line is full, so output lags input by its capacity.
    pub fn delay_engaged(&self) -> bool {
        self.delay_engaged.load(Ordering::Relaxed)
    }

    fn record(&self, input: &[f32], output: &[f32]) {
        self.input_rms
            .store(compute_rms(input).to_bits(), Ordering::Relaxed);
        self.output_rms
            .store(compute_rms(output).to_bits(), Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::AcqRel);
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

enum Stage {
    Idle,
    Opened(StreamGuard),
    Running(JoinHandle<Result<()>>),
    Stopped,
}

/// Owns the device stream and the processing loop.
pub struct AudioPipeline {
    config: EqualizerConfig,
    params: ParameterStore,
    processor: Option<BlockProcessor>,
    stats: Arc<PipelineStats>,
    stop: StopHandle,
    stage: Stage,
    error: Option<EqError>,
}

impl AudioPipeline {
    /// Creates an idle pipeline. The configuration is validated here so that
    /// shape and range problems surface before any device is touched.
    pub fn new(config: EqualizerConfig, params: ParameterStore) -> Result<Self> {
        let processor = BlockProcessor::new(&config)?;
        Ok(Self {
            config,
            params,
            processor: Some(processor),
            stats: Arc::default(),
            stop: StopHandle::default(),
            stage: Stage::Idle,
            error: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        match &self.stage {
            Stage::Idle => PipelineState::Idle,
            Stage::Opened(_) => PipelineState::Opened,
            Stage::Running(handle) if handle.is_finished() => PipelineState::Stopped,
            Stage::Running(_) => PipelineState::Running,
            Stage::Stopped => PipelineState::Stopped,
        }
    }

    pub fn config(&self) -> &EqualizerConfig {
        &self.config
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// `Idle → Opened`. A device failure is fatal: the pipeline moves
    /// straight to `Stopped` and the error is returned.
    pub fn open<B: AudioBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.expect_state(PipelineState::Idle, "open the audio stream")?;

        match backend.open(&self.config.audio) {
            Ok(stream) => {
                tracing::info!(
                    sample_rate = self.config.audio.sample_rate,
                    channels = self.config.audio.channels,
                    block_size = self.config.audio.block_size,
                    "audio stream opened"
                );
                self.stage = Stage::Opened(StreamGuard::new(Box::new(stream)));
                Ok(())
            }
            Err(err) => {
                tracing::error!(%err, "failed to open audio stream");
                self.stage = Stage::Stopped;
                Err(err)
            }
        }
    }

    /// `Opened → Running`. Spawns the processing loop.
    pub fn start(&mut self) -> Result<()> {
        let stream = match std::mem::replace(&mut self.stage, Stage::Stopped) {
            Stage::Opened(stream) => stream,
            other => {
                self.stage = other;
                return Err(EqError::InvalidState {
                    operation: "start processing",
                    state: self.state(),
                });
            }
        };
        let processor = self
            .processor
            .take()
            .ok_or_else(|| EqError::msg("block processor already consumed"))?;
        let worker = Worker {
            stream,
            processor,
            params: self.params.clone(),
            stop: self.stop.clone(),
            stats: Arc::clone(&self.stats),
        };

        let handle = thread::Builder::new()
            .name("eq-pipeline".into())
            .spawn(move || worker.run())?;
        self.stage = Stage::Running(handle);
        tracing::info!("processing loop started");
        Ok(())
    }

    /// Stops the pipeline and releases the stream. Safe to call in any state
    /// and any number of times; only the first call has an effect. A loop
    /// failure observed while stopping is kept in [`error`](Self::error).
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.stage, Stage::Stopped) {
            Stage::Idle | Stage::Stopped => {}
            Stage::Opened(mut stream) => {
                stream.close();
                tracing::info!("pipeline stopped before processing started");
            }
            Stage::Running(handle) => {
                self.stop.stop();
                self.collect(handle);
            }
        }
    }

    /// Blocks until the loop exits on its own or through a [`StopHandle`],
    /// then returns the error that ended it, if any.
    pub fn wait(&mut self) -> Result<()> {
        if let Stage::Running(_) = self.stage {
            if let Stage::Running(handle) = std::mem::replace(&mut self.stage, Stage::Stopped) {
                self.collect(handle);
            }
        }
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The error that ended the processing loop, once it has been collected
    /// by [`stop`](Self::stop).
    pub fn error(&self) -> Option<&EqError> {
        self.error.as_ref()
    }

    fn collect(&mut self, handle: JoinHandle<Result<()>>) {
        let outcome = handle
            .join()
            .unwrap_or_else(|_| Err(EqError::msg("processing loop panicked")));
        if let Err(err) = outcome {
            self.error = Some(err);
        }
    }

    fn expect_state(&self, expected: PipelineState, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(EqError::InvalidState { operation, state })
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("state", &self.state())
            .field("params", &self.params)
            .field("blocks", &self.stats.blocks())
            .field("error", &self.error)
            .finish()
    }
}

/// State moved onto the processing thread.
struct Worker {
    stream: StreamGuard,
    processor: BlockProcessor,
    params: ParameterStore,
    stop: StopHandle,
    stats: Arc<PipelineStats>,
}

impl Worker {
    fn run(mut self) -> Result<()> {
        let outcome = self.drive();
        self.stream.close();

        match &outcome {
            Ok(()) => tracing::info!(blocks = self.stats.blocks(), "processing loop stopped"),
            Err(err) => {
                tracing::error!(%err, blocks = self.stats.blocks(), "processing loop failed")
            }
        }
        outcome
    }

    fn drive(&mut self) -> Result<()> {
        let len = self.processor.block_len();
        let mut input = vec![0.0; len];
        let mut output = vec![0.0; len];

        while !self.stop.is_stopped() {
            self.stream.read(&mut input).map_err(as_stream_io)?;
            let gains = self.params.snapshot();
            self.processor.process(&input, gains, &mut output)?;
            self.stream.write(&output).map_err(as_stream_io)?;

            self.stats.record(&input, &output);
            if !self.stats.delay_engaged() && self.processor.delay().is_engaged() {
                self.stats.delay_engaged.store(true, Ordering::Relaxed);
                tracing::debug!(
                    blocks = self.processor.delay().capacity(),
                    "delay line engaged"
                );
            }
            tracing::trace!(blocks = self.stats.blocks(), ?gains, "cycle complete");
        }
        Ok(())
    }
}

fn as_stream_io(err: EqError) -> EqError {
    match err {
        EqError::StreamIo(_) => err,
        other => EqError::StreamIo(other.to_string()),
    }
}
