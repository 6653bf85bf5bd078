//! Host audio devices through cpal.
//!
//! cpal delivers and requests samples from its own callback threads. Each
//! direction is bridged by a lock-free `rtrb` ring buffer: the callback owns
//! the realtime end and never blocks, while the pipeline owns the other end
//! and parks its thread until enough samples (or room) are available. That
//! turns the push model into the blocking read/write interface of
//! [`AudioStream`]. `cpal::Stream` is not `Send` on every platform, so the
//! streams live on a dedicated keeper thread for as long as the handle is
//! open.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, Thread},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use super::{AudioBackend, AudioStream};
use crate::{AudioConfig, DeviceId, EqError, Result};

/// Captured audio buffered ahead of the pipeline, in blocks.
const INPUT_QUEUE_BLOCKS: usize = 4;
/// Processed audio buffered ahead of the playback callback, in blocks.
const OUTPUT_QUEUE_BLOCKS: usize = 2;

/// Device names reported by the default host, in index order. A
/// [`DeviceId::Index`] refers to a position in `inputs` for capture and in
/// `outputs` for playback.
#[derive(Debug, Clone, Default)]
pub struct DeviceListing {
    pub host: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Enumerates the capture and playback devices of the default host.
pub fn list_devices() -> Result<DeviceListing> {
    let host = cpal::default_host();
    let name = |device: cpal::Device| device.name().unwrap_or_else(|_| "<unknown>".to_string());

    Ok(DeviceListing {
        host: host.id().name().to_string(),
        inputs: host.input_devices().map_err(EqError::device)?.map(name).collect(),
        outputs: host.output_devices().map_err(EqError::device)?.map(name).collect(),
    })
}

/// Opens duplex streams on the default cpal host.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    type Stream = CpalStream;

    fn open(&mut self, config: &AudioConfig) -> Result<CpalStream> {
        let block_len = config.block_len();
        let (capture, reader) = capture_channel(block_len * INPUT_QUEUE_BLOCKS);
        let (writer, playback) = playback_channel(block_len * OUTPUT_QUEUE_BLOCKS);

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (close_tx, close_rx) = mpsc::channel::<()>();

        let keeper = {
            let config = config.clone();
            thread::Builder::new()
                .name("cpal-streams".into())
                .spawn(move || {
                    let streams = match build_streams(&config, capture, playback) {
                        Ok(streams) => streams,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    // Returns on an explicit close or when the handle is dropped.
                    let _ = close_rx.recv();
                    drop(streams);
                })?
        };

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(EqError::Device("stream thread exited during setup".into())));
        if let Err(err) = outcome {
            let _ = keeper.join();
            return Err(err);
        }

        Ok(CpalStream {
            reader,
            writer,
            closed: false,
            close_tx: Some(close_tx),
            keeper: Some(keeper),
        })
    }
}

/// Duplex stream opened by [`CpalBackend`].
pub struct CpalStream {
    reader: BlockReader,
    writer: BlockWriter,
    closed: bool,
    close_tx: Option<mpsc::Sender<()>>,
    keeper: Option<thread::JoinHandle<()>>,
}

impl AudioStream for CpalStream {
    fn read(&mut self, block: &mut [f32]) -> Result<()> {
        if self.closed {
            return Err(EqError::StreamIo("stream has been closed".into()));
        }
        self.reader.read_exact(block)
    }

    fn write(&mut self, block: &[f32]) -> Result<()> {
        if self.closed {
            return Err(EqError::StreamIo("stream has been closed".into()));
        }
        self.writer.write_all(block)
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(keeper) = self.keeper.take() {
            if keeper.join().is_err() {
                tracing::warn!("cpal stream thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

struct Streams {
    _input: cpal::Stream,
    _output: cpal::Stream,
}

fn build_streams(
    config: &AudioConfig,
    mut capture: CaptureEnd,
    mut playback: PlaybackEnd,
) -> Result<Streams> {
    let host = cpal::default_host();

    let input_device = select_device(
        host.input_devices().map_err(EqError::device)?,
        host.default_input_device(),
        config.input_device.as_ref(),
        "input",
    )?;
    let output_device = select_device(
        host.output_devices().map_err(EqError::device)?,
        host.default_output_device(),
        config.output_device.as_ref(),
        "output",
    )?;

    check_support(
        input_device
            .supported_input_configs()
            .map_err(EqError::device)?,
        config,
        "input",
    )?;
    check_support(
        output_device
            .supported_output_configs()
            .map_err(EqError::device)?,
        config,
        "output",
    )?;

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    tracing::info!(
        input = %input_device.name().unwrap_or_default(),
        output = %output_device.name().unwrap_or_default(),
        sample_rate = config.sample_rate,
        channels = config.channels,
        "opening audio devices"
    );

    let input_link = Arc::clone(&capture.link);
    let input = input_device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| capture.push(data),
            move |err| {
                tracing::error!(%err, "input stream error");
                input_link.fail(err.to_string());
            },
            None,
        )
        .map_err(EqError::device)?;

    let output_link = Arc::clone(&playback.link);
    let output = output_device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| playback.pop(data),
            move |err| {
                tracing::error!(%err, "output stream error");
                output_link.fail(err.to_string());
            },
            None,
        )
        .map_err(EqError::device)?;

    input.play().map_err(EqError::device)?;
    output.play().map_err(EqError::device)?;

    Ok(Streams {
        _input: input,
        _output: output,
    })
}

fn select_device<I>(
    mut devices: I,
    default: Option<cpal::Device>,
    id: Option<&DeviceId>,
    kind: &str,
) -> Result<cpal::Device>
where
    I: Iterator<Item = cpal::Device>,
{
    let found = match id {
        None => default,
        Some(DeviceId::Index(index)) => devices.nth(*index),
        Some(DeviceId::Name(name)) => {
            devices.find(|device| device.name().map(|n| n == *name).unwrap_or(false))
        }
    };

    found.ok_or_else(|| match id {
        Some(id) => EqError::Device(format!("no {kind} device matches `{id}`")),
        None => EqError::Device(format!("no default {kind} device available")),
    })
}

fn check_support<I>(mut ranges: I, config: &AudioConfig, kind: &str) -> Result<()>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let supported = ranges.any(|range| {
        range.sample_format() == cpal::SampleFormat::F32
            && range.channels() == config.channels
            && range.min_sample_rate().0 <= config.sample_rate
            && config.sample_rate <= range.max_sample_rate().0
    });

    if supported {
        Ok(())
    } else {
        Err(EqError::Device(format!(
            "{kind} device does not support {} channel f32 audio at {} Hz",
            config.channels, config.sample_rate
        )))
    }
}

/// State shared by the two ends of one ring buffer.
#[derive(Default)]
struct Link {
    /// Pipeline thread to wake when samples or room become available.
    waiter: Mutex<Option<Thread>>,
    failed: AtomicBool,
    error: Mutex<Option<String>>,
    /// Samples dropped on overrun or padded with silence on underrun.
    glitches: AtomicUsize,
}

impl Link {
    /// Realtime side. Skips the wake-up rather than wait for the lock; the
    /// waiter holds it only while registering, before it rechecks the buffer.
    fn notify(&self) {
        if let Ok(waiter) = self.waiter.try_lock() {
            if let Some(thread) = waiter.as_ref() {
                thread.unpark();
            }
        }
    }

    fn fail(&self, message: String) {
        lock(&self.error).get_or_insert(message);
        self.failed.store(true, Ordering::Release);
        if let Some(thread) = lock(&self.waiter).as_ref() {
            thread.unpark();
        }
    }

    fn register(&self) {
        let current = thread::current();
        let mut waiter = lock(&self.waiter);
        if waiter.as_ref().map(Thread::id) != Some(current.id()) {
            *waiter = Some(current);
        }
    }

    fn check(&self) -> Result<()> {
        if !self.failed.load(Ordering::Acquire) {
            return Ok(());
        }
        let message = lock(&self.error)
            .clone()
            .unwrap_or_else(|| "audio device failed".into());
        Err(EqError::StreamIo(message))
    }

    fn report_glitches(&self, what: &'static str) {
        let samples = self.glitches.swap(0, Ordering::Relaxed);
        if samples > 0 {
            tracing::debug!(samples, "{what}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn capture_channel(capacity: usize) -> (CaptureEnd, BlockReader) {
    let (producer, consumer) = RingBuffer::new(capacity);
    let link = Arc::new(Link::default());
    (
        CaptureEnd {
            producer,
            link: Arc::clone(&link),
        },
        BlockReader {
            consumer,
            capacity,
            link,
        },
    )
}

fn playback_channel(capacity: usize) -> (BlockWriter, PlaybackEnd) {
    let (producer, consumer) = RingBuffer::new(capacity);
    let link = Arc::new(Link::default());
    (
        BlockWriter {
            producer,
            link: Arc::clone(&link),
        },
        PlaybackEnd { consumer, link },
    )
}

/// Input callback end: keeps what fits and drops the rest.
struct CaptureEnd {
    producer: Producer<f32>,
    link: Arc<Link>,
}

impl CaptureEnd {
    fn push(&mut self, data: &[f32]) {
        let accepted = data.len().min(self.producer.slots());
        for &sample in &data[..accepted] {
            let _ = self.producer.push(sample);
        }
        if accepted < data.len() {
            self.link
                .glitches
                .fetch_add(data.len() - accepted, Ordering::Relaxed);
        }
        self.link.notify();
    }
}

/// Output callback end: plays what is queued and pads with silence.
struct PlaybackEnd {
    consumer: Consumer<f32>,
    link: Arc<Link>,
}

impl PlaybackEnd {
    fn pop(&mut self, data: &mut [f32]) {
        let available = data.len().min(self.consumer.slots());
        for slot in &mut data[..available] {
            *slot = self.consumer.pop().unwrap_or(0.0);
        }
        data[available..].fill(0.0);
        if available < data.len() {
            self.link
                .glitches
                .fetch_add(data.len() - available, Ordering::Relaxed);
        }
        self.link.notify();
    }
}

/// Pipeline end of the capture buffer.
struct BlockReader {
    consumer: Consumer<f32>,
    capacity: usize,
    link: Arc<Link>,
}

impl BlockReader {
    /// Parks until `block` can be filled completely.
    fn read_exact(&mut self, block: &mut [f32]) -> Result<()> {
        if block.len() > self.capacity {
            return Err(EqError::StreamIo(format!(
                "block of {} samples exceeds the {} sample capture buffer",
                block.len(),
                self.capacity
            )));
        }

        self.link.register();
        while self.consumer.slots() < block.len() {
            self.link.check()?;
            if self.consumer.is_abandoned() {
                return Err(EqError::StreamIo("capture stream ended".into()));
            }
            thread::park();
        }

        let chunk = self
            .consumer
            .read_chunk(block.len())
            .map_err(EqError::stream_io)?;
        let (first, second) = chunk.as_slices();
        block[..first.len()].copy_from_slice(first);
        block[first.len()..].copy_from_slice(second);
        chunk.commit_all();

        self.link.report_glitches("input overrun");
        Ok(())
    }
}

/// Pipeline end of the playback buffer.
struct BlockWriter {
    producer: Producer<f32>,
    link: Arc<Link>,
}

impl BlockWriter {
    /// Parks until all of `block` has been queued.
    fn write_all(&mut self, block: &[f32]) -> Result<()> {
        self.link.register();
        let mut rest = block;
        while !rest.is_empty() {
            self.link.check()?;
            let room = self.producer.slots().min(rest.len());
            if room == 0 {
                if self.producer.is_abandoned() {
                    return Err(EqError::StreamIo("playback stream ended".into()));
                }
                thread::park();
                continue;
            }
            for &sample in &rest[..room] {
                let _ = self.producer.push(sample);
            }
            rest = &rest[room..];
        }

        self.link.report_glitches("output underrun");
        Ok(())
    }
}
