//! Output device backend over CPAL.
//!
//! `cpal::Stream` is not `Send` on every host, so the stream lives on a dedicated owner thread
//! and the backend talks to it over a command channel. The owner thread:
//! - opens the device once and reports its native format back to [`CpalBackend::open`]
//! - builds a fresh output stream on every start and drops it on stop
//! - in push mode, drains a bounded byte queue filled by [`AudioBackend::write_data`]
//! - in callback mode, asks the [`CallbackSource`] for samples from the device callback
//!
//! Whatever the device asks for and does not get is filled with silence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::backend::AudioBackend;
use crate::format::{AudioFormat, SampleFormat};
use crate::player::CallbackSource;
use crate::sample::Sample;

/// Device selection and buffering for [`CpalBackend`].
#[derive(Clone, Debug)]
pub struct CpalBackendConfig {
    /// Case-insensitive substring of the output device name. `None` uses the host default.
    pub device: Option<String>,
    /// Amount of pushed audio buffered ahead of the device.
    pub buffer_length: Duration,
    /// Preferred device sample rate. `None` keeps the device's default config.
    pub sample_rate: Option<u32>,
}

impl Default for CpalBackendConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_length: Duration::from_millis(100),
            sample_rate: None,
        }
    }
}

/// Bounded FIFO of native-format bytes shared with the device callback.
///
/// Pushes move whole samples, so a trailing partial frame is queued and completed by the next
/// push. Pops move whole frames only, so the callback never sees a split frame.
struct ByteQueue {
    inner: Mutex<VecDeque<u8>>,
    capacity: usize,
    sample_bytes: usize,
    frame_bytes: usize,
}

impl ByteQueue {
    fn new(capacity: usize, format: AudioFormat) -> Self {
        let sample_bytes = format.bytes_per_sample();
        let frame_bytes = format.bytes_per_frame();
        let capacity = (capacity / frame_bytes).max(1) * frame_bytes;
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sample_bytes,
            frame_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append as many whole samples of `data` as fit. Returns bytes accepted.
    fn push(&self, data: &[u8]) -> usize {
        let mut queue = self.lock();
        let free = self.capacity.saturating_sub(queue.len());
        let accepted = free.min(data.len()) / self.sample_bytes * self.sample_bytes;
        queue.extend(&data[..accepted]);
        accepted
    }

    /// Move whole frames into the start of `out`. Returns bytes written.
    fn pop_into(&self, out: &mut [u8]) -> usize {
        let mut queue = self.lock();
        let n = queue.len().min(out.len()) / self.frame_bytes * self.frame_bytes;
        let (front, back) = queue.as_slices();
        let split = front.len().min(n);
        out[..split].copy_from_slice(&front[..split]);
        out[split..n].copy_from_slice(&back[..n - split]);
        queue.drain(..n);
        n
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

enum StreamCommand {
    Start {
        source: Option<CallbackSource>,
        reply: Sender<Result<()>>,
    },
    Stop {
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

/// Backend that plays through a CPAL output device.
pub struct CpalBackend {
    format: AudioFormat,
    queue: Arc<ByteQueue>,
    underruns: Arc<AtomicU64>,
    cmd_tx: Sender<StreamCommand>,
    join: Option<JoinHandle<()>>,
}

impl CpalBackend {
    /// Open the configured device on a new stream-owner thread.
    ///
    /// Fails when no device matches, or when the device's native sample representation is
    /// not one of `u8`, `i16`, `f32`.
    pub fn open(config: &CpalBackendConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let underruns = Arc::new(AtomicU64::new(0));

        let worker_config = config.clone();
        let worker_underruns = underruns.clone();
        let join = std::thread::Builder::new()
            .name("tiny-audio-stream".into())
            .spawn(move || stream_thread_main(worker_config, worker_underruns, cmd_rx, ready_tx))
            .context("spawn stream thread")?;

        let (format, queue) = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = join.join();
                return Err(e);
            }
            Err(_) => {
                let _ = join.join();
                return Err(anyhow!("stream thread exited during setup"));
            }
        };

        tracing::info!(
            rate_hz = format.sample_rate(),
            channels = format.channels(),
            sample_format = %format.sample_format(),
            buffer_bytes = queue.capacity,
            "output device opened"
        );

        Ok(Self {
            format,
            queue,
            underruns,
            cmd_tx,
            join: Some(join),
        })
    }

    /// Bytes waiting in the push queue.
    pub fn buffered_bytes(&self) -> usize {
        self.queue.len()
    }

    /// Device callbacks in push mode that found less data than requested.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn request(&self, make: impl FnOnce(Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(make(reply_tx))
            .map_err(|_| anyhow!("stream thread is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("stream thread dropped the request"))?
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self, source: Option<CallbackSource>) -> Result<()> {
        self.queue.clear();
        self.request(|reply| StreamCommand::Start { source, reply })
    }

    fn stop(&mut self) -> Result<()> {
        let stopped = self.request(|reply| StreamCommand::Stop { reply });
        self.queue.clear();
        stopped
    }

    fn write_data(&mut self, data: &[u8]) -> usize {
        self.queue.push(data)
    }

    fn close(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.cmd_tx.send(StreamCommand::Shutdown);
        if join.join().is_err() {
            tracing::warn!("stream thread panicked");
        }
        self.queue.clear();
    }

    fn native_format(&self) -> Option<AudioFormat> {
        Some(self.format)
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

type Ready = (AudioFormat, Arc<ByteQueue>);

struct OpenDevice {
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
    format: AudioFormat,
}

/// Owner thread for the device and its stream.
fn stream_thread_main(
    config: CpalBackendConfig,
    underruns: Arc<AtomicU64>,
    cmd_rx: Receiver<StreamCommand>,
    ready_tx: Sender<Result<Ready>>,
) {
    let opened = match open_device(&config) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let capacity = opened.format.length_for(config.buffer_length).total_bytes();
    let Ok(capacity) = usize::try_from(capacity) else {
        let _ = ready_tx.send(Err(anyhow!(
            "buffer length {:?} does not fit in memory",
            config.buffer_length
        )));
        return;
    };
    let queue = Arc::new(ByteQueue::new(capacity, opened.format));
    if ready_tx.send(Ok((opened.format, queue.clone()))).is_err() {
        return;
    }

    let mut stream: Option<cpal::Stream> = None;
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            StreamCommand::Start { source, reply } => {
                stream = None;
                let result = match build_output_stream(&opened, source, &queue, &underruns) {
                    Ok(s) => s.play().context("start output stream").map(|()| stream = Some(s)),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            StreamCommand::Stop { reply } => {
                let result = match stream.take() {
                    Some(s) => s.pause().context("pause output stream"),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            StreamCommand::Shutdown => break,
        }
    }
    tracing::debug!("stream thread exiting");
}

fn open_device(config: &CpalBackendConfig) -> Result<OpenDevice> {
    let host = cpal::default_host();
    let device = pick_device(&host, config.device.as_deref())?;
    let supported = pick_output_config(&device, config.sample_rate)?;
    let sample_format = SampleFormat::try_from(supported.sample_format())?;
    let stream_config = supported.config();
    let format = AudioFormat::new(stream_config.sample_rate, stream_config.channels, sample_format)?;

    let mut stream_config = stream_config;
    if let Some(size) = pick_buffer_size(&supported, format.length_for(config.buffer_length).frames()) {
        stream_config.buffer_size = size;
    }

    if let Ok(desc) = device.description() {
        tracing::debug!(device = %desc.name(), format = %format, "selected output device");
    }
    Ok(OpenDevice {
        device,
        stream_config,
        format,
    })
}

fn build_output_stream(
    opened: &OpenDevice,
    source: Option<CallbackSource>,
    queue: &Arc<ByteQueue>,
    underruns: &Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    match opened.format.sample_format() {
        SampleFormat::UnsignedPcm8 => build_stream::<u8>(opened, source, queue, underruns),
        SampleFormat::SignedPcm16 => build_stream::<i16>(opened, source, queue, underruns),
        SampleFormat::IeeeFloat32 => build_stream::<f32>(opened, source, queue, underruns),
    }
}

fn build_stream<T>(
    opened: &OpenDevice,
    source: Option<CallbackSource>,
    queue: &Arc<ByteQueue>,
    underruns: &Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: Sample + cpal::SizedSample,
{
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = match source {
        Some(source) => {
            let mut reported = false;
            opened.device.build_output_stream(
                &opened.stream_config,
                move |data: &mut [T], _| {
                    let mut samples = T::samples_mut(data);
                    let len = samples.len();
                    let written = match source.fill(samples.slice_mut(0..len)) {
                        Ok(written) => written,
                        Err(e) => {
                            if !reported {
                                tracing::warn!("producer dispatch failed: {e}");
                                reported = true;
                            }
                            0
                        }
                    };
                    samples.fill_silence(written);
                },
                err_fn,
                None,
            )?
        }
        None => {
            let queue = queue.clone();
            let underruns = underruns.clone();
            opened.device.build_output_stream(
                &opened.stream_config,
                move |data: &mut [T], _| {
                    let mut samples = T::samples_mut(data);
                    let filled = queue.pop_into(samples.as_bytes_mut()) / size_of::<T>();
                    if filled < samples.len() {
                        underruns.fetch_add(1, Ordering::Relaxed);
                        samples.fill_silence(filled);
                    }
                },
                err_fn,
                None,
            )?
        }
    };
    Ok(stream)
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config for the device.
///
/// Without a target rate the device default wins when its representation is playable. Otherwise
/// every supported range is scored: rates at or below the target first, then higher rate,
/// then `f32` over `i16` over `u8`.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    if target_rate.is_none() {
        if let Ok(default) = device.default_output_config() {
            if sample_format_rank(default.sample_format()).is_some() {
                return Ok(default);
            }
        }
    }

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let Some(rank) = sample_format_rank(range.sample_format()) else {
            continue;
        };
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = target_rate.is_none_or(|t| rate <= t);
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("Device has no u8, i16 or f32 output config"))
}

/// Request a fixed device buffer close to `frames`, clamped to what the device allows.
fn pick_buffer_size(config: &cpal::SupportedStreamConfig, frames: u32) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(frames.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I16 => Some(1),
        cpal::SampleFormat::U8 => Some(2),
        _ => None,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below
    } else if rate != best_rate {
        rate > best_rate
    } else {
        format_rank < best_rank
    }
}

/// Output device metadata for device selection.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Native format of the default output config, when it is playable.
    pub format: Option<AudioFormat>,
    pub min_rate: u32,
    pub max_rate: u32,
}

/// List output devices of the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|desc| desc.name().to_string());

    let mut out = Vec::new();
    for device in host.output_devices().context("No output devices")? {
        let name = match device.description() {
            Ok(desc) => desc.name().to_string(),
            Err(e) => {
                tracing::debug!("skipping device without a description: {e}");
                continue;
            }
        };

        let format = device.default_output_config().ok().and_then(|cfg| {
            let sample_format = SampleFormat::try_from(cfg.sample_format()).ok()?;
            AudioFormat::new(cfg.sample_rate(), cfg.channels(), sample_format).ok()
        });

        let (mut min_rate, mut max_rate) = (u32::MAX, 0u32);
        if let Ok(ranges) = device.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
            }
        }
        if max_rate < min_rate {
            let rate = format.map_or(0, |f| f.sample_rate());
            (min_rate, max_rate) = (rate, rate);
        }

        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            format,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
