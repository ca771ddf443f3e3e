//! Playback engine.
//!
//! [`AudioPlayer`] owns a backend and a fixed [`AudioFormat`] and exposes two ways to feed it:
//! - push: [`AudioPlayer::write_data`] / [`AudioPlayer::write_data_async`] on the caller's thread
//! - pull: a producer registered with [`AudioPlayer::begin_playback_with`], invoked by the
//!   backend through [`CallbackSource::fill`] on the backend's own thread
//!
//! In both modes samples are converted to the backend's representation when the caller's
//! differs. Partial acceptance by the backend is not an error: excess input is dropped for
//! that call and the return value tells the caller how much was consumed.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::backend::AudioBackend;
use crate::config::PlayerConfig;
use crate::convert;
use crate::error::{PlayerError, Result};
use crate::format::{AudioFormat, SampleFormat};
use crate::sample::{Sample, Samples, SamplesMut};
use crate::scratch::ScratchBuffer;

/// Pull-mode producer tagged with the representation it writes.
///
/// The callback fills the start of the buffer and returns how many samples it wrote. Writing
/// fewer than requested is allowed; the engine leaves the rest of the device buffer alone.
pub enum Producer {
    U8(Box<dyn FnMut(&mut [u8]) -> usize + Send>),
    I16(Box<dyn FnMut(&mut [i16]) -> usize + Send>),
    F32(Box<dyn FnMut(&mut [f32]) -> usize + Send>),
}

impl Producer {
    pub fn new<S, F>(callback: F) -> Self
    where
        S: Sample,
        F: FnMut(&mut [S]) -> usize + Send + 'static,
    {
        S::producer(Box::new(callback))
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Producer::U8(_) => SampleFormat::UnsignedPcm8,
            Producer::I16(_) => SampleFormat::SignedPcm16,
            Producer::F32(_) => SampleFormat::IeeeFloat32,
        }
    }

    fn produce(&mut self, buffer: SamplesMut<'_>) -> Result<usize> {
        let len = buffer.len();
        let written = match (self, buffer) {
            (Producer::U8(f), SamplesMut::U8(b)) => f(b),
            (Producer::I16(f), SamplesMut::I16(b)) => f(b),
            (Producer::F32(f), SamplesMut::F32(b)) => f(b),
            (producer, buffer) => {
                return Err(PlayerError::UnsupportedConversion {
                    from: producer.format(),
                    to: buffer.format(),
                });
            }
        };
        Ok(written.min(len))
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Producer").field(&self.format()).finish()
    }
}

/// Registered producer plus the scratch it converts through.
#[derive(Default)]
struct Dispatch {
    producer: Option<Producer>,
    scratch: ScratchBuffer,
}

/// Handle a backend uses in callback mode to request samples.
///
/// Cheap to clone and safe to call from any thread. Calls are serialized internally; a
/// backend should still skip a notification that arrives while the previous one is running
/// rather than queue it.
#[derive(Clone)]
pub struct CallbackSource {
    dispatch: Arc<Mutex<Dispatch>>,
}

impl CallbackSource {
    /// Ask the registered producer for up to `buffer.len()` samples in `buffer`'s
    /// representation.
    ///
    /// Returns the number of samples written to the start of `buffer`; the tail is left as
    /// it was. With no producer registered this writes nothing and returns 0.
    pub fn fill(&self, mut buffer: SamplesMut<'_>) -> Result<usize> {
        let mut guard = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let Dispatch { producer, scratch } = &mut *guard;
        let Some(producer) = producer.as_mut() else {
            return Ok(0);
        };

        let from = producer.format();
        let to = buffer.format();
        if from == to {
            return producer.produce(buffer);
        }
        if !convert::is_supported(from, to) {
            return Err(PlayerError::UnsupportedConversion { from, to });
        }

        let len = buffer.len();
        let written = producer.produce(scratch.view_mut(from, len))?;
        convert::convert(scratch.view(from, written), buffer.slice_mut(0..written))?;
        Ok(written)
    }

    /// Representation of the registered producer, if any.
    pub fn producer_format(&self) -> Option<SampleFormat> {
        self.lock().producer.as_ref().map(Producer::format)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, producer: Option<Producer>) {
        self.lock().producer = producer;
    }
}

impl std::fmt::Debug for CallbackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSource")
            .field("producer", &self.producer_format())
            .finish()
    }
}

/// How an async write ended.
///
/// `samples_written` counts interleaved samples (frames × channels), like
/// [`AudioPlayer::write_samples`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteCompletion {
    /// Every sample was accepted by the backend.
    Complete { samples_written: usize },
    /// The cancellation token fired first; `samples_written` were delivered before that.
    Cancelled { samples_written: usize },
}

impl WriteCompletion {
    pub fn samples_written(&self) -> usize {
        match *self {
            WriteCompletion::Complete { samples_written }
            | WriteCompletion::Cancelled { samples_written } => samples_written,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WriteCompletion::Cancelled { .. })
    }
}

/// Background playback stream over an [`AudioBackend`].
///
/// State machine: `Stopped → Playing` on either `begin_playback*`, `Playing → Stopped` on
/// [`stop_playback`](Self::stop_playback), and `Disposed` (absorbing) after
/// [`dispose`](Self::dispose) or drop. Writes take `&mut self`, so only one push operation
/// can be in flight at a time.
pub struct AudioPlayer {
    format: AudioFormat,
    backend: Box<dyn AudioBackend>,
    config: PlayerConfig,
    playing: bool,
    disposed: bool,
    scratch: ScratchBuffer,
    source: CallbackSource,
}

impl AudioPlayer {
    /// Create a stopped player that feeds `backend` samples in `format`.
    ///
    /// Fails with [`PlayerError::InvalidFormat`] when the backend dictates a different
    /// native format.
    pub fn new(format: AudioFormat, backend: Box<dyn AudioBackend>) -> Result<Self> {
        Self::with_config(format, backend, PlayerConfig::default())
    }

    pub fn with_config(
        format: AudioFormat,
        backend: Box<dyn AudioBackend>,
        config: PlayerConfig,
    ) -> Result<Self> {
        if let Some(native) = backend.native_format() {
            if native != format {
                return Err(PlayerError::InvalidFormat(format!(
                    "{} backend plays {native}, player declared {format}",
                    backend.name()
                )));
            }
        }
        Ok(Self {
            format,
            backend,
            config,
            playing: false,
            disposed: false,
            scratch: ScratchBuffer::new(),
            source: CallbackSource {
                dispatch: Arc::new(Mutex::new(Dispatch::default())),
            },
        })
    }

    /// Create a player in whatever format the backend plays natively.
    pub fn for_backend(backend: Box<dyn AudioBackend>, config: PlayerConfig) -> Result<Self> {
        let format = backend.native_format().ok_or_else(|| {
            PlayerError::InvalidFormat(format!(
                "{} backend does not report a native format",
                backend.name()
            ))
        })?;
        Self::with_config(format, backend, config)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Start push-mode playback; feed it with [`write_data`](Self::write_data).
    pub fn begin_playback(&mut self) -> Result<()> {
        self.ensure_can_start()?;
        self.source.replace(None);
        self.start_backend(None)?;
        tracing::debug!(backend = self.backend.name(), format = %self.format, "push playback started");
        Ok(())
    }

    /// Start callback-mode playback with a producer writing samples of type `S`.
    pub fn begin_playback_with<S, F>(&mut self, callback: F) -> Result<()>
    where
        S: Sample,
        F: FnMut(&mut [S]) -> usize + Send + 'static,
    {
        self.begin_callback_playback(Some(Producer::new(callback)))
    }

    /// Start callback-mode playback with a runtime-tagged producer.
    ///
    /// Replaces any previous producer. Fails with [`PlayerError::NullCallback`] for `None`
    /// and with [`PlayerError::UnsupportedConversion`] when the producer's representation
    /// cannot be converted to the player's.
    pub fn begin_callback_playback(&mut self, producer: Option<Producer>) -> Result<()> {
        let producer = producer.ok_or(PlayerError::NullCallback)?;
        self.ensure_can_start()?;

        let from = producer.format();
        let to = self.format.sample_format();
        if from != to && !convert::is_supported(from, to) {
            return Err(PlayerError::UnsupportedConversion { from, to });
        }

        // The producer must be visible before the backend can call back.
        self.source.replace(Some(producer));
        self.start_backend(Some(self.source.clone()))?;
        tracing::debug!(
            backend = self.backend.name(),
            format = %self.format,
            producer = %from,
            "callback playback started"
        );
        Ok(())
    }

    /// Stop playback if it is running. Clears the registered producer.
    pub fn stop_playback(&mut self) -> Result<()> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }
        if !self.playing {
            return Ok(());
        }

        self.playing = false;
        let stopped = self.backend.stop();
        self.source.replace(None);
        stopped.map_err(PlayerError::Backend)?;
        tracing::debug!(backend = self.backend.name(), "playback stopped");
        Ok(())
    }

    /// Write samples of type `S`; see [`write_samples`](Self::write_samples).
    pub fn write_data<S: Sample>(&mut self, data: &[S]) -> Result<usize> {
        self.write_samples(S::samples(data))
    }

    /// Convert `data` to the player's representation if needed and hand it to the backend.
    ///
    /// Returns the number of `data` samples the backend accepted, counted as interleaved
    /// samples (frames × channels): 100 stereo frames are 200 samples. Samples past that point
    /// are dropped; callers wanting full delivery retry with the remainder or use
    /// [`write_samples_async`](Self::write_samples_async).
    pub fn write_samples(&mut self, data: Samples<'_>) -> Result<usize> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }
        let target = self.format.sample_format();
        let total_bytes = data.len() * target.bytes_per_sample();

        let accepted = if data.format() == target {
            self.backend.write_data(data.as_bytes())
        } else {
            self.convert_into_scratch(data)?;
            self.backend
                .write_data(self.scratch.view(target, data.len()).as_bytes())
        };
        Ok(accepted.min(total_bytes) / target.bytes_per_sample())
    }

    /// Async variant of [`write_data`](Self::write_data).
    pub async fn write_data_async<S: Sample>(
        &mut self,
        data: &[S],
        cancel: &CancellationToken,
    ) -> Result<WriteCompletion> {
        self.write_samples_async(S::samples(data), cancel).await
    }

    /// Deliver all of `data`, waiting between partial writes.
    ///
    /// After each write that leaves data undelivered the task sleeps for
    /// [`PlayerConfig::write_retry_delay`] and retries with the remainder. `cancel` is checked
    /// before every retry and interrupts the sleep.
    pub async fn write_samples_async(
        &mut self,
        data: Samples<'_>,
        cancel: &CancellationToken,
    ) -> Result<WriteCompletion> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }
        let target = self.format.sample_format();
        let bytes_per_sample = target.bytes_per_sample();
        let total_bytes = data.len() * bytes_per_sample;
        let converted = data.format() != target;
        if converted {
            self.convert_into_scratch(data)?;
        }

        let mut written = 0usize;
        loop {
            let bytes = if converted {
                self.scratch.view(target, data.len()).as_bytes()
            } else {
                data.as_bytes()
            };
            let remaining = &bytes[written..];
            written += self.backend.write_data(remaining).min(remaining.len());
            if written >= total_bytes {
                return Ok(WriteCompletion::Complete {
                    samples_written: data.len(),
                });
            }

            let cancelled = WriteCompletion::Cancelled {
                samples_written: written / bytes_per_sample,
            };
            if cancel.is_cancelled() {
                return Ok(cancelled);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(cancelled),
                _ = tokio::time::sleep(self.config.write_retry_delay) => {}
            }
        }
    }

    /// Stop playback and release the scratch buffers and the backend. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(e) = self.stop_playback() {
            tracing::warn!(backend = self.backend.name(), "stop during dispose failed: {e}");
        }
        self.disposed = true;
        self.playing = false;
        self.scratch.release();
        {
            let mut dispatch = self.source.lock();
            dispatch.producer = None;
            dispatch.scratch.release();
        }
        self.backend.close();
        tracing::debug!(backend = self.backend.name(), "player disposed");
    }

    fn ensure_can_start(&self) -> Result<()> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }
        if self.playing {
            return Err(PlayerError::AlreadyPlaying);
        }
        Ok(())
    }

    /// Flip to `Playing` and start the backend, rolling back to `Stopped` on failure.
    fn start_backend(&mut self, source: Option<CallbackSource>) -> Result<()> {
        self.playing = true;
        if let Err(e) = self.backend.start(source) {
            self.playing = false;
            self.source.replace(None);
            tracing::warn!(backend = self.backend.name(), "backend failed to start: {e:#}");
            return Err(PlayerError::Backend(e));
        }
        Ok(())
    }

    fn convert_into_scratch(&mut self, data: Samples<'_>) -> Result<()> {
        let target = self.format.sample_format();
        if !convert::is_supported(data.format(), target) {
            return Err(PlayerError::UnsupportedConversion {
                from: data.format(),
                to: target,
            });
        }
        convert::convert(data, self.scratch.view_mut(target, data.len()))
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn player(format: AudioFormat) -> (AudioPlayer, MemoryHandle) {
        let (backend, handle) = MemoryBackend::new(format);
        let player = AudioPlayer::new(format, Box::new(backend)).unwrap();
        (player, handle)
    }

    fn stereo16() -> AudioFormat {
        AudioFormat::new(44_100, 2, SampleFormat::SignedPcm16).unwrap()
    }

    #[test]
    fn new_rejects_format_the_backend_does_not_play() {
        let (backend, _handle) = MemoryBackend::new(stereo16());
        let declared = stereo16().with_sample_format(SampleFormat::IeeeFloat32);
        let err = AudioPlayer::new(declared, Box::new(backend)).err().unwrap();
        assert!(matches!(err, PlayerError::InvalidFormat(_)));
    }

    #[test]
    fn float_write_is_converted_to_pcm16() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();

        // 100 stereo frames.
        let data = vec![0.5f32; 200];
        let accepted = player.write_data(&data).unwrap();

        assert_eq!(accepted, 200);
        let written = handle.take_written();
        assert_eq!(written.len(), 100 * 2 * 2);
        let samples: &[i16] = bytemuck::cast_slice(&written);
        assert!(samples.iter().all(|s| *s == 16383));
    }

    #[test]
    fn write_count_is_interleaved_samples_not_frames() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();
        // Six bytes: one and a half stereo frames.
        handle.set_accept_limit(Some(6));

        assert_eq!(player.write_data(&[7i16; 8]).unwrap(), 3);
        assert_eq!(player.write_data(&[0.5f32; 8]).unwrap(), 3);
    }

    #[test]
    fn partial_acceptance_reports_source_samples() {
        let (mut player, handle) = player(stereo16());
        handle.set_accept_limit(Some(64));

        let data = vec![7i16; 50];
        assert_eq!(player.write_data(&data).unwrap(), 32);
        assert_eq!(handle.written().len(), 64);
    }

    #[test]
    fn partial_acceptance_of_converted_data_counts_source_samples() {
        let (mut player, handle) = player(stereo16());
        handle.set_accept_limit(Some(10));

        let data = vec![127u8; 40];
        assert_eq!(player.write_data(&data).unwrap(), 5);
        assert_eq!(handle.written(), vec![0u8; 10]);
    }

    #[test]
    fn odd_byte_acceptance_rounds_down_to_whole_samples() {
        let (mut player, handle) = player(stereo16());
        handle.set_accept_limit(Some(7));
        assert_eq!(player.write_data(&[1i16, 2, 3, 4]).unwrap(), 3);
    }

    #[test]
    fn narrowing_writes_are_rejected() {
        let format = AudioFormat::new(22_050, 1, SampleFormat::UnsignedPcm8).unwrap();
        let (mut player, handle) = player(format);
        let err = player.write_data(&[0.0f32; 4]).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::UnsupportedConversion {
                from: SampleFormat::IeeeFloat32,
                to: SampleFormat::UnsignedPcm8
            }
        ));
        assert!(handle.written().is_empty());
    }

    #[test]
    fn scratch_grows_to_largest_write_and_keeps_it() {
        let (mut player, _handle) = player(stereo16());
        player.write_data(&vec![0.0f32; 256]).unwrap();
        assert_eq!(player.scratch.capacity_bytes(), 512);
        player.write_data(&vec![0.0f32; 8]).unwrap();
        assert_eq!(player.scratch.capacity_bytes(), 512);
    }

    #[test]
    fn begin_twice_fails_with_already_playing() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();
        assert!(matches!(
            player.begin_playback(),
            Err(PlayerError::AlreadyPlaying)
        ));
        assert!(matches!(
            player.begin_playback_with(|_: &mut [i16]| 0),
            Err(PlayerError::AlreadyPlaying)
        ));
        assert_eq!(handle.start_count(), 1);
    }

    #[test]
    fn null_producer_is_rejected() {
        let (mut player, handle) = player(stereo16());
        assert!(matches!(
            player.begin_callback_playback(None),
            Err(PlayerError::NullCallback)
        ));
        assert!(!player.is_playing());
        assert_eq!(handle.start_count(), 0);
    }

    #[test]
    fn producer_without_conversion_is_rejected_before_start() {
        let format = AudioFormat::new(8_000, 1, SampleFormat::UnsignedPcm8).unwrap();
        let (mut player, handle) = player(format);
        let err = player
            .begin_playback_with(|buf: &mut [i16]| buf.len())
            .unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedConversion { .. }));
        assert!(!player.is_playing());
        assert_eq!(handle.start_count(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut player, handle) = player(stereo16());
        player.stop_playback().unwrap();
        assert_eq!(handle.stop_count(), 0);

        player.begin_playback_with(|buf: &mut [i16]| buf.len()).unwrap();
        player.stop_playback().unwrap();
        player.stop_playback().unwrap();
        assert!(!player.is_playing());
        assert_eq!(handle.stop_count(), 1);
        assert!(!handle.is_started());
        assert_eq!(player.source.producer_format(), None);
    }

    #[test]
    fn restart_after_stop_is_allowed() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();
        player.stop_playback().unwrap();
        player.begin_playback_with(|buf: &mut [f32]| buf.len()).unwrap();
        assert!(player.is_playing());
        assert!(handle.is_callback_mode());
    }

    #[test]
    fn pull_converts_only_the_reported_prefix() {
        let (mut player, handle) = player(stereo16());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        player
            .begin_playback_with(move |buf: &mut [f32]| {
                seen_cb.store(buf.len(), Ordering::SeqCst);
                buf[..20].fill(1.0);
                20
            })
            .unwrap();

        let mut out = [-5i16; 50];
        let written = handle.pull(SamplesMut::from(&mut out[..])).unwrap().unwrap();

        assert_eq!(written, 20);
        assert_eq!(seen.load(Ordering::SeqCst), 50);
        assert!(out[..20].iter().all(|s| *s == 32767));
        assert!(out[20..].iter().all(|s| *s == -5));
    }

    #[test]
    fn pull_in_matching_format_writes_directly() {
        let (mut player, handle) = player(stereo16());
        player
            .begin_playback_with(|buf: &mut [i16]| {
                for (i, s) in buf.iter_mut().enumerate() {
                    *s = i as i16;
                }
                buf.len()
            })
            .unwrap();

        let mut out = [0i16; 8];
        assert_eq!(handle.pull(SamplesMut::from(&mut out[..])).unwrap().unwrap(), 8);
        assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn over_reporting_producer_is_clamped() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback_with(|_: &mut [u8]| 1_000).unwrap();
        let mut out = [0i16; 4];
        assert_eq!(handle.pull(SamplesMut::from(&mut out[..])).unwrap().unwrap(), 4);
    }

    #[test]
    fn pull_without_producer_is_silence() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();
        assert!(!handle.is_callback_mode());

        let mut out = [3i16; 4];
        let written = player.source.fill(SamplesMut::from(&mut out[..])).unwrap();
        assert_eq!(written, 0);
        assert_eq!(out, [3; 4]);
    }

    #[test]
    fn new_producer_replaces_previous_registration() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback_with(|buf: &mut [i16]| {
            buf.fill(1);
            buf.len()
        })
        .unwrap();
        player.stop_playback().unwrap();
        player.begin_playback_with(|buf: &mut [u8]| {
            buf.fill(128);
            buf.len()
        })
        .unwrap();

        let mut out = [0i16; 2];
        handle.pull(SamplesMut::from(&mut out[..])).unwrap().unwrap();
        assert_eq!(out, [256, 256]);
    }

    #[test]
    fn backend_start_failure_leaves_player_stopped() {
        let (mut player, handle) = player(stereo16());
        handle.fail_next_start("device busy");
        let err = player
            .begin_playback_with(|buf: &mut [i16]| buf.len())
            .unwrap_err();
        assert!(matches!(err, PlayerError::Backend(_)));
        assert!(!player.is_playing());
        assert_eq!(player.source.producer_format(), None);

        player.begin_playback().unwrap();
        assert!(player.is_playing());
    }

    #[test]
    fn backend_stop_failure_still_stops_player() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();
        handle.fail_next_stop("device lost");
        assert!(matches!(player.stop_playback(), Err(PlayerError::Backend(_))));
        assert!(!player.is_playing());
        player.begin_playback().unwrap();
    }

    #[test]
    fn dispose_is_idempotent_and_absorbing() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback_with(|buf: &mut [f32]| buf.len()).unwrap();
        player.write_data(&[0.0f32; 16]).unwrap();

        player.dispose();
        assert!(player.is_disposed());
        assert!(!player.is_playing());
        assert!(handle.is_closed());
        assert_eq!(handle.stop_count(), 1);
        assert_eq!(player.scratch.capacity_bytes(), 0);

        player.dispose();
        assert_eq!(handle.close_count(), 1);

        assert!(matches!(player.begin_playback(), Err(PlayerError::Disposed)));
        assert!(matches!(player.stop_playback(), Err(PlayerError::Disposed)));
        assert!(matches!(
            player.write_data(&[0i16; 2]),
            Err(PlayerError::Disposed)
        ));
    }

    #[test]
    fn drop_closes_backend() {
        let (mut player, handle) = player(stereo16());
        player.begin_playback().unwrap();
        drop(player);
        assert!(handle.is_closed());
        assert!(!handle.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn async_write_retries_until_everything_is_accepted() {
        let (mut player, handle) = player(stereo16());
        handle.set_accept_limit(Some(40));
        let cancel = CancellationToken::new();

        let data = vec![0.25f32; 100];
        let outcome = player.write_data_async(&data, &cancel).await.unwrap();

        assert_eq!(outcome, WriteCompletion::Complete { samples_written: 100 });
        assert_eq!(handle.written().len(), 200);
        assert_eq!(handle.write_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn async_write_waits_the_retry_delay_between_attempts() {
        let (backend, handle) = MemoryBackend::new(stereo16());
        let config = PlayerConfig {
            write_retry_delay: Duration::from_millis(30),
        };
        let mut player = AudioPlayer::with_config(stereo16(), Box::new(backend), config).unwrap();
        handle.set_accept_limit(Some(8));
        let cancel = CancellationToken::new();

        let start = tokio::time::Instant::now();
        player.write_data_async(&[1i16; 12], &cancel).await.unwrap();
        // 24 bytes at 8 per call: three writes, two waits.
        assert_eq!(start.elapsed(), Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn async_write_honours_cancellation() {
        let (mut player, handle) = player(stereo16());
        handle.set_accept_limit(Some(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = player.write_data_async(&[0i16; 64], &cancel).await.unwrap();
        assert_eq!(outcome, WriteCompletion::Cancelled { samples_written: 0 });
        assert!(outcome.is_cancelled());
        assert!(handle.write_calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn async_write_with_cancelled_token_makes_one_attempt() {
        let (mut player, handle) = player(stereo16());
        handle.set_accept_limit(Some(4));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = player.write_data_async(&[0i16; 8], &cancel).await.unwrap();
        assert_eq!(outcome, WriteCompletion::Cancelled { samples_written: 2 });
        assert_eq!(handle.write_calls(), 1);
    }
}
