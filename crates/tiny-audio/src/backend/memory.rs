//! In-process backend that records everything it is given.
//!
//! Used by tests and by hosts that want to render audio to memory. The [`MemoryHandle`]
//! returned alongside the backend stays valid after the backend moves into a player and
//! can inspect written bytes, limit how much each write accepts, inject failures, and drive
//! callback mode by hand with [`MemoryHandle::pull`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;

use crate::backend::AudioBackend;
use crate::error::Result;
use crate::format::AudioFormat;
use crate::player::CallbackSource;
use crate::sample::SamplesMut;

#[derive(Default)]
struct MemoryState {
    accept_limit: Option<usize>,
    written: Vec<u8>,
    write_calls: usize,
    source: Option<CallbackSource>,
    started: bool,
    closed: bool,
    start_count: usize,
    stop_count: usize,
    close_count: usize,
    fail_next_start: Option<String>,
    fail_next_stop: Option<String>,
}

pub struct MemoryBackend {
    format: AudioFormat,
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Clone)]
pub struct MemoryHandle {
    format: AudioFormat,
    state: Arc<Mutex<MemoryState>>,
    servicing: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new(format: AudioFormat) -> (MemoryBackend, MemoryHandle) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        let backend = MemoryBackend {
            format,
            state: state.clone(),
        };
        let handle = MemoryHandle {
            format,
            state,
            servicing: Arc::new(AtomicBool::new(false)),
        };
        (backend, handle)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioBackend for MemoryBackend {
    fn start(&mut self, source: Option<CallbackSource>) -> anyhow::Result<()> {
        let mut state = self.state();
        if let Some(reason) = state.fail_next_start.take() {
            return Err(anyhow!(reason));
        }
        state.source = source;
        state.started = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        let mut state = self.state();
        state.started = false;
        state.source = None;
        state.stop_count += 1;
        match state.fail_next_stop.take() {
            Some(reason) => Err(anyhow!(reason)),
            None => Ok(()),
        }
    }

    fn write_data(&mut self, data: &[u8]) -> usize {
        let mut state = self.state();
        state.write_calls += 1;
        let accepted = state.accept_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.written.extend_from_slice(&data[..accepted]);
        accepted
    }

    fn close(&mut self) {
        let mut state = self.state();
        state.started = false;
        state.source = None;
        state.closed = true;
        state.close_count += 1;
    }

    fn native_format(&self) -> Option<AudioFormat> {
        Some(self.format)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Resets the servicing flag even if the producer panics.
struct ServicingGuard<'a>(&'a AtomicBool);

impl Drop for ServicingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MemoryHandle {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Cap the bytes accepted by each subsequent `write_data` call. `None` accepts everything.
    pub fn set_accept_limit(&self, limit: Option<usize>) {
        self.state().accept_limit = limit;
    }

    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().written)
    }

    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    /// Simulate a device buffer-ready notification in callback mode.
    ///
    /// Returns `None` when no callback source is registered or a previous notification is
    /// still being serviced; the notification is skipped rather than queued.
    pub fn pull(&self, buffer: SamplesMut<'_>) -> Option<Result<usize>> {
        if self.servicing.swap(true, Ordering::AcqRel) {
            tracing::trace!("buffer notification skipped, previous one still running");
            return None;
        }
        let _guard = ServicingGuard(&self.servicing);
        let source = self.state().source.clone()?;
        Some(source.fill(buffer))
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    pub fn is_callback_mode(&self) -> bool {
        let state = self.state();
        state.started && state.source.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn start_count(&self) -> usize {
        self.state().start_count
    }

    pub fn stop_count(&self) -> usize {
        self.state().stop_count
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    /// Make the next `start` fail with `reason`.
    pub fn fail_next_start(&self, reason: &str) {
        self.state().fail_next_start = Some(reason.to_string());
    }

    /// Make the next `stop` fail with `reason` after stopping.
    pub fn fail_next_stop(&self, reason: &str) {
        self.state().fail_next_stop = Some(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use crate::player::AudioPlayer;
    use std::sync::mpsc;
    use std::time::Duration;

    fn mono16() -> AudioFormat {
        AudioFormat::new(8_000, 1, SampleFormat::SignedPcm16).unwrap()
    }

    #[test]
    fn accept_limit_applies_per_call() {
        let (mut backend, handle) = MemoryBackend::new(mono16());
        handle.set_accept_limit(Some(3));
        assert_eq!(backend.write_data(&[1, 2, 3, 4, 5]), 3);
        assert_eq!(backend.write_data(&[6, 7]), 2);
        assert_eq!(handle.written(), vec![1, 2, 3, 6, 7]);
        assert_eq!(handle.write_calls(), 2);

        handle.set_accept_limit(None);
        assert_eq!(backend.write_data(&[0; 100]), 100);
    }

    #[test]
    fn pull_without_callback_mode_is_skipped() {
        let (mut backend, handle) = MemoryBackend::new(mono16());
        backend.start(None).unwrap();
        let mut out = [0i16; 4];
        assert!(handle.pull(SamplesMut::from(&mut out[..])).is_none());
    }

    #[test]
    fn reentrant_notification_is_skipped() {
        let (backend, handle) = MemoryBackend::new(mono16());
        let mut player = AudioPlayer::new(mono16(), Box::new(backend)).unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        player
            .begin_playback_with(move |buf: &mut [i16]| {
                let _ = entered_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                buf.len()
            })
            .unwrap();

        let worker = {
            let handle = handle.clone();
            std::thread::spawn(move || {
                let mut out = [0i16; 8];
                handle.pull(SamplesMut::from(&mut out[..]))
            })
        };

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let mut out = [0i16; 8];
        assert!(handle.pull(SamplesMut::from(&mut out[..])).is_none());

        release_tx.send(()).unwrap();
        let first = worker.join().unwrap();
        assert_eq!(first.unwrap().unwrap(), 8);

        // The flag is cleared once the first notification returns.
        drop(release_tx);
        assert!(handle.pull(SamplesMut::from(&mut out[..])).is_some());
    }
}
