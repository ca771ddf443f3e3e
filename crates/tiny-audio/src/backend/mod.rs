//! Device backends driven by [`AudioPlayer`](crate::player::AudioPlayer).
//!
//! A backend only has to move bytes that are already in its native sample representation;
//! all format conversion happens in the engine. The engine never inspects which backend it is
//! talking to.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          AudioPlayer          │  converts, tracks playing state
//! └──────────────┬───────────────┘
//!                │ start / stop / write_data
//!                ▼
//! ┌──────────────────────────────┐
//! │      trait AudioBackend       │
//! └──────┬────────────────┬──────┘
//!        ▼                ▼
//! ┌─────────────┐  ┌─────────────┐
//! │ CpalBackend │  │MemoryBackend│
//! └─────────────┘  └─────────────┘
//! ```

pub mod device;
pub mod memory;

pub use device::{CpalBackend, CpalBackendConfig};
pub use memory::{MemoryBackend, MemoryHandle};

use crate::format::AudioFormat;
use crate::player::CallbackSource;

/// Native audio output adapter.
pub trait AudioBackend: Send {
    /// Begin device playback.
    ///
    /// With `Some(source)` the backend runs in callback mode: whenever device buffer space is
    /// available it must call [`CallbackSource::fill`] from its own thread until [`stop`]
    /// returns. With `None` the device only plays what [`write_data`] delivered.
    ///
    /// [`stop`]: AudioBackend::stop
    /// [`write_data`]: AudioBackend::write_data
    fn start(&mut self, source: Option<CallbackSource>) -> anyhow::Result<()>;

    /// Halt device playback. Must be harmless when not started.
    fn stop(&mut self) -> anyhow::Result<()>;

    /// Copy native-format bytes into the device buffer.
    ///
    /// Returns how many bytes were accepted, which may be fewer than supplied (including
    /// zero) when the device buffer is full.
    fn write_data(&mut self, data: &[u8]) -> usize;

    /// Release device resources. Called exactly once by the engine on teardown.
    fn close(&mut self) {}

    /// Format the device consumes, when the backend dictates one.
    fn native_format(&self) -> Option<AudioFormat> {
        None
    }

    /// Short backend name for logs (e.g. "cpal", "memory").
    fn name(&self) -> &'static str;
}
