//! Sample-format-agnostic audio playback.
//!
//! [`player::AudioPlayer`] accepts samples as unsigned 8-bit PCM, signed 16-bit PCM or 32-bit
//! float, either pushed by the caller ([`player::AudioPlayer::write_data`]) or pulled from a
//! registered producer callback, and converts them to whatever representation the
//! [`backend::AudioBackend`] consumes natively.

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod player;
pub mod sample;
mod scratch;

pub use error::{PlayerError, Result};
pub use format::{AudioFormat, AudioLength, SampleFormat};
pub use player::{AudioPlayer, CallbackSource, Producer, WriteCompletion};
pub use sample::{Sample, Samples, SamplesMut};
