//! Error taxonomy for the playback engine.
//!
//! Partial acceptance of written data is not an error; it is reported through return values.

use crate::format::SampleFormat;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// Malformed format or a sample representation outside the supported three.
    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
    #[error("playback has already started")]
    AlreadyPlaying,
    #[error("audio player has been disposed")]
    Disposed,
    #[error("callback playback requires a producer")]
    NullCallback,
    /// No numeric mapping is defined for this pair.
    #[error("no conversion from {from} to {to}")]
    UnsupportedConversion { from: SampleFormat, to: SampleFormat },
    /// The device adapter failed to start, stop or allocate.
    #[error("audio backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
