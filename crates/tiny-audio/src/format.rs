//! Playback format description and frame/byte arithmetic.

use std::fmt;
use std::time::Duration;

use crate::error::{PlayerError, Result};

/// `WAVE_FORMAT_PCM` format tag.
pub const WAVE_FORMAT_PCM: u16 = 0x0001;
/// `WAVE_FORMAT_IEEE_FLOAT` format tag.
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;

/// Encoding of a single audio sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit PCM.
    UnsignedPcm8,
    /// Signed 16-bit PCM.
    SignedPcm16,
    /// 32-bit IEEE float.
    IeeeFloat32,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 3] = [
        SampleFormat::UnsignedPcm8,
        SampleFormat::SignedPcm16,
        SampleFormat::IeeeFloat32,
    ];

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::UnsignedPcm8 => 1,
            SampleFormat::SignedPcm16 => 2,
            SampleFormat::IeeeFloat32 => 4,
        }
    }

    /// Map a WAVEFORMATEX-style `(format tag, bits per sample)` pair.
    pub fn from_wave_format(format_tag: u16, bits_per_sample: u16) -> Result<Self> {
        match (format_tag, bits_per_sample) {
            (WAVE_FORMAT_PCM, 8) => Ok(SampleFormat::UnsignedPcm8),
            (WAVE_FORMAT_PCM, 16) => Ok(SampleFormat::SignedPcm16),
            (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(SampleFormat::IeeeFloat32),
            (tag, bits) => Err(PlayerError::InvalidFormat(format!(
                "format tag {tag:#06x} with {bits} bits per sample"
            ))),
        }
    }

    /// The `(format tag, bits per sample)` pair describing this representation.
    pub fn wave_format(self) -> (u16, u16) {
        match self {
            SampleFormat::UnsignedPcm8 => (WAVE_FORMAT_PCM, 8),
            SampleFormat::SignedPcm16 => (WAVE_FORMAT_PCM, 16),
            SampleFormat::IeeeFloat32 => (WAVE_FORMAT_IEEE_FLOAT, 32),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::UnsignedPcm8 => "u8",
            SampleFormat::SignedPcm16 => "i16",
            SampleFormat::IeeeFloat32 => "f32",
        };
        f.write_str(name)
    }
}

impl TryFrom<cpal::SampleFormat> for SampleFormat {
    type Error = PlayerError;

    fn try_from(format: cpal::SampleFormat) -> Result<Self> {
        match format {
            cpal::SampleFormat::U8 => Ok(SampleFormat::UnsignedPcm8),
            cpal::SampleFormat::I16 => Ok(SampleFormat::SignedPcm16),
            cpal::SampleFormat::F32 => Ok(SampleFormat::IeeeFloat32),
            other => Err(PlayerError::InvalidFormat(format!(
                "unsupported device sample format: {other:?}"
            ))),
        }
    }
}

impl From<SampleFormat> for cpal::SampleFormat {
    fn from(format: SampleFormat) -> Self {
        match format {
            SampleFormat::UnsignedPcm8 => cpal::SampleFormat::U8,
            SampleFormat::SignedPcm16 => cpal::SampleFormat::I16,
            SampleFormat::IeeeFloat32 => cpal::SampleFormat::F32,
        }
    }
}

/// Playback stream format: rate, channel count and sample representation.
///
/// Immutable once built; equality is structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
}

impl AudioFormat {
    /// Returns [`PlayerError::InvalidFormat`] for a zero sample rate or channel count.
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PlayerError::InvalidFormat("sample rate must be > 0".to_string()));
        }
        if channels == 0 {
            return Err(PlayerError::InvalidFormat("channel count must be >= 1".to_string()));
        }
        Ok(Self {
            sample_rate,
            channels,
            sample_format,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Same rate and channel count; only the sample representation may differ.
    pub fn is_compatible(&self, other: &AudioFormat) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Same rate and channels with a different sample representation.
    pub fn with_sample_format(&self, sample_format: SampleFormat) -> AudioFormat {
        AudioFormat {
            sample_format,
            ..*self
        }
    }

    /// Length of `frames` frames in this format.
    pub fn length(&self, frames: u32) -> AudioLength {
        AudioLength::new(frames, u32::from(self.channels), self.bytes_per_sample() as u32)
    }

    /// Length of `duration` in this format, rounded up to whole frames.
    pub fn length_for(&self, duration: Duration) -> AudioLength {
        let frames = (duration.as_nanos() * u128::from(self.sample_rate)).div_ceil(1_000_000_000);
        self.length(u32::try_from(frames).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}",
            self.sample_rate, self.channels, self.sample_format
        )
    }
}

/// Frame count with the sizing needed for sample/byte arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioLength {
    frames: u32,
    channels: u32,
    bytes_per_sample: u32,
}

impl AudioLength {
    pub fn new(frames: u32, channels: u32, bytes_per_sample: u32) -> Self {
        Self {
            frames,
            channels,
            bytes_per_sample,
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn bytes_per_sample(&self) -> u32 {
        self.bytes_per_sample
    }

    /// Interleaved samples across all channels.
    pub fn samples(&self) -> u64 {
        u64::from(self.frames) * u64::from(self.channels)
    }

    pub fn total_bytes(&self) -> u64 {
        self.samples().saturating_mul(u64::from(self.bytes_per_sample))
    }

    /// Playback time of this length at `sample_rate`.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(u64::from(self.frames) * 1_000_000_000 / u64::from(sample_rate))
    }
}
