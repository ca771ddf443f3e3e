use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tiny_audio::SampleFormat;

#[derive(Parser, Debug)]
#[command(name = "tinyplay", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Audio buffered ahead of the device in push mode (milliseconds, 1-10000)
    #[arg(long, default_value_t = 100, global = true, value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub buffer_ms: u64,

    /// Wait between retries when the device buffer is full (milliseconds, 1-1000)
    #[arg(long, default_value_t = 20, global = true, value_parser = clap::value_parser!(u64).range(1..=1_000))]
    pub retry_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices
    Devices,

    /// Play a sine tone
    Tone {
        /// Frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        freq: f32,

        /// Length in seconds
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,

        /// Peak amplitude in [0, 1]
        #[arg(long, default_value_t = 0.25)]
        amplitude: f32,

        /// Sample representation the tone is generated in
        #[arg(long, value_enum, default_value_t = ToneFormat::F32)]
        format: ToneFormat,

        /// Let the device pull samples, or push them from this thread
        #[arg(long, value_enum, default_value_t = Mode::Pull)]
        mode: Mode,
    },

    /// Decode and play a local file (rate and channel count must match the device)
    Play {
        /// Path to audio file
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ToneFormat {
    U8,
    I16,
    F32,
}

impl From<ToneFormat> for SampleFormat {
    fn from(value: ToneFormat) -> Self {
        match value {
            ToneFormat::U8 => SampleFormat::UnsignedPcm8,
            ToneFormat::I16 => SampleFormat::SignedPcm16,
            ToneFormat::F32 => SampleFormat::IeeeFloat32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Pull,
    Push,
}
