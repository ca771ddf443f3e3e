//! tinyplay: a small CLI over the tiny-audio engine.
//!
//! ## Commands
//! - `devices`: list output devices.
//! - `tone`: synthesize a sine in `u8`, `i16` or `f32` and play it either by letting the device
//!   pull samples (callback mode) or by pushing them with the async writer.
//! - `play`: decode a file with Symphonia and push it to the device. There is no resampling,
//!   so the file's rate and channel count must match what the device plays.
//!
//! Ctrl-C cancels whatever is playing and shuts the device down cleanly.

mod cli;
mod decode;
mod tone;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tiny_audio::backend::device::{self, CpalBackendConfig};
use tiny_audio::backend::CpalBackend;
use tiny_audio::config::PlayerConfig;
use tiny_audio::{AudioFormat, AudioPlayer, SampleFormat, convert};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command, Mode, ToneFormat};
use crate::decode::DecodedSource;
use crate::tone::{Tone, ToneSample};

/// Frames rendered per push-mode write.
const PUSH_CHUNK_FRAMES: usize = 1024;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tinyplay=info")),
        )
        .init();

    if let Command::Devices = args.cmd {
        return print_devices();
    }

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupted");
        cancel_for_signal.cancel();
    })
    .context("install Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("build runtime")?;

    let player_config = PlayerConfig {
        write_retry_delay: Duration::from_millis(args.retry_ms),
    };
    let mut backend_config = CpalBackendConfig {
        device: args.device.clone(),
        buffer_length: Duration::from_millis(args.buffer_ms),
        sample_rate: None,
    };
    let buffered = backend_config.buffer_length;

    match &args.cmd {
        Command::Devices => Ok(()),
        Command::Tone {
            freq,
            seconds,
            amplitude,
            format,
            mode,
        } => {
            let mut player = open_player(&backend_config, player_config)?;
            let device_format = player.format();
            let tone = Tone::new(
                *freq,
                device_format.sample_rate(),
                device_format.channels(),
                *amplitude,
                *seconds,
            );
            tracing::info!(
                freq_hz = freq,
                seconds = seconds,
                producer = %SampleFormat::from(*format),
                device = %device_format,
                mode = ?mode,
                "playing tone"
            );
            let played = runtime.block_on(async {
                match (mode, format) {
                    (Mode::Pull, ToneFormat::U8) => pull_tone::<u8>(&mut player, tone, &cancel).await,
                    (Mode::Pull, ToneFormat::I16) => pull_tone::<i16>(&mut player, tone, &cancel).await,
                    (Mode::Pull, ToneFormat::F32) => pull_tone::<f32>(&mut player, tone, &cancel).await,
                    (Mode::Push, ToneFormat::U8) => push_tone::<u8>(&mut player, tone, buffered, &cancel).await,
                    (Mode::Push, ToneFormat::I16) => push_tone::<i16>(&mut player, tone, buffered, &cancel).await,
                    (Mode::Push, ToneFormat::F32) => push_tone::<f32>(&mut player, tone, buffered, &cancel).await,
                }
            });
            player.dispose();
            played
        }
        Command::Play { path } => {
            let source = DecodedSource::open(path)?;
            backend_config.sample_rate = Some(source.sample_rate());
            let mut player = open_player(&backend_config, player_config)?;
            let played = runtime.block_on(play_file(&mut player, source, path, buffered, &cancel));
            player.dispose();
            played
        }
    }
}

fn print_devices() -> Result<()> {
    let devices = device::list_devices()?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for (i, d) in devices.iter().enumerate() {
        let marker = if d.is_default { "*" } else { " " };
        let format = d
            .format
            .map_or_else(|| "unsupported format".to_string(), |f| f.to_string());
        println!(
            "{marker}#{i}: {} [{format}] {}-{} Hz",
            d.name, d.min_rate, d.max_rate
        );
    }
    Ok(())
}

fn open_player(backend_config: &CpalBackendConfig, config: PlayerConfig) -> Result<AudioPlayer> {
    let backend = CpalBackend::open(backend_config).context("open output device")?;
    Ok(AudioPlayer::for_backend(Box::new(backend), config)?)
}

/// Register the tone as the producer and wait until it runs out or Ctrl-C.
async fn pull_tone<S: ToneSample>(
    player: &mut AudioPlayer,
    mut tone: Tone,
    cancel: &CancellationToken,
) -> Result<()> {
    let finished = cancel.child_token();
    let finished_in_callback = finished.clone();
    player.begin_playback_with(move |buffer: &mut [S]| {
        let written = tone.fill(buffer);
        if tone.is_finished() {
            finished_in_callback.cancel();
        }
        written
    })?;

    finished.cancelled().await;
    if !cancel.is_cancelled() {
        // Let the last device buffer play out.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    player.stop_playback()?;
    Ok(())
}

/// Render the tone chunk by chunk and push it with the async writer.
async fn push_tone<S: ToneSample>(
    player: &mut AudioPlayer,
    mut tone: Tone,
    buffered: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    ensure_convertible(S::FORMAT, player.format())?;
    let mut chunk = vec![S::SILENCE; PUSH_CHUNK_FRAMES * usize::from(player.format().channels())];

    player.begin_playback()?;
    while !tone.is_finished() {
        let n = tone.fill(&mut chunk);
        let outcome = player.write_data_async(&chunk[..n], cancel).await?;
        if outcome.is_cancelled() {
            break;
        }
    }
    drain(buffered, cancel).await;
    player.stop_playback()?;
    Ok(())
}

async fn play_file(
    player: &mut AudioPlayer,
    mut source: DecodedSource,
    path: &Path,
    buffered: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let device_format = player.format();
    if source.sample_rate() != device_format.sample_rate() || source.channels() != device_format.channels() {
        bail!(
            "{} is {} Hz / {} ch but the device plays {}; resampling is not supported",
            path.display(),
            source.sample_rate(),
            source.channels(),
            device_format
        );
    }
    ensure_convertible(SampleFormat::IeeeFloat32, device_format)?;

    tracing::info!(
        path = %path.display(),
        codec = source.codec().unwrap_or("unknown"),
        duration_ms = source.duration_ms(),
        device = %device_format,
        "playing file"
    );

    player.begin_playback()?;
    let mut samples_written = 0u64;
    while let Some(chunk) = source.next_chunk()? {
        let outcome = player.write_data_async(chunk, cancel).await?;
        samples_written += outcome.samples_written() as u64;
        if outcome.is_cancelled() {
            break;
        }
    }
    drain(buffered, cancel).await;
    player.stop_playback()?;

    let frames = samples_written / u64::from(device_format.channels());
    tracing::info!(frames, "playback finished");
    Ok(())
}

fn ensure_convertible(from: SampleFormat, device: AudioFormat) -> Result<()> {
    let to = device.sample_format();
    if from != to && !convert::is_supported(from, to) {
        bail!("cannot play {from} samples on a {to} device");
    }
    Ok(())
}

/// Give the device time to play what is still queued, unless cancelled.
async fn drain(buffered: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(buffered) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_format(sample_format: SampleFormat) -> AudioFormat {
        AudioFormat::new(48_000, 2, sample_format).unwrap()
    }

    #[test]
    fn tone_formats_convertible_to_pcm16_devices() {
        for from in SampleFormat::ALL {
            assert!(ensure_convertible(from, device_format(SampleFormat::SignedPcm16)).is_ok());
        }
    }

    #[test]
    fn narrowing_to_pcm8_device_is_refused() {
        let err = ensure_convertible(SampleFormat::IeeeFloat32, device_format(SampleFormat::UnsignedPcm8)).unwrap_err();
        assert_eq!(err.to_string(), "cannot play f32 samples on a u8 device");
        assert!(ensure_convertible(SampleFormat::UnsignedPcm8, device_format(SampleFormat::UnsignedPcm8)).is_ok());
    }
}
