//! File decoding for `tinyplay play`.
//!
//! Symphonia probes the container and decodes packets into interleaved `f32` chunks that the
//! caller pushes into the player as they come.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Pull-based decoder over one audio track.
pub struct DecodedSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    codec: Option<&'static str>,
    duration_ms: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl DecodedSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("probe audio container")?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let params = track.codec_params.clone();
        let channels = params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .context("create decoder")?;

        Ok(Self {
            track_id: track.id,
            format,
            decoder,
            sample_rate,
            channels: u16::try_from(channels).context("channel count")?,
            codec: codec_name_from_params(&params),
            duration_ms: duration_ms_from_codec_params(&params),
            sample_buf: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn codec(&self) -> Option<&'static str> {
        self.codec
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Decode the next packet of the track as interleaved `f32`.
    ///
    /// Returns `Ok(None)` at end of stream. Packets that fail to decode are skipped.
    pub fn next_chunk(&mut self) -> Result<Option<&[f32]>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(e).context("read packet"),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(e).context("decode packet"),
            };

            let frames = decoded.capacity() as u64;
            let spec = *decoded.spec();
            if !can_hold(self.sample_buf.as_ref(), frames, &spec) {
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::<f32>::new(frames, spec));
            buf.copy_interleaved_ref(decoded);
            return Ok(Some(buf.samples()));
        }
    }
}

/// Whether `buf` has room for `frames` frames laid out as `spec`.
fn can_hold(buf: Option<&SampleBuffer<f32>>, frames: u64, spec: &SignalSpec) -> bool {
    buf.is_some_and(|b| b.capacity() as u64 >= frames * spec.channels.count() as u64)
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_U8 => "PCM_U8",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(44_100);
        params.n_frames = Some(66_150);
        assert_eq!(duration_ms_from_codec_params(&params), Some(1_500));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_PCM_U8;
        assert_eq!(codec_name_from_params(&params), Some("PCM_U8"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16"));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn sample_buffer_is_reused_until_a_packet_outgrows_it() {
        use symphonia::core::audio::Channels;

        let stereo = SignalSpec::new(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mono = SignalSpec::new(44_100, Channels::FRONT_LEFT);
        let buf = SampleBuffer::<f32>::new(1_024, stereo);

        assert!(!can_hold(None, 1, &stereo));
        assert!(can_hold(Some(&buf), 1_024, &stereo));
        assert!(can_hold(Some(&buf), 2_048, &mono));
        assert!(!can_hold(Some(&buf), 1_025, &stereo));
    }

    #[test]
    fn open_reports_missing_file() {
        let err = DecodedSource::open(Path::new("/nonexistent/tinyplay-test.wav"))
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("open"));
    }
}
