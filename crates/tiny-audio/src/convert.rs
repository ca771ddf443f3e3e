//! Sample representation conversions.
//!
//! Four conversions are defined:
//! - `i16 → f32`: `s / 32768`
//! - `u8 → f32`: `(s - 127) / 128`
//! - `u8 → i16`: `(s - 127) * 256`, truncated to 16 bits (255 wraps to -32768)
//! - `f32 → i16`: `trunc(s * 32767)`, truncated to 16 bits without clamping
//!
//! 8-bit PCM is centred on 127 for both widening conversions. Narrowing to 8 bits is not
//! defined and [`convert`] reports it as [`PlayerError::UnsupportedConversion`].
//!
//! Every batch function runs in fixed-width chunks that the compiler can vectorize and
//! finishes with a scalar tail. Both paths evaluate the same per-sample expression, so the
//! output does not depend on the chunk width or on the host's vector support.

use crate::error::{PlayerError, Result};
use crate::format::SampleFormat;
use crate::sample::{Samples, SamplesMut};

const LANES: usize = 16;

#[inline(always)]
fn pcm16_to_float_sample(s: i16) -> f32 {
    f32::from(s) / 32768.0
}

#[inline(always)]
fn pcm8_to_float_sample(s: u8) -> f32 {
    (i32::from(s) - 127) as f32 / 128.0
}

#[inline(always)]
fn pcm8_to_pcm16_sample(s: u8) -> i16 {
    ((i32::from(s) - 127) * 256) as i16
}

/// Float-to-int casts saturate in Rust, so go through `i32` and keep the low 16 bits to get
/// fixed-width wraparound for inputs outside [-1, 1].
#[inline(always)]
fn float_to_pcm16_sample(s: f32) -> i16 {
    (s * 32767.0) as i32 as i16
}

#[inline(always)]
fn map_batched<I: Copy, O>(source: &[I], target: &mut [O], f: impl Fn(I) -> O) {
    assert!(
        target.len() >= source.len(),
        "conversion target holds {} samples, source has {}",
        target.len(),
        source.len()
    );
    let target = &mut target[..source.len()];

    let mut src_chunks = source.chunks_exact(LANES);
    let mut dst_chunks = target.chunks_exact_mut(LANES);
    for (src, dst) in (&mut src_chunks).zip(&mut dst_chunks) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = f(*s);
        }
    }

    for (d, s) in dst_chunks
        .into_remainder()
        .iter_mut()
        .zip(src_chunks.remainder())
    {
        *d = f(*s);
    }
}

/// Convert signed 16-bit PCM to float.
///
/// # Panics
/// If `target` is shorter than `source`. The same holds for the other batch conversions.
pub fn pcm16_to_float(source: &[i16], target: &mut [f32]) {
    map_batched(source, target, pcm16_to_float_sample);
}

/// Convert unsigned 8-bit PCM to float.
pub fn pcm8_to_float(source: &[u8], target: &mut [f32]) {
    map_batched(source, target, pcm8_to_float_sample);
}

/// Convert unsigned 8-bit PCM to signed 16-bit PCM.
pub fn pcm8_to_pcm16(source: &[u8], target: &mut [i16]) {
    map_batched(source, target, pcm8_to_pcm16_sample);
}

/// Convert float to signed 16-bit PCM. Callers must clip to [-1, 1] themselves.
pub fn float_to_pcm16(source: &[f32], target: &mut [i16]) {
    map_batched(source, target, float_to_pcm16_sample);
}

/// Whether [`convert`] defines a mapping from `from` to `to`.
///
/// Identity pairs are not conversions; callers forward those buffers unchanged.
pub fn is_supported(from: SampleFormat, to: SampleFormat) -> bool {
    use SampleFormat::*;
    match (from, to) {
        (SignedPcm16, IeeeFloat32)
        | (UnsignedPcm8, IeeeFloat32)
        | (UnsignedPcm8, SignedPcm16)
        | (IeeeFloat32, SignedPcm16) => true,
        (UnsignedPcm8, UnsignedPcm8)
        | (SignedPcm16, SignedPcm16)
        | (IeeeFloat32, IeeeFloat32)
        | (SignedPcm16, UnsignedPcm8)
        | (IeeeFloat32, UnsignedPcm8) => false,
    }
}

/// Convert every sample of `source` into the start of `target`.
///
/// # Panics
/// If `target` is shorter than `source`.
pub fn convert(source: Samples<'_>, target: SamplesMut<'_>) -> Result<()> {
    let (from, to) = (source.format(), target.format());
    match (source, target) {
        (Samples::I16(s), SamplesMut::F32(t)) => pcm16_to_float(s, t),
        (Samples::U8(s), SamplesMut::F32(t)) => pcm8_to_float(s, t),
        (Samples::U8(s), SamplesMut::I16(t)) => pcm8_to_pcm16(s, t),
        (Samples::F32(s), SamplesMut::I16(t)) => float_to_pcm16(s, t),
        (Samples::U8(_), SamplesMut::U8(_))
        | (Samples::I16(_), SamplesMut::I16(_))
        | (Samples::F32(_), SamplesMut::F32(_))
        | (Samples::I16(_), SamplesMut::U8(_))
        | (Samples::F32(_), SamplesMut::U8(_)) => {
            return Err(PlayerError::UnsupportedConversion { from, to });
        }
    }
    Ok(())
}
