//! Typed sample slices tagged with their representation.
//!
//! [`Samples`] and [`SamplesMut`] let the engine and backends pass buffers of any of the three
//! supported representations through one signature and dispatch on the tag at runtime.

use std::ops::Range;

use crate::format::SampleFormat;
use crate::player::Producer;

mod sealed {
    pub trait Sealed: bytemuck::Pod {}

    impl Sealed for u8 {}
    impl Sealed for i16 {}
    impl Sealed for f32 {}
}

/// One of the three supported sample types: `u8`, `i16`, `f32`.
pub trait Sample: sealed::Sealed + Send + Sync + 'static {
    const FORMAT: SampleFormat;
    /// Value written for silence.
    const SILENCE: Self;

    fn samples(buffer: &[Self]) -> Samples<'_>;
    fn samples_mut(buffer: &mut [Self]) -> SamplesMut<'_>;
    fn producer(callback: Box<dyn FnMut(&mut [Self]) -> usize + Send>) -> Producer;
}

impl Sample for u8 {
    const FORMAT: SampleFormat = SampleFormat::UnsignedPcm8;
    const SILENCE: Self = 128;

    fn samples(buffer: &[Self]) -> Samples<'_> {
        Samples::U8(buffer)
    }

    fn samples_mut(buffer: &mut [Self]) -> SamplesMut<'_> {
        SamplesMut::U8(buffer)
    }

    fn producer(callback: Box<dyn FnMut(&mut [Self]) -> usize + Send>) -> Producer {
        Producer::U8(callback)
    }
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::SignedPcm16;
    const SILENCE: Self = 0;

    fn samples(buffer: &[Self]) -> Samples<'_> {
        Samples::I16(buffer)
    }

    fn samples_mut(buffer: &mut [Self]) -> SamplesMut<'_> {
        SamplesMut::I16(buffer)
    }

    fn producer(callback: Box<dyn FnMut(&mut [Self]) -> usize + Send>) -> Producer {
        Producer::I16(callback)
    }
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::IeeeFloat32;
    const SILENCE: Self = 0.0;

    fn samples(buffer: &[Self]) -> Samples<'_> {
        Samples::F32(buffer)
    }

    fn samples_mut(buffer: &mut [Self]) -> SamplesMut<'_> {
        SamplesMut::F32(buffer)
    }

    fn producer(callback: Box<dyn FnMut(&mut [Self]) -> usize + Send>) -> Producer {
        Producer::F32(callback)
    }
}

/// Borrowed interleaved samples in one of the supported representations.
#[derive(Clone, Copy, Debug)]
pub enum Samples<'a> {
    U8(&'a [u8]),
    I16(&'a [i16]),
    F32(&'a [f32]),
}

impl<'a> Samples<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::U8(_) => SampleFormat::UnsignedPcm8,
            Samples::I16(_) => SampleFormat::SignedPcm16,
            Samples::F32(_) => SampleFormat::IeeeFloat32,
        }
    }

    /// Length in samples.
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(s) => s.len(),
            Samples::I16(s) => s.len(),
            Samples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Samples::U8(s) => s,
            Samples::I16(s) => bytemuck::cast_slice(s),
            Samples::F32(s) => bytemuck::cast_slice(s),
        }
    }

    /// Sub-range in samples.
    pub fn slice(&self, range: Range<usize>) -> Samples<'a> {
        match *self {
            Samples::U8(s) => Samples::U8(&s[range]),
            Samples::I16(s) => Samples::I16(&s[range]),
            Samples::F32(s) => Samples::F32(&s[range]),
        }
    }
}

/// Mutable interleaved samples in one of the supported representations.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    U8(&'a mut [u8]),
    I16(&'a mut [i16]),
    F32(&'a mut [f32]),
}

impl<'a> SamplesMut<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            SamplesMut::U8(_) => SampleFormat::UnsignedPcm8,
            SamplesMut::I16(_) => SampleFormat::SignedPcm16,
            SamplesMut::F32(_) => SampleFormat::IeeeFloat32,
        }
    }

    /// Length in samples.
    pub fn len(&self) -> usize {
        match self {
            SamplesMut::U8(s) => s.len(),
            SamplesMut::I16(s) => s.len(),
            SamplesMut::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            SamplesMut::U8(s) => &mut s[..],
            SamplesMut::I16(s) => bytemuck::cast_slice_mut(&mut s[..]),
            SamplesMut::F32(s) => bytemuck::cast_slice_mut(&mut s[..]),
        }
    }

    /// Shorter-lived mutable view of a sub-range in samples.
    pub fn slice_mut(&mut self, range: Range<usize>) -> SamplesMut<'_> {
        match self {
            SamplesMut::U8(s) => SamplesMut::U8(&mut s[range]),
            SamplesMut::I16(s) => SamplesMut::I16(&mut s[range]),
            SamplesMut::F32(s) => SamplesMut::F32(&mut s[range]),
        }
    }

    pub fn as_samples(&self) -> Samples<'_> {
        match self {
            SamplesMut::U8(s) => Samples::U8(&s[..]),
            SamplesMut::I16(s) => Samples::I16(&s[..]),
            SamplesMut::F32(s) => Samples::F32(&s[..]),
        }
    }

    /// Write silence from sample index `from` to the end.
    pub fn fill_silence(&mut self, from: usize) {
        match self {
            SamplesMut::U8(s) => s[from..].fill(u8::SILENCE),
            SamplesMut::I16(s) => s[from..].fill(i16::SILENCE),
            SamplesMut::F32(s) => s[from..].fill(f32::SILENCE),
        }
    }
}

impl<'a> From<&'a [u8]> for Samples<'a> {
    fn from(s: &'a [u8]) -> Self {
        Samples::U8(s)
    }
}

impl<'a> From<&'a [i16]> for Samples<'a> {
    fn from(s: &'a [i16]) -> Self {
        Samples::I16(s)
    }
}

impl<'a> From<&'a [f32]> for Samples<'a> {
    fn from(s: &'a [f32]) -> Self {
        Samples::F32(s)
    }
}

impl<'a> From<&'a mut [u8]> for SamplesMut<'a> {
    fn from(s: &'a mut [u8]) -> Self {
        SamplesMut::U8(s)
    }
}

impl<'a> From<&'a mut [i16]> for SamplesMut<'a> {
    fn from(s: &'a mut [i16]) -> Self {
        SamplesMut::I16(s)
    }
}

impl<'a> From<&'a mut [f32]> for SamplesMut<'a> {
    fn from(s: &'a mut [f32]) -> Self {
        SamplesMut::F32(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_views_cover_whole_samples() {
        let data = [1i16, -2, 3];
        let samples = Samples::from(&data[..]);
        assert_eq!(samples.format(), SampleFormat::SignedPcm16);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.as_bytes().len(), 6);
        assert_eq!(samples.slice(1..3).as_bytes().len(), 4);
    }

    #[test]
    fn fill_silence_leaves_prefix() {
        let mut data = [7u8; 4];
        let mut samples = SamplesMut::from(&mut data[..]);
        samples.fill_silence(2);
        assert_eq!(data, [7, 7, 128, 128]);

        let mut floats = [0.5f32; 3];
        SamplesMut::from(&mut floats[..]).fill_silence(1);
        assert_eq!(floats, [0.5, 0.0, 0.0]);
    }
}
