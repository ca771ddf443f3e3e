//! Grow-only conversion buffer.
//!
//! Storage is kept as `u32` words so every typed view (`u8`, `i16`, `f32`) is aligned. The
//! buffer only ever grows to the largest request seen and is never shrunk, trading resident
//! memory for zero allocations once playback reaches steady state.

use crate::format::SampleFormat;
use crate::sample::{Samples, SamplesMut};

#[derive(Debug, Default)]
pub(crate) struct ScratchBuffer {
    words: Vec<u32>,
}

impl ScratchBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn capacity_bytes(&self) -> usize {
        self.words.len() * size_of::<u32>()
    }

    fn reserve(&mut self, format: SampleFormat, samples: usize) {
        let words = (samples * format.bytes_per_sample()).div_ceil(size_of::<u32>());
        if self.words.len() < words {
            self.words.resize(words, 0);
        }
    }

    /// Typed view of the first `samples` samples, growing the storage first if needed.
    pub(crate) fn view_mut(&mut self, format: SampleFormat, samples: usize) -> SamplesMut<'_> {
        self.reserve(format, samples);
        match format {
            SampleFormat::UnsignedPcm8 => {
                SamplesMut::U8(&mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..samples])
            }
            SampleFormat::SignedPcm16 => {
                SamplesMut::I16(&mut bytemuck::cast_slice_mut::<u32, i16>(&mut self.words)[..samples])
            }
            SampleFormat::IeeeFloat32 => {
                SamplesMut::F32(&mut bytemuck::cast_slice_mut::<u32, f32>(&mut self.words)[..samples])
            }
        }
    }

    /// Read-only view of the first `samples` samples written by an earlier [`Self::view_mut`].
    ///
    /// # Panics
    /// If the storage is smaller than the requested view.
    pub(crate) fn view(&self, format: SampleFormat, samples: usize) -> Samples<'_> {
        match format {
            SampleFormat::UnsignedPcm8 => Samples::U8(&bytemuck::cast_slice::<u32, u8>(&self.words)[..samples]),
            SampleFormat::SignedPcm16 => Samples::I16(&bytemuck::cast_slice::<u32, i16>(&self.words)[..samples]),
            SampleFormat::IeeeFloat32 => Samples::F32(&bytemuck::cast_slice::<u32, f32>(&self.words)[..samples]),
        }
    }

    /// Drop the storage entirely. Only used on teardown.
    pub(crate) fn release(&mut self) {
        self.words = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_largest_request_and_never_shrinks() {
        let mut scratch = ScratchBuffer::new();
        assert_eq!(scratch.capacity_bytes(), 0);

        assert_eq!(scratch.view_mut(SampleFormat::IeeeFloat32, 100).len(), 100);
        assert_eq!(scratch.capacity_bytes(), 400);

        assert_eq!(scratch.view_mut(SampleFormat::SignedPcm16, 10).len(), 10);
        assert_eq!(scratch.capacity_bytes(), 400);

        assert_eq!(scratch.view_mut(SampleFormat::UnsignedPcm8, 401).len(), 401);
        assert_eq!(scratch.capacity_bytes(), 404);
    }

    #[test]
    fn view_reads_back_what_view_mut_wrote() {
        let mut scratch = ScratchBuffer::new();
        if let SamplesMut::I16(s) = scratch.view_mut(SampleFormat::SignedPcm16, 3) {
            s.copy_from_slice(&[1, -2, 3]);
        }
        match scratch.view(SampleFormat::SignedPcm16, 3) {
            Samples::I16(s) => assert_eq!(s, &[1, -2, 3]),
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn release_frees_storage() {
        let mut scratch = ScratchBuffer::new();
        scratch.view_mut(SampleFormat::IeeeFloat32, 64);
        scratch.release();
        assert_eq!(scratch.capacity_bytes(), 0);
    }
}
