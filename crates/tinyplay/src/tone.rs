//! Sine tone generator used by `tinyplay tone`.

use std::f32::consts::TAU;

use tiny_audio::Sample;

/// Sample types a tone can be rendered into.
pub trait ToneSample: Sample + Copy {
    /// Map a value in [-1, 1] to this representation.
    fn from_unit(value: f32) -> Self;
}

impl ToneSample for u8 {
    fn from_unit(value: f32) -> Self {
        (127.0 + value.clamp(-1.0, 1.0) * 127.0).round() as u8
    }
}

impl ToneSample for i16 {
    fn from_unit(value: f32) -> Self {
        (value.clamp(-1.0, 1.0) * 32767.0) as i16
    }
}

impl ToneSample for f32 {
    fn from_unit(value: f32) -> Self {
        value.clamp(-1.0, 1.0)
    }
}

/// Finite interleaved sine, the same signal on every channel.
#[derive(Clone, Debug)]
pub struct Tone {
    step: f32,
    phase: f32,
    amplitude: f32,
    channels: usize,
    frames_left: u64,
}

impl Tone {
    pub fn new(freq_hz: f32, sample_rate: u32, channels: u16, amplitude: f32, seconds: f32) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f32).round() as u64;
        Self {
            step: TAU * freq_hz / sample_rate.max(1) as f32,
            phase: 0.0,
            amplitude: amplitude.clamp(0.0, 1.0),
            channels: usize::from(channels.max(1)),
            frames_left: frames,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frames_left == 0
    }

    /// Render whole frames into the start of `buffer`. Returns samples written, which is less
    /// than `buffer.len()` only once the tone runs out.
    pub fn fill<S: ToneSample>(&mut self, buffer: &mut [S]) -> usize {
        let frames = (buffer.len() / self.channels).min(usize::try_from(self.frames_left).unwrap_or(usize::MAX));
        for frame in buffer.chunks_exact_mut(self.channels).take(frames) {
            frame.fill(S::from_unit(self.amplitude * self.phase.sin()));
            self.phase = (self.phase + self.step) % TAU;
        }
        self.frames_left -= frames as u64;
        frames * self.channels
    }
}
