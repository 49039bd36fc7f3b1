use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SampleFormat {
    S16,
    F32,
}

/// Interleaved audio samples.
#[derive(Clone, Debug, PartialEq)]
pub enum AudioSamples {
    S16(Vec<i16>),
    F32(Vec<f32>),
}

impl AudioSamples {
    pub fn new(format: SampleFormat) -> Self {
        match format {
            SampleFormat::S16 => Self::S16(Vec::new()),
            SampleFormat::F32 => Self::F32(Vec::new()),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Self::S16(_) => SampleFormat::S16,
            Self::F32(_) => SampleFormat::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::S16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A run of interleaved audio frames. One frame holds one sample per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub channels: u16,
    pub samples: AudioSamples,
}

impl AudioBuffer {
    pub fn new(format: SampleFormat, channels: u16) -> Self {
        Self {
            channels,
            samples: AudioSamples::new(format),
        }
    }

    pub fn from_s16(channels: u16, samples: Vec<i16>) -> Self {
        Self {
            channels,
            samples: AudioSamples::S16(samples),
        }
    }

    pub fn from_f32(channels: u16, samples: Vec<f32>) -> Self {
        Self {
            channels,
            samples: AudioSamples::F32(samples),
        }
    }

    /// The number of audio frames in the buffer.
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Appends another buffer's frames. Buffers of differing formats are converted to this buffer's
    /// format.
    pub fn append(&mut self, other: &AudioBuffer) {
        match (&mut self.samples, &other.samples) {
            (AudioSamples::S16(a), AudioSamples::S16(b)) => a.extend_from_slice(b),
            (AudioSamples::F32(a), AudioSamples::F32(b)) => a.extend_from_slice(b),
            (AudioSamples::S16(a), AudioSamples::F32(b)) => a.extend(b.iter().map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)),
            (AudioSamples::F32(a), AudioSamples::S16(b)) => a.extend(b.iter().map(|&s| s as f32 / 32768.0)),
        }
    }

    /// Removes and returns up to `frames` frames from the front of the buffer.
    pub fn take_front(&mut self, frames: usize) -> AudioBuffer {
        let n = frames.min(self.frames()) * self.channels as usize;
        let samples = match &mut self.samples {
            AudioSamples::S16(v) => AudioSamples::S16(v.drain(..n).collect()),
            AudioSamples::F32(v) => AudioSamples::F32(v.drain(..n).collect()),
        };
        AudioBuffer {
            channels: self.channels,
            samples,
        }
    }

    /// Drops up to `frames` frames from the front of the buffer.
    pub fn skip_front(&mut self, frames: usize) {
        let n = frames.min(self.frames()) * self.channels as usize;
        match &mut self.samples {
            AudioSamples::S16(v) => drop(v.drain(..n)),
            AudioSamples::F32(v) => drop(v.drain(..n)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_audio_buffer() {
        let mut buf = AudioBuffer::from_s16(2, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(3, buf.frames());

        let front = buf.take_front(2);
        assert_eq!(AudioSamples::S16(vec![1, 2, 3, 4]), front.samples);
        assert_eq!(1, buf.frames());

        buf.append(&AudioBuffer::from_f32(2, vec![0.5, -0.5]));
        assert_eq!(AudioSamples::S16(vec![5, 6, 16383, -16383]), buf.samples);

        buf.skip_front(10);
        assert!(buf.is_empty());
    }
}
