use av_traits::{
    AudioBuffer, Codec, CodecError, CodecInfo, CodecTag, Colormodel, Direction, EncodedPacket, MediaKind, SampleFormat, StreamFormat,
    VideoFrame,
};

use crate::StaticProvider;

/// Uncompressed 16-bit PCM.
pub struct PcmCodec {
    big_endian: bool,
    channels: u16,
}

impl PcmCodec {
    pub fn new(big_endian: bool, channels: u16) -> Self {
        Self { big_endian, channels }
    }
}

impl Codec for PcmCodec {
    fn decode_audio(&mut self, packet: &EncodedPacket, output: &mut AudioBuffer) -> Result<(), CodecError> {
        let samples = packet
            .data
            .chunks_exact(2)
            .map(|b| if self.big_endian { i16::from_be_bytes([b[0], b[1]]) } else { i16::from_le_bytes([b[0], b[1]]) })
            .collect();
        output.append(&AudioBuffer::from_s16(self.channels, samples));
        Ok(())
    }

    fn encode_audio(&mut self, input: &AudioBuffer, packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        if input.channels != self.channels {
            return Err(CodecError::InvalidParameter(format!(
                "expected {} channels, got {}",
                self.channels, input.channels
            )));
        }
        let mut s16 = AudioBuffer::new(SampleFormat::S16, self.channels);
        s16.append(input);
        let av_traits::AudioSamples::S16(samples) = &s16.samples else {
            return Err(CodecError::Failed("sample conversion failed".into()));
        };
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&if self.big_endian { s.to_be_bytes() } else { s.to_le_bytes() });
        }
        let frames = s16.frames() as u32;
        packets.push(EncodedPacket {
            data,
            pts: 0,
            duration: frames,
            samples: frames,
            keyframe: true,
        });
        Ok(())
    }

    fn flush(&mut self, _packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        Ok(())
    }

    fn resync(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Uncompressed packed 24-bit RGB, stored without row padding.
pub struct RawVideoCodec {
    width: u32,
    height: u32,
}

impl RawVideoCodec {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn row_len(&self) -> usize {
        Colormodel::Rgb888.default_row_span(0, self.width)
    }
}

impl Codec for RawVideoCodec {
    fn decode_video(&mut self, packet: &EncodedPacket, output: &mut VideoFrame) -> Result<(), CodecError> {
        let row_len = self.row_len();
        if output.colormodel != Colormodel::Rgb888 || output.width != self.width || output.height != self.height {
            return Err(CodecError::InvalidParameter("output frame does not match the stream".into()));
        }
        if packet.data.len() < row_len * self.height as usize {
            return Err(CodecError::Failed(format!("short frame of {} bytes", packet.data.len())));
        }
        let span = output.row_spans[0];
        let plane = output.plane_mut(0);
        for (y, row) in packet.data.chunks_exact(row_len).take(self.height as usize).enumerate() {
            plane[y * span..y * span + row_len].copy_from_slice(row);
        }
        output.timestamp = packet.pts;
        output.duration = packet.duration;
        Ok(())
    }

    fn encode_video(&mut self, input: &VideoFrame, packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        if input.colormodel != Colormodel::Rgb888 || input.width != self.width || input.height != self.height {
            return Err(CodecError::InvalidParameter("input frame does not match the stream".into()));
        }
        let mut data = Vec::with_capacity(self.row_len() * self.height as usize);
        for y in 0..self.height as usize {
            data.extend_from_slice(input.row(0, y));
        }
        packets.push(EncodedPacket {
            data,
            pts: input.timestamp,
            duration: input.duration,
            samples: 1,
            keyframe: true,
        });
        Ok(())
    }

    fn flush(&mut self, _packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        Ok(())
    }

    fn resync(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

fn pcm_info(name: &str, long_name: &str, fourccs: &[&[u8; 4]], wav_ids: &[u16]) -> CodecInfo {
    let mut info = CodecInfo::new(name, MediaKind::Audio, Direction::Both);
    info.long_name = long_name.to_string();
    info.fourccs = fourccs.iter().map(|&f| CodecTag::new(f)).collect();
    info.wav_ids = wav_ids.to_vec();
    info.fixed_frame_size = true;
    info
}

fn channels(format: &StreamFormat) -> Result<u16, CodecError> {
    match format {
        StreamFormat::Audio { channels, bits: 16, .. } => Ok(*channels),
        StreamFormat::Audio { bits, .. } => Err(CodecError::InvalidParameter(format!("unsupported bit depth {}", bits))),
        _ => Err(CodecError::InvalidParameter("not an audio stream".into())),
    }
}

fn raw_video_info() -> CodecInfo {
    let mut info = CodecInfo::new("raw_rgb24", MediaKind::Video, Direction::Both);
    info.long_name = "Uncompressed RGB".to_string();
    info.fourccs = vec![CodecTag::new(b"raw ")];
    info.colormodels = vec![Colormodel::Rgb888];
    info
}

/// The codecs that are always available, even without a plugin directory.
pub fn builtin_provider() -> StaticProvider {
    StaticProvider::new()
        .with_codec(pcm_info("pcm_s16be", "16-bit big-endian PCM", &[b"twos"], &[]), |format| {
            Ok(Box::new(PcmCodec::new(true, channels(format)?)))
        })
        .with_codec(pcm_info("pcm_s16le", "16-bit little-endian PCM", &[b"sowt"], &[0x0001]), |format| {
            Ok(Box::new(PcmCodec::new(false, channels(format)?)))
        })
        .with_codec(raw_video_info(), |format| match format {
            StreamFormat::Video { width, height, .. } => Ok(Box::new(RawVideoCodec::new(*width, *height))),
            _ => Err(CodecError::InvalidParameter("not a video stream".into())),
        })
}
