use alloc::{string::String, vec::Vec};
use core::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::{AudioBuffer, Colormodel, EncodedPacket, ParameterInfo, ParameterValue, VideoFrame};

/// A four character code identifying a compressed format.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CodecTag(pub [u8; 4]);

impl CodecTag {
    pub const fn new(tag: &[u8; 4]) -> Self {
        Self(*tag)
    }
}

impl fmt::Debug for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodecTag(\"{}\")", self)
    }
}

impl fmt::Display for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl From<[u8; 4]> for CodecTag {
    fn from(tag: [u8; 4]) -> Self {
        Self(tag)
    }
}

impl Serialize for CodecTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match core::str::from_utf8(&self.0) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => Err(serde::ser::Error::custom("codec tag is not valid utf-8")),
        }
    }
}

impl<'de> Deserialize<'de> for CodecTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| de::Error::invalid_length(s.len(), &"a four byte codec tag"))?;
        Ok(Self(bytes))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum MediaKind {
    Audio,
    Video,
    Text,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    Decode,
    Encode,
    Both,
}

impl Direction {
    /// Returns true if a codec declared with this direction can serve the requested one.
    pub fn supports(self, requested: Direction) -> bool {
        matches!(
            (self, requested),
            (Self::Both, _) | (Self::Decode, Self::Decode) | (Self::Encode, Self::Encode)
        )
    }
}

/// The metadata a codec publishes about itself.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CodecInfo {
    pub name: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub description: String,
    pub media: MediaKind,
    pub direction: Direction,
    #[serde(default)]
    pub fourccs: Vec<CodecTag>,
    /// Legacy `wFormatTag` values, used for AVI audio.
    #[serde(default)]
    pub wav_ids: Vec<u16>,
    /// The pixel layouts the codec reads or writes natively, in order of preference.
    #[serde(default)]
    pub colormodels: Vec<Colormodel>,
    /// Audio only. Packets hold a whole number of fixed-size audio frames, as with PCM, and the
    /// container stores one sample per audio frame.
    #[serde(default)]
    pub fixed_frame_size: bool,
    /// Audio encoders only. The number of audio frames consumed per packet, or 0 for any.
    #[serde(default)]
    pub samples_per_packet: u32,
    #[serde(default)]
    pub encoding_parameters: Vec<ParameterInfo>,
    #[serde(default)]
    pub decoding_parameters: Vec<ParameterInfo>,
}

impl CodecInfo {
    pub fn new(name: impl Into<String>, media: MediaKind, direction: Direction) -> Self {
        Self {
            name: name.into(),
            long_name: String::new(),
            description: String::new(),
            media,
            direction,
            fourccs: Vec::new(),
            wav_ids: Vec::new(),
            colormodels: Vec::new(),
            fixed_frame_size: false,
            samples_per_packet: 0,
            encoding_parameters: Vec::new(),
            decoding_parameters: Vec::new(),
        }
    }

    pub fn handles_fourcc(&self, tag: CodecTag) -> bool {
        self.fourccs.contains(&tag)
    }

    pub fn handles_wav_id(&self, id: u16) -> bool {
        self.wav_ids.contains(&id)
    }

    pub fn parameter(&self, direction: Direction, name: &str) -> Option<&ParameterInfo> {
        let params = match direction {
            Direction::Decode => &self.decoding_parameters,
            _ => &self.encoding_parameters,
        };
        params.iter().find(|p| p.name == name)
    }
}

/// The stream a codec instance is constructed for.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamFormat {
    Audio {
        channels: u16,
        sample_rate: u32,
        bits: u16,
    },
    Video {
        width: u32,
        height: u32,
        timescale: u32,
        frame_duration: u32,
    },
    Text,
}

impl StreamFormat {
    pub fn media(&self) -> MediaKind {
        match self {
            Self::Audio { .. } => MediaKind::Audio,
            Self::Video { .. } => MediaKind::Video,
            Self::Text => MediaKind::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CodecError {
    /// The codec doesn't implement the named operation.
    Unsupported(&'static str),
    InvalidParameter(String),
    Failed(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(op) => write!(f, "operation not supported: {}", op),
            Self::InvalidParameter(name) => write!(f, "invalid parameter: {}", name),
            Self::Failed(msg) => write!(f, "codec failure: {}", msg),
        }
    }
}

impl core::error::Error for CodecError {}

fn unsupported(op: &'static str) -> Result<(), CodecError> {
    log::warn!("codec does not implement {}", op);
    Err(CodecError::Unsupported(op))
}

/// A bound codec instance. Every operation has a default that logs and fails, so implementations
/// only provide what they support. Dropping the instance releases it.
///
/// Typical decoding looks like this:
///
/// ```
/// # use av_traits::{Codec, CodecError, Colormodel, EncodedPacket, VideoFrame};
/// fn decode_all<C: Codec + ?Sized>(codec: &mut C, packets: &[EncodedPacket]) -> Result<Vec<VideoFrame>, CodecError> {
///     let mut frames = Vec::new();
///     for packet in packets {
///         let mut frame = VideoFrame::new(Colormodel::Yuv420p, 720, 480);
///         codec.decode_video(packet, &mut frame)?;
///         frames.push(frame);
///     }
///     Ok(frames)
/// }
/// ```
pub trait Codec: Send {
    /// Decodes one packet into a frame allocated by the caller in one of the codec's colormodels.
    fn decode_video(&mut self, packet: &EncodedPacket, frame: &mut VideoFrame) -> Result<(), CodecError> {
        let _ = (packet, frame);
        unsupported("decode_video")
    }

    /// Sends a frame to the encoder. Output may be delayed, so zero or more packets are appended to
    /// `packets`. The packets' `pts` values carry the presentation time of the frame they encode.
    fn encode_video(&mut self, frame: &VideoFrame, packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        let _ = (frame, packets);
        unsupported("encode_video")
    }

    /// Decodes one packet, appending the decoded frames to `output`.
    fn decode_audio(&mut self, packet: &EncodedPacket, output: &mut AudioBuffer) -> Result<(), CodecError> {
        let _ = (packet, output);
        unsupported("decode_audio")
    }

    fn encode_audio(&mut self, input: &AudioBuffer, packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        let _ = (input, packets);
        unsupported("encode_audio")
    }

    fn set_parameter(&mut self, key: &str, value: &ParameterValue) -> Result<(), CodecError> {
        let _ = (key, value);
        unsupported("set_parameter")
    }

    /// Selects the pass of a multi-pass encode. `stats_file` is where the codec keeps its first pass
    /// statistics.
    fn set_pass(&mut self, pass: u32, total: u32, stats_file: Option<&str>) -> Result<(), CodecError> {
        let _ = (pass, total, stats_file);
        unsupported("set_pass")
    }

    /// Indicates that no more input will be provided. Delayed packets are appended to `packets`.
    fn flush(&mut self, packets: &mut Vec<EncodedPacket>) -> Result<(), CodecError> {
        let _ = packets;
        unsupported("flush")
    }

    /// Discards any lookahead state after a seek.
    fn resync(&mut self) -> Result<(), CodecError> {
        unsupported("resync")
    }
}
