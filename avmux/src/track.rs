use std::collections::VecDeque;

use av_traits::{AudioBuffer, CodecTag, Colormodel, SampleFormat, StreamFormat, VideoFrame};
use codecs::{BoundCodec, CodecQuery};
use qtff::{Timecode, TimecodeSample, TimecodeSampleDescriptionDataEntry};

use crate::index::{IndexBuilder, IndexCursor, TrackIndex};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
    Text,
    Timecode,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackState {
    Idle,
    Positioned,
    Decoding,
    Encoding,
    Eof,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrackFormat {
    Audio { channels: u16, sample_rate: u32, bits: u16 },
    Video { width: u32, height: u32, frame_duration: u32, depth: u16 },
    Text,
    Timecode { frame_duration: u32 },
}

/// One run of a timecode track: from `start` (in the timecode track's timescale) the counter
/// advances by one per frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TimecodeRun {
    pub start: u64,
    pub duration: u64,
    pub counter: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimecodeInfo {
    pub description: TimecodeSampleDescriptionDataEntry,
    pub timescale: u32,
    pub runs: Vec<TimecodeRun>,
}

impl TimecodeInfo {
    /// Resolves the timecode at `time`, given in the timecode track's timescale.
    pub fn timecode_at(&self, time: u64) -> Option<Timecode> {
        let run = self
            .runs
            .iter()
            .rev()
            .find(|run| run.start <= time)
            .or_else(|| self.runs.first())?;
        let frames = (time.saturating_sub(run.start) / self.description.frame_duration.max(1) as u64) as i64;
        let sample = self.description.add_frames_to_sample(TimecodeSample::Counter(run.counter), frames);
        Some(self.description.timecode(&sample))
    }
}

/// A track as the container stores it. Track maps refer to tracks by their position in the
/// container's track list.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: u32,
    pub kind: TrackKind,
    pub fourcc: CodecTag,
    /// The WAVE format tag, for AVI audio.
    pub wav_id: Option<u16>,
    pub timescale: u32,
    pub format: TrackFormat,
    pub compressor: String,
    pub index: TrackIndex,
    pub builder: IndexBuilder,
    /// Why the stored index is unusable, if it is.
    pub index_error: Option<String>,
    /// Bytes per audio frame, for audio stored with a constant frame size.
    pub bytes_per_frame: Option<u32>,
    pub timecode: Option<TimecodeInfo>,
    /// The id of the timecode track referenced by this one.
    pub timecode_track: Option<u32>,
    /// The presentation time playback starts from, taken from a movie's edit list.
    pub media_start: i64,
}

impl Track {
    pub fn new(kind: TrackKind, fourcc: CodecTag, timescale: u32, format: TrackFormat) -> Self {
        Self {
            id: 0,
            kind,
            fourcc,
            wav_id: None,
            timescale,
            format,
            compressor: String::new(),
            index: TrackIndex::Empty,
            builder: IndexBuilder::new(),
            index_error: None,
            bytes_per_frame: None,
            timecode: None,
            timecode_track: None,
            media_start: 0,
        }
    }

    pub fn codec_query(&self) -> CodecQuery {
        match self.wav_id {
            Some(id) => CodecQuery::WavId(id),
            None => CodecQuery::Fourcc(self.fourcc),
        }
    }

    pub fn stream_format(&self) -> StreamFormat {
        match self.format {
            TrackFormat::Audio { channels, sample_rate, bits } => StreamFormat::Audio {
                channels,
                sample_rate,
                bits,
            },
            TrackFormat::Video {
                width,
                height,
                frame_duration,
                ..
            } => StreamFormat::Video {
                width,
                height,
                timescale: self.timescale,
                frame_duration,
            },
            TrackFormat::Text | TrackFormat::Timecode { .. } => StreamFormat::Text,
        }
    }

    pub fn channels(&self) -> u16 {
        match self.format {
            TrackFormat::Audio { channels, .. } => channels,
            _ => 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self.format {
            TrackFormat::Audio { sample_rate, .. } => sample_rate,
            _ => self.timescale,
        }
    }

    pub fn bits(&self) -> u16 {
        match self.format {
            TrackFormat::Audio { bits, .. } => bits,
            TrackFormat::Video { depth, .. } => depth,
            _ => 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self.format {
            TrackFormat::Video { width, height, .. } => (width, height),
            _ => (0, 0),
        }
    }

    pub fn frame_duration(&self) -> u32 {
        match self.format {
            TrackFormat::Video { frame_duration, .. } | TrackFormat::Timecode { frame_duration } => frame_duration.max(1),
            _ => 1,
        }
    }

    /// The number of samples, whether the track is being read or written.
    pub fn sample_count(&self) -> u64 {
        match self.index {
            TrackIndex::Empty => self.builder.sample_count(),
            _ => self.index.sample_count(),
        }
    }
}

/// The state shared by every kind of track map.
pub struct MapCommon {
    pub track: usize,
    pub codec: Option<BoundCodec>,
    /// The next sample of the track's index to read.
    pub position: u64,
    pub cursor: IndexCursor,
    pub state: TrackState,
}

impl MapCommon {
    pub fn new(track: usize, failed: bool) -> Self {
        Self {
            track,
            codec: None,
            position: 0,
            cursor: IndexCursor::default(),
            state: if failed { TrackState::Failed } else { TrackState::Idle },
        }
    }

    /// Moves to `sample`, dropping any decoder state.
    pub fn reposition(&mut self, sample: u64) -> Result<(), av_traits::CodecError> {
        self.position = sample;
        if self.state != TrackState::Failed {
            self.state = TrackState::Positioned;
        }
        if let Some(bound) = &mut self.codec {
            match bound.codec.resync() {
                Ok(()) | Err(av_traits::CodecError::Unsupported(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

pub struct AudioMap {
    pub common: MapCommon,
    /// Decoded frames not yet handed to the caller.
    pub decoded: AudioBuffer,
    /// Decoded frames to drop before the caller's position.
    pub skip: u64,
    /// The caller's position, in audio frames.
    pub frame_position: u64,
    /// Frames waiting for a full encoder packet.
    pub pending: Option<AudioBuffer>,
    /// Frames written so far, in the track's timescale.
    pub written: u64,
}

impl AudioMap {
    pub fn new(track: usize, channels: u16, failed: bool) -> Self {
        Self {
            common: MapCommon::new(track, failed),
            decoded: AudioBuffer::new(SampleFormat::S16, channels),
            skip: 0,
            frame_position: 0,
            pending: None,
            written: 0,
        }
    }
}

pub struct VideoMap {
    pub common: MapCommon,
    /// The colormodel the codec works in, once negotiated.
    pub colormodel: Option<Colormodel>,
    /// An intermediate frame for when the codec's colormodel differs from the caller's.
    pub scratch: Option<VideoFrame>,
    /// Pictures handed to the encoder that haven't come back as packets yet.
    pub reorder: VecDeque<(u64, i64)>,
    pub pictures_submitted: u64,
    /// (frame, counter) pairs recorded while writing.
    pub timecodes: Vec<(u64, u32)>,
}

impl VideoMap {
    pub fn new(track: usize, failed: bool) -> Self {
        Self {
            common: MapCommon::new(track, failed),
            colormodel: None,
            scratch: None,
            reorder: VecDeque::new(),
            pictures_submitted: 0,
            timecodes: Vec::new(),
        }
    }

    /// Picks the presentation time for a packet the encoder produced. Encoders that report the
    /// timestamp of a submitted picture keep it, the rest get pictures' timestamps in submission
    /// order.
    pub fn resolve_timestamp(&mut self, reported: i64) -> i64 {
        if let Some(i) = self.reorder.iter().position(|&(_, t)| t == reported) {
            self.reorder.remove(i);
            return reported;
        }
        match self.reorder.pop_front() {
            Some((picture, t)) => {
                log::debug!("encoder reported unknown timestamp {}, using picture {} at {}", reported, picture, t);
                t
            }
            None => reported,
        }
    }

    /// Collapses recorded timecodes into runs of a continuously advancing counter.
    pub fn timecode_runs(&self, description: &TimecodeSampleDescriptionDataEntry) -> Vec<(u64, u32)> {
        let mut timecodes = self.timecodes.clone();
        timecodes.sort_by_key(|&(frame, _)| frame);
        let mut runs: Vec<(u64, u32)> = Vec::new();
        for (frame, counter) in timecodes {
            if let Some(&(first_frame, first_counter)) = runs.last() {
                let expected = description.add_frames_to_sample(TimecodeSample::Counter(first_counter), (frame - first_frame) as i64);
                if expected.data() == counter {
                    continue;
                }
                if first_frame == frame {
                    runs.pop();
                }
            }
            runs.push((frame, counter));
        }
        // the track starts with the movie, so extrapolate the first run back to frame 0
        if let Some(first) = runs.first_mut() {
            if first.0 > 0 {
                first.1 = description
                    .add_frames_to_sample(TimecodeSample::Counter(first.1), -(first.0 as i64))
                    .data();
                first.0 = 0;
            }
        }
        runs
    }
}

pub struct TextMap {
    pub common: MapCommon,
    /// Time written so far, in the track's timescale.
    pub written: u64,
}

impl TextMap {
    pub fn new(track: usize, failed: bool) -> Self {
        Self {
            common: MapCommon::new(track, failed),
            written: 0,
        }
    }
}
