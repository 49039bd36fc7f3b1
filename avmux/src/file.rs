use std::{
    io::{Read, Seek, SeekFrom, Write},
    sync::Arc,
};

use av_traits::{AudioBuffer, CodecError, CodecInfo, CodecTag, Colormodel, Direction, EncodedPacket, MediaKind, ParameterValue, VideoFrame};
use codecs::{negotiate_colormodel, BoundCodec, CodecLookup, CodecQuery, Registry};
use qtff::{Timecode, TimecodeSampleDescriptionDataEntry};
use riff::WAVE_FORMAT_PCM;

use crate::{
    avi::{read_avi, AviWriter},
    config::Config,
    convert::{CopyConverter, FrameConverter},
    index::{IndexCursor, TrackIndex},
    io::{BufferedStream, StreamState},
    qt::{read_movie, rescale, QtWriter},
    track::{AudioMap, MapCommon, TextMap, TimecodeInfo, Track, TrackFormat, TrackKind, TrackState, VideoMap},
    Error, Result,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerFormat {
    QuickTime,
    Mp4,
    Avi,
}

const TOP_LEVEL_ATOMS: [&[u8; 4]; 7] = [b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide", b"pnot"];

/// Uncompressed audio formats, which store one sample per audio frame.
const PCM_FOURCCS: [CodecTag; 6] = [
    CodecTag::new(b"twos"),
    CodecTag::new(b"sowt"),
    CodecTag::new(b"raw "),
    CodecTag::new(b"in24"),
    CodecTag::new(b"in32"),
    CodecTag::new(b"NONE"),
];

/// The most audio frames a single raw read returns.
const MAX_AUDIO_READ: u64 = 1 << 16;

/// Identifies the container from the first top-level chunk.
pub fn detect_format<R: Read + Seek>(mut reader: R) -> Result<ContainerFormat> {
    reader.seek(SeekFrom::Start(0))?;
    let mut header = Vec::with_capacity(12);
    reader.by_ref().take(12).read_to_end(&mut header)?;
    if header.len() == 12 && &header[..4] == b"RIFF" && &header[8..] == b"AVI " {
        return Ok(ContainerFormat::Avi);
    }
    if header.len() >= 8 && TOP_LEVEL_ATOMS.iter().any(|&typ| header[4..8] == typ[..]) {
        if &header[4..8] == b"ftyp" && header.len() == 12 && &header[8..] != b"qt  " {
            return Ok(ContainerFormat::Mp4);
        }
        return Ok(ContainerFormat::QuickTime);
    }
    Err(Error::UnknownFormat)
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits: u16,
    pub compressor: CodecTag,
    /// The WAVE format tag for AVI files. Looked up from the codec when unset.
    pub wav_id: Option<u16>,
}

impl AudioParams {
    pub fn new(channels: u16, sample_rate: u32, bits: u16, compressor: CodecTag) -> Self {
        Self {
            channels,
            sample_rate,
            bits,
            compressor,
            wav_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
    pub frame_duration: u32,
    pub compressor: CodecTag,
}

impl VideoParams {
    pub fn new(width: u32, height: u32, timescale: u32, frame_duration: u32, compressor: CodecTag) -> Self {
        Self {
            width,
            height,
            timescale,
            frame_duration,
            compressor,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextSample {
    pub text: String,
    pub time: i64,
    pub duration: u32,
}

enum Writer {
    Qt(QtWriter),
    Avi(AviWriter),
}

fn no_track(kind: &str, track: usize) -> Error {
    Error::usage(format!("no {} track {}", kind, track))
}

fn bind_codec(registry: &dyn CodecLookup, common: &mut MapCommon, track: &Track, direction: Direction) -> Result<()> {
    if common.codec.is_none() {
        let query = track.codec_query();
        let bound = registry.bind(&query, direction, &track.stream_format())?;
        log::debug!("track {}: bound {} for {}", track.id, bound.info.name, query);
        common.codec = Some(bound);
    }
    Ok(())
}

fn bound_codec(common: &mut MapCommon) -> Result<&mut BoundCodec> {
    common.codec.as_mut().ok_or_else(|| Error::usage("no codec is bound to the track"))
}

fn ignore_unsupported(result: std::result::Result<(), CodecError>) -> Result<()> {
    match result {
        Ok(()) | Err(CodecError::Unsupported(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn scratch_frame(scratch: &mut Option<VideoFrame>, colormodel: Colormodel, width: u32, height: u32) -> &mut VideoFrame {
    if scratch
        .as_ref()
        .map_or(false, |f| f.colormodel != colormodel || f.width != width || f.height != height)
    {
        *scratch = None;
    }
    scratch.get_or_insert_with(|| VideoFrame::new(colormodel, width, height))
}

/// Reads the sample at the map's position and advances it. Constant size audio is read up to
/// `max_samples` frames at a time, never past the end of a chunk.
fn read_packet<S: Read + Write + Seek>(
    stream: &mut BufferedStream<S>,
    track: &Track,
    common: &mut MapCommon,
    max_samples: u64,
) -> Result<Option<EncodedPacket>> {
    let map_track = common.track;
    if common.state == TrackState::Failed {
        return Err(Error::MalformedIndex {
            track: map_track,
            reason: track.index_error.clone().unwrap_or_else(|| "the track is unusable".to_string()),
        });
    }
    let index = &track.index;
    let sample = common.position;
    if sample >= index.sample_count() {
        common.state = TrackState::Eof;
        return Ok(None);
    }
    let cursor = &mut common.cursor;
    let location = index.locate(sample, cursor).ok_or_else(|| Error::MalformedIndex {
        track: map_track,
        reason: format!("sample {} has no location", sample),
    })?;
    let samples = match track.bytes_per_frame {
        Some(_) => index
            .chunk_span(sample, cursor)
            .map_or(1, |(first, count)| (first + count).saturating_sub(sample))
            .clamp(1, max_samples.max(1)),
        None => 1,
    };
    let bytes = location.size as u64 * samples;
    let end = location.offset.checked_add(bytes).unwrap_or(u64::MAX);
    let len = stream.length()?;
    if end > len || usize::try_from(bytes).is_err() {
        return Err(Error::MalformedIndex {
            track: map_track,
            reason: format!(
                "sample {} of {} bytes at offset {} runs past the end of the file at {}",
                sample, bytes, location.offset, len
            ),
        });
    }
    stream.seek(SeekFrom::Start(location.offset))?;
    let mut data = vec![0; bytes as usize];
    stream.read_exact(&mut data)?;
    let pts = index.presentation_time(sample, cursor).unwrap_or(0);
    let duration = index.sample_duration(sample, cursor).unwrap_or(1);
    common.position += samples;
    Ok(Some(EncodedPacket {
        data,
        pts,
        duration: duration.saturating_mul(u32::try_from(samples).unwrap_or(u32::MAX)),
        samples: samples as u32,
        keyframe: index.is_keyframe(sample),
    }))
}

/// An open QuickTime, MP4 or AVI file. Files are either read or written, never both.
///
/// Tracks are addressed per media type: audio track 0 is the first audio track, whatever its
/// position in the container.
pub struct MediaFile<S: Read + Write + Seek> {
    stream: BufferedStream<S>,
    format: ContainerFormat,
    config: Config,
    registry: Arc<dyn CodecLookup>,
    converter: Box<dyn FrameConverter>,
    tracks: Vec<Track>,
    audio: Vec<AudioMap>,
    video: Vec<VideoMap>,
    text: Vec<TextMap>,
    writer: Option<Writer>,
}

impl<S: Read + Write + Seek> MediaFile<S> {
    fn new(
        stream: BufferedStream<S>,
        format: ContainerFormat,
        config: Config,
        registry: Arc<dyn CodecLookup>,
        tracks: Vec<Track>,
        writer: Option<Writer>,
    ) -> Self {
        let mut audio = Vec::new();
        let mut video = Vec::new();
        let mut text = Vec::new();
        for (i, track) in tracks.iter().enumerate() {
            if let Some(reason) = &track.index_error {
                log::warn!("track {} is unusable: {}", track.id, reason);
            }
            let failed = track.index_error.is_some();
            match track.kind {
                TrackKind::Audio => audio.push(AudioMap::new(i, track.channels(), failed)),
                TrackKind::Video => video.push(VideoMap::new(i, failed)),
                TrackKind::Text => text.push(TextMap::new(i, failed)),
                TrackKind::Timecode => {}
            }
        }
        Self {
            stream,
            format,
            config,
            registry,
            converter: Box::new(CopyConverter),
            tracks,
            audio,
            video,
            text,
            writer,
        }
    }

    /// Opens a file for reading, configured from the environment and using the global codec registry.
    pub fn open(stream: S) -> Result<Self> {
        Self::open_with(stream, Config::from_env(), Registry::global())
    }

    pub fn open_with(stream: S, config: Config, registry: Arc<dyn CodecLookup>) -> Result<Self> {
        let mut stream = BufferedStream::new(stream, config.preload_size, 0);
        let (format, tracks) = match detect_format(&mut stream)? {
            ContainerFormat::Avi => (ContainerFormat::Avi, read_avi(&mut stream)?),
            _ => {
                let movie = read_movie(&mut stream)?;
                let format = if movie.mp4 { ContainerFormat::Mp4 } else { ContainerFormat::QuickTime };
                (format, movie.tracks)
            }
        };
        let file = Self::new(stream, format, config, registry, tracks, None);
        log::debug!(
            "opened {:?} file with {} audio, {} video and {} text tracks",
            file.format,
            file.audio.len(),
            file.video.len(),
            file.text.len()
        );
        Ok(file)
    }

    /// Creates a new file for writing, configured from the environment and using the global codec
    /// registry.
    pub fn create(stream: S, format: ContainerFormat) -> Result<Self> {
        Self::create_with(stream, format, Config::from_env(), Registry::global())
    }

    pub fn create_with(stream: S, format: ContainerFormat, config: Config, registry: Arc<dyn CodecLookup>) -> Result<Self> {
        let mut stream = BufferedStream::new(stream, 0, config.presave_size);
        let writer = match format {
            ContainerFormat::QuickTime => Writer::Qt(QtWriter::begin(&mut stream, false)?),
            ContainerFormat::Mp4 => Writer::Qt(QtWriter::begin(&mut stream, true)?),
            ContainerFormat::Avi => Writer::Avi(AviWriter::new(config.riff_segment_size)),
        };
        Ok(Self::new(stream, format, config, registry, Vec::new(), Some(writer)))
    }

    /// Replaces the converter used when a codec works in a different colormodel than the caller.
    pub fn set_converter(&mut self, converter: Box<dyn FrameConverter>) {
        self.converter = converter;
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn is_writing(&self) -> bool {
        self.writer.is_some()
    }

    pub fn audio_track_count(&self) -> usize {
        self.audio.len()
    }

    pub fn video_track_count(&self) -> usize {
        self.video.len()
    }

    pub fn text_track_count(&self) -> usize {
        self.text.len()
    }

    fn check_writing(&self) -> Result<()> {
        match self.writer {
            Some(_) => Ok(()),
            None => Err(Error::usage("the file was opened for reading")),
        }
    }

    fn check_can_add_track(&self) -> Result<()> {
        match &self.writer {
            None => Err(Error::usage("tracks can only be added to new files")),
            Some(Writer::Avi(avi)) if avi.is_started() => Err(Error::usage("tracks can't be added to an AVI file after data has been written")),
            Some(_) => Ok(()),
        }
    }

    fn push_track(&mut self, mut track: Track) -> usize {
        track.id = self.tracks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    fn audio_track(&self, track: usize) -> Result<&Track> {
        let map = self.audio.get(track).ok_or_else(|| no_track("audio", track))?;
        Ok(&self.tracks[map.common.track])
    }

    fn video_track(&self, track: usize) -> Result<&Track> {
        let map = self.video.get(track).ok_or_else(|| no_track("video", track))?;
        Ok(&self.tracks[map.common.track])
    }

    fn common(&self, kind: MediaKind, track: usize) -> Result<&MapCommon> {
        match kind {
            MediaKind::Audio => self.audio.get(track).map(|m| &m.common),
            MediaKind::Video => self.video.get(track).map(|m| &m.common),
            MediaKind::Text => self.text.get(track).map(|m| &m.common),
        }
        .ok_or_else(|| no_track(&format!("{:?}", kind).to_lowercase(), track))
    }

    pub fn add_audio_track(&mut self, params: &AudioParams) -> Result<usize> {
        self.check_can_add_track()?;
        let info = self.registry.find(&CodecQuery::Fourcc(params.compressor), Direction::Encode);
        let mut track = Track::new(
            TrackKind::Audio,
            params.compressor,
            params.sample_rate.max(1),
            TrackFormat::Audio {
                channels: params.channels,
                sample_rate: params.sample_rate,
                bits: params.bits,
            },
        );
        let fixed_frame_size = info
            .as_ref()
            .map_or_else(|| PCM_FOURCCS.contains(&params.compressor), |info| info.fixed_frame_size);
        if fixed_frame_size {
            track.bytes_per_frame = Some((params.channels as u32 * params.bits as u32 / 8).max(1));
        }
        if self.format == ContainerFormat::Avi {
            let wav_id = params.wav_id.or_else(|| info.as_ref().and_then(|info| info.wav_ids.first().copied()));
            track.wav_id = Some(wav_id.unwrap_or_else(|| {
                log::warn!("no WAVE format tag for '{}', storing it as PCM", params.compressor);
                WAVE_FORMAT_PCM
            }));
        }
        if let Some(info) = &info {
            track.compressor = info.long_name.clone();
        }
        let index = self.push_track(track);
        self.audio.push(AudioMap::new(index, params.channels, false));
        Ok(self.audio.len() - 1)
    }

    pub fn add_video_track(&mut self, params: &VideoParams) -> Result<usize> {
        self.check_can_add_track()?;
        let mut track = Track::new(
            TrackKind::Video,
            params.compressor,
            params.timescale.max(1),
            TrackFormat::Video {
                width: params.width,
                height: params.height,
                frame_duration: params.frame_duration.max(1),
                depth: 24,
            },
        );
        if let Some(info) = self.registry.find(&CodecQuery::Fourcc(params.compressor), Direction::Encode) {
            track.compressor = info.long_name;
        }
        let index = self.push_track(track);
        self.video.push(VideoMap::new(index, false));
        Ok(self.video.len() - 1)
    }

    pub fn add_text_track(&mut self, timescale: u32) -> Result<usize> {
        self.check_can_add_track()?;
        if self.format == ContainerFormat::Avi {
            return Err(Error::usage("AVI files can't hold text tracks"));
        }
        let index = self.push_track(Track::new(TrackKind::Text, CodecTag::new(b"text"), timescale.max(1), TrackFormat::Text));
        self.text.push(TextMap::new(index, false));
        Ok(self.text.len() - 1)
    }

    /// Appends sample data to the container and returns where it landed.
    fn write_sample(&mut self, index: usize, data: &[u8], keyframe: bool, ticks: u32) -> Result<u64> {
        match &mut self.writer {
            Some(Writer::Qt(_)) => {
                let offset = self.stream.stream_position()?;
                self.stream.write_all(data)?;
                Ok(offset)
            }
            Some(Writer::Avi(avi)) => avi.write_chunk(&mut self.stream, &self.tracks, index, data, keyframe, ticks),
            None => Err(Error::usage("the file was opened for reading")),
        }
    }

    /// Writes one compressed frame. Frames may be written in decode order with out of order
    /// presentation times.
    pub fn write_video_packet(&mut self, track: usize, packet: &EncodedPacket) -> Result<()> {
        self.check_writing()?;
        let index = self.video.get(track).ok_or_else(|| no_track("video", track))?.common.track;
        let duration = if packet.duration > 0 { packet.duration } else { self.tracks[index].frame_duration() };
        let offset = self.write_sample(index, &packet.data, packet.keyframe, 1)?;
        self.tracks[index]
            .builder
            .add_sample(offset, packet.data.len() as u32, packet.keyframe, packet.pts, duration);
        self.video[track].common.state = TrackState::Encoding;
        Ok(())
    }

    /// Writes one compressed audio packet. Uncompressed audio must hold whole audio frames.
    pub fn write_audio_packet(&mut self, track: usize, packet: &EncodedPacket) -> Result<()> {
        self.check_writing()?;
        let index = self.audio.get(track).ok_or_else(|| no_track("audio", track))?.common.track;
        let len = packet.data.len() as u32;
        match self.tracks[index].bytes_per_frame {
            Some(bytes) => {
                if len % bytes != 0 {
                    return Err(Error::usage(format!("{} bytes is not a whole number of {} byte audio frames", len, bytes)));
                }
                let frames = len / bytes;
                let offset = self.write_sample(index, &packet.data, true, frames)?;
                self.tracks[index].builder.add_samples(offset, frames, bytes, 1);
                self.audio[track].written += frames as u64;
            }
            None => {
                let duration = packet.duration.max(1);
                if let Some(Writer::Avi(avi)) = &mut self.writer {
                    avi.set_packet_duration(index, duration);
                }
                let offset = self.write_sample(index, &packet.data, true, 1)?;
                let time = self.audio[track].written as i64;
                self.tracks[index].builder.add_sample(offset, len, true, time, duration);
                self.audio[track].written += duration as u64;
            }
        }
        self.audio[track].common.state = TrackState::Encoding;
        Ok(())
    }

    /// Writes one text sample lasting `duration` ticks of the track's timescale.
    pub fn write_text(&mut self, track: usize, text: &str, duration: u32) -> Result<()> {
        self.check_writing()?;
        let index = self.text.get(track).ok_or_else(|| no_track("text", track))?.common.track;
        let bytes = text.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(Error::usage(format!("text sample of {} bytes is too long", bytes.len())));
        }
        let mut data = Vec::with_capacity(bytes.len() + 2);
        data.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        data.extend_from_slice(bytes);
        let offset = self.write_sample(index, &data, true, 1)?;
        let duration = duration.max(1);
        let time = self.text[track].written as i64;
        self.tracks[index].builder.add_sample(offset, data.len() as u32, true, time, duration);
        self.text[track].written += duration as u64;
        self.text[track].common.state = TrackState::Encoding;
        Ok(())
    }

    /// Reads the next compressed frame, or `None` at the end of the track.
    pub fn read_video_packet(&mut self, track: usize) -> Result<Option<EncodedPacket>> {
        let Self { stream, tracks, video, .. } = self;
        let map = video.get_mut(track).ok_or_else(|| no_track("video", track))?;
        read_packet(stream, &tracks[map.common.track], &mut map.common, 1)
    }

    /// Reads the next audio packet. Uncompressed audio comes back a chunk at a time.
    pub fn read_audio_packet(&mut self, track: usize) -> Result<Option<EncodedPacket>> {
        let Self { stream, tracks, audio, .. } = self;
        let map = audio.get_mut(track).ok_or_else(|| no_track("audio", track))?;
        let packet = read_packet(stream, &tracks[map.common.track], &mut map.common, MAX_AUDIO_READ)?;
        if let Some(packet) = &packet {
            map.frame_position += packet.samples as u64;
        }
        Ok(packet)
    }

    pub fn read_text(&mut self, track: usize) -> Result<Option<TextSample>> {
        let Self { stream, tracks, text, .. } = self;
        let map = text.get_mut(track).ok_or_else(|| no_track("text", track))?;
        let Some(packet) = read_packet(stream, &tracks[map.common.track], &mut map.common, 1)? else {
            return Ok(None);
        };
        let text = match packet.data.get(..2) {
            Some(len) => {
                let end = (2 + u16::from_be_bytes([len[0], len[1]]) as usize).min(packet.data.len());
                String::from_utf8_lossy(&packet.data[2..end]).into_owned()
            }
            None => String::new(),
        };
        Ok(Some(TextSample {
            text,
            time: packet.pts,
            duration: packet.duration,
        }))
    }

    /// Decodes the next frame into `frame`, converting from the codec's colormodel if it can't
    /// produce the frame's. Returns false at the end of the track.
    pub fn decode_video(&mut self, track: usize, frame: &mut VideoFrame) -> Result<bool> {
        let Self {
            stream,
            tracks,
            video,
            registry,
            converter,
            ..
        } = self;
        let map = video.get_mut(track).ok_or_else(|| no_track("video", track))?;
        let t = &tracks[map.common.track];
        bind_codec(&**registry, &mut map.common, t, Direction::Decode)?;
        let native = negotiate_colormodel(&bound_codec(&mut map.common)?.info, Direction::Decode, frame.colormodel)?;
        let (position, cursor) = (map.common.position, map.common.cursor.clone());
        let Some(packet) = read_packet(stream, t, &mut map.common, 1)? else {
            return Ok(false);
        };
        let (width, height) = t.dimensions();
        map.colormodel = Some(native);
        let bound = bound_codec(&mut map.common)?;
        let decoded = if native == frame.colormodel {
            bound.codec.decode_video(&packet, frame).map_err(Error::from)
        } else {
            let scratch = scratch_frame(&mut map.scratch, native, width, height);
            match bound.codec.decode_video(&packet, scratch) {
                Ok(()) => converter.convert(scratch, frame),
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = decoded {
            // the frame stays next in line
            map.common.position = position;
            map.common.cursor = cursor;
            return Err(e);
        }
        map.common.state = TrackState::Decoding;
        Ok(true)
    }

    /// Decodes up to `frames` audio frames onto the end of `output`. Returns how many were
    /// decoded, which is less than requested only at the end of the track.
    pub fn decode_audio(&mut self, track: usize, frames: usize, output: &mut AudioBuffer) -> Result<usize> {
        let Self {
            stream,
            tracks,
            audio,
            registry,
            ..
        } = self;
        let map = audio.get_mut(track).ok_or_else(|| no_track("audio", track))?;
        let t = &tracks[map.common.track];
        bind_codec(&**registry, &mut map.common, t, Direction::Decode)?;
        while (map.decoded.frames() as u64) < map.skip + frames as u64 {
            let Some(packet) = read_packet(stream, t, &mut map.common, MAX_AUDIO_READ)? else {
                break;
            };
            bound_codec(&mut map.common)?.codec.decode_audio(&packet, &mut map.decoded)?;
        }
        let skip = map.skip.min(map.decoded.frames() as u64);
        map.decoded.skip_front(skip as usize);
        map.skip -= skip;
        let n = frames.min(map.decoded.frames());
        output.append(&map.decoded.take_front(n));
        map.frame_position += n as u64;
        if n > 0 && map.common.state != TrackState::Eof {
            map.common.state = TrackState::Decoding;
        }
        Ok(n)
    }

    fn write_video_packets(&mut self, track: usize, packets: Vec<EncodedPacket>) -> Result<()> {
        for mut packet in packets {
            packet.pts = self.video[track].resolve_timestamp(packet.pts);
            self.write_video_packet(track, &packet)?;
        }
        Ok(())
    }

    /// Encodes one picture, converting it first if the codec can't take its colormodel.
    /// Pictures are submitted in presentation order.
    pub fn encode_video(&mut self, track: usize, frame: &VideoFrame) -> Result<()> {
        self.check_writing()?;
        let packets = {
            let Self {
                tracks,
                video,
                registry,
                converter,
                ..
            } = self;
            let map = video.get_mut(track).ok_or_else(|| no_track("video", track))?;
            let t = &tracks[map.common.track];
            bind_codec(&**registry, &mut map.common, t, Direction::Encode)?;
            let bound = bound_codec(&mut map.common)?;
            let native = negotiate_colormodel(&bound.info, Direction::Encode, frame.colormodel)?;
            map.colormodel = Some(native);
            map.reorder.push_back((map.pictures_submitted, frame.timestamp));
            map.pictures_submitted += 1;
            let mut packets = Vec::new();
            if native == frame.colormodel {
                bound.codec.encode_video(frame, &mut packets)?;
            } else {
                let scratch = scratch_frame(&mut map.scratch, native, frame.width, frame.height);
                converter.convert(frame, scratch)?;
                bound.codec.encode_video(scratch, &mut packets)?;
            }
            map.common.state = TrackState::Encoding;
            packets
        };
        self.write_video_packets(track, packets)
    }

    /// Encodes audio. Codecs with a fixed packet size get whole packets, and any remainder is kept
    /// for the next call or for close.
    pub fn encode_audio(&mut self, track: usize, input: &AudioBuffer) -> Result<()> {
        self.check_writing()?;
        let packets = {
            let Self { tracks, audio, registry, .. } = self;
            let map = audio.get_mut(track).ok_or_else(|| no_track("audio", track))?;
            let t = &tracks[map.common.track];
            bind_codec(&**registry, &mut map.common, t, Direction::Encode)?;
            let bound = bound_codec(&mut map.common)?;
            let per_packet = bound.info.samples_per_packet as usize;
            let mut packets = Vec::new();
            if per_packet == 0 {
                bound.codec.encode_audio(input, &mut packets)?;
            } else {
                let pending = map
                    .pending
                    .get_or_insert_with(|| AudioBuffer::new(input.samples.format(), input.channels));
                pending.append(input);
                while pending.frames() >= per_packet {
                    let packet = pending.take_front(per_packet);
                    bound.codec.encode_audio(&packet, &mut packets)?;
                }
            }
            map.common.state = TrackState::Encoding;
            packets
        };
        for packet in &packets {
            self.write_audio_packet(track, packet)?;
        }
        Ok(())
    }

    fn codec_for(&mut self, kind: MediaKind, track: usize) -> Result<(&mut BoundCodec, Direction)> {
        let direction = if self.writer.is_some() { Direction::Encode } else { Direction::Decode };
        let Self {
            tracks,
            audio,
            video,
            registry,
            ..
        } = self;
        let common = match kind {
            MediaKind::Audio => audio.get_mut(track).map(|m| &mut m.common),
            MediaKind::Video => video.get_mut(track).map(|m| &mut m.common),
            MediaKind::Text => return Err(Error::usage("text tracks have no codec")),
        }
        .ok_or_else(|| no_track(&format!("{:?}", kind).to_lowercase(), track))?;
        let t = &tracks[common.track];
        bind_codec(&**registry, common, t, direction)?;
        Ok((bound_codec(common)?, direction))
    }

    /// Sets a codec parameter, checking it against the codec's declared parameters when it
    /// declares the key.
    pub fn set_parameter(&mut self, kind: MediaKind, track: usize, key: &str, value: &ParameterValue) -> Result<()> {
        let (bound, direction) = self.codec_for(kind, track)?;
        match bound.info.parameter(direction, key) {
            Some(info) if !info.accepts(value) => {
                return Err(Error::usage(format!("{:?} is not a valid value for {}", value, key)));
            }
            Some(_) => {}
            None => log::debug!("{} doesn't declare parameter {}", bound.info.name, key),
        }
        bound.codec.set_parameter(key, value)?;
        Ok(())
    }

    pub fn set_pass(&mut self, kind: MediaKind, track: usize, pass: u32, total: u32, stats_file: Option<&str>) -> Result<()> {
        let (bound, _) = self.codec_for(kind, track)?;
        bound.codec.set_pass(pass, total, stats_file)?;
        Ok(())
    }

    pub fn set_video_position(&mut self, track: usize, frame: u64) -> Result<()> {
        let map = self.video.get_mut(track).ok_or_else(|| no_track("video", track))?;
        map.common.reposition(frame)?;
        Ok(())
    }

    /// Positions the track at the frame whose decode interval contains `time`, in the track's
    /// timescale, and returns that frame. `time` is a presentation time, so a track whose edit
    /// list starts at 1001 reaches its first frame at 1001.
    pub fn seek_video_time(&mut self, track: usize, time: u64) -> Result<u64> {
        let Self { tracks, video, .. } = self;
        let map = video.get_mut(track).ok_or_else(|| no_track("video", track))?;
        let t = &tracks[map.common.track];
        let index = &t.index;
        let frame = index
            .time_to_sample(time.saturating_sub(t.media_start.max(0) as u64), &mut map.common.cursor)
            .unwrap_or_else(|| index.sample_count());
        map.common.reposition(frame)?;
        Ok(frame)
    }

    /// Positions the track at an audio frame. Compressed audio is decoded from the start of the
    /// packet holding the frame and the frames before it are dropped.
    pub fn set_audio_position(&mut self, track: usize, frame: u64) -> Result<()> {
        let Self { tracks, audio, .. } = self;
        let map = audio.get_mut(track).ok_or_else(|| no_track("audio", track))?;
        let t = &tracks[map.common.track];
        let time = rescale(frame, t.sample_rate(), t.timescale);
        let cursor = &mut map.common.cursor;
        let (sample, skip) = match t.index.time_to_sample(time, cursor) {
            Some(sample) => {
                let start = t.index.decode_time(sample, cursor).unwrap_or(time);
                (sample, rescale(time.saturating_sub(start), t.timescale, t.sample_rate()))
            }
            None => (t.index.sample_count(), 0),
        };
        map.common.reposition(sample)?;
        map.decoded = AudioBuffer::new(map.decoded.samples.format(), t.channels());
        map.skip = skip;
        map.frame_position = frame;
        Ok(())
    }

    pub fn set_text_position(&mut self, track: usize, sample: u64) -> Result<()> {
        let map = self.text.get_mut(track).ok_or_else(|| no_track("text", track))?;
        map.common.reposition(sample)?;
        Ok(())
    }

    pub fn video_position(&self, track: usize) -> Result<u64> {
        Ok(self.video.get(track).ok_or_else(|| no_track("video", track))?.common.position)
    }

    /// The caller's position in audio frames.
    pub fn audio_position(&self, track: usize) -> Result<u64> {
        Ok(self.audio.get(track).ok_or_else(|| no_track("audio", track))?.frame_position)
    }

    pub fn is_keyframe(&self, track: usize, frame: u64) -> Result<bool> {
        let t = self.video_track(track)?;
        Ok(match self.writer {
            Some(_) => t.builder.is_keyframe(frame),
            None => t.index.is_keyframe(frame),
        })
    }

    /// The last keyframe at or before `frame`.
    pub fn keyframe_before(&self, track: usize, frame: u64) -> Result<Option<u64>> {
        let t = self.video_track(track)?;
        Ok(match self.writer {
            Some(_) => t
                .builder
                .sample_count()
                .checked_sub(1)
                .and_then(|last| (0..=frame.min(last)).rev().find(|&s| t.builder.is_keyframe(s))),
            None => t.index.keyframe_before(frame),
        })
    }

    /// The first keyframe at or after `frame`.
    pub fn keyframe_after(&self, track: usize, frame: u64) -> Result<Option<u64>> {
        let t = self.video_track(track)?;
        Ok(match self.writer {
            Some(_) => (frame..t.builder.sample_count()).find(|&s| t.builder.is_keyframe(s)),
            None => t.index.keyframe_after(frame),
        })
    }

    /// Marks an already written frame as a keyframe. AVI indexes already on disk are patched.
    pub fn insert_keyframe(&mut self, track: usize, frame: u64) -> Result<()> {
        self.check_writing()?;
        let index = self.video.get(track).ok_or_else(|| no_track("video", track))?.common.track;
        let builder = &mut self.tracks[index].builder;
        if frame >= builder.sample_count() {
            return Err(Error::usage(format!("frame {} hasn't been written", frame)));
        }
        if !builder.insert_keyframe(frame) {
            return Ok(());
        }
        if let Some(Writer::Avi(avi)) = &mut self.writer {
            avi.patch_keyframe(&mut self.stream, index, frame as usize)?;
        }
        Ok(())
    }

    /// The presentation time of a frame, in the track's timescale.
    pub fn frame_time(&self, track: usize, frame: u64) -> Result<Option<i64>> {
        Ok(self.video_track(track)?.index.presentation_time(frame, &mut IndexCursor::default()))
    }

    pub fn frame_duration(&self, track: usize, frame: u64) -> Result<Option<u32>> {
        Ok(self.video_track(track)?.index.sample_duration(frame, &mut IndexCursor::default()))
    }

    pub fn video_frame_count(&self, track: usize) -> Result<u64> {
        Ok(self.video_track(track)?.sample_count())
    }

    /// The length of the track in audio frames.
    pub fn audio_sample_count(&self, track: usize) -> Result<u64> {
        let t = self.audio_track(track)?;
        if t.bytes_per_frame.is_some() {
            return Ok(t.sample_count());
        }
        let duration = match t.index {
            TrackIndex::Empty => t.builder.total_duration(),
            _ => t.index.duration(),
        };
        Ok(rescale(duration, t.timescale, t.sample_rate()))
    }

    pub fn sample_rate(&self, track: usize) -> Result<u32> {
        Ok(self.audio_track(track)?.sample_rate())
    }

    pub fn channels(&self, track: usize) -> Result<u16> {
        Ok(self.audio_track(track)?.channels())
    }

    pub fn bits(&self, track: usize) -> Result<u16> {
        Ok(self.audio_track(track)?.bits())
    }

    pub fn frame_rate(&self, track: usize) -> Result<f64> {
        let t = self.video_track(track)?;
        Ok(t.timescale as f64 / t.frame_duration() as f64)
    }

    pub fn dimensions(&self, track: usize) -> Result<(u32, u32)> {
        Ok(self.video_track(track)?.dimensions())
    }

    pub fn video_compressor(&self, track: usize) -> Result<CodecTag> {
        Ok(self.video_track(track)?.fourcc)
    }

    pub fn audio_compressor(&self, track: usize) -> Result<CodecTag> {
        Ok(self.audio_track(track)?.fourcc)
    }

    /// The codec bound to a track, or the one that would be bound.
    pub fn codec_info(&self, kind: MediaKind, track: usize) -> Result<Option<CodecInfo>> {
        let common = self.common(kind, track)?;
        if let Some(bound) = &common.codec {
            return Ok(Some(bound.info.clone()));
        }
        let direction = if self.writer.is_some() { Direction::Encode } else { Direction::Decode };
        Ok(self.registry.find(&self.tracks[common.track].codec_query(), direction))
    }

    pub fn track_state(&self, kind: MediaKind, track: usize) -> Result<TrackState> {
        Ok(self.common(kind, track)?.state)
    }

    /// Records the timecode counter of a written frame. A timecode track is built from these when
    /// the file is closed.
    pub fn set_timecode(&mut self, track: usize, frame: u64, counter: u32) -> Result<()> {
        self.check_writing()?;
        let map = self.video.get_mut(track).ok_or_else(|| no_track("video", track))?;
        map.timecodes.push((frame, counter));
        Ok(())
    }

    /// The timecode of a frame, for video tracks with a timecode track.
    pub fn timecode_at(&self, track: usize, frame: u64) -> Result<Option<Timecode>> {
        let t = self.video_track(track)?;
        let Some(info) = &t.timecode else {
            return Ok(None);
        };
        let time = match &t.index {
            TrackIndex::Empty => frame * t.frame_duration() as u64,
            index => match index.decode_time(frame, &mut IndexCursor::default()) {
                Some(time) => time,
                None => return Ok(None),
            },
        };
        Ok(info.timecode_at(rescale(time, t.timescale, info.timescale)))
    }

    fn flush_encoders(&mut self) -> Result<()> {
        for track in 0..self.video.len() {
            let map = &mut self.video[track];
            if map.common.state != TrackState::Encoding {
                continue;
            }
            let Some(bound) = map.common.codec.as_mut() else {
                continue;
            };
            let mut packets = Vec::new();
            ignore_unsupported(bound.codec.flush(&mut packets))?;
            self.write_video_packets(track, packets)?;
        }
        for track in 0..self.audio.len() {
            let map = &mut self.audio[track];
            if map.common.state != TrackState::Encoding {
                continue;
            }
            let Some(bound) = map.common.codec.as_mut() else {
                continue;
            };
            let mut packets = Vec::new();
            if let Some(pending) = map.pending.take().filter(|p| !p.is_empty()) {
                bound.codec.encode_audio(&pending, &mut packets)?;
            }
            ignore_unsupported(bound.codec.flush(&mut packets))?;
            for packet in &packets {
                self.write_audio_packet(track, packet)?;
            }
        }
        Ok(())
    }

    /// Writes one timecode sample per run of continuous counters and links the timecode track
    /// to its video track.
    fn write_timecode_tracks(&mut self) -> Result<()> {
        for track in 0..self.video.len() {
            if self.video[track].timecodes.is_empty() {
                continue;
            }
            if self.format == ContainerFormat::Avi {
                log::warn!("AVI files can't hold timecodes, dropping those of video track {}", track);
                continue;
            }
            let index = self.video[track].common.track;
            let (timescale, frame_duration, frames) = {
                let t = &self.tracks[index];
                (t.timescale, t.frame_duration() as u64, t.sample_count())
            };
            let description = TimecodeSampleDescriptionDataEntry::new(timescale, frame_duration as u32);
            let runs = self.video[track].timecode_runs(&description);
            let mut tmcd = Track::new(
                TrackKind::Timecode,
                CodecTag::new(b"tmcd"),
                timescale,
                TrackFormat::Timecode {
                    frame_duration: frame_duration as u32,
                },
            );
            for (i, &(frame, counter)) in runs.iter().enumerate() {
                let end = runs.get(i + 1).map_or(frames.max(frame + 1), |&(next, _)| next);
                let offset = self.stream.stream_position()?;
                self.stream.write_all(&counter.to_be_bytes())?;
                tmcd.builder
                    .add_sample(offset, 4, true, (frame * frame_duration) as i64, ((end - frame) * frame_duration) as u32);
            }
            tmcd.timecode = Some(TimecodeInfo {
                description,
                timescale,
                runs: Vec::new(),
            });
            let tmcd = self.push_track(tmcd);
            let id = self.tracks[tmcd].id;
            self.tracks[index].timecode_track = Some(id);
            log::debug!("video track {}: wrote timecode track {} with {} runs", track, id, runs.len());
        }
        Ok(())
    }

    /// Finishes writing: flushes encoders, writes the index and headers and flushes the stream.
    /// Returns the underlying stream.
    pub fn close(mut self) -> Result<S> {
        if self.writer.is_some() {
            self.flush_encoders()?;
            self.write_timecode_tracks()?;
            let Self {
                stream,
                tracks,
                writer,
                config,
                ..
            } = &mut self;
            match writer {
                Some(Writer::Qt(qt)) => qt.finish(&mut *stream, &tracks[..], config.force_64bit_offsets)?,
                Some(Writer::Avi(avi)) => avi.finish(&mut *stream, &tracks[..])?,
                None => {}
            }
            self.stream.flush()?;
        }
        Ok(self.stream.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_traits::SampleFormat;
    use codecs::{plugin::DylibLoader, RegistryConfig};
    use std::io::Cursor;

    fn registry() -> Arc<dyn CodecLookup> {
        Arc::new(Registry::with_builtins(
            RegistryConfig {
                plugin_dir: None,
                cache_file: None,
                module_extension: "so".into(),
            },
            Box::new(DylibLoader),
        ))
    }

    fn create(format: ContainerFormat) -> MediaFile<Cursor<Vec<u8>>> {
        MediaFile::create_with(Cursor::new(Vec::new()), format, Config::default(), registry()).unwrap()
    }

    fn open(buf: Vec<u8>) -> MediaFile<Cursor<Vec<u8>>> {
        MediaFile::open_with(Cursor::new(buf), Config::default(), registry()).unwrap()
    }

    fn pcm_track(duration: u32) -> Track {
        let mut track = Track::new(
            TrackKind::Audio,
            CodecTag::new(b"twos"),
            48000,
            TrackFormat::Audio {
                channels: 1,
                sample_rate: 48000,
                bits: 8,
            },
        );
        track.bytes_per_frame = Some(1);
        track.builder.add_samples(0, 4, 1, duration);
        track.index = TrackIndex::Qt(crate::index::QtIndex::new(track.builder.finalize(false), Some(1)));
        track
    }

    #[test]
    fn test_packet_duration_saturates() {
        let track = pcm_track(u32::MAX / 2);
        let mut stream = BufferedStream::new(Cursor::new(vec![7; 4]), 0, 0);
        let mut common = MapCommon::new(0, false);
        let packet = read_packet(&mut stream, &track, &mut common, 4).unwrap().unwrap();
        assert_eq!(4, packet.samples);
        assert_eq!(vec![7; 4], packet.data);
        assert_eq!(u32::MAX, packet.duration);
        assert_eq!(4, common.position);
    }

    #[test]
    fn test_packet_past_end_of_file() {
        let track = pcm_track(1);
        let mut stream = BufferedStream::new(Cursor::new(vec![7; 3]), 0, 0);
        let mut common = MapCommon::new(0, false);
        assert!(matches!(
            read_packet(&mut stream, &track, &mut common, 4),
            Err(Error::MalformedIndex { track: 0, .. })
        ));
        assert_eq!(0, common.position);
        let packet = read_packet(&mut stream, &track, &mut common, 3).unwrap().unwrap();
        assert_eq!(3, packet.samples);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            ContainerFormat::Avi,
            detect_format(Cursor::new(b"RIFF\x04\0\0\0AVI ".to_vec())).unwrap()
        );
        assert_eq!(
            ContainerFormat::Mp4,
            detect_format(Cursor::new(b"\0\0\0\x14ftypisom".to_vec())).unwrap()
        );
        assert_eq!(
            ContainerFormat::QuickTime,
            detect_format(Cursor::new(b"\0\0\0\x14ftypqt  ".to_vec())).unwrap()
        );
        assert_eq!(
            ContainerFormat::QuickTime,
            detect_format(Cursor::new(b"\0\0\0\x08moov".to_vec())).unwrap()
        );
        assert!(matches!(detect_format(Cursor::new(b"hello world!".to_vec())), Err(Error::UnknownFormat)));
    }

    #[test]
    fn test_text_round_trip() {
        let mut file = create(ContainerFormat::QuickTime);
        let track = file.add_text_track(600).unwrap();
        file.write_text(track, "hello", 300).unwrap();
        file.write_text(track, "", 150).unwrap();
        file.write_text(track, "wörld", 600).unwrap();
        let buf = file.close().unwrap().into_inner();

        let mut file = open(buf);
        assert_eq!(1, file.text_track_count());
        let samples: Vec<_> = std::iter::from_fn(|| file.read_text(0).unwrap()).collect();
        assert_eq!(
            vec![
                TextSample {
                    text: "hello".to_string(),
                    time: 0,
                    duration: 300
                },
                TextSample {
                    text: String::new(),
                    time: 300,
                    duration: 150
                },
                TextSample {
                    text: "wörld".to_string(),
                    time: 450,
                    duration: 600
                },
            ],
            samples
        );
        assert_eq!(TrackState::Eof, file.track_state(MediaKind::Text, 0).unwrap());

        file.set_text_position(0, 2).unwrap();
        assert_eq!("wörld", file.read_text(0).unwrap().unwrap().text);
    }

    #[test]
    fn test_avi_rejects_text_and_late_tracks() {
        let mut file = create(ContainerFormat::Avi);
        assert!(matches!(file.add_text_track(600), Err(Error::Usage(_))));
        let video = file
            .add_video_track(&VideoParams::new(2, 2, 25, 1, CodecTag::new(b"raw ")))
            .unwrap();
        file.write_video_packet(
            video,
            &EncodedPacket {
                data: vec![0; 12],
                keyframe: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            file.add_audio_track(&AudioParams::new(2, 48000, 16, CodecTag::new(b"sowt"))),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_reading_file_rejects_writes() {
        let mut file = create(ContainerFormat::Mp4);
        file.add_audio_track(&AudioParams::new(1, 8000, 16, CodecTag::new(b"sowt"))).unwrap();
        file.encode_audio(0, &AudioBuffer::from_s16(1, (0..16).collect())).unwrap();
        let buf = file.close().unwrap().into_inner();

        let mut file = open(buf);
        assert_eq!(ContainerFormat::Mp4, file.format());
        assert!(!file.is_writing());
        let audio = AudioBuffer::from_s16(1, vec![0; 16]);
        assert!(matches!(file.encode_audio(0, &audio), Err(Error::Usage(_))));
        assert!(matches!(file.add_text_track(600), Err(Error::Usage(_))));
        assert!(matches!(file.sample_rate(1), Err(Error::Usage(_))));

        assert_eq!(16, file.audio_sample_count(0).unwrap());
        let mut decoded = AudioBuffer::new(SampleFormat::S16, 1);
        assert_eq!(10, file.decode_audio(0, 10, &mut decoded).unwrap());
        assert_eq!(6, file.decode_audio(0, 10, &mut decoded).unwrap());
        assert_eq!(0, file.decode_audio(0, 10, &mut decoded).unwrap());
        assert_eq!(AudioBuffer::from_s16(1, (0..16).collect()), decoded);
        assert_eq!(TrackState::Eof, file.track_state(MediaKind::Audio, 0).unwrap());
    }

    #[test]
    fn test_missing_codec() {
        let mut file = create(ContainerFormat::QuickTime);
        let track = file
            .add_video_track(&VideoParams::new(16, 16, 25, 1, CodecTag::new(b"zzzz")))
            .unwrap();
        assert_eq!(None, file.codec_info(MediaKind::Video, track).unwrap());
        let frame = VideoFrame::new(Colormodel::Rgb888, 16, 16);
        assert!(matches!(file.encode_video(track, &frame), Err(Error::CodecNotFound { .. })));

        // raw packets don't need a codec
        file.write_video_packet(
            track,
            &EncodedPacket {
                data: vec![1; 100],
                keyframe: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(1, file.video_frame_count(track).unwrap());
    }
}
