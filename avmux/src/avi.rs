//! AVI files with the OpenDML extensions: a `RIFF AVI ` segment holding the headers, the first
//! `movi` list and the legacy `idx1`, followed by `RIFF AVIX` segments that each hold another
//! `movi` list. Every segment ends its `movi` list with one `ix##` partial index per stream, and
//! each stream's `indx` super index lists those.

use std::io::{self, Read, Seek, SeekFrom, Write};

use av_traits::CodecTag;
use byteorder::{LittleEndian, WriteBytesExt};
use riff::{
    read_chunk, read_idx1, write_idx1, BitmapInfoHeader, Chunk, ChunkId, ChunkReader, ChunkSeekWriteExt, ChunkWriteExt,
    ExtendedAviHeader, Idx1Entry, MainAviHeader, PendingChunk, StandardIndex, StandardIndexEntry, StreamHeader, SuperIndex,
    SuperIndexEntry, WaveFormatEx, AVIF_HASINDEX, AVIF_ISINTERLEAVED, AVIF_TRUSTCKTYPE, AVIIF_KEYFRAME, AVIIF_LIST,
    WAVE_FORMAT_PCM,
};

use crate::{
    index::{AviChunk, AviIndex, TrackIndex},
    track::{Track, TrackFormat, TrackKind},
    Error, Result,
};

/// The number of partial indexes each stream's super index has room for.
pub const SUPER_INDEX_CAPACITY: usize = 256;

fn malformed(chunk: &Chunk, reason: &str) -> Error {
    Error::MalformedAtom {
        kind: "chunk",
        typ: chunk.id.to_string(),
        offset: chunk.offset,
        reason: reason.to_string(),
    }
}

fn children<R: Read + Seek>(reader: &mut R, list: &Chunk) -> Result<Vec<Chunk>> {
    Ok(ChunkReader::children(reader, list).collect::<riff::Result<Vec<_>>>()?)
}

struct StreamInfo {
    header: StreamHeader,
    format: Vec<u8>,
    super_index: Option<SuperIndex>,
}

/// Reads the stream headers and indexes of an AVI file and builds one track per audio or video
/// stream.
pub fn read_avi<R: Read + Seek>(mut reader: R) -> Result<Vec<Track>> {
    let len = reader.seek(SeekFrom::End(0))?;
    let segments = ChunkReader::new(&mut reader, 0, len).collect::<riff::Result<Vec<_>>>()?;
    let first = segments
        .first()
        .filter(|c| c.is(ChunkId::RIFF) && c.is_list_of(ChunkId::AVI))
        .ok_or(Error::UnknownFormat)?;

    let top = children(&mut reader, first)?;
    let hdrl = top
        .iter()
        .find(|c| c.is_list_of(ChunkId::HDRL))
        .ok_or_else(|| malformed(first, "missing header list"))?;
    let streams = read_stream_headers(&mut reader, hdrl)?;

    let mut movi_lists: Vec<Chunk> = top.iter().filter(|c| c.is_list_of(ChunkId::MOVI)).cloned().collect();
    for segment in segments.iter().skip(1).filter(|c| c.is_list_of(ChunkId::AVIX)) {
        movi_lists.extend(children(&mut reader, segment)?.into_iter().filter(|c| c.is_list_of(ChunkId::MOVI)));
    }

    let idx1 = match (top.iter().find(|c| c.is(ChunkId::IDX1)), movi_lists.first()) {
        (Some(idx1), Some(movi)) => {
            let entries = read_idx1(&idx1.read_data(&mut reader)?);
            resolve_idx1(&mut reader, &entries, movi, streams.len())?
        }
        _ => None,
    };
    // idx1 is only trusted when it covers every stream that claims to have data
    let idx1 = idx1.filter(|chunks| {
        let complete = streams
            .iter()
            .zip(chunks)
            .all(|(s, c)| s.header.length == 0 || !c.is_empty());
        if !complete {
            log::warn!("ignoring incomplete idx1 index");
        }
        complete
    });

    let mut walked: Option<Vec<Vec<AviChunk>>> = None;
    let mut tracks = Vec::new();
    for (n, stream) in streams.iter().enumerate() {
        let from_super_index = match stream.super_index.as_ref().filter(|s| !s.entries.is_empty()) {
            Some(super_index) => match read_partial_indexes(&mut reader, super_index, len) {
                Ok(chunks) => Some(chunks),
                Err(e) => {
                    log::warn!("unable to read the OpenDML index of stream {}: {}", n, e);
                    None
                }
            },
            None => None,
        };
        let chunks = match (from_super_index, &idx1) {
            (Some(chunks), idx1) => {
                if let (Some(idx1), Some(movi)) = (idx1, movi_lists.first()) {
                    let in_first_segment = chunks.iter().filter(|c| c.offset < movi.end()).count();
                    if in_first_segment != idx1[n].len() {
                        log::warn!(
                            "stream {}: idx1 lists {} chunks, the OpenDML index {}; using the OpenDML index",
                            n,
                            idx1[n].len(),
                            in_first_segment
                        );
                    }
                }
                chunks
            }
            (None, Some(idx1)) => idx1[n].clone(),
            (None, None) => {
                if walked.is_none() {
                    log::debug!("no usable index, walking the movi lists");
                    let mut chunks = vec![Vec::new(); streams.len()];
                    for movi in &movi_lists {
                        walk_movi(&mut reader, movi, &mut chunks)?;
                    }
                    walked = Some(chunks);
                }
                walked.as_ref().map(|w| w[n].clone()).unwrap_or_default()
            }
        };
        if let Some(track) = stream_track(n, stream, chunks) {
            tracks.push(track);
        }
    }
    Ok(tracks)
}

fn read_stream_headers<R: Read + Seek>(reader: &mut R, hdrl: &Chunk) -> Result<Vec<StreamInfo>> {
    let mut streams = Vec::new();
    for strl in children(reader, hdrl)?.into_iter().filter(|c| c.is_list_of(ChunkId::STRL)) {
        let mut info = StreamInfo {
            header: StreamHeader::default(),
            format: Vec::new(),
            super_index: None,
        };
        for chunk in children(reader, &strl)? {
            if chunk.is(ChunkId::STRH) {
                info.header = StreamHeader::read(chunk.read_data(&mut *reader)?.as_slice())?;
            } else if chunk.is(ChunkId::STRF) {
                info.format = chunk.read_data(&mut *reader)?;
            } else if chunk.is(ChunkId::INDX) {
                match SuperIndex::read(&chunk.read_data(&mut *reader)?) {
                    Ok(index) => info.super_index = Some(index),
                    Err(e) => log::warn!("ignoring super index of stream {}: {}", streams.len(), e),
                }
            }
        }
        streams.push(info);
    }
    Ok(streams)
}

fn chunk_id_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Option<ChunkId>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut id = [0; 4];
    match reader.read_exact(&mut id) {
        Ok(()) => Ok(Some(ChunkId(id))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Splits idx1 entries by stream. Offsets are usually relative to the `movi` list type but some
/// writers store absolute offsets, so the first entry is checked against the file.
fn resolve_idx1<R: Read + Seek>(reader: &mut R, entries: &[Idx1Entry], movi: &Chunk, streams: usize) -> Result<Option<Vec<Vec<AviChunk>>>> {
    let mut chunks = vec![Vec::new(); streams];
    let entries: Vec<&Idx1Entry> = entries
        .iter()
        .filter(|e| e.flags & AVIIF_LIST == 0 && e.id.parse_stream().is_some())
        .collect();
    let Some(first) = entries.first() else {
        return Ok(Some(chunks));
    };
    let relative = movi.offset + 8;
    let base = if chunk_id_at(reader, relative + first.offset as u64)? == Some(first.id) {
        relative
    } else if chunk_id_at(reader, first.offset as u64)? == Some(first.id) {
        0
    } else {
        log::warn!("idx1 offsets don't point at chunks, ignoring it");
        return Ok(None);
    };
    for e in entries {
        if let Some((stream, _)) = e.id.parse_stream() {
            if let Some(c) = chunks.get_mut(stream as usize) {
                c.push(AviChunk {
                    offset: base + e.offset as u64 + 8,
                    size: e.size,
                    keyframe: e.is_keyframe(),
                });
            }
        }
    }
    Ok(Some(chunks))
}

fn read_partial_indexes<R: Read + Seek>(reader: &mut R, super_index: &SuperIndex, len: u64) -> Result<Vec<AviChunk>> {
    let mut chunks = Vec::new();
    for entry in &super_index.entries {
        reader.seek(SeekFrom::Start(entry.offset))?;
        let chunk = read_chunk(reader, len)?.ok_or(Error::MalformedIndex {
            track: 0,
            reason: format!("partial index at {} is truncated", entry.offset),
        })?;
        let index = StandardIndex::read(&chunk.read_data(&mut *reader)?)?;
        chunks.extend(index.entries.iter().map(|e| AviChunk {
            offset: index.base_offset + e.offset as u64,
            size: e.size,
            keyframe: e.keyframe,
        }));
    }
    Ok(chunks)
}

fn walk_movi<R: Read + Seek>(reader: &mut R, list: &Chunk, chunks: &mut [Vec<AviChunk>]) -> Result<()> {
    for chunk in children(reader, list)? {
        if chunk.is_list_of(ChunkId::REC) {
            walk_movi(reader, &chunk, chunks)?;
        } else if let Some((stream, _)) = chunk.id.parse_stream() {
            if let Some(c) = chunks.get_mut(stream as usize) {
                c.push(AviChunk {
                    offset: chunk.data_offset(),
                    size: chunk.size,
                    keyframe: true,
                });
            }
        }
    }
    Ok(())
}

fn stream_track(n: usize, stream: &StreamInfo, chunks: Vec<AviChunk>) -> Option<Track> {
    let h = &stream.header;
    let mut track = if h.fcc_type == ChunkId::VIDS {
        let format = match BitmapInfoHeader::read(&stream.format) {
            Ok(format) => format,
            Err(e) => {
                log::warn!("skipping video stream {}: {}", n, e);
                return None;
            }
        };
        let fourcc = if format.compression.0 == [0; 4] { h.fcc_handler.0 } else { format.compression.0 };
        let mut track = Track::new(
            TrackKind::Video,
            CodecTag(fourcc),
            h.rate.max(1),
            TrackFormat::Video {
                width: format.width.unsigned_abs(),
                height: format.height.unsigned_abs(),
                frame_duration: h.scale.max(1),
                depth: format.bit_count,
            },
        );
        track.index = TrackIndex::Avi(AviIndex::new(chunks, 0, h.scale.max(1)));
        track
    } else if h.fcc_type == ChunkId::AUDS {
        let format = match WaveFormatEx::read(&stream.format) {
            Ok(format) => format,
            Err(e) => {
                log::warn!("skipping audio stream {}: {}", n, e);
                return None;
            }
        };
        let format_params = TrackFormat::Audio {
            channels: format.channels,
            sample_rate: format.samples_per_sec,
            bits: format.bits_per_sample,
        };
        let mut track = if h.sample_size > 0 {
            let block = if format.block_align > 0 { format.block_align as u32 } else { h.sample_size };
            let mut track = Track::new(TrackKind::Audio, CodecTag(h.fcc_handler.0), format.samples_per_sec.max(1), format_params);
            track.bytes_per_frame = Some(block);
            track.index = TrackIndex::Avi(AviIndex::new(chunks, block, 1));
            track
        } else {
            let mut track = Track::new(TrackKind::Audio, CodecTag(h.fcc_handler.0), h.rate.max(1), format_params);
            track.index = TrackIndex::Avi(AviIndex::new(chunks, 0, h.scale.max(1)));
            track
        };
        track.wav_id = Some(format.format_tag);
        track
    } else {
        log::debug!("skipping '{}' stream {}", h.fcc_type, n);
        return None;
    };
    track.id = n as u32 + 1;
    log::debug!("stream {}: {:?} '{}', {} samples", n, track.kind, track.fourcc, track.index.sample_count());
    Some(track)
}

struct WrittenChunk {
    /// The offset of the chunk's data.
    offset: u64,
    size: u32,
    keyframe: bool,
    ticks: u32,
    idx1_entry: Option<usize>,
}

struct StreamWriter {
    id: ChunkId,
    strh_offset: u64,
    indx_offset: u64,
    super_index: SuperIndex,
    chunks: Vec<WrittenChunk>,
    /// The first chunk of the current segment.
    segment_first_chunk: usize,
    /// (first chunk, `ix##` offset) of every finished segment.
    partial_indexes: Vec<(usize, u64)>,
    max_chunk_size: u32,
    ticks: u64,
    packet_duration: u32,
}

/// Writes an OpenDML AVI file. Headers are written before the first chunk and rewritten in
/// place on finish.
pub struct AviWriter {
    segment_size: u64,
    streams: Vec<StreamWriter>,
    /// The RIFF and movi lists of the segment being written.
    segment: Option<(PendingChunk, PendingChunk)>,
    segment_count: usize,
    idx1: Vec<Idx1Entry>,
    idx1_offset: Option<u64>,
    avih_offset: u64,
    dmlh_offset: u64,
}

fn stream_header(track: &Track, stream: &StreamWriter) -> StreamHeader {
    let mut header = StreamHeader {
        length: stream.ticks.min(u32::MAX as u64) as u32,
        suggested_buffer_size: stream.max_chunk_size,
        quality: u32::MAX,
        ..Default::default()
    };
    match track.format {
        TrackFormat::Video { width, height, frame_duration, .. } => {
            header.fcc_type = ChunkId::VIDS;
            header.fcc_handler = ChunkId(track.fourcc.0);
            header.scale = frame_duration.max(1);
            header.rate = track.timescale;
            header.frame = [0, 0, width as i16, height as i16];
        }
        TrackFormat::Audio { sample_rate, .. } => {
            header.fcc_type = ChunkId::AUDS;
            match track.bytes_per_frame {
                Some(block) => {
                    header.scale = block;
                    header.rate = block * sample_rate;
                    header.sample_size = block;
                }
                None => {
                    header.scale = stream.packet_duration.max(1);
                    header.rate = sample_rate;
                }
            }
        }
        TrackFormat::Text | TrackFormat::Timecode { .. } => {}
    }
    header
}

fn stream_format(track: &Track) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match track.format {
        TrackFormat::Video { width, height, depth, .. } => {
            BitmapInfoHeader::new(ChunkId(track.fourcc.0), width as i32, height as i32, depth).write(&mut buf)?;
        }
        TrackFormat::Audio { channels, sample_rate, bits } => {
            let mut format = WaveFormatEx::pcm(channels, sample_rate, bits);
            format.format_tag = track.wav_id.unwrap_or(WAVE_FORMAT_PCM);
            if track.bytes_per_frame.is_none() {
                format.avg_bytes_per_sec = 0;
            }
            format.write(&mut buf)?;
        }
        TrackFormat::Text | TrackFormat::Timecode { .. } => return Err(Error::usage("AVI files can't hold text tracks")),
    }
    Ok(buf)
}

impl AviWriter {
    pub fn new(segment_size: u64) -> Self {
        Self {
            segment_size,
            streams: Vec::new(),
            segment: None,
            segment_count: 0,
            idx1: Vec::new(),
            idx1_offset: None,
            avih_offset: 0,
            dmlh_offset: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.segment_count > 0
    }

    /// Writes the header list and opens the first `movi` list. The track list is fixed from here
    /// on.
    pub fn start<W: Write + Seek>(&mut self, w: &mut W, tracks: &[Track]) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        let riff = w.begin_list(ChunkId::RIFF, ChunkId::AVI)?;
        let hdrl = w.begin_list(ChunkId::LIST, ChunkId::HDRL)?;
        self.avih_offset = w.stream_position()? + 8;
        w.write_chunk(ChunkId::AVIH, &[0; MainAviHeader::SIZE])?;
        for (n, track) in tracks.iter().enumerate() {
            let suffix = match track.kind {
                TrackKind::Video => b"dc",
                _ => b"wb",
            };
            let mut stream = StreamWriter {
                id: ChunkId::stream(n as u16, suffix),
                strh_offset: 0,
                indx_offset: 0,
                super_index: SuperIndex {
                    chunk_id: ChunkId::stream(n as u16, suffix),
                    entries: Vec::new(),
                },
                chunks: Vec::new(),
                segment_first_chunk: 0,
                partial_indexes: Vec::new(),
                max_chunk_size: 0,
                ticks: 0,
                packet_duration: 0,
            };
            let strl = w.begin_list(ChunkId::LIST, ChunkId::STRL)?;
            stream.strh_offset = w.stream_position()? + 8;
            let mut strh = Vec::with_capacity(StreamHeader::SIZE);
            stream_header(track, &stream).write(&mut strh)?;
            w.write_chunk(ChunkId::STRH, &strh)?;
            w.write_chunk(ChunkId::STRF, &stream_format(track)?)?;
            stream.indx_offset = w.stream_position()? + 8;
            w.write_chunk(ChunkId::INDX, &vec![0; SuperIndex::data_size(SUPER_INDEX_CAPACITY)])?;
            w.end_chunk(strl)?;
            self.streams.push(stream);
        }
        let odml = w.begin_list(ChunkId::LIST, ChunkId::ODML)?;
        self.dmlh_offset = w.stream_position()? + 8;
        w.write_chunk(ChunkId::DMLH, &[0; ExtendedAviHeader::SIZE])?;
        w.end_chunk(odml)?;
        w.end_chunk(hdrl)?;
        let movi = w.begin_list(ChunkId::LIST, ChunkId::MOVI)?;
        self.segment = Some((riff, movi));
        self.segment_count = 1;
        Ok(())
    }

    fn segment_has_chunks(&self) -> bool {
        self.streams.iter().any(|s| s.chunks.len() > s.segment_first_chunk)
    }

    /// Closes the current segment: partial indexes, the `movi` list, idx1 for the first segment
    /// and the RIFF list.
    fn end_segment<W: Write + Seek>(&mut self, w: &mut W) -> Result<()> {
        let Some((riff, movi)) = self.segment.take() else {
            return Ok(());
        };
        for (n, stream) in self.streams.iter_mut().enumerate() {
            let chunks = &stream.chunks[stream.segment_first_chunk..];
            if chunks.is_empty() {
                continue;
            }
            let index = StandardIndex {
                chunk_id: stream.id,
                base_offset: movi.offset,
                entries: chunks
                    .iter()
                    .map(|c| StandardIndexEntry {
                        offset: (c.offset - movi.offset) as u32,
                        size: c.size,
                        keyframe: c.keyframe,
                    })
                    .collect(),
            };
            let mut data = Vec::with_capacity(index.data_size());
            index.write(&mut data)?;
            let offset = w.stream_position()?;
            w.write_chunk(ChunkId::stream_index(n as u16), &data)?;
            stream.super_index.entries.push(SuperIndexEntry {
                offset,
                size: data.len() as u32 + 8,
                duration: chunks.iter().map(|c| c.ticks).sum(),
            });
            stream.partial_indexes.push((stream.segment_first_chunk, offset));
            stream.segment_first_chunk = stream.chunks.len();
        }
        w.end_chunk(movi)?;
        if self.segment_count == 1 {
            self.idx1_offset = Some(w.stream_position()? + 8);
            write_idx1(&mut *w, &self.idx1)?;
        }
        w.end_chunk(riff)?;
        Ok(())
    }

    fn begin_segment<W: Write + Seek>(&mut self, w: &mut W) -> Result<()> {
        let riff = w.begin_list(ChunkId::RIFF, ChunkId::AVIX)?;
        let movi = w.begin_list(ChunkId::LIST, ChunkId::MOVI)?;
        log::debug!("starting RIFF segment {} at {}", self.segment_count, riff.offset);
        self.segment = Some((riff, movi));
        self.segment_count += 1;
        Ok(())
    }

    /// Writes one data chunk for the track at `stream` and returns the offset of its data.
    /// `ticks` is the chunk's duration in stream units.
    pub fn write_chunk<W: Write + Seek>(&mut self, w: &mut W, tracks: &[Track], stream: usize, data: &[u8], keyframe: bool, ticks: u32) -> Result<u64> {
        self.start(w, tracks)?;
        if stream >= self.streams.len() {
            return Err(Error::usage(format!("no AVI stream {}", stream)));
        }
        let position = w.stream_position()?;
        let riff_offset = self.segment.as_ref().map_or(position, |(riff, _)| riff.offset);
        let index_reserve: u64 = self
            .streams
            .iter()
            .map(|s| 32 + 8 * (s.chunks.len() - s.segment_first_chunk + 1) as u64)
            .sum();
        let needed = 8 + data.len() as u64 + (data.len() & 1) as u64;
        if position + needed + index_reserve - riff_offset > self.segment_size && self.segment_has_chunks() {
            self.end_segment(w)?;
            self.begin_segment(w)?;
        }

        let header_offset = w.stream_position()?;
        let movi_offset = self.segment.as_ref().map_or(header_offset, |(_, movi)| movi.offset);
        let id = self.streams[stream].id;
        w.write_chunk(id, data)?;
        let idx1_entry = if self.segment_count == 1 {
            self.idx1.push(Idx1Entry {
                id,
                flags: if keyframe { AVIIF_KEYFRAME } else { 0 },
                offset: (header_offset - (movi_offset + 8)) as u32,
                size: data.len() as u32,
            });
            Some(self.idx1.len() - 1)
        } else {
            None
        };
        let s = &mut self.streams[stream];
        s.chunks.push(WrittenChunk {
            offset: header_offset + 8,
            size: data.len() as u32,
            keyframe,
            ticks,
            idx1_entry,
        });
        s.max_chunk_size = s.max_chunk_size.max(data.len() as u32);
        s.ticks += ticks as u64;
        Ok(header_offset + 8)
    }

    /// Sets the duration of one compressed audio packet, in the track's timescale.
    pub fn set_packet_duration(&mut self, stream: usize, duration: u32) {
        if let Some(s) = self.streams.get_mut(stream) {
            if s.packet_duration == 0 {
                s.packet_duration = duration;
            }
        }
    }

    /// Marks an already written chunk as a keyframe, in memory and in any index already on disk.
    pub fn patch_keyframe<W: Write + Seek>(&mut self, w: &mut W, stream: usize, chunk: usize) -> Result<()> {
        let Some(s) = self.streams.get_mut(stream) else {
            return Err(Error::usage(format!("no AVI stream {}", stream)));
        };
        let Some(c) = s.chunks.get_mut(chunk) else {
            return Err(Error::usage(format!("stream {} has no chunk {}", stream, chunk)));
        };
        if c.keyframe {
            return Ok(());
        }
        c.keyframe = true;
        let end = w.stream_position()?;
        if chunk < s.segment_first_chunk {
            if let Some(&(first, offset)) = s.partial_indexes.iter().rev().find(|&&(first, _)| first <= chunk) {
                w.seek(SeekFrom::Start(offset + 8 + 24 + (chunk - first) as u64 * 8 + 4))?;
                w.write_u32::<LittleEndian>(c.size)?;
            }
        }
        if let Some(entry) = c.idx1_entry {
            if let Some(e) = self.idx1.get_mut(entry) {
                e.flags |= AVIIF_KEYFRAME;
                if let Some(idx1_offset) = self.idx1_offset {
                    w.seek(SeekFrom::Start(idx1_offset + entry as u64 * Idx1Entry::SIZE as u64 + 4))?;
                    w.write_u32::<LittleEndian>(e.flags)?;
                }
            }
        }
        w.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Closes the last segment and rewrites the headers with the final counts.
    pub fn finish<W: Write + Seek>(&mut self, w: &mut W, tracks: &[Track]) -> Result<()> {
        self.start(w, tracks)?;
        self.end_segment(w)?;
        let end = w.stream_position()?;

        let video = tracks
            .iter()
            .zip(&self.streams)
            .find(|(t, _)| t.kind == TrackKind::Video);
        let mut avih = MainAviHeader {
            flags: AVIF_HASINDEX | AVIF_ISINTERLEAVED | AVIF_TRUSTCKTYPE,
            streams: self.streams.len() as u32,
            suggested_buffer_size: self.streams.iter().map(|s| s.max_chunk_size).max().unwrap_or(0),
            ..Default::default()
        };
        let mut total_frames = 0;
        if let Some((track, stream)) = video {
            if let TrackFormat::Video { width, height, frame_duration, .. } = track.format {
                avih.micro_sec_per_frame = (frame_duration as u64 * 1_000_000 / track.timescale.max(1) as u64) as u32;
                avih.width = width;
                avih.height = height;
            }
            avih.total_frames = stream.chunks.iter().filter(|c| c.idx1_entry.is_some()).count() as u32;
            total_frames = stream.chunks.len() as u32;
        }
        let mut buf = Vec::with_capacity(MainAviHeader::SIZE);
        avih.write(&mut buf)?;
        w.seek(SeekFrom::Start(self.avih_offset))?;
        w.write_all(&buf)?;

        for (track, stream) in tracks.iter().zip(&self.streams) {
            let mut buf = Vec::with_capacity(StreamHeader::SIZE);
            stream_header(track, stream).write(&mut buf)?;
            w.seek(SeekFrom::Start(stream.strh_offset))?;
            w.write_all(&buf)?;

            let mut buf = Vec::with_capacity(SuperIndex::data_size(SUPER_INDEX_CAPACITY));
            stream.super_index.write(&mut buf, SUPER_INDEX_CAPACITY)?;
            w.seek(SeekFrom::Start(stream.indx_offset))?;
            w.write_all(&buf)?;
        }

        let mut buf = Vec::with_capacity(ExtendedAviHeader::SIZE);
        ExtendedAviHeader { total_frames }.write(&mut buf)?;
        w.seek(SeekFrom::Start(self.dmlh_offset))?;
        w.write_all(&buf)?;

        w.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexCursor;
    use std::io::Cursor;

    fn tracks() -> Vec<Track> {
        let video = Track::new(
            TrackKind::Video,
            CodecTag(*b"raw "),
            30000,
            TrackFormat::Video {
                width: 4,
                height: 2,
                frame_duration: 1001,
                depth: 24,
            },
        );
        let mut audio = Track::new(
            TrackKind::Audio,
            CodecTag(*b"sowt"),
            48000,
            TrackFormat::Audio {
                channels: 2,
                sample_rate: 48000,
                bits: 16,
            },
        );
        audio.bytes_per_frame = Some(4);
        audio.wav_id = Some(WAVE_FORMAT_PCM);
        vec![video, audio]
    }

    fn write_file(segment_size: u64, frames: usize) -> Cursor<Vec<u8>> {
        let tracks = tracks();
        let mut buf = Cursor::new(Vec::new());
        let mut writer = AviWriter::new(segment_size);
        for i in 0..frames {
            writer
                .write_chunk(&mut buf, &tracks, 0, &[i as u8; 24], i % 3 == 0, 1)
                .unwrap();
            writer.write_chunk(&mut buf, &tracks, 1, &[0; 6406], true, 1601).unwrap();
        }
        writer.patch_keyframe(&mut buf, 0, 1).unwrap();
        writer.finish(&mut buf, &tracks).unwrap();
        buf
    }

    #[test]
    fn test_round_trip() {
        let mut buf = write_file(1 << 30, 10);
        let tracks = read_avi(&mut buf).unwrap();
        assert_eq!(2, tracks.len());

        let video = &tracks[0];
        assert_eq!(CodecTag(*b"raw "), video.fourcc);
        assert_eq!(30000, video.timescale);
        assert_eq!(10, video.index.sample_count());
        assert!(video.index.is_keyframe(1));
        assert!(!video.index.is_keyframe(2));
        assert_eq!(Some(3), video.index.keyframe_after(2));
        let mut cursor = IndexCursor::default();
        let location = video.index.locate(5, &mut cursor).unwrap();
        assert_eq!(24, location.size);
        buf.seek(SeekFrom::Start(location.offset)).unwrap();
        let mut data = [0; 24];
        buf.read_exact(&mut data).unwrap();
        assert_eq!([5; 24], data);

        let audio = &tracks[1];
        assert_eq!(Some(WAVE_FORMAT_PCM), audio.wav_id);
        assert_eq!(Some(4), audio.bytes_per_frame);
        assert_eq!(16010, audio.index.sample_count());
    }

    #[test]
    fn test_segments() {
        let mut buf = write_file(32 * 1024, 20);
        let len = buf.get_ref().len() as u64;
        let segments = ChunkReader::new(&mut buf, 0, len).collect::<riff::Result<Vec<_>>>().unwrap();
        assert!(segments.len() > 1);
        assert!(segments[1].is_list_of(ChunkId::AVIX));

        let tracks = read_avi(&mut buf).unwrap();
        assert_eq!(20, tracks[0].index.sample_count());
        assert!(tracks[0].index.is_keyframe(1));
        let mut cursor = IndexCursor::default();
        let location = tracks[0].index.locate(19, &mut cursor).unwrap();
        buf.seek(SeekFrom::Start(location.offset)).unwrap();
        let mut data = [0; 24];
        buf.read_exact(&mut data).unwrap();
        assert_eq!([19; 24], data);
    }

    #[test]
    fn test_walk_without_index() {
        let tracks = tracks();
        let mut buf = Cursor::new(Vec::new());
        let riff = buf.begin_list(ChunkId::RIFF, ChunkId::AVI).unwrap();
        let hdrl = buf.begin_list(ChunkId::LIST, ChunkId::HDRL).unwrap();
        let strl = buf.begin_list(ChunkId::LIST, ChunkId::STRL).unwrap();
        let stream = StreamWriter {
            id: ChunkId::stream(0, b"dc"),
            strh_offset: 0,
            indx_offset: 0,
            super_index: SuperIndex::default(),
            chunks: Vec::new(),
            segment_first_chunk: 0,
            partial_indexes: Vec::new(),
            max_chunk_size: 0,
            ticks: 3,
            packet_duration: 0,
        };
        let mut strh = Vec::new();
        stream_header(&tracks[0], &stream).write(&mut strh).unwrap();
        buf.write_chunk(ChunkId::STRH, &strh).unwrap();
        buf.write_chunk(ChunkId::STRF, &stream_format(&tracks[0]).unwrap()).unwrap();
        buf.end_chunk(strl).unwrap();
        buf.end_chunk(hdrl).unwrap();
        let movi = buf.begin_list(ChunkId::LIST, ChunkId::MOVI).unwrap();
        buf.write_chunk(ChunkId::stream(0, b"dc"), &[1; 5]).unwrap();
        let rec = buf.begin_list(ChunkId::LIST, ChunkId::REC).unwrap();
        buf.write_chunk(ChunkId::stream(0, b"dc"), &[2; 5]).unwrap();
        buf.end_chunk(rec).unwrap();
        buf.write_chunk(ChunkId::stream(0, b"dc"), &[3; 5]).unwrap();
        buf.end_chunk(movi).unwrap();
        buf.end_chunk(riff).unwrap();

        let tracks = read_avi(&mut buf).unwrap();
        assert_eq!(3, tracks[0].index.sample_count());
        let mut cursor = IndexCursor::default();
        let location = tracks[0].index.locate(1, &mut cursor).unwrap();
        buf.seek(SeekFrom::Start(location.offset)).unwrap();
        let mut data = [0; 5];
        buf.read_exact(&mut data).unwrap();
        assert_eq!([2; 5], data);
    }
}
