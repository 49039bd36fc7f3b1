//! QuickTime and MP4 movies: reading the `moov` tree into tracks and writing it back out.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use av_traits::CodecTag;
use qtff::{
    AtomReader, AtomSeekWriteExt, AtomWriteExt, BaseMediaInfoData, BaseMediaInformationData, BaseMediaInformationHeaderData,
    DataInformationData, DataReferenceEntry, EditData, EditListData, EditListDataEntry, FileTypeData, FourCC, HandlerReferenceData, MediaData, MediaHeaderData,
    MediaInformationData, MediaType, MovieData, MovieHeaderData, PendingAtom, ReadData, SampleDescriptionData, SampleTableData,
    SampleTables, SoundMediaInformationData, SoundMediaType, SoundSampleDescriptionDataEntry, TextSampleDescriptionDataEntry,
    TimecodeSampleDescriptionDataEntry, TrackData, TrackHeaderData, TrackReferenceData, TrackReferenceTypeData,
    VideoMediaInformationData, VideoSampleDescriptionDataEntry,
};

use crate::{
    index::{IndexCursor, QtIndex, TrackIndex},
    track::{TimecodeInfo, TimecodeRun, Track, TrackFormat, TrackKind},
    Error, Result,
};

pub const MOVIE_TIMESCALE: u32 = 600;

const ALIS: FourCC = FourCC::new(b"alis");
const DHLR: FourCC = FourCC::new(b"dhlr");
const ISO2: FourCC = FourCC::new(b"iso2");

pub struct QtMovie {
    pub mp4: bool,
    pub tracks: Vec<Track>,
}

/// Reads the top-level atoms of a movie and builds one track per supported `trak`.
pub fn read_movie<R: Read + Seek>(mut reader: R) -> Result<QtMovie> {
    reader.seek(SeekFrom::Start(0))?;
    let atoms = AtomReader::new(&mut reader).collect::<qtff::Result<Vec<_>>>()?;

    let mut mp4 = false;
    if let Some(ftyp) = atoms.iter().find(|a| a.is(FourCC::FTYP)) {
        let ftyp = FileTypeData::read(ftyp.data(&mut reader))?;
        mp4 = ftyp.major_brand != FourCC::QT;
    }

    let moov = atoms.iter().find(|a| a.is(FourCC::MOOV)).ok_or_else(|| Error::MalformedAtom {
        kind: "atom",
        typ: "moov".to_string(),
        offset: 0,
        reason: "the file has no movie atom".to_string(),
    })?;
    let mut buf = Vec::with_capacity(moov.data_size() as usize);
    moov.data(&mut reader).read_to_end(&mut buf)?;
    let movie = MovieData::read(Cursor::new(buf.as_slice()))?;

    let mut tracks = Vec::new();
    for trak in &movie.tracks {
        match read_track(&mut reader, trak)? {
            Some(track) => tracks.push(track),
            None => log::debug!(
                "skipping track {} with handler {:?}",
                trak.header.id,
                trak.handler_subtype().map(|s| format!("{}", s))
            ),
        }
    }

    // attach timecode tracks to the tracks that reference them
    for i in 0..tracks.len() {
        let Some(id) = tracks[i].timecode_track else {
            continue;
        };
        match tracks.iter().find(|t| t.id == id && t.kind == TrackKind::Timecode) {
            Some(tmcd) => tracks[i].timecode = tmcd.timecode.clone(),
            None => log::warn!("track {} references missing timecode track {}", tracks[i].id, id),
        }
    }

    Ok(QtMovie { mp4, tracks })
}

fn tag(data_format: u32) -> CodecTag {
    CodecTag(data_format.to_be_bytes())
}

fn read_track<R: Read + Seek>(reader: &mut R, trak: &TrackData) -> Result<Option<Track>> {
    let timescale = trak.media.header.time_scale.max(1);
    let Some(information) = &trak.media.information else {
        return Ok(None);
    };
    let mut tables = information.sample_tables().cloned().unwrap_or_default();
    let first_duration = tables
        .time_to_sample
        .as_ref()
        .and_then(|stts| stts.entries.first())
        .map_or(1, |e| e.sample_duration);

    let mut constant_size = None;
    let mut track = match information {
        MediaInformationData::Video(minf) => {
            let desc = minf.sample_table.as_ref().and_then(|stbl| stbl.sample_description(0));
            let mut track = Track::new(
                TrackKind::Video,
                desc.map_or(CodecTag(*b"    "), |d| tag(d.data_format)),
                timescale,
                TrackFormat::Video {
                    width: desc.map_or(0, |d| d.width as u32),
                    height: desc.map_or(0, |d| d.height as u32),
                    frame_duration: first_duration,
                    depth: desc.map_or(24, |d| d.depth),
                },
            );
            track.compressor = desc.map(|d| d.compressor()).unwrap_or_default();
            track
        }
        MediaInformationData::Sound(minf) => {
            let desc = minf.sample_table.as_ref().and_then(|stbl| stbl.sample_description(0));
            let sample_rate = desc.map_or(0.0, |d| d.sample_rate()).round() as u32;
            let mut track = Track::new(
                TrackKind::Audio,
                desc.map_or(CodecTag(*b"    "), |d| tag(d.data_format)),
                timescale,
                TrackFormat::Audio {
                    channels: desc.map_or(0, |d| d.channels()),
                    sample_rate: if sample_rate > 0 { sample_rate } else { timescale },
                    bits: desc.map_or(0, |d| d.bits()),
                },
            );
            let stsz_constant = tables.sample_size.as_ref().map_or(0, |s| s.constant_sample_size);
            let unit_durations = tables
                .time_to_sample
                .as_ref()
                .map_or(false, |stts| stts.entries.iter().all(|e| e.sample_duration == 1));
            if stsz_constant == 1 {
                constant_size = desc.and_then(SoundMediaType::constant_sample_size);
            }
            track.bytes_per_frame = constant_size.or_else(|| (stsz_constant > 0 && unit_durations).then_some(stsz_constant));
            track
        }
        MediaInformationData::Text(minf) => {
            let desc = minf.sample_table.as_ref().and_then(|stbl| stbl.sample_description(0));
            Track::new(
                TrackKind::Text,
                desc.map_or(CodecTag(*b"text"), |d| tag(d.data_format)),
                timescale,
                TrackFormat::Text,
            )
        }
        MediaInformationData::Timecode(minf) => {
            let Some(desc) = minf.sample_table.as_ref().and_then(|stbl| stbl.sample_description(0)) else {
                log::warn!("timecode track {} has no sample description", trak.header.id);
                return Ok(None);
            };
            let mut track = Track::new(
                TrackKind::Timecode,
                CodecTag(*b"tmcd"),
                timescale,
                TrackFormat::Timecode {
                    frame_duration: desc.frame_duration,
                },
            );
            track.timecode = Some(TimecodeInfo {
                description: desc.clone(),
                timescale,
                runs: Vec::new(),
            });
            track
        }
        MediaInformationData::Base(_) => return Ok(None),
    };
    track.id = trak.header.id;
    track.media_start = media_start(trak);
    track.timecode_track = trak
        .reference
        .as_ref()
        .and_then(|tref| tref.track_ids(FourCC::TMCD).first().copied());

    track.index_error = validate_tables(trak.header.id, &mut tables);
    if track.index_error.is_none() {
        track.index = TrackIndex::Qt(QtIndex::new(tables, constant_size));
    }

    if track.kind == TrackKind::Timecode && track.index_error.is_none() {
        let runs = read_timecode_runs(reader, &track.index)?;
        if let Some(info) = &mut track.timecode {
            info.runs = runs;
        }
    }

    log::debug!(
        "track {}: {:?} '{}', {} samples",
        track.id,
        track.kind,
        track.fourcc,
        track.index.sample_count()
    );
    Ok(Some(track))
}

/// The media time the first non-empty edit starts playback from.
fn media_start(trak: &TrackData) -> i64 {
    let Some(elst) = trak.edit.as_ref().and_then(|edts| edts.edit_list.as_ref()) else {
        return 0;
    };
    if elst.entries.len() > 1 {
        log::debug!("track {}: only the first of {} edits is used", trak.header.id, elst.entries.len());
    }
    elst.entries
        .iter()
        .find(|e| e.media_time >= 0)
        .map_or(0, |e| e.media_time as i64)
}

/// Checks that the tables describe a usable index. Inconsistencies that can be worked around
/// are fixed up with a warning.
fn validate_tables(track: u32, tables: &mut SampleTables) -> Option<String> {
    let (Some(stsc), Some(stsz)) = (&tables.sample_to_chunk, &tables.sample_size) else {
        return Some("missing sample-to-chunk or sample size table".to_string());
    };
    if tables.chunk_offset.is_none() && tables.chunk_offset_64.is_none() {
        return Some("missing chunk offset table".to_string());
    }
    if let Err(reason) = stsc.validate(tables.chunk_count()) {
        return Some(reason.to_string());
    }
    if stsz.constant_sample_size != 0 && stsz.sample_count == 0 {
        return None;
    }
    let sample_count = tables.sample_count();
    if let Some(stts) = &tables.time_to_sample {
        if stts.sample_count() != sample_count {
            log::warn!(
                "track {}: time-to-sample table counts {} samples, sample size table {}",
                track,
                stts.sample_count(),
                sample_count
            );
        }
    }
    if let Some(ctts) = &tables.composition_offset {
        if ctts.sample_count() != sample_count {
            log::warn!(
                "track {}: ignoring composition offsets for {} of {} samples",
                track,
                ctts.sample_count(),
                sample_count
            );
            tables.composition_offset = None;
        }
    }
    None
}

fn read_timecode_runs<R: Read + Seek>(reader: &mut R, index: &TrackIndex) -> Result<Vec<TimecodeRun>> {
    let mut cursor = IndexCursor::default();
    let mut runs = Vec::new();
    for sample in 0..index.sample_count() {
        let (Some(location), Some(start), Some(duration)) = (
            index.locate(sample, &mut cursor),
            index.decode_time(sample, &mut cursor),
            index.sample_duration(sample, &mut cursor),
        ) else {
            break;
        };
        if location.size < 4 {
            log::warn!("skipping timecode sample {} of {} bytes", sample, location.size);
            continue;
        }
        reader.seek(SeekFrom::Start(location.offset))?;
        let mut buf = [0; 4];
        reader.read_exact(&mut buf)?;
        runs.push(TimecodeRun {
            start,
            duration: duration as u64,
            counter: u32::from_be_bytes(buf),
        });
    }
    Ok(runs)
}

/// A single edit starting playback at the track's first presentation time, for tracks whose
/// timeline starts after zero.
fn edit_list(track: &Track, duration: u64) -> Option<EditData> {
    let start = track.builder.start_time();
    if start <= 0 {
        return None;
    }
    let Ok(media_time) = i32::try_from(start) else {
        log::warn!("track {}: start time {} doesn't fit an edit list", track.id, start);
        return None;
    };
    Some(EditData {
        edit_list: Some(EditListData {
            version: 0,
            flags: [0; 3],
            entries: vec![EditListDataEntry {
                track_duration: u32::try_from(duration).unwrap_or(u32::MAX),
                media_time,
                media_rate: 1.0.into(),
            }],
        }),
    })
}

pub(crate) fn rescale(value: u64, from: u32, to: u32) -> u64 {
    (value as u128 * to as u128 / from.max(1) as u128) as u64
}

/// Writes a movie: the file type, one `mdat` holding every sample, then the `moov` built from the
/// tracks' index builders.
pub struct QtWriter {
    mp4: bool,
    mdat: Option<PendingAtom>,
}

impl QtWriter {
    pub fn begin<W: Write + Seek>(mut writer: W, mp4: bool) -> Result<Self> {
        let ftyp = if mp4 {
            FileTypeData {
                major_brand: FourCC::ISOM,
                minor_version: 512,
                compatible_brands: vec![FourCC::ISOM, ISO2, FourCC::MP41],
            }
        } else {
            FileTypeData {
                major_brand: FourCC::QT,
                minor_version: 0x200,
                compatible_brands: vec![FourCC::QT],
            }
        };
        writer.write_atom(&ftyp)?;
        let mdat = writer.begin_atom(FourCC::MDAT, true)?;
        Ok(Self { mp4, mdat: Some(mdat) })
    }

    pub fn is_mp4(&self) -> bool {
        self.mp4
    }

    /// Closes the media data atom and appends the movie atom.
    pub fn finish<W: Write + Seek>(&mut self, mut writer: W, tracks: &[Track], force_64bit_offsets: bool) -> Result<()> {
        if let Some(mdat) = self.mdat.take() {
            writer.end_atom(mdat)?;
        }
        let movie = self.movie(tracks, force_64bit_offsets);
        writer.write_atom(&movie)?;
        Ok(())
    }

    fn handler(&self, subtype: FourCC, name: &str) -> HandlerReferenceData {
        let component_type = if self.mp4 { FourCC(0) } else { FourCC::MHLR };
        HandlerReferenceData::new(component_type, subtype, name, !self.mp4)
    }

    fn data_handler(&self) -> Option<HandlerReferenceData> {
        (!self.mp4).then(|| HandlerReferenceData::new(DHLR, ALIS, "DataHandler", true))
    }

    fn data_information(&self) -> DataInformationData {
        DataInformationData {
            entries: vec![DataReferenceEntry::self_reference(if self.mp4 { FourCC::URL } else { ALIS })],
        }
    }

    fn movie(&self, tracks: &[Track], force_64bit_offsets: bool) -> MovieData {
        let mut movie_duration = 0;
        let mut traks = Vec::with_capacity(tracks.len());
        for track in tracks {
            let media_duration = track.builder.total_duration();
            let duration = rescale(media_duration, track.timescale, MOVIE_TIMESCALE);
            movie_duration = movie_duration.max(duration);
            traks.push(self.track(track, media_duration, duration, track.builder.finalize(force_64bit_offsets)));
        }
        let next_track_id = tracks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        MovieData {
            header: MovieHeaderData::new(MOVIE_TIMESCALE, movie_duration, next_track_id),
            tracks: traks,
        }
    }

    fn track(&self, track: &Track, media_duration: u64, duration: u64, tables: SampleTables) -> TrackData {
        let mut header = TrackHeaderData::new(track.id, duration);
        let (subtype, name, information) = match track.format {
            TrackFormat::Video { width, height, depth, .. } => {
                header.width = (width as f64).into();
                header.height = (height as f64).into();
                let mut desc = VideoSampleDescriptionDataEntry::new(FourCC::new(&track.fourcc.0), width as u16, height as u16, &track.compressor);
                desc.depth = depth;
                (
                    FourCC::VIDE,
                    "VideoHandler",
                    MediaInformationData::Video(VideoMediaInformationData {
                        header: Default::default(),
                        handler_reference: self.data_handler(),
                        data_information: Some(self.data_information()),
                        sample_table: Some(SampleTableData {
                            sample_description: Some(SampleDescriptionData { entries: vec![desc] }),
                            tables,
                        }),
                    }),
                )
            }
            TrackFormat::Audio { channels, sample_rate, bits } => {
                header.volume = 1.0.into();
                let desc = SoundSampleDescriptionDataEntry::new_v0(FourCC::new(&track.fourcc.0), channels, bits, sample_rate);
                (
                    FourCC::SOUN,
                    "SoundHandler",
                    MediaInformationData::Sound(SoundMediaInformationData {
                        header: Default::default(),
                        handler_reference: self.data_handler(),
                        data_information: Some(self.data_information()),
                        sample_table: Some(SampleTableData {
                            sample_description: Some(SampleDescriptionData { entries: vec![desc] }),
                            tables,
                        }),
                    }),
                )
            }
            TrackFormat::Timecode { frame_duration } => {
                let desc = match &track.timecode {
                    Some(info) => info.description.clone(),
                    None => TimecodeSampleDescriptionDataEntry::new(track.timescale, frame_duration),
                };
                (
                    FourCC::TMCD,
                    "TimeCodeHandler",
                    MediaInformationData::Timecode(BaseMediaInformationData {
                        header: Some(self.base_header()),
                        handler_reference: self.data_handler(),
                        data_information: Some(self.data_information()),
                        sample_table: Some(SampleTableData {
                            sample_description: Some(SampleDescriptionData { entries: vec![desc] }),
                            tables,
                        }),
                    }),
                )
            }
            TrackFormat::Text => (
                FourCC::TEXT,
                "TextHandler",
                MediaInformationData::Text(BaseMediaInformationData {
                    header: Some(self.base_header()),
                    handler_reference: self.data_handler(),
                    data_information: Some(self.data_information()),
                    sample_table: Some(SampleTableData {
                        sample_description: Some(SampleDescriptionData {
                            entries: vec![TextSampleDescriptionDataEntry::quicktime()],
                        }),
                        tables,
                    }),
                }),
            ),
        };
        TrackData {
            header,
            media: MediaData {
                header: MediaHeaderData::new(track.timescale, media_duration),
                handler_reference: Some(self.handler(subtype, name)),
                information: Some(information),
            },
            edit: edit_list(track, duration),
            reference: track.timecode_track.map(|id| TrackReferenceData {
                references: vec![TrackReferenceTypeData {
                    typ: FourCC::TMCD,
                    track_ids: vec![id],
                }],
            }),
        }
    }

    fn base_header(&self) -> BaseMediaInformationHeaderData {
        BaseMediaInformationHeaderData {
            info: Some(BaseMediaInfoData {
                graphics_mode: 0x40,
                opcolor: [0x8000; 3],
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;

    fn video_track(id: u32) -> Track {
        let mut track = Track::new(
            TrackKind::Video,
            CodecTag(*b"raw "),
            30000,
            TrackFormat::Video {
                width: 64,
                height: 48,
                frame_duration: 1001,
                depth: 24,
            },
        );
        track.id = id;
        track.compressor = "Uncompressed".to_string();
        track
    }

    #[test]
    fn test_movie_round_trip() {
        let mut buf = Cursor::new(Vec::new());
        let mut writer = QtWriter::begin(&mut buf, false).unwrap();
        let mut track = video_track(1);
        for (i, pts) in [0, 2002, 1001, 3003].into_iter().enumerate() {
            let offset = buf.stream_position().unwrap();
            buf.write_all(&[i as u8; 16]).unwrap();
            track.builder.add_sample(offset, 16, i == 0, pts, 1001);
        }
        writer.finish(&mut buf, &[track], false).unwrap();

        let movie = read_movie(&mut buf).unwrap();
        assert!(!movie.mp4);
        assert_eq!(1, movie.tracks.len());
        let track = &movie.tracks[0];
        assert_eq!(TrackKind::Video, track.kind);
        assert_eq!(CodecTag(*b"raw "), track.fourcc);
        assert_eq!("Uncompressed", track.compressor);
        assert_eq!(4, track.index.sample_count());
        let mut cursor = IndexCursor::default();
        assert_eq!(Some(2002), track.index.presentation_time(1, &mut cursor));
        assert!(track.index.is_keyframe(0));
        assert!(!track.index.is_keyframe(1));

        let location = track.index.locate(2, &mut cursor).unwrap();
        buf.seek(SeekFrom::Start(location.offset)).unwrap();
        let mut sample = [0; 16];
        buf.read_exact(&mut sample).unwrap();
        assert_eq!([2; 16], sample);
    }

    #[test]
    fn test_late_start_edit_list() {
        let mut buf = Cursor::new(Vec::new());
        let mut writer = QtWriter::begin(&mut buf, true).unwrap();
        let mut track = video_track(1);
        let pts = [1001, 3003, 2002, 4004];
        for (i, &t) in pts.iter().enumerate() {
            let offset = buf.stream_position().unwrap();
            buf.write_all(&[i as u8; 8]).unwrap();
            track.builder.add_sample(offset, 8, i == 0, t, 1001);
        }
        writer.finish(&mut buf, &[track], false).unwrap();

        buf.seek(SeekFrom::Start(0)).unwrap();
        let atoms = AtomReader::new(&mut buf).collect::<qtff::Result<Vec<_>>>().unwrap();
        let moov = atoms.iter().find(|a| a.is(FourCC::MOOV)).unwrap();
        let mut data = Vec::new();
        moov.data(&mut buf).read_to_end(&mut data).unwrap();
        let movie = MovieData::read(Cursor::new(data.as_slice())).unwrap();
        let elst = movie.tracks[0].edit.as_ref().and_then(|e| e.edit_list.as_ref()).unwrap();
        assert_eq!(1, elst.entries.len());
        assert_eq!(1001, elst.entries[0].media_time);
        assert_eq!(80, elst.entries[0].track_duration);

        let movie = read_movie(&mut buf).unwrap();
        let track = &movie.tracks[0];
        assert_eq!(1001, track.media_start);
        let mut cursor = IndexCursor::default();
        for (i, &t) in pts.iter().enumerate() {
            assert_eq!(Some(t), track.index.presentation_time(i as u64, &mut cursor));
        }
    }

    #[test]
    fn test_zero_start_has_no_edit_list() {
        let mut track = video_track(1);
        track.builder.add_sample(0, 8, true, 0, 1001);
        assert!(edit_list(&track, 2).is_none());
        assert_eq!(0, media_start(&QtWriter { mp4: false, mdat: None }.track(&track, 1001, 20, track.builder.finalize(false))));
    }

    #[test]
    fn test_timecode_reference() {
        let mut buf = Cursor::new(Vec::new());
        let mut writer = QtWriter::begin(&mut buf, true).unwrap();
        let mut video = video_track(1);
        video.timecode_track = Some(2);
        let offset = buf.stream_position().unwrap();
        buf.write_all(&[0; 8]).unwrap();
        video.builder.add_sample(offset, 8, true, 0, 1001);

        let description = TimecodeSampleDescriptionDataEntry::new(30000, 1001);
        let mut tmcd = Track::new(TrackKind::Timecode, CodecTag(*b"tmcd"), 30000, TrackFormat::Timecode { frame_duration: 1001 });
        tmcd.id = 2;
        tmcd.timecode = Some(TimecodeInfo {
            description,
            timescale: 30000,
            runs: vec![],
        });
        let offset = buf.stream_position().unwrap();
        buf.write_all(&1800u32.to_be_bytes()).unwrap();
        tmcd.builder = IndexBuilder::new();
        tmcd.builder.add_sample(offset, 4, true, 0, 1001);
        writer.finish(&mut buf, &[video, tmcd], false).unwrap();

        let movie = read_movie(&mut buf).unwrap();
        assert!(movie.mp4);
        let video = &movie.tracks[0];
        assert_eq!(Some(2), video.timecode_track);
        let info = video.timecode.as_ref().unwrap();
        assert_eq!(1800, info.runs[0].counter);
        assert_eq!("00:01:00:02", info.timecode_at(0).unwrap().to_string());
    }

    #[test]
    fn test_inconsistent_sample_to_chunk() {
        let mut builder = IndexBuilder::new();
        builder.add_sample(100, 10, true, 0, 1);
        let mut tables = builder.finalize(false);
        assert!(validate_tables(1, &mut tables).is_none());
        tables.sample_to_chunk.as_mut().unwrap().entries[0].first_chunk = 2;
        assert!(validate_tables(1, &mut tables).is_some());
    }
}
