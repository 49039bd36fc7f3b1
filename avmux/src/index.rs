use qtff::{CompositionOffsetData, RunCursor, SampleChunkInfo, SampleSizeData, SampleTables, SampleToChunkData, SyncSampleData, TimeToSampleData};

/// Where a sample's bytes live in the file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SampleLocation {
    pub offset: u64,
    pub size: u32,
}

/// Lookup state carried from one query to the next. Sequential access through the same cursor
/// is amortized constant time. A default cursor is always valid, just slower.
#[derive(Clone, Debug, Default)]
pub struct IndexCursor {
    time: RunCursor,
    composition: RunCursor,
    chunk: Option<SampleChunkInfo>,
}

/// A QuickTime/MP4 sample table.
#[derive(Clone, Debug)]
pub struct QtIndex {
    tables: SampleTables,
    constant_size: Option<u32>,
}

impl QtIndex {
    /// `constant_size` overrides the sample size table, for uncompressed QuickTime sound.
    pub fn new(tables: SampleTables, constant_size: Option<u32>) -> Self {
        Self { tables, constant_size }
    }

    pub fn tables(&self) -> &SampleTables {
        &self.tables
    }

    fn chunk_info(&self, sample: u64, cursor: &mut IndexCursor) -> Option<SampleChunkInfo> {
        let info = self.tables.sample_chunk_info(sample, cursor.chunk.as_ref())?;
        cursor.chunk = Some(info.clone());
        Some(info)
    }
}

/// The chunks of one AVI stream, in file order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AviChunk {
    /// The offset of the chunk's data, past its header.
    pub offset: u64,
    pub size: u32,
    pub keyframe: bool,
}

/// An AVI stream index. Video and variable-rate audio have one sample per chunk. Constant-rate
/// audio (a nonzero `dwSampleSize`) packs `size / sample_size` samples into each chunk.
#[derive(Clone, Debug)]
pub struct AviIndex {
    chunks: Vec<AviChunk>,
    sample_size: u32,
    chunk_first_sample: Vec<u64>,
    sample_count: u64,
    sample_duration: u32,
}

impl AviIndex {
    pub fn new(chunks: Vec<AviChunk>, sample_size: u32, sample_duration: u32) -> Self {
        let mut chunk_first_sample = Vec::new();
        let sample_count = if sample_size > 0 {
            let mut n = 0;
            for c in &chunks {
                chunk_first_sample.push(n);
                n += (c.size / sample_size) as u64;
            }
            n
        } else {
            chunks.len() as u64
        };
        Self {
            chunks,
            sample_size,
            chunk_first_sample,
            sample_count,
            sample_duration: sample_duration.max(1),
        }
    }

    pub fn chunks(&self) -> &[AviChunk] {
        &self.chunks
    }

    fn chunk_of(&self, sample: u64) -> Option<usize> {
        if sample >= self.sample_count {
            return None;
        }
        if self.sample_size == 0 {
            return Some(sample as usize);
        }
        self.chunk_first_sample.partition_point(|&first| first <= sample).checked_sub(1)
    }
}

#[derive(Clone, Debug)]
pub enum TrackIndex {
    /// A track that is being written, or whose index couldn't be read.
    Empty,
    Qt(QtIndex),
    Avi(AviIndex),
}

impl TrackIndex {
    pub fn sample_count(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Qt(index) => index.tables.sample_count(),
            Self::Avi(index) => index.sample_count,
        }
    }

    pub fn locate(&self, sample: u64, cursor: &mut IndexCursor) -> Option<SampleLocation> {
        match self {
            Self::Empty => None,
            Self::Qt(index) => {
                if sample >= self.sample_count() {
                    return None;
                }
                let info = index.chunk_info(sample, cursor)?;
                Some(SampleLocation {
                    offset: index.tables.sample_offset(sample, &info, index.constant_size)?,
                    size: index.tables.sample_size(sample, index.constant_size)?,
                })
            }
            Self::Avi(index) => {
                let i = index.chunk_of(sample)?;
                let chunk = &index.chunks[i];
                Some(match index.sample_size {
                    0 => SampleLocation {
                        offset: chunk.offset,
                        size: chunk.size,
                    },
                    size => SampleLocation {
                        offset: chunk.offset + (sample - index.chunk_first_sample[i]) * size as u64,
                        size,
                    },
                })
            }
        }
    }

    /// Returns the first sample and the sample count of the chunk containing `sample`.
    pub fn chunk_span(&self, sample: u64, cursor: &mut IndexCursor) -> Option<(u64, u64)> {
        let count = self.sample_count();
        let (first, samples) = match self {
            Self::Empty => return None,
            Self::Qt(index) => {
                let info = index.chunk_info(sample, cursor)?;
                (info.first_sample, info.samples)
            }
            Self::Avi(index) => {
                let i = index.chunk_of(sample)?;
                match index.sample_size {
                    0 => (sample, 1),
                    size => (index.chunk_first_sample[i], (index.chunks[i].size / size) as u64),
                }
            }
        };
        Some((first, samples.min(count.saturating_sub(first))))
    }

    /// The decode time of a sample. The sample one past the end resolves to the total duration.
    pub fn decode_time(&self, sample: u64, cursor: &mut IndexCursor) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Qt(index) => {
                let (time, c) = index.tables.time_to_sample.as_ref()?.sample_to_time(sample, cursor.time)?;
                cursor.time = c;
                Some(time)
            }
            Self::Avi(index) if sample <= index.sample_count => Some(sample * index.sample_duration as u64),
            Self::Avi(_) => None,
        }
    }

    pub fn presentation_time(&self, sample: u64, cursor: &mut IndexCursor) -> Option<i64> {
        let dts = self.decode_time(sample, cursor)? as i64;
        let offset = match self {
            Self::Qt(QtIndex {
                tables:
                    SampleTables {
                        composition_offset: Some(ctts),
                        ..
                    },
                ..
            }) => match ctts.sample_offset(sample, cursor.composition) {
                Some((offset, c)) => {
                    cursor.composition = c;
                    offset as i64
                }
                None => 0,
            },
            _ => 0,
        };
        Some(dts + offset)
    }

    pub fn sample_duration(&self, sample: u64, cursor: &mut IndexCursor) -> Option<u32> {
        match self {
            Self::Empty => None,
            Self::Qt(index) => {
                let (duration, c) = index.tables.time_to_sample.as_ref()?.sample_duration(sample, cursor.time)?;
                cursor.time = c;
                Some(duration)
            }
            Self::Avi(index) if sample < index.sample_count => Some(index.sample_duration),
            Self::Avi(_) => None,
        }
    }

    /// Returns the sample whose decode interval contains `time`.
    pub fn time_to_sample(&self, time: u64, cursor: &mut IndexCursor) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Qt(index) => {
                let (sample, c) = index.tables.time_to_sample.as_ref()?.time_to_sample(time, cursor.time)?;
                cursor.time = c;
                Some(sample)
            }
            Self::Avi(index) => Some(time / index.sample_duration as u64).filter(|&s| s < index.sample_count),
        }
    }

    pub fn duration(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Qt(index) => index.tables.time_to_sample.as_ref().map_or(0, |stts| stts.duration()),
            Self::Avi(index) => index.sample_count * index.sample_duration as u64,
        }
    }

    pub fn is_keyframe(&self, sample: u64) -> bool {
        match self {
            Self::Empty => false,
            Self::Qt(index) => sample < index.tables.sample_count() && index.tables.is_keyframe(sample),
            Self::Avi(index) => index.chunk_of(sample).map_or(false, |i| index.sample_size > 0 || index.chunks[i].keyframe),
        }
    }

    /// The last keyframe at or before `sample`.
    pub fn keyframe_before(&self, sample: u64) -> Option<u64> {
        let sample = sample.min(self.sample_count().checked_sub(1)?);
        match self {
            Self::Empty => None,
            Self::Qt(index) => index.tables.keyframe_before(sample),
            Self::Avi(_) => (0..=sample).rev().find(|&s| self.is_keyframe(s)),
        }
    }

    /// The first keyframe at or after `sample`.
    pub fn keyframe_after(&self, sample: u64) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Qt(index) => index.tables.keyframe_after(sample).filter(|&s| s < index.tables.sample_count()),
            Self::Avi(_) => (sample..self.sample_count()).find(|&s| self.is_keyframe(s)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BuiltChunk {
    pub offset: u64,
    pub size: u64,
    pub first_sample: u64,
    pub samples: u32,
}

/// Accumulates the index of a track as it is written.
///
/// Video and text samples carry individual presentation times, since encoders may emit them out
/// of order. Audio samples are appended in runs and time is simply their count.
#[derive(Clone, Debug, Default)]
pub struct IndexBuilder {
    timestamps: Vec<(i64, u32)>,
    time_to_sample: TimeToSampleData,
    sizes: SampleSizeData,
    chunks: Vec<BuiltChunk>,
    sync: SyncSampleData,
    has_non_sync: bool,
    sample_count: u64,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn chunks(&self) -> &[BuiltChunk] {
        &self.chunks
    }

    pub fn max_sample_size(&self) -> u32 {
        match self.sizes.constant_sample_size {
            0 => self.sizes.sample_sizes.iter().copied().max().unwrap_or(0),
            size => size,
        }
    }

    pub fn append_timestamp(&mut self, time: i64, duration: u32) {
        self.timestamps.push((time, duration));
    }

    fn push_sizes(&mut self, size: u32, count: u32) {
        if self.sizes.sample_count == 0 {
            self.sizes.constant_sample_size = size;
        }
        if self.sizes.constant_sample_size == size && size > 0 {
            self.sizes.sample_count += count;
        } else {
            for _ in 0..count {
                self.sizes.push(size);
            }
        }
    }

    fn push_chunk(&mut self, offset: u64, bytes: u64, samples: u32) {
        match self.chunks.last_mut() {
            Some(last) if last.offset + last.size == offset => {
                last.size += bytes;
                last.samples += samples;
            }
            _ => self.chunks.push(BuiltChunk {
                offset,
                size: bytes,
                first_sample: self.sample_count,
                samples,
            }),
        }
    }

    /// Appends one individually timed sample stored at `offset`. Samples that directly follow the
    /// previous one in the file share its chunk. Returns the sample number.
    pub fn add_sample(&mut self, offset: u64, size: u32, keyframe: bool, time: i64, duration: u32) -> u64 {
        self.push_chunk(offset, size as u64, 1);
        self.push_sizes(size, 1);
        self.append_timestamp(time, duration);
        if !keyframe && !self.has_non_sync {
            self.has_non_sync = true;
            for s in 0..self.sample_count {
                self.sync.insert(s);
            }
        }
        if keyframe && self.has_non_sync {
            self.sync.insert(self.sample_count);
        }
        self.sample_count += 1;
        self.sample_count - 1
    }

    /// Appends `count` consecutive samples of `size` bytes and `duration` ticks each, stored
    /// contiguously from `offset`. Returns the first sample number.
    pub fn add_samples(&mut self, offset: u64, count: u32, size: u32, duration: u32) -> u64 {
        let first = self.sample_count;
        if count == 0 {
            return first;
        }
        self.push_chunk(offset, count as u64 * size as u64, count);
        self.push_sizes(size, count);
        match self.time_to_sample.entries.last_mut() {
            Some(last) if last.sample_duration == duration => last.sample_count += count,
            _ => self.time_to_sample.entries.push(qtff::TimeToSampleDataEntry {
                sample_count: count,
                sample_duration: duration,
            }),
        }
        if self.has_non_sync {
            for s in first..first + count as u64 {
                self.sync.insert(s);
            }
        }
        self.sample_count += count as u64;
        first
    }

    pub fn is_keyframe(&self, sample: u64) -> bool {
        sample < self.sample_count && (!self.has_non_sync || self.sync.is_sync(sample))
    }

    /// Marks an already written sample as a keyframe. Returns false if it already was one.
    pub fn insert_keyframe(&mut self, sample: u64) -> bool {
        if self.is_keyframe(sample) || sample >= self.sample_count {
            return false;
        }
        self.sync.insert(sample);
        true
    }

    /// The presentation time of the first sample, which the written timeline starts from.
    pub fn start_time(&self) -> i64 {
        self.timestamps.iter().map(|&(t, _)| t).min().unwrap_or(0)
    }

    pub fn total_duration(&self) -> u64 {
        if self.timestamps.is_empty() {
            return self.time_to_sample.duration();
        }
        let start = self.start_time();
        self.timestamps
            .iter()
            .map(|&(t, d)| (t - start) as u64 + d as u64)
            .max()
            .unwrap_or(0)
    }

    /// Decode times are the sorted presentation times shifted to start at zero. Each sample's
    /// composition offset lands its decode time back on the presentation time it was given, and
    /// the movie's edit list starts playback at [`start_time`](Self::start_time).
    fn timing(&self) -> (TimeToSampleData, Option<CompositionOffsetData>) {
        if self.timestamps.is_empty() {
            return (self.time_to_sample.clone(), None);
        }
        let mut sorted: Vec<i64> = self.timestamps.iter().map(|&(t, _)| t).collect();
        sorted.sort_unstable();
        let start = sorted[0];
        let deltas: Vec<u32> = sorted
            .windows(2)
            .map(|w| {
                u32::try_from(w[1] - w[0]).unwrap_or_else(|_| {
                    log::warn!("gap of {} ticks between presentation times {} and {} is too long", w[1] - w[0], w[0], w[1]);
                    u32::MAX
                })
            })
            .collect();
        let mut stts = TimeToSampleData::default();
        for &delta in &deltas {
            stts.push(delta);
        }
        if let Some(&(_, last_duration)) = self.timestamps.last() {
            stts.push(last_duration);
        }
        let mut decode_time = 0i64;
        let mut offsets = Vec::with_capacity(self.timestamps.len());
        for (i, &(pts, _)) in self.timestamps.iter().enumerate() {
            let offset = pts - decode_time;
            offsets.push(i32::try_from(offset).unwrap_or_else(|_| {
                log::warn!("composition offset {} of sample {} is out of range", offset, i);
                if offset < 0 {
                    i32::MIN
                } else {
                    i32::MAX
                }
            }));
            decode_time += deltas.get(i).copied().unwrap_or(0) as i64;
        }
        let ctts = if offsets.iter().any(|&o| o != 0) {
            let mut ctts = CompositionOffsetData::default();
            for o in offsets {
                ctts.push(o);
            }
            Some(ctts)
        } else {
            None
        };
        log::trace!("timeline starts at {}", start);
        (stts, ctts)
    }

    /// Produces the finished sample tables.
    pub fn finalize(&self, force_64bit_offsets: bool) -> SampleTables {
        let (stts, ctts) = self.timing();
        let mut sizes = self.sizes.clone();
        sizes.compact();
        let mut stsc = SampleToChunkData::default();
        for (i, chunk) in self.chunks.iter().enumerate() {
            stsc.push_chunk(i as u32 + 1, chunk.samples, 1);
        }
        let mut tables = SampleTables {
            time_to_sample: Some(stts),
            composition_offset: ctts,
            sync_sample: self.has_non_sync.then(|| self.sync.clone()),
            sample_to_chunk: Some(stsc),
            sample_size: Some(sizes),
            ..Default::default()
        };
        tables.set_chunk_offsets(self.chunks.iter().map(|c| c.offset).collect(), force_64bit_offsets);
        tables
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reordered_timestamps() {
        let pts = [0, 2002, 1001, 3003, 4004];
        let mut builder = IndexBuilder::new();
        for (i, &t) in pts.iter().enumerate() {
            builder.add_sample(100 + i as u64 * 10, 10, i == 0 || i == 3, t, 1001);
        }
        let tables = builder.finalize(false);
        let ctts = tables.composition_offset.as_ref().unwrap();
        assert_eq!(1, ctts.version);
        assert_eq!(5, tables.time_to_sample.as_ref().unwrap().sample_count());
        assert_eq!(5005, builder.total_duration());

        let index = TrackIndex::Qt(QtIndex::new(tables, None));
        let mut cursor = IndexCursor::default();
        for (i, &t) in pts.iter().enumerate() {
            assert_eq!(Some(t), index.presentation_time(i as u64, &mut cursor));
        }
        assert_eq!(Some(SampleLocation { offset: 120, size: 10 }), index.locate(2, &mut cursor));
        assert!(index.is_keyframe(3));
        assert!(!index.is_keyframe(2));
        assert_eq!(Some(0), index.keyframe_before(2));
        assert_eq!(Some(3), index.keyframe_after(1));
        assert_eq!(None, index.keyframe_after(4));
    }

    #[test]
    fn test_timestamps_starting_late() {
        let pts = [1001, 3003, 2002, 4004];
        let mut builder = IndexBuilder::new();
        for (i, &t) in pts.iter().enumerate() {
            builder.add_sample(i as u64 * 10, 10, i == 0, t, 1001);
        }
        assert_eq!(1001, builder.start_time());
        assert_eq!(4004, builder.total_duration());
        let tables = builder.finalize(false);

        let index = TrackIndex::Qt(QtIndex::new(tables, None));
        let mut cursor = IndexCursor::default();
        assert_eq!(Some(0), index.decode_time(0, &mut cursor));
        for (i, &t) in pts.iter().enumerate() {
            assert_eq!(Some(t), index.presentation_time(i as u64, &mut cursor));
        }
    }

    #[test]
    fn test_negative_start_time() {
        let pts = [-2002, 0, -1001];
        let mut builder = IndexBuilder::new();
        for (i, &t) in pts.iter().enumerate() {
            builder.add_sample(i as u64 * 10, 10, true, t, 1001);
        }
        let tables = builder.finalize(false);
        assert_eq!(1, tables.composition_offset.as_ref().unwrap().version);

        let index = TrackIndex::Qt(QtIndex::new(tables, None));
        let mut cursor = IndexCursor::default();
        for (i, &t) in pts.iter().enumerate() {
            assert_eq!(Some(t), index.presentation_time(i as u64, &mut cursor));
        }
    }

    #[test]
    fn test_oversized_timestamp_gap() {
        let mut builder = IndexBuilder::new();
        builder.add_sample(0, 10, true, 0, 1001);
        builder.add_sample(10, 10, true, 1 << 40, 1001);
        let tables = builder.finalize(false);
        let stts = tables.time_to_sample.as_ref().unwrap();
        assert_eq!(u32::MAX, stts.entries[0].sample_duration);
        assert_eq!(2, stts.sample_count());
    }

    #[test]
    fn test_in_order_timestamps() {
        let mut builder = IndexBuilder::new();
        for i in 0..4 {
            builder.add_sample(i * 50, 50, true, i as i64 * 1001, 1001);
        }
        let tables = builder.finalize(false);
        assert!(tables.composition_offset.is_none());
        assert!(tables.sync_sample.is_none());
        // contiguous samples share one chunk
        assert_eq!(1, tables.chunk_count());
        assert_eq!(50, tables.sample_size.as_ref().unwrap().constant_sample_size);

        let index = TrackIndex::Qt(QtIndex::new(tables, None));
        let mut cursor = IndexCursor::default();
        assert_eq!(Some(2), index.time_to_sample(2500, &mut cursor));
        assert_eq!(Some(4004), index.decode_time(4, &mut cursor));
        assert_eq!(None, index.locate(4, &mut cursor));
    }

    #[test]
    fn test_audio_runs() {
        let mut builder = IndexBuilder::new();
        assert_eq!(0, builder.add_samples(1000, 1601, 4, 1));
        assert_eq!(1601, builder.add_samples(1000 + 1601 * 4, 1602, 4, 1));
        // something else was written in between
        assert_eq!(3203, builder.add_samples(20000, 1601, 4, 1));
        assert_eq!(2, builder.chunks().len());
        assert_eq!(4804, builder.total_duration());

        let tables = builder.finalize(false);
        assert_eq!(4804, tables.sample_count());
        let stsc = tables.sample_to_chunk.as_ref().unwrap();
        assert_eq!(2, stsc.entries.len());

        let index = TrackIndex::Qt(QtIndex::new(tables, None));
        let mut cursor = IndexCursor::default();
        assert_eq!(Some(SampleLocation { offset: 1000 + 3202 * 4, size: 4 }), index.locate(3202, &mut cursor));
        assert_eq!(Some(SampleLocation { offset: 20004, size: 4 }), index.locate(3204, &mut cursor));
        assert_eq!(Some((3203, 1601)), index.chunk_span(4000, &mut cursor));
        assert!(index.is_keyframe(4000));
    }

    #[test]
    fn test_insert_keyframe() {
        let mut builder = IndexBuilder::new();
        builder.add_sample(0, 10, true, 0, 1);
        builder.add_sample(10, 10, false, 1, 1);
        builder.add_sample(20, 10, false, 2, 1);
        assert!(!builder.is_keyframe(2));
        assert!(builder.insert_keyframe(2));
        assert!(!builder.insert_keyframe(2));
        assert!(!builder.insert_keyframe(7));
        assert_eq!(vec![1, 3], builder.finalize(false).sync_sample.unwrap().samples);
    }

    #[test]
    fn test_avi_index() {
        let chunks = vec![
            AviChunk {
                offset: 100,
                size: 400,
                keyframe: true,
            },
            AviChunk {
                offset: 900,
                size: 40,
                keyframe: true,
            },
        ];
        let cbr = TrackIndex::Avi(AviIndex::new(chunks.clone(), 4, 1));
        let mut cursor = IndexCursor::default();
        assert_eq!(110, cbr.sample_count());
        assert_eq!(Some(SampleLocation { offset: 396, size: 4 }), cbr.locate(74, &mut cursor));
        assert_eq!(Some(SampleLocation { offset: 904, size: 4 }), cbr.locate(101, &mut cursor));
        assert_eq!(Some((100, 10)), cbr.chunk_span(105, &mut cursor));
        assert_eq!(None, cbr.locate(110, &mut cursor));

        let mut chunks = chunks;
        chunks[1].keyframe = false;
        let vbr = TrackIndex::Avi(AviIndex::new(chunks, 0, 1001));
        assert_eq!(2, vbr.sample_count());
        assert_eq!(Some(SampleLocation { offset: 900, size: 40 }), vbr.locate(1, &mut cursor));
        assert_eq!(Some(1001), vbr.decode_time(1, &mut cursor));
        assert_eq!(Some(1), vbr.time_to_sample(1500, &mut cursor));
        assert_eq!(Some(0), vbr.keyframe_before(1));
        assert_eq!(None, vbr.keyframe_after(1));
    }
}
