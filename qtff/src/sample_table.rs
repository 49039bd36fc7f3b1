use std::io::{Read, Seek, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use super::atom::{AtomWriteExt, FourCC};
use super::data::{read_one, AtomData, ReadData, WriteData};
use super::error::Result;

/// A position within a run-length table: the run index, the first sample of that run and, for
/// time tables, the time at which the run starts. Threading the cursor returned by one lookup into
/// the next makes sequential access amortized O(1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunCursor {
    pub entry: usize,
    pub first_sample: u64,
    pub first_time: u64,
}

trait RunEntry {
    fn count(&self) -> u32;

    fn duration(&self) -> u32 {
        0
    }
}

fn find_sample_run<E: RunEntry>(entries: &[E], sample: u64, cursor: RunCursor) -> Option<RunCursor> {
    let mut c = if cursor.first_sample <= sample && cursor.entry < entries.len() {
        cursor
    } else {
        RunCursor::default()
    };
    while let Some(e) = entries.get(c.entry) {
        let n = e.count() as u64;
        if sample < c.first_sample + n {
            return Some(c);
        }
        c.first_sample += n;
        c.first_time += n * e.duration() as u64;
        c.entry += 1;
    }
    None
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TimeToSampleDataEntry {
    pub sample_count: u32,
    pub sample_duration: u32,
}

impl RunEntry for TimeToSampleDataEntry {
    fn count(&self) -> u32 {
        self.sample_count
    }

    fn duration(&self) -> u32 {
        self.sample_duration
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimeToSampleData {
    pub version: u8,
    pub flags: [u8; 3],
    pub entries: Vec<TimeToSampleDataEntry>,
}

impl AtomData for TimeToSampleData {
    const TYPE: FourCC = FourCC::STTS;
}

impl TimeToSampleData {
    pub fn duration(&self) -> u64 {
        self.entries.iter().fold(0, |acc, e| acc + (e.sample_count as u64) * (e.sample_duration as u64))
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().fold(0, |acc, e| acc + e.sample_count as u64)
    }

    // Provides the time for the given zero-based sample.
    pub fn sample_time(&self, sample: u64) -> Option<u64> {
        self.sample_to_time(sample, RunCursor::default()).map(|(t, _)| t)
    }

    /// Returns the decode time of the given zero-based sample. The sample one past the last one
    /// resolves to the total duration.
    pub fn sample_to_time(&self, sample: u64, cursor: RunCursor) -> Option<(u64, RunCursor)> {
        match find_sample_run(&self.entries, sample, cursor) {
            Some(c) => {
                let e = &self.entries[c.entry];
                Some((c.first_time + (sample - c.first_sample) * e.sample_duration as u64, c))
            }
            None if sample == self.sample_count() => Some((self.duration(), cursor)),
            None => None,
        }
    }

    pub fn sample_duration(&self, sample: u64, cursor: RunCursor) -> Option<(u32, RunCursor)> {
        find_sample_run(&self.entries, sample, cursor).map(|c| (self.entries[c.entry].sample_duration, c))
    }

    /// Returns the zero-based sample whose decode interval contains `time`.
    pub fn time_to_sample(&self, time: u64, cursor: RunCursor) -> Option<(u64, RunCursor)> {
        let mut c = if cursor.first_time <= time && cursor.entry < self.entries.len() {
            cursor
        } else {
            RunCursor::default()
        };
        while let Some(e) = self.entries.get(c.entry) {
            let span = e.sample_count as u64 * e.sample_duration as u64;
            if time < c.first_time + span {
                let offset = (time - c.first_time) / e.sample_duration as u64;
                return Some((c.first_sample + offset, c));
            }
            c.first_sample += e.sample_count as u64;
            c.first_time += span;
            c.entry += 1;
        }
        None
    }

    /// Appends one sample, extending the last run when the duration matches.
    pub fn push(&mut self, duration: u32) {
        match self.entries.last_mut() {
            Some(last) if last.sample_duration == duration => last.sample_count += 1,
            _ => self.entries.push(TimeToSampleDataEntry {
                sample_count: 1,
                sample_duration: duration,
            }),
        }
    }

    pub fn from_durations<I: IntoIterator<Item = u32>>(durations: I) -> Self {
        let mut ret = Self::default();
        for d in durations {
            ret.push(d);
        }
        ret
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CompositionOffsetDataEntry {
    pub sample_count: u32,
    pub sample_offset: i32,
}

impl RunEntry for CompositionOffsetDataEntry {
    fn count(&self) -> u32 {
        self.sample_count
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CompositionOffsetData {
    pub version: u8,
    pub flags: [u8; 3],
    pub entries: Vec<CompositionOffsetDataEntry>,
}

impl AtomData for CompositionOffsetData {
    const TYPE: FourCC = FourCC::CTTS;
}

impl CompositionOffsetData {
    pub fn sample_count(&self) -> u64 {
        self.entries.iter().fold(0, |acc, e| acc + e.sample_count as u64)
    }

    /// Returns presentation time minus decode time for the given zero-based sample.
    pub fn sample_offset(&self, sample: u64, cursor: RunCursor) -> Option<(i32, RunCursor)> {
        find_sample_run(&self.entries, sample, cursor).map(|c| (self.entries[c.entry].sample_offset, c))
    }

    pub fn push(&mut self, offset: i32) {
        match self.entries.last_mut() {
            Some(last) if last.sample_offset == offset => last.sample_count += 1,
            _ => self.entries.push(CompositionOffsetDataEntry {
                sample_count: 1,
                sample_offset: offset,
            }),
        }
        if offset < 0 {
            self.version = 1;
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SampleToChunkDataEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_id: u32,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SampleToChunkData {
    pub version: u8,
    pub flags: [u8; 3],
    pub entries: Vec<SampleToChunkDataEntry>,
}

impl AtomData for SampleToChunkData {
    const TYPE: FourCC = FourCC::STSC;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleChunkInfo {
    // The zero-based chunk number.
    pub number: u32,

    pub first_sample: u64,
    pub samples: u64,

    pub entry: usize,
    pub entry_first_sample: u64,

    // The zero-based sample description.
    pub sample_description: u32,
}

impl SampleToChunkData {
    // Returns the zero-based sample number that the given zero-based chunk number starts with.
    pub fn chunk_first_sample(&self, n: u32) -> u64 {
        let mut sample_offset: u64 = 0;
        for i in 1..self.entries.len() {
            let e = &self.entries[i];
            let prev = &self.entries[i - 1];
            if e.first_chunk > n + 1 {
                return sample_offset + (n + 1 - prev.first_chunk) as u64 * prev.samples_per_chunk as u64;
            }
            sample_offset += ((e.first_chunk - prev.first_chunk) as u64) * (prev.samples_per_chunk as u64);
        }
        match self.entries.last() {
            Some(last) => sample_offset + (n + 1).saturating_sub(last.first_chunk) as u64 * (last.samples_per_chunk as u64),
            None => 0,
        }
    }

    // Returns the zero-based chunk number that the given zero-based sample number is in.
    pub fn sample_chunk(&self, n: u64) -> Option<u32> {
        self.sample_chunk_info(n, None).map(|info| info.number)
    }

    // Returns info for the chunk that the given zero-based sample number is in. If you provide the
    // results of an invocation for a sample preceding n, you can amortize the cost of iterating
    // the chunk info entries across multiple invocations.
    pub fn sample_chunk_info(&self, n: u64, prev: Option<&SampleChunkInfo>) -> Option<SampleChunkInfo> {
        let prev = prev.filter(|p| p.entry_first_sample <= n && p.entry < self.entries.len());
        let mut sample_offset: u64 = prev.map(|p| p.entry_first_sample).unwrap_or(0);
        for i in prev.map(|p| p.entry + 1).unwrap_or(1)..self.entries.len() {
            let e = &self.entries[i];
            let prev = &self.entries[i - 1];
            let new_sample_offset = sample_offset + ((e.first_chunk - prev.first_chunk) as u64) * (prev.samples_per_chunk as u64);
            if new_sample_offset > n {
                return Self::chunk_info_in_entry(prev, i - 1, sample_offset, n);
            }
            sample_offset = new_sample_offset;
        }
        let last = self.entries.len().checked_sub(1)?;
        Self::chunk_info_in_entry(&self.entries[last], last, sample_offset, n)
    }

    fn chunk_info_in_entry(e: &SampleToChunkDataEntry, entry: usize, entry_first_sample: u64, n: u64) -> Option<SampleChunkInfo> {
        if e.samples_per_chunk == 0 || e.first_chunk == 0 || e.sample_description_id == 0 {
            return None;
        }
        let relative = ((n - entry_first_sample) / (e.samples_per_chunk as u64)) as u32;
        Some(SampleChunkInfo {
            number: e.first_chunk - 1 + relative,
            first_sample: entry_first_sample + relative as u64 * e.samples_per_chunk as u64,
            samples: e.samples_per_chunk as _,
            entry,
            entry_first_sample,
            sample_description: e.sample_description_id - 1,
        })
    }

    // Returns the number of samples.
    pub fn sample_count(&self, chunk_count: u32) -> u64 {
        let mut ret = 0;
        if let Some(last) = self.entries.last() {
            for i in 1..self.entries.len() {
                let e = &self.entries[i - 1];
                let next = &self.entries[i];
                ret += ((next.first_chunk - e.first_chunk) as u64) * (e.samples_per_chunk as u64);
            }
            ret += (chunk_count + 1).saturating_sub(last.first_chunk) as u64 * last.samples_per_chunk as u64;
        }
        ret
    }

    /// Returns the number of samples in the given zero-based chunk.
    pub fn chunk_samples(&self, n: u32) -> u32 {
        self.entries
            .iter()
            .take_while(|e| e.first_chunk <= n + 1)
            .last()
            .map(|e| e.samples_per_chunk)
            .unwrap_or(0)
    }

    /// Checks that the entries partition `[0, chunk_count)`: the first run starts at chunk 1, runs
    /// are strictly increasing and every run lies within the chunk range.
    pub fn validate(&self, chunk_count: u32) -> std::result::Result<(), &'static str> {
        if chunk_count == 0 {
            return Ok(());
        }
        let first = self.entries.first().ok_or("no sample-to-chunk entries")?;
        if first.first_chunk != 1 {
            return Err("first sample-to-chunk entry doesn't start at chunk 1");
        }
        for w in self.entries.windows(2) {
            if w[1].first_chunk <= w[0].first_chunk {
                return Err("sample-to-chunk entries are not strictly increasing");
            }
        }
        for e in &self.entries {
            if e.first_chunk > chunk_count {
                return Err("sample-to-chunk entry refers to a chunk past the end");
            }
            if e.samples_per_chunk == 0 {
                return Err("sample-to-chunk entry has no samples");
            }
            if e.sample_description_id == 0 {
                return Err("sample-to-chunk entry has an invalid sample description");
            }
        }
        Ok(())
    }

    /// Records that the given one-based chunk holds `samples` samples, extending the last run when
    /// it matches.
    pub fn push_chunk(&mut self, chunk: u32, samples: u32, sample_description_id: u32) {
        match self.entries.last() {
            Some(last) if last.samples_per_chunk == samples && last.sample_description_id == sample_description_id => {}
            _ => self.entries.push(SampleToChunkDataEntry {
                first_chunk: chunk,
                samples_per_chunk: samples,
                sample_description_id,
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSizeData {
    pub version: u8,
    pub flags: [u8; 3],
    pub constant_sample_size: u32,
    pub sample_count: u32,
    pub sample_sizes: Vec<u32>,
}

impl AtomData for SampleSizeData {
    const TYPE: FourCC = FourCC::STSZ;
}

impl ReadData for SampleSizeData {
    fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0; 12];
        reader.read_exact(&mut buf)?;
        let flags = [buf[1], buf[2], buf[3]];
        match BigEndian::read_u32(&buf[4..]) {
            0 => {
                let number_of_entries = BigEndian::read_u32(&buf[8..]);
                let mut entry_buf = Vec::new();
                (&mut reader).take(number_of_entries as u64 * 4).read_to_end(&mut entry_buf)?;
                if entry_buf.len() != number_of_entries as usize * 4 {
                    return Err(super::error::Error::MalformedFile("truncated sample size table"));
                }
                Ok(Self {
                    version: buf[0],
                    flags,
                    constant_sample_size: 0,
                    sample_count: number_of_entries,
                    sample_sizes: entry_buf.chunks_exact(4).map(BigEndian::read_u32).collect(),
                })
            }
            constant_sample_size => Ok(Self {
                version: buf[0],
                flags,
                constant_sample_size,
                sample_count: BigEndian::read_u32(&buf[8..]),
                sample_sizes: vec![],
            }),
        }
    }
}

impl WriteData for SampleSizeData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u8(self.version)?;
        writer.write_all(&self.flags)?;
        writer.write_u32::<BigEndian>(self.constant_sample_size)?;
        if self.constant_sample_size == 0 {
            writer.write_u32::<BigEndian>(self.sample_sizes.len() as _)?;
            for entry in self.sample_sizes.iter() {
                writer.write_u32::<BigEndian>(*entry)?;
            }
        } else {
            writer.write_u32::<BigEndian>(self.sample_count)?;
        }
        Ok(())
    }
}

impl SampleSizeData {
    // Returns the size of the given zero-based sample number.
    pub fn sample_size(&self, n: u64) -> Option<u32> {
        match self.constant_sample_size {
            0 => self.sample_sizes.get(n as usize).copied(),
            _ if n < self.sample_count as u64 => Some(self.constant_sample_size),
            _ => None,
        }
    }

    pub fn iter_sample_sizes(&self) -> impl '_ + Iterator<Item = u32> {
        match self.constant_sample_size {
            0 => either::Left(self.sample_sizes.iter().copied()),
            _ => either::Right(std::iter::repeat(self.constant_sample_size).take(self.sample_count as usize)),
        }
    }

    pub fn push(&mut self, size: u32) {
        if self.constant_sample_size != 0 && self.constant_sample_size != size {
            self.sample_sizes = vec![self.constant_sample_size; self.sample_count as usize];
            self.constant_sample_size = 0;
        }
        if self.constant_sample_size == 0 {
            self.sample_sizes.push(size);
        }
        self.sample_count += 1;
    }

    /// Switches to the constant form when every sample has the same nonzero size.
    pub fn compact(&mut self) {
        if self.constant_sample_size == 0 {
            if let Some(&first) = self.sample_sizes.first() {
                if first > 0 && self.sample_sizes.iter().all(|&s| s == first) {
                    self.constant_sample_size = first;
                    self.sample_count = self.sample_sizes.len() as _;
                    self.sample_sizes.clear();
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ChunkOffset64Data {
    pub version: u8,
    pub flags: [u8; 3],
    pub offsets: Vec<u64>,
}

impl AtomData for ChunkOffset64Data {
    const TYPE: FourCC = FourCC::CO64;
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ChunkOffsetData {
    pub version: u8,
    pub flags: [u8; 3],
    pub offsets: Vec<u32>,
}

impl AtomData for ChunkOffsetData {
    const TYPE: FourCC = FourCC::STCO;
}

/// The 1-based sample numbers of the sync samples, in increasing order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SyncSampleData {
    pub version: u8,
    pub flags: [u8; 3],
    pub samples: Vec<u32>,
}

impl AtomData for SyncSampleData {
    const TYPE: FourCC = FourCC::STSS;
}

impl SyncSampleData {
    pub fn is_sync(&self, sample: u64) -> bool {
        self.samples.binary_search(&((sample + 1) as u32)).is_ok()
    }

    /// Returns the last zero-based sync sample at or before `sample`.
    pub fn sync_before(&self, sample: u64) -> Option<u64> {
        let i = self.samples.partition_point(|&s| s as u64 <= sample + 1);
        i.checked_sub(1).map(|i| self.samples[i] as u64 - 1)
    }

    /// Returns the first zero-based sync sample at or after `sample`.
    pub fn sync_after(&self, sample: u64) -> Option<u64> {
        let i = self.samples.partition_point(|&s| (s as u64) < sample + 1);
        self.samples.get(i).map(|&s| s as u64 - 1)
    }

    /// Marks a zero-based sample as a sync sample.
    pub fn insert(&mut self, sample: u64) {
        let s = (sample + 1) as u32;
        if let Err(i) = self.samples.binary_search(&s) {
            self.samples.insert(i, s);
        }
    }
}

/// The sample table atoms other than the sample description.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleTables {
    pub time_to_sample: Option<TimeToSampleData>,
    pub composition_offset: Option<CompositionOffsetData>,
    pub sync_sample: Option<SyncSampleData>,
    pub sample_to_chunk: Option<SampleToChunkData>,
    pub sample_size: Option<SampleSizeData>,
    pub chunk_offset: Option<ChunkOffsetData>,
    pub chunk_offset_64: Option<ChunkOffset64Data>,
}

impl ReadData for SampleTables {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            time_to_sample: read_one(&mut reader)?,
            composition_offset: read_one(&mut reader)?,
            sync_sample: read_one(&mut reader)?,
            sample_to_chunk: read_one(&mut reader)?,
            sample_size: read_one(&mut reader)?,
            chunk_offset: read_one(&mut reader)?,
            chunk_offset_64: read_one(&mut reader)?,
        })
    }
}

impl WriteData for SampleTables {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if let Some(v) = &self.time_to_sample {
            writer.write_atom(v)?;
        }
        if let Some(v) = &self.composition_offset {
            writer.write_atom(v)?;
        }
        if let Some(v) = &self.sync_sample {
            writer.write_atom(v)?;
        }
        if let Some(v) = &self.sample_to_chunk {
            writer.write_atom(v)?;
        }
        if let Some(v) = &self.sample_size {
            writer.write_atom(v)?;
        }
        if let Some(v) = &self.chunk_offset {
            writer.write_atom(v)?;
        }
        if let Some(v) = &self.chunk_offset_64 {
            writer.write_atom(v)?;
        }
        Ok(())
    }
}

impl SampleTables {
    pub fn chunk_count(&self) -> u32 {
        if let Some(co) = &self.chunk_offset_64 {
            co.offsets.len() as u32
        } else if let Some(co) = &self.chunk_offset {
            co.offsets.len() as u32
        } else {
            0
        }
    }

    pub fn chunk_offset(&self, chunk: u32) -> Option<u64> {
        if let Some(co) = &self.chunk_offset_64 {
            co.offsets.get(chunk as usize).copied()
        } else {
            self.chunk_offset.as_ref()?.offsets.get(chunk as usize).map(|&o| o as u64)
        }
    }

    pub fn iter_chunk_offsets(&self) -> Option<impl '_ + Iterator<Item = u64>> {
        if let Some(co) = &self.chunk_offset_64 {
            Some(either::Left(co.offsets.iter().copied()))
        } else {
            self.chunk_offset.as_ref().map(|co| either::Right(co.offsets.iter().map(|&n| n as u64)))
        }
    }

    /// Stores the chunk offsets as `stco`, or as `co64` when forced or when an offset doesn't fit
    /// in 32 bits.
    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>, force_64: bool) {
        if force_64 || offsets.iter().any(|&o| o > u32::MAX as u64) {
            self.chunk_offset = None;
            self.chunk_offset_64 = Some(ChunkOffset64Data {
                offsets,
                ..Default::default()
            });
        } else {
            self.chunk_offset_64 = None;
            self.chunk_offset = Some(ChunkOffsetData {
                offsets: offsets.into_iter().map(|o| o as u32).collect(),
                ..Default::default()
            });
        }
    }

    /// The number of samples. The sample size table is authoritative, so the time table is only
    /// consulted for counting when there's no sample size table at all.
    pub fn sample_count(&self) -> u64 {
        if let Some(sample_size) = self.sample_size.as_ref() {
            if sample_size.constant_sample_size == 0 || sample_size.sample_count != 0 {
                return sample_size.sample_count as u64;
            }
        }
        match &self.sample_to_chunk {
            Some(stsc) => stsc.sample_count(self.chunk_count()),
            None => 0,
        }
    }

    // Returns info for the chunk that the given zero-based sample number is in.
    pub fn sample_chunk_info(&self, sample: u64, hint: Option<&SampleChunkInfo>) -> Option<SampleChunkInfo> {
        self.sample_to_chunk.as_ref()?.sample_chunk_info(sample, hint)
    }

    /// Returns the size of the given sample. `constant_size`, typically derived from a sound
    /// sample description, takes precedence over the sample size table.
    pub fn sample_size(&self, sample: u64, constant_size: Option<u32>) -> Option<u32> {
        let sample_size = self.sample_size.as_ref()?;
        match constant_size.or(Some(sample_size.constant_sample_size).filter(|&s| s > 0)) {
            Some(size) => Some(size),
            None => sample_size.sample_sizes.get(sample as usize).copied(),
        }
    }

    // Returns the offset within the file of the given zero-based sample.
    pub fn sample_offset(&self, sample: u64, chunk_info: &SampleChunkInfo, constant_size: Option<u32>) -> Option<u64> {
        let chunk_offset = self.chunk_offset(chunk_info.number)?;
        let sample_size = self.sample_size.as_ref()?;
        if sample < chunk_info.first_sample {
            return None;
        }
        let offset_in_chunk = match constant_size.or(Some(sample_size.constant_sample_size).filter(|&s| s > 0)) {
            Some(size) => size as u64 * (sample - chunk_info.first_sample),
            None => {
                if (sample as usize) < sample_size.sample_sizes.len() {
                    sample_size.sample_sizes[(chunk_info.first_sample as usize)..(sample as usize)]
                        .iter()
                        .fold(0, |acc, &x| acc + x as u64)
                } else {
                    return None;
                }
            }
        };
        Some(chunk_offset + offset_in_chunk)
    }

    pub fn is_keyframe(&self, sample: u64) -> bool {
        self.sync_sample.as_ref().map_or(true, |stss| stss.is_sync(sample))
    }

    pub fn keyframe_before(&self, sample: u64) -> Option<u64> {
        match &self.sync_sample {
            Some(stss) => stss.sync_before(sample),
            None => Some(sample),
        }
    }

    pub fn keyframe_after(&self, sample: u64) -> Option<u64> {
        match &self.sync_sample {
            Some(stss) => stss.sync_after(sample),
            None if sample < self.sample_count() => Some(sample),
            None => None,
        }
    }

    /// Returns the presentation time of the given sample: the decode time plus the composition
    /// offset, if any.
    pub fn presentation_time(&self, sample: u64) -> Option<i64> {
        let dts = self.time_to_sample.as_ref()?.sample_time(sample)? as i64;
        let offset = match &self.composition_offset {
            Some(ctts) => ctts.sample_offset(sample, RunCursor::default()).map_or(0, |(o, _)| o as i64),
            None => 0,
        };
        Some(dts + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sample_tables() {
        let tables = SampleTables {
            chunk_offset: Some(ChunkOffsetData {
                version: 0,
                flags: [0; 3],
                offsets: vec![40, 623924, 1247864, 1865576, 2489396, 3107180, 3731028, 4348828, 4972704],
            }),
            sample_size: Some(SampleSizeData {
                version: 0,
                flags: [9, 85, 12],
                constant_sample_size: 0,
                sample_count: 9,
                sample_sizes: vec![611596, 611652, 611568, 611532, 611640, 611560, 611656, 611588, 611544],
            }),
            sample_to_chunk: Some(SampleToChunkData {
                version: 0,
                flags: [0; 3],
                entries: vec![SampleToChunkDataEntry {
                    first_chunk: 1,
                    samples_per_chunk: 1,
                    sample_description_id: 1,
                }],
            }),
            ..Default::default()
        };

        assert_eq!(
            vec![40, 623924, 1247864, 1865576, 2489396, 3107180, 3731028, 4348828, 4972704],
            tables.iter_chunk_offsets().unwrap().collect::<Vec<u64>>()
        );
        let info = tables.sample_chunk_info(3, None).unwrap();
        assert_eq!(3, info.number);
        assert_eq!(Some(1865576), tables.sample_offset(3, &info, None));
        assert_eq!(Some(611532), tables.sample_size(3, None));
        assert!(tables.is_keyframe(5));

        let tables = SampleTables {
            chunk_offset: Some(ChunkOffsetData {
                version: 0,
                flags: [0; 3],
                offsets: vec![611636, 1235576, 1859432, 2477108, 3101036, 3718740, 4342684, 4960416, 5584248],
            }),
            sample_size: Some(SampleSizeData {
                version: 0,
                flags: [0; 3],
                constant_sample_size: 6,
                sample_count: 2048 + 2048 + 1024 + 2048 + 1024 + 2048 + 1024 + 2048 + 2048,
                sample_sizes: vec![],
            }),
            sample_to_chunk: Some(SampleToChunkData {
                version: 0,
                flags: [0; 3],
                entries: [(1, 2048), (3, 1024), (4, 2048), (5, 1024), (6, 2048), (7, 1024), (8, 2048)]
                    .iter()
                    .map(|&(first_chunk, samples_per_chunk)| SampleToChunkDataEntry {
                        first_chunk,
                        samples_per_chunk,
                        sample_description_id: 1,
                    })
                    .collect(),
            }),
            ..Default::default()
        };

        assert_eq!(2048 + 2048 + 1024 + 2048 + 1024 + 2048 + 1024 + 2048 + 2048, tables.sample_count());
        assert_eq!(Ok(()), tables.sample_to_chunk.as_ref().unwrap().validate(tables.chunk_count()));

        // the first sample of the fourth chunk
        let info = tables.sample_chunk_info(2048 + 2048 + 1024, None).unwrap();
        assert_eq!(3, info.number);
        assert_eq!(Some(2477108), tables.sample_offset(2048 + 2048 + 1024, &info, None));
        assert_eq!(Some(2477108 + 6 * 10), tables.sample_offset(2048 + 2048 + 1024 + 10, &info, None));
        // a sound description can override the table's constant size
        assert_eq!(Some(2477108 + 4 * 10), tables.sample_offset(2048 + 2048 + 1024 + 10, &info, Some(4)));

        // hints amortize the chunk walk and give the same answers
        let mut hint: Option<SampleChunkInfo> = None;
        for sample in (0..tables.sample_count()).step_by(500) {
            let with_hint = tables.sample_chunk_info(sample, hint.as_ref()).unwrap();
            assert_eq!(tables.sample_chunk_info(sample, None).unwrap(), with_hint);
            hint = Some(with_hint);
        }
    }

    #[test]
    fn test_sample_size_data() {
        let mut data = SampleSizeData::default();
        data.push(10);
        data.push(10);
        data.compact();
        assert_eq!(10, data.constant_sample_size);
        assert_eq!(2, data.sample_count);

        data.push(12);
        assert_eq!(0, data.constant_sample_size);
        assert_eq!(vec![10, 10, 12], data.sample_sizes);
        assert_eq!(vec![10, 10, 12], data.iter_sample_sizes().collect::<Vec<_>>());
        assert_eq!(None, data.sample_size(3));

        let mut buf = Vec::new();
        data.write(&mut buf).unwrap();
        assert_eq!(data, SampleSizeData::read(Cursor::new(&buf)).unwrap());

        // a table that claims more entries than it holds is rejected
        buf.truncate(buf.len() - 2);
        assert!(SampleSizeData::read(Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_time_to_sample_data() {
        let data = TimeToSampleData {
            version: 0,
            flags: [0; 3],
            entries: vec![
                TimeToSampleDataEntry {
                    sample_count: 8,
                    sample_duration: 1,
                },
                TimeToSampleDataEntry {
                    sample_count: 20,
                    sample_duration: 2,
                },
            ],
        };

        assert_eq!(28, data.sample_count());
        assert_eq!(48, data.duration());
        assert_eq!(Some(0), data.sample_time(0));
        assert_eq!(Some(10), data.sample_time(9));
        assert_eq!(Some(48), data.sample_time(28));
        assert_eq!(None, data.sample_time(29));

        assert_eq!(Some(8), data.time_to_sample(8, RunCursor::default()).map(|(s, _)| s));
        assert_eq!(Some(9), data.time_to_sample(11, RunCursor::default()).map(|(s, _)| s));
        assert_eq!(None, data.time_to_sample(48, RunCursor::default()));

        // run boundaries round trip
        for s in [0, 8] {
            let (t, _) = data.sample_to_time(s, RunCursor::default()).unwrap();
            assert_eq!(s, data.time_to_sample(t, RunCursor::default()).unwrap().0);
        }

        // a threaded cursor gives the same answers as fresh lookups
        let mut cursor = RunCursor::default();
        for s in 0..28 {
            let (t, c) = data.sample_to_time(s, cursor).unwrap();
            assert_eq!(data.sample_time(s), Some(t));
            cursor = c;
        }
        assert_eq!(1, cursor.entry);
        // and a cursor past the sample is ignored
        assert_eq!(Some((3, RunCursor::default())), data.sample_to_time(3, cursor));

        assert_eq!(data, TimeToSampleData::from_durations((0..8).map(|_| 1).chain((0..20).map(|_| 2))));
    }

    #[test]
    fn test_composition_offset_data() {
        let mut data = CompositionOffsetData::default();
        for offset in [1, 1, 0, 2, -1] {
            data.push(offset);
        }
        assert_eq!(4, data.entries.len());
        assert_eq!(1, data.version);
        assert_eq!(5, data.sample_count());
        assert_eq!(Some(2), data.sample_offset(3, RunCursor::default()).map(|(o, _)| o));
        assert_eq!(None, data.sample_offset(5, RunCursor::default()));
    }

    #[test]
    fn test_sample_to_chunk_data() {
        let data = SampleToChunkData {
            version: 0,
            flags: [0; 3],
            entries: vec![
                SampleToChunkDataEntry {
                    first_chunk: 1,
                    samples_per_chunk: 4,
                    sample_description_id: 1,
                },
                SampleToChunkDataEntry {
                    first_chunk: 3,
                    samples_per_chunk: 5,
                    sample_description_id: 2,
                },
            ],
        };

        assert_eq!(0, data.chunk_first_sample(0));
        assert_eq!(4, data.chunk_first_sample(1));
        assert_eq!(8, data.chunk_first_sample(2));
        assert_eq!(13, data.chunk_first_sample(3));
        assert_eq!(Some(1), data.sample_chunk(7));
        assert_eq!(Some(2), data.sample_chunk(8));
        assert_eq!(Some(3), data.sample_chunk(13));
        assert_eq!(1, data.sample_chunk_info(13, None).unwrap().sample_description);
        assert_eq!(4, data.chunk_samples(1));
        assert_eq!(5, data.chunk_samples(2));
        assert_eq!(18, data.sample_count(4));

        assert_eq!(Ok(()), data.validate(4));
        assert!(data.validate(2).is_err());

        let mut bad = data.clone();
        bad.entries[1].first_chunk = 1;
        assert!(bad.validate(4).is_err());

        let mut built = SampleToChunkData::default();
        built.push_chunk(1, 4, 1);
        built.push_chunk(2, 4, 1);
        built.push_chunk(3, 5, 2);
        built.push_chunk(4, 5, 2);
        assert_eq!(data, built);

        assert_eq!(None, SampleToChunkData::default().sample_chunk_info(0, None));
    }

    #[test]
    fn test_sync_sample_data() {
        let mut data = SyncSampleData::default();
        for s in [0, 30, 60] {
            data.insert(s);
        }
        data.insert(30);
        assert_eq!(vec![1, 31, 61], data.samples);
        assert!(data.is_sync(30));
        assert!(!data.is_sync(31));
        assert_eq!(Some(30), data.sync_before(59));
        assert_eq!(Some(60), data.sync_before(60));
        assert_eq!(Some(60), data.sync_after(31));
        assert_eq!(None, data.sync_after(61));

        let tables = SampleTables::default();
        assert!(tables.is_keyframe(12));
    }

    #[test]
    fn test_sample_tables_atoms() {
        let mut tables = SampleTables {
            time_to_sample: Some(TimeToSampleData::from_durations(vec![1001; 3])),
            sample_to_chunk: Some(SampleToChunkData {
                entries: vec![SampleToChunkDataEntry {
                    first_chunk: 1,
                    samples_per_chunk: 3,
                    sample_description_id: 1,
                }],
                ..Default::default()
            }),
            sample_size: Some(SampleSizeData {
                sample_count: 3,
                sample_sizes: vec![5, 6, 7],
                ..Default::default()
            }),
            ..Default::default()
        };
        tables.set_chunk_offsets(vec![1 << 33], false);
        assert!(tables.chunk_offset.is_none());
        assert_eq!(Some(1 << 33), tables.chunk_offset(0));

        let mut buf = Vec::new();
        tables.write(&mut buf).unwrap();
        let read = SampleTables::read(Cursor::new(&buf)).unwrap();
        assert_eq!(tables, read);
        assert_eq!(Some(2002), read.presentation_time(2));
    }
}
