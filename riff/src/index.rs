use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use super::chunk::{ChunkId, ChunkWriteExt};
use super::error::{Error, Result};

pub const AVIIF_LIST: u32 = 0x01;
pub const AVIIF_KEYFRAME: u32 = 0x10;

pub const AVI_INDEX_OF_INDEXES: u8 = 0x00;
pub const AVI_INDEX_OF_CHUNKS: u8 = 0x01;

// Bit 31 of a standard index entry's size marks a delta frame.
const DELTA_FRAME: u32 = 0x8000_0000;

/// One entry of the legacy `idx1` index. The offset points at the chunk header and is relative to
/// the `movi` list type in most files, or absolute in some.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Idx1Entry {
    pub id: ChunkId,
    pub flags: u32,
    pub offset: u32,
    pub size: u32,
}

impl Idx1Entry {
    pub const SIZE: usize = 16;

    pub fn is_keyframe(&self) -> bool {
        self.flags & AVIIF_KEYFRAME != 0
    }
}

pub fn read_idx1(data: &[u8]) -> Vec<Idx1Entry> {
    data.chunks_exact(Idx1Entry::SIZE)
        .map(|e| Idx1Entry {
            id: ChunkId([e[0], e[1], e[2], e[3]]),
            flags: LittleEndian::read_u32(&e[4..]),
            offset: LittleEndian::read_u32(&e[8..]),
            size: LittleEndian::read_u32(&e[12..]),
        })
        .collect()
}

pub fn write_idx1<W: Write>(mut writer: W, entries: &[Idx1Entry]) -> Result<()> {
    let mut buf = Vec::with_capacity(entries.len() * Idx1Entry::SIZE);
    for e in entries {
        buf.write_all(&e.id.0)?;
        buf.write_u32::<LittleEndian>(e.flags)?;
        buf.write_u32::<LittleEndian>(e.offset)?;
        buf.write_u32::<LittleEndian>(e.size)?;
    }
    writer.write_chunk(ChunkId::IDX1, &buf)?;
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SuperIndexEntry {
    /// The absolute offset of the `ix##` chunk.
    pub offset: u64,
    /// The size of the `ix##` chunk including its header.
    pub size: u32,
    /// The stream duration covered by the partial index, in stream ticks.
    pub duration: u32,
}

/// The OpenDML `indx` chunk: one entry per partial index of the stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SuperIndex {
    pub chunk_id: ChunkId,
    pub entries: Vec<SuperIndexEntry>,
}

impl SuperIndex {
    const HEADER_SIZE: usize = 24;
    const ENTRY_SIZE: usize = 16;

    /// Returns the chunk data size of a super index with room for `capacity` entries.
    pub fn data_size(capacity: usize) -> usize {
        Self::HEADER_SIZE + capacity * Self::ENTRY_SIZE
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::MalformedFile("index is truncated"));
        }
        let mut reader = data;
        let longs_per_entry = reader.read_u16::<LittleEndian>()?;
        let _sub_type = reader.read_u8()?;
        let index_type = reader.read_u8()?;
        let entries_in_use = reader.read_u32::<LittleEndian>()? as usize;
        let mut chunk_id = [0; 4];
        std::io::Read::read_exact(&mut reader, &mut chunk_id)?;
        if index_type != AVI_INDEX_OF_INDEXES || longs_per_entry != 4 {
            return Err(Error::MalformedFile("unsupported super index type"));
        }
        let entries = data[Self::HEADER_SIZE..]
            .chunks_exact(Self::ENTRY_SIZE)
            .take(entries_in_use)
            .map(|e| SuperIndexEntry {
                offset: LittleEndian::read_u64(e),
                size: LittleEndian::read_u32(&e[8..]),
                duration: LittleEndian::read_u32(&e[12..]),
            })
            .collect::<Vec<_>>();
        if entries.len() != entries_in_use {
            return Err(Error::MalformedFile("super index is truncated"));
        }
        Ok(Self {
            chunk_id: ChunkId(chunk_id),
            entries,
        })
    }

    /// Writes the chunk data, padded with empty entries up to `capacity`.
    pub fn write<W: Write>(&self, mut writer: W, capacity: usize) -> Result<()> {
        if self.entries.len() > capacity {
            return Err(Error::Other("too many segments for the reserved super index"));
        }
        writer.write_u16::<LittleEndian>(4)?;
        writer.write_u8(0)?;
        writer.write_u8(AVI_INDEX_OF_INDEXES)?;
        writer.write_u32::<LittleEndian>(self.entries.len() as _)?;
        writer.write_all(&self.chunk_id.0)?;
        writer.write_all(&[0; 12])?;
        for e in &self.entries {
            writer.write_u64::<LittleEndian>(e.offset)?;
            writer.write_u32::<LittleEndian>(e.size)?;
            writer.write_u32::<LittleEndian>(e.duration)?;
        }
        for _ in self.entries.len()..capacity {
            writer.write_all(&[0; Self::ENTRY_SIZE])?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StandardIndexEntry {
    /// The offset of the chunk's data, past its header, relative to the index's base offset.
    pub offset: u32,
    pub size: u32,
    pub keyframe: bool,
}

/// An OpenDML `ix##` partial index, covering the chunks of one stream within one RIFF segment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StandardIndex {
    pub chunk_id: ChunkId,
    pub base_offset: u64,
    pub entries: Vec<StandardIndexEntry>,
}

impl StandardIndex {
    const HEADER_SIZE: usize = 24;
    const ENTRY_SIZE: usize = 8;

    pub fn data_size(&self) -> usize {
        Self::HEADER_SIZE + self.entries.len() * Self::ENTRY_SIZE
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::MalformedFile("index is truncated"));
        }
        let mut reader = data;
        let longs_per_entry = reader.read_u16::<LittleEndian>()?;
        let _sub_type = reader.read_u8()?;
        let index_type = reader.read_u8()?;
        let entries_in_use = reader.read_u32::<LittleEndian>()? as usize;
        let mut chunk_id = [0; 4];
        std::io::Read::read_exact(&mut reader, &mut chunk_id)?;
        let base_offset = reader.read_u64::<LittleEndian>()?;
        if index_type != AVI_INDEX_OF_CHUNKS || longs_per_entry != 2 {
            return Err(Error::MalformedFile("unsupported standard index type"));
        }
        let entries = data[Self::HEADER_SIZE..]
            .chunks_exact(Self::ENTRY_SIZE)
            .take(entries_in_use)
            .map(|e| {
                let size = LittleEndian::read_u32(&e[4..]);
                StandardIndexEntry {
                    offset: LittleEndian::read_u32(e),
                    size: size & !DELTA_FRAME,
                    keyframe: size & DELTA_FRAME == 0,
                }
            })
            .collect::<Vec<_>>();
        if entries.len() != entries_in_use {
            return Err(Error::MalformedFile("standard index is truncated"));
        }
        Ok(Self {
            chunk_id: ChunkId(chunk_id),
            base_offset,
            entries,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u16::<LittleEndian>(2)?;
        writer.write_u8(0)?;
        writer.write_u8(AVI_INDEX_OF_CHUNKS)?;
        writer.write_u32::<LittleEndian>(self.entries.len() as _)?;
        writer.write_all(&self.chunk_id.0)?;
        writer.write_u64::<LittleEndian>(self.base_offset)?;
        writer.write_u32::<LittleEndian>(0)?;
        for e in &self.entries {
            writer.write_u32::<LittleEndian>(e.offset)?;
            writer.write_u32::<LittleEndian>(if e.keyframe { e.size } else { e.size | DELTA_FRAME })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::read_chunk;
    use std::io::Cursor;

    #[test]
    fn test_idx1() {
        let entries = vec![
            Idx1Entry {
                id: ChunkId::stream(0, b"dc"),
                flags: AVIIF_KEYFRAME,
                offset: 4,
                size: 100,
            },
            Idx1Entry {
                id: ChunkId::stream(1, b"wb"),
                flags: 0,
                offset: 112,
                size: 33,
            },
        ];
        let mut buf = Vec::new();
        write_idx1(&mut buf, &entries).unwrap();
        let chunk = read_chunk(&mut Cursor::new(&buf), buf.len() as u64).unwrap().unwrap();
        assert!(chunk.is(ChunkId::IDX1));
        let read = read_idx1(&buf[8..]);
        assert_eq!(entries, read);
        assert!(read[0].is_keyframe());
        assert!(!read[1].is_keyframe());
    }

    #[test]
    fn test_super_index() {
        let index = SuperIndex {
            chunk_id: ChunkId::stream(0, b"dc"),
            entries: vec![SuperIndexEntry {
                offset: 1 << 32,
                size: 32,
                duration: 90,
            }],
        };
        let mut buf = Vec::new();
        index.write(&mut buf, 4).unwrap();
        assert_eq!(SuperIndex::data_size(4), buf.len());
        assert_eq!(index, SuperIndex::read(&buf).unwrap());
        assert!(index.write(&mut Vec::new(), 0).is_err());
    }

    #[test]
    fn test_standard_index() {
        let index = StandardIndex {
            chunk_id: ChunkId::stream(0, b"dc"),
            base_offset: 1 << 31,
            entries: vec![
                StandardIndexEntry {
                    offset: 8,
                    size: 1000,
                    keyframe: true,
                },
                StandardIndexEntry {
                    offset: 1016,
                    size: 200,
                    keyframe: false,
                },
            ],
        };
        let mut buf = Vec::new();
        index.write(&mut buf).unwrap();
        assert_eq!(index.data_size(), buf.len());
        assert_eq!(index, StandardIndex::read(&buf).unwrap());

        // the entry count must be backed by entries
        assert!(StandardIndex::read(&buf[..buf.len() - 4]).is_err());
    }
}
