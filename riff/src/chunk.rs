use std::{
    fmt, io,
    io::{Read, Seek, SeekFrom, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::error::{Error, Result};

#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct ChunkId(pub [u8; 4]);

impl ChunkId {
    pub const AVI: ChunkId = ChunkId(*b"AVI ");
    pub const AVIH: ChunkId = ChunkId(*b"avih");
    pub const AVIX: ChunkId = ChunkId(*b"AVIX");
    pub const AUDS: ChunkId = ChunkId(*b"auds");
    pub const DMLH: ChunkId = ChunkId(*b"dmlh");
    pub const HDRL: ChunkId = ChunkId(*b"hdrl");
    pub const IDX1: ChunkId = ChunkId(*b"idx1");
    pub const INDX: ChunkId = ChunkId(*b"indx");
    pub const JUNK: ChunkId = ChunkId(*b"JUNK");
    pub const LIST: ChunkId = ChunkId(*b"LIST");
    pub const MOVI: ChunkId = ChunkId(*b"movi");
    pub const ODML: ChunkId = ChunkId(*b"odml");
    pub const REC: ChunkId = ChunkId(*b"rec ");
    pub const RIFF: ChunkId = ChunkId(*b"RIFF");
    pub const STRF: ChunkId = ChunkId(*b"strf");
    pub const STRH: ChunkId = ChunkId(*b"strh");
    pub const STRL: ChunkId = ChunkId(*b"strl");
    pub const TXTS: ChunkId = ChunkId(*b"txts");
    pub const VIDS: ChunkId = ChunkId(*b"vids");

    /// The id of a data chunk for the given stream, such as `01wb`.
    pub fn stream(stream: u16, suffix: &[u8; 2]) -> ChunkId {
        let digits = format!("{:02x}", stream % 0x100);
        let digits = digits.as_bytes();
        ChunkId([digits[0], digits[1], suffix[0], suffix[1]])
    }

    /// The id of the OpenDML partial index for the given stream: `ix00`, `ix01`, ...
    pub fn stream_index(stream: u16) -> ChunkId {
        let digits = format!("{:02x}", stream % 0x100);
        let digits = digits.as_bytes();
        ChunkId([b'i', b'x', digits[0], digits[1]])
    }

    /// Splits a data chunk id into its stream number and two character suffix.
    pub fn parse_stream(&self) -> Option<(u16, [u8; 2])> {
        let hex = std::str::from_utf8(&self.0[..2]).ok()?;
        let stream = u16::from_str_radix(hex, 16).ok()?;
        Some((stream, [self.0[2], self.0[3]]))
    }

    /// Returns true for container chunks, which carry a list type before their content.
    pub fn is_list(&self) -> bool {
        *self == ChunkId::RIFF || *self == ChunkId::LIST
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self)
    }
}

impl From<&[u8; 4]> for ChunkId {
    fn from(id: &[u8; 4]) -> Self {
        ChunkId(*id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub offset: u64,
    pub id: ChunkId,
    pub size: u32,
    pub list_type: Option<ChunkId>,
}

impl Chunk {
    /// The offset of the chunk's content. For lists this is past the list type.
    pub fn data_offset(&self) -> u64 {
        self.offset + if self.list_type.is_some() { 12 } else { 8 }
    }

    pub fn data_size(&self) -> u64 {
        match self.list_type {
            Some(_) => (self.size as u64).saturating_sub(4),
            None => self.size as u64,
        }
    }

    /// The end of the chunk, including the pad byte that follows odd sized chunks.
    pub fn end(&self) -> u64 {
        self.offset + 8 + self.size as u64 + (self.size & 1) as u64
    }

    pub fn is(&self, id: ChunkId) -> bool {
        self.id == id
    }

    pub fn is_list_of(&self, list_type: ChunkId) -> bool {
        self.list_type == Some(list_type)
    }

    pub fn read_data<R: Read + Seek>(&self, mut reader: R) -> Result<Vec<u8>> {
        reader.seek(SeekFrom::Start(self.data_offset()))?;
        let mut buf = Vec::new();
        (&mut reader).take(self.data_size()).read_to_end(&mut buf)?;
        if buf.len() as u64 != self.data_size() {
            return Err(Error::MalformedChunk {
                id: self.id,
                offset: self.offset,
                reason: "chunk is truncated",
            });
        }
        Ok(buf)
    }
}

/// Reads one chunk header at the stream's current position. Returns `Ok(None)` when fewer than 8
/// bytes remain before `limit`.
pub fn read_chunk<R: Read + Seek>(reader: &mut R, limit: u64) -> Result<Option<Chunk>> {
    let offset = reader.stream_position()?;
    if offset + 8 > limit {
        return Ok(None);
    }
    let mut id = [0; 4];
    match reader.read_exact(&mut id) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let id = ChunkId(id);
    let size = reader.read_u32::<LittleEndian>()?;
    let list_type = if id.is_list() {
        if size < 4 {
            return Err(Error::MalformedChunk {
                id,
                offset,
                reason: "list is too small for its type",
            });
        }
        let mut list_type = [0; 4];
        reader.read_exact(&mut list_type)?;
        Some(ChunkId(list_type))
    } else {
        None
    };
    let chunk = Chunk { offset, id, size, list_type };
    // the pad byte of the last chunk may be missing
    if offset + 8 + size as u64 > limit {
        return Err(Error::MalformedChunk {
            id,
            offset,
            reason: "chunk extends past the end of its parent",
        });
    }
    Ok(Some(chunk))
}

/// Iterates over sibling chunks within `[offset, limit)`. A malformed chunk ends the iteration
/// with a warning.
pub struct ChunkReader<R: Read + Seek> {
    offset: u64,
    limit: u64,
    reader: R,
    done: bool,
}

impl<R: Read + Seek> ChunkReader<R> {
    pub fn new(reader: R, offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            reader,
            done: false,
        }
    }

    /// Iterates over the children of a list chunk.
    pub fn children(reader: R, list: &Chunk) -> Self {
        Self::new(reader, list.data_offset(), list.data_offset() + list.data_size())
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        self.reader.seek(SeekFrom::Start(self.offset))?;
        let chunk = read_chunk(&mut self.reader, self.limit)?;
        if let Some(chunk) = &chunk {
            self.offset = chunk.end();
        }
        Ok(chunk)
    }
}

impl<R: Read + Seek> Iterator for ChunkReader<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(Error::MalformedChunk { id, offset, reason }) => {
                log::warn!("skipping malformed chunk '{}' at {}: {}", id, offset, reason);
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// A chunk whose header has been written but whose size isn't known yet.
#[derive(Clone, Debug)]
pub struct PendingChunk {
    pub offset: u64,
    pub id: ChunkId,
    pub list_type: Option<ChunkId>,
}

pub trait ChunkWriteExt: Write {
    fn write_chunk_id(&mut self, id: ChunkId) -> io::Result<()> {
        self.write_all(&id.0)
    }

    /// Writes a complete chunk, followed by a pad byte if the data has an odd length.
    fn write_chunk(&mut self, id: ChunkId, data: &[u8]) -> io::Result<()> {
        self.write_chunk_id(id)?;
        self.write_u32::<LittleEndian>(data.len() as _)?;
        self.write_all(data)?;
        if data.len() % 2 == 1 {
            self.write_u8(0)?;
        }
        Ok(())
    }

    fn write_list(&mut self, list_type: ChunkId, content: &[u8]) -> io::Result<()> {
        self.write_chunk_id(ChunkId::LIST)?;
        self.write_u32::<LittleEndian>(content.len() as u32 + 4)?;
        self.write_chunk_id(list_type)?;
        self.write_all(content)?;
        if content.len() % 2 == 1 {
            self.write_u8(0)?;
        }
        Ok(())
    }
}

impl<W: Write + ?Sized> ChunkWriteExt for W {}

pub trait ChunkSeekWriteExt: Write + Seek {
    fn begin_chunk(&mut self, id: ChunkId) -> io::Result<PendingChunk> {
        let offset = self.stream_position()?;
        self.write_chunk_id(id)?;
        self.write_u32::<LittleEndian>(0)?;
        Ok(PendingChunk { offset, id, list_type: None })
    }

    fn begin_list(&mut self, id: ChunkId, list_type: ChunkId) -> io::Result<PendingChunk> {
        let offset = self.stream_position()?;
        self.write_chunk_id(id)?;
        self.write_u32::<LittleEndian>(4)?;
        self.write_chunk_id(list_type)?;
        Ok(PendingChunk {
            offset,
            id,
            list_type: Some(list_type),
        })
    }

    /// Patches the size of a pending chunk, pads it to an even length and leaves the stream at
    /// its end.
    fn end_chunk(&mut self, pending: PendingChunk) -> Result<Chunk> {
        let end = self.stream_position()?;
        let size = end - pending.offset - 8;
        if size > u32::MAX as u64 {
            return Err(Error::MalformedChunk {
                id: pending.id,
                offset: pending.offset,
                reason: "content too large for a chunk",
            });
        }
        self.seek(SeekFrom::Start(pending.offset + 4))?;
        self.write_u32::<LittleEndian>(size as u32)?;
        self.seek(SeekFrom::Start(end))?;
        if size % 2 == 1 {
            self.write_u8(0)?;
        }
        Ok(Chunk {
            offset: pending.offset,
            id: pending.id,
            size: size as u32,
            list_type: pending.list_type,
        })
    }
}

impl<W: Write + Seek + ?Sized> ChunkSeekWriteExt for W {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_chunk_id() {
        assert_eq!(ChunkId(*b"01wb"), ChunkId::stream(1, b"wb"));
        assert_eq!(ChunkId(*b"0adc"), ChunkId::stream(10, b"dc"));
        assert_eq!(ChunkId(*b"ix0a"), ChunkId::stream_index(10));
        assert_eq!(Some((10, *b"dc")), ChunkId(*b"0adc").parse_stream());
        assert_eq!(None, ChunkId::LIST.parse_stream());
        assert_eq!("RIFF", ChunkId::RIFF.to_string());
    }

    #[test]
    fn test_read_write_chunks() {
        let mut c = Cursor::new(Vec::new());
        let riff = c.begin_list(ChunkId::RIFF, ChunkId::AVI).unwrap();
        c.write_chunk(ChunkId::JUNK, &[1, 2, 3]).unwrap();
        let list = c.begin_list(ChunkId::LIST, ChunkId::MOVI).unwrap();
        let data = c.begin_chunk(ChunkId::stream(0, b"dc")).unwrap();
        c.write_all(&[9; 5]).unwrap();
        c.end_chunk(data).unwrap();
        c.end_chunk(list).unwrap();
        let riff = c.end_chunk(riff).unwrap();

        let buf = c.into_inner();
        assert_eq!(buf.len() as u64, riff.end());
        assert_eq!(0, buf.len() % 2);

        let mut r = Cursor::new(&buf);
        let top = read_chunk(&mut r, buf.len() as u64).unwrap().unwrap();
        assert!(top.is_list_of(ChunkId::AVI));
        let children = ChunkReader::children(&mut r, &top).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(2, children.len());
        assert_eq!(3, children[0].size);
        assert_eq!(vec![1, 2, 3], children[0].read_data(&mut r).unwrap());
        assert!(children[1].is_list_of(ChunkId::MOVI));

        let movi = ChunkReader::children(&mut r, &children[1]).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(1, movi.len());
        assert_eq!(vec![9; 5], movi[0].read_data(&mut r).unwrap());
        assert_eq!(children[1].end(), movi[0].end());
    }

    #[test]
    fn test_truncated_chunk() {
        let mut buf = Vec::new();
        buf.write_chunk(ChunkId::JUNK, &[0; 2]).unwrap();
        buf.write_chunk_id(ChunkId::stream(0, b"dc")).unwrap();
        buf.write_u32::<LittleEndian>(100).unwrap();
        buf.extend_from_slice(&[0; 10]);

        let chunks = ChunkReader::new(Cursor::new(&buf), 0, buf.len() as u64).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(1, chunks.len());

        let mut r = Cursor::new(&buf);
        r.set_position(10);
        assert!(matches!(read_chunk(&mut r, buf.len() as u64), Err(Error::MalformedChunk { .. })));
    }
}
