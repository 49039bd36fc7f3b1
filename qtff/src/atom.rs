use std::{
    fmt, io,
    io::{Read, Seek, SeekFrom, Write},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::data::{AtomData, WriteData};
use super::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const CO64: FourCC = FourCC::new(b"co64");
    pub const CTTS: FourCC = FourCC::new(b"ctts");
    pub const DINF: FourCC = FourCC::new(b"dinf");
    pub const DREF: FourCC = FourCC::new(b"dref");
    pub const EDTS: FourCC = FourCC::new(b"edts");
    pub const ELST: FourCC = FourCC::new(b"elst");
    pub const FREE: FourCC = FourCC::new(b"free");
    pub const FTYP: FourCC = FourCC::new(b"ftyp");
    pub const GMHD: FourCC = FourCC::new(b"gmhd");
    pub const GMIN: FourCC = FourCC::new(b"gmin");
    pub const HDLR: FourCC = FourCC::new(b"hdlr");
    pub const ISOM: FourCC = FourCC::new(b"isom");
    pub const MDAT: FourCC = FourCC::new(b"mdat");
    pub const MDHD: FourCC = FourCC::new(b"mdhd");
    pub const MDIA: FourCC = FourCC::new(b"mdia");
    pub const MHLR: FourCC = FourCC::new(b"mhlr");
    pub const MINF: FourCC = FourCC::new(b"minf");
    pub const MOOV: FourCC = FourCC::new(b"moov");
    pub const MP41: FourCC = FourCC::new(b"mp41");
    pub const MP42: FourCC = FourCC::new(b"mp42");
    pub const MVHD: FourCC = FourCC::new(b"mvhd");
    pub const QT: FourCC = FourCC::new(b"qt  ");
    pub const SBTL: FourCC = FourCC::new(b"sbtl");
    pub const SKIP: FourCC = FourCC::new(b"skip");
    pub const SMHD: FourCC = FourCC::new(b"smhd");
    pub const SOUN: FourCC = FourCC::new(b"soun");
    pub const STBL: FourCC = FourCC::new(b"stbl");
    pub const STCO: FourCC = FourCC::new(b"stco");
    pub const STSC: FourCC = FourCC::new(b"stsc");
    pub const STSD: FourCC = FourCC::new(b"stsd");
    pub const STSS: FourCC = FourCC::new(b"stss");
    pub const STSZ: FourCC = FourCC::new(b"stsz");
    pub const STTS: FourCC = FourCC::new(b"stts");
    pub const TEXT: FourCC = FourCC::new(b"text");
    pub const TKHD: FourCC = FourCC::new(b"tkhd");
    pub const TMCD: FourCC = FourCC::new(b"tmcd");
    pub const TRAK: FourCC = FourCC::new(b"trak");
    pub const TREF: FourCC = FourCC::new(b"tref");
    pub const TX3G: FourCC = FourCC::new(b"tx3g");
    pub const UDTA: FourCC = FourCC::new(b"udta");
    pub const URL: FourCC = FourCC::new(b"url ");
    pub const VIDE: FourCC = FourCC::new(b"vide");
    pub const VMHD: FourCC = FourCC::new(b"vmhd");
    pub const WIDE: FourCC = FourCC::new(b"wide");

    pub const fn new(tag: &[u8; 4]) -> FourCC {
        FourCC(u32::from_be_bytes(*tag))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> FourCC {
        let mut tag = [b' '; 4];
        for (dst, src) in tag.iter_mut().zip(s.bytes()) {
            *dst = src;
        }
        FourCC::new(&tag)
    }

    pub fn bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn to_string(self) -> Option<String> {
        String::from_utf8(self.bytes().to_vec()).ok()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(tag: [u8; 4]) -> Self {
        FourCC::new(&tag)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomSize {
    Size(u32),
    ExtendedSize(u64),
}

impl AtomSize {
    pub fn as_u64(&self) -> u64 {
        match self {
            AtomSize::Size(n) => *n as _,
            AtomSize::ExtendedSize(n) => *n,
        }
    }

    pub fn header_size(&self) -> u64 {
        match self {
            AtomSize::Size(_) => 8,
            AtomSize::ExtendedSize(_) => 16,
        }
    }
}

impl From<u64> for AtomSize {
    fn from(s: u64) -> AtomSize {
        if s <= 0xffffffff {
            AtomSize::Size(s as _)
        } else {
            AtomSize::ExtendedSize(s)
        }
    }
}

impl From<usize> for AtomSize {
    fn from(s: usize) -> AtomSize {
        (s as u64).into()
    }
}

/// Restricts a reader to a window of the underlying stream. Positions reported by the section are
/// relative to the window start.
pub struct SectionReader<R: Read + Seek> {
    reader: R,
    begin: u64,
    end: u64,
    position: u64,
}

impl<R: Read + Seek> SectionReader<R> {
    pub fn new(reader: R, offset: u64, len: u64) -> Self {
        Self {
            reader,
            begin: offset,
            end: offset + len,
            position: offset,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.position)
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }
}

impl<R: Read + Seek> Read for SectionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.end {
            return Ok(0);
        }
        let reader = &mut self.reader;
        reader.seek(SeekFrom::Start(self.position))?;
        let n = reader.take(self.end - self.position).read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SectionReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(n) => self.begin as i64 + n as i64,
            SeekFrom::End(n) => self.end as i64 + n,
            SeekFrom::Current(n) => self.position as i64 + n,
        };
        if position < self.begin as i64 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of section"));
        }
        self.position = position as u64;
        Ok(self.position - self.begin)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    pub offset: u64,
    pub typ: FourCC,
    pub size: AtomSize,
}

impl Atom {
    pub fn start(&self) -> u64 {
        self.offset
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size.as_u64()
    }

    pub fn is64(&self) -> bool {
        matches!(self.size, AtomSize::ExtendedSize(_))
    }

    pub fn is(&self, typ: FourCC) -> bool {
        self.typ == typ
    }

    pub fn data_offset(&self) -> u64 {
        self.offset + self.size.header_size()
    }

    pub fn data_size(&self) -> u64 {
        self.size.as_u64() - self.size.header_size()
    }

    pub fn data<R: Read + Seek>(&self, reader: R) -> SectionReader<R> {
        SectionReader::new(reader, self.data_offset(), self.data_size())
    }

    /// Positions the stream just past the atom.
    pub fn skip<S: Seek>(&self, mut stream: S) -> io::Result<u64> {
        stream.seek(SeekFrom::Start(self.end()))
    }
}

/// Reads one atom header at the stream's current position. `limit` is the end of the enclosing
/// region, used to resolve size 0 and to reject atoms that extend past it.
///
/// Returns `Ok(None)` when fewer than 8 bytes remain before the limit.
pub fn read_header<R: Read + Seek>(reader: &mut R, limit: u64) -> Result<Option<Atom>> {
    let offset = reader.stream_position()?;
    if offset + 8 > limit {
        return Ok(None);
    }
    let size = match reader.read_u32::<BigEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let typ = FourCC(reader.read_u32::<BigEndian>()?);
    let size = match size {
        0 => AtomSize::from(limit - offset),
        1 => AtomSize::ExtendedSize(reader.read_u64::<BigEndian>()?),
        n => AtomSize::Size(n),
    };
    if size.as_u64() < size.header_size() {
        return Err(Error::MalformedAtom {
            typ,
            offset,
            reason: "size is smaller than the header",
        });
    }
    let atom = Atom { offset, typ, size };
    if atom.end() > limit {
        return Err(Error::MalformedAtom {
            typ,
            offset,
            reason: "atom extends past the end of its parent",
        });
    }
    Ok(Some(atom))
}

/// Iterates over sibling atoms. A malformed header ends the iteration with a warning, since the
/// position of any following sibling is unknown.
pub struct AtomReader<R: Read + Seek> {
    offset: Option<u64>,
    limit: Option<u64>,
    reader: R,
    done: bool,
}

impl<R: Read + Seek> AtomReader<R> {
    /// Creates a new atom reader with the given reader. Atoms will be read beginning at the
    /// reader's current position, up to the end of the stream.
    pub fn new(reader: R) -> Self {
        Self {
            offset: None,
            limit: None,
            reader,
            done: false,
        }
    }

    /// Creates an atom reader for the region `[offset, limit)`.
    pub fn with_range(reader: R, offset: u64, limit: u64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            reader,
            done: false,
        }
    }

    fn next_atom(&mut self) -> Result<Option<Atom>> {
        let offset = match self.offset {
            Some(offset) => self.reader.seek(SeekFrom::Start(offset))?,
            None => self.reader.stream_position()?,
        };
        let limit = match self.limit {
            Some(limit) => limit,
            None => {
                let end = self.reader.seek(SeekFrom::End(0))?;
                self.reader.seek(SeekFrom::Start(offset))?;
                self.limit = Some(end);
                end
            }
        };
        let atom = read_header(&mut self.reader, limit)?;
        if let Some(atom) = &atom {
            self.offset = Some(atom.end());
        }
        Ok(atom)
    }
}

impl<R: Read + Seek> Iterator for AtomReader<R> {
    type Item = Result<Atom>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_atom() {
            Ok(Some(atom)) => Some(Ok(atom)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(Error::MalformedAtom { typ, offset, reason }) => {
                log::warn!("skipping malformed atom '{}' at {}: {}", typ, offset, reason);
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

pub trait AtomWriteExt: Write {
    fn write_four_cc(&mut self, four_cc: FourCC) -> io::Result<()> {
        self.write_u32::<BigEndian>(four_cc.0)
    }

    // Writes an atom header of the given type and size. If the data_size argument is an extended
    // size, the atom size will be written as an extended size. Otherwise, the atom size will be
    // written in the smallest form possible.
    fn write_atom_header<S: Into<AtomSize>>(&mut self, typ: FourCC, data_size: S) -> io::Result<()> {
        let atom_size = match data_size.into() {
            AtomSize::ExtendedSize(data_size) => AtomSize::ExtendedSize(data_size + 16),
            AtomSize::Size(data_size) => {
                if data_size > 0xFFFFFFF7 {
                    AtomSize::ExtendedSize(data_size as u64 + 16)
                } else {
                    AtomSize::Size(data_size + 8)
                }
            }
        };
        match atom_size {
            AtomSize::ExtendedSize(size) => {
                self.write_u32::<BigEndian>(1)?;
                self.write_four_cc(typ)?;
                self.write_u64::<BigEndian>(size)
            }
            AtomSize::Size(size) => {
                self.write_u32::<BigEndian>(size)?;
                self.write_four_cc(typ)
            }
        }
    }

    fn write_atom<T: AtomData + WriteData>(&mut self, atom: &T) -> Result<()> {
        let mut buf = Vec::new();
        atom.write(&mut buf)?;
        self.write_atom_header(T::TYPE, buf.len())?;
        self.write_all(&buf)?;
        Ok(())
    }

    /// Writes a container atom whose content is produced by `f`.
    fn write_container<F: FnOnce(&mut Vec<u8>) -> Result<()>>(&mut self, typ: FourCC, f: F) -> Result<()> {
        let mut buf = Vec::new();
        f(&mut buf)?;
        self.write_atom_header(typ, buf.len())?;
        self.write_all(&buf)?;
        Ok(())
    }
}

impl<W: Write + ?Sized> AtomWriteExt for W {}

/// An atom whose header has been reserved but whose size isn't known yet.
#[derive(Clone, Debug)]
pub struct PendingAtom {
    pub offset: u64,
    pub typ: FourCC,
    pub is64: bool,
}

pub trait AtomSeekWriteExt: Write + Seek {
    /// Reserves a header at the current position. With `force_64`, room for a 64-bit size is
    /// reserved so that the atom may grow beyond 4 GiB.
    fn begin_atom(&mut self, typ: FourCC, force_64: bool) -> io::Result<PendingAtom> {
        let offset = self.stream_position()?;
        if force_64 {
            self.write_u32::<BigEndian>(1)?;
            self.write_four_cc(typ)?;
            self.write_u64::<BigEndian>(0)?;
        } else {
            self.write_u32::<BigEndian>(0)?;
            self.write_four_cc(typ)?;
        }
        Ok(PendingAtom { offset, typ, is64: force_64 })
    }

    /// Patches the size of a reserved header and leaves the stream positioned at the current end.
    fn end_atom(&mut self, pending: PendingAtom) -> Result<Atom> {
        let end = self.stream_position()?;
        let size = end - pending.offset;
        let size = if pending.is64 {
            self.seek(SeekFrom::Start(pending.offset + 8))?;
            self.write_u64::<BigEndian>(size)?;
            AtomSize::ExtendedSize(size)
        } else {
            if size > u32::MAX as u64 {
                return Err(Error::MalformedAtom {
                    typ: pending.typ,
                    offset: pending.offset,
                    reason: "content too large for a 32-bit size",
                });
            }
            self.seek(SeekFrom::Start(pending.offset))?;
            self.write_u32::<BigEndian>(size as u32)?;
            AtomSize::Size(size as u32)
        };
        self.seek(SeekFrom::Start(end))?;
        Ok(Atom {
            offset: pending.offset,
            typ: pending.typ,
            size,
        })
    }
}

impl<W: Write + Seek + ?Sized> AtomSeekWriteExt for W {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_header() {
        let mut buf = vec![];
        buf.write_atom_header(FourCC::FREE, 4usize).unwrap();
        buf.extend_from_slice(&[0; 4]);
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_four_cc(FourCC::MDAT).unwrap();
        buf.write_u64::<BigEndian>(20).unwrap();
        buf.extend_from_slice(&[0; 4]);
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_four_cc(FourCC::SKIP).unwrap();
        buf.extend_from_slice(&[0; 6]);
        let len = buf.len() as u64;

        let mut r = Cursor::new(buf);
        let free = read_header(&mut r, len).unwrap().unwrap();
        assert!(free.is(FourCC::FREE));
        assert_eq!((0, 12), (free.start(), free.end()));
        assert!(!free.is64());
        free.skip(&mut r).unwrap();

        let mdat = read_header(&mut r, len).unwrap().unwrap();
        assert!(mdat.is64());
        assert_eq!((12, 32), (mdat.start(), mdat.end()));
        assert_eq!(28, mdat.data_offset());
        mdat.skip(&mut r).unwrap();

        // size 0 extends to the limit
        let skip = read_header(&mut r, len).unwrap().unwrap();
        assert_eq!(len, skip.end());
        skip.skip(&mut r).unwrap();

        assert!(read_header(&mut r, len).unwrap().is_none());
    }

    #[test]
    fn test_read_header_malformed() {
        let mut buf = vec![];
        buf.write_u32::<BigEndian>(4).unwrap();
        buf.write_four_cc(FourCC::FREE).unwrap();
        let mut r = Cursor::new(&buf);
        assert!(matches!(read_header(&mut r, 8), Err(Error::MalformedAtom { .. })));

        let mut buf = vec![];
        buf.write_atom_header(FourCC::FREE, 100usize).unwrap();
        let mut r = Cursor::new(&buf);
        assert!(matches!(read_header(&mut r, 8), Err(Error::MalformedAtom { .. })));
    }

    #[test]
    fn test_atom_reader() {
        let mut buf = vec![];
        buf.write_atom_header(FourCC::FREE, 0usize).unwrap();
        buf.write_atom_header(FourCC::new(b"zzzz"), 2usize).unwrap();
        buf.extend_from_slice(&[1, 2]);
        // this one claims more bytes than there are and ends the iteration
        buf.write_atom_header(FourCC::SKIP, 100usize).unwrap();

        let atoms = AtomReader::new(Cursor::new(&buf)).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(vec![FourCC::FREE, FourCC::new(b"zzzz")], atoms.iter().map(|a| a.typ).collect::<Vec<_>>());

        let atoms = AtomReader::with_range(Cursor::new(&buf), 8, 18).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(1, atoms.len());
        assert_eq!(2, atoms[0].data_size());
    }

    #[test]
    fn test_begin_end_atom() {
        let mut c = Cursor::new(Vec::new());
        let pending = c.begin_atom(FourCC::MDAT, true).unwrap();
        c.write_all(&[7; 10]).unwrap();
        let atom = c.end_atom(pending).unwrap();
        assert_eq!(AtomSize::ExtendedSize(26), atom.size);

        let pending = c.begin_atom(FourCC::FREE, false).unwrap();
        c.write_all(&[0; 2]).unwrap();
        c.end_atom(pending).unwrap();

        let buf = c.into_inner();
        let atoms = AtomReader::new(Cursor::new(&buf)).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(2, atoms.len());
        assert_eq!(10, atoms[0].data_size());
        assert!(atoms[0].is64());
        assert_eq!(AtomSize::Size(10), atoms[1].size);
    }

    #[test]
    fn test_four_cc() {
        assert_eq!(FourCC(0x6d6f6f76), FourCC::MOOV);
        assert_eq!(FourCC::QT, FourCC::from_str("qt"));
        assert_eq!("moov", FourCC::MOOV.to_string().unwrap());
        assert_eq!("url ", format!("{}", FourCC::URL));
    }
}
