use super::atom::{AtomReader, AtomWriteExt, FourCC};
use super::deserializer::Deserializer;
use super::error::{Error, Result};
use super::sample_table::{SampleChunkInfo, SampleTables};
use super::serializer::Serializer;
use super::timecode::TimecodeSampleDescriptionDataEntry;

use std::fmt;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use serde::{de, ser};

pub fn read_one<T: AtomData, R: Read + Seek>(mut reader: R) -> Result<Option<T>> {
    reader.seek(SeekFrom::Start(0))?;
    match AtomReader::new(&mut reader).find(|a| match a {
        Ok(a) => a.typ == T::TYPE,
        Err(_) => true,
    }) {
        Some(Ok(a)) => Ok(Some(T::read(a.data(&mut reader))?)),
        Some(Err(err)) => Err(err),
        None => Ok(None),
    }
}

pub fn read_all<T: AtomData, R: Read + Seek>(mut reader: R) -> Result<Vec<T>> {
    reader.seek(SeekFrom::Start(0))?;
    let atoms = AtomReader::new(&mut reader)
        .filter(|a| match a {
            Ok(a) => a.typ == T::TYPE,
            Err(_) => true,
        })
        .collect::<Result<Vec<_>>>()?;
    atoms.iter().map(|a| T::read(a.data(&mut reader))).collect()
}

pub trait ReadData: Sized {
    fn read<R: Read + Seek>(reader: R) -> Result<Self>;
}

pub fn read<T: ReadData, R: Read + Seek>(reader: R) -> Result<T> {
    ReadData::read(reader)
}

impl<'de, T: de::Deserialize<'de>> ReadData for T {
    fn read<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut d = Deserializer::new(reader);
        Self::deserialize(&mut d)
    }
}

pub trait WriteData: Sized {
    fn write<W: Write>(&self, writer: W) -> Result<()>;
}

impl<T: ser::Serialize> WriteData for T {
    fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut s = Serializer::new(writer);
        self.serialize(&mut s)
    }
}

pub trait AtomData: ReadData {
    const TYPE: FourCC;
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FixedPoint16(f32);

impl ser::Serialize for FixedPoint16 {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16((self.0 * (0x100 as f32)) as _)
    }
}

impl<'de> de::Deserialize<'de> for FixedPoint16 {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> std::result::Result<FixedPoint16, D::Error> {
        Ok(((u16::deserialize(deserializer)? as f32) / (0x100 as f32)).into())
    }
}

impl From<f32> for FixedPoint16 {
    fn from(v: f32) -> Self {
        Self(v)
    }
}

impl From<FixedPoint16> for f32 {
    fn from(v: FixedPoint16) -> f32 {
        v.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FixedPoint32(f64);

impl ser::Serialize for FixedPoint32 {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32((self.0 * (0x10000 as f64)).round() as _)
    }
}

impl<'de> de::Deserialize<'de> for FixedPoint32 {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> std::result::Result<FixedPoint32, D::Error> {
        Ok(FixedPoint32((u32::deserialize(deserializer)? as f64) / (0x10000 as f64)))
    }
}

impl From<f64> for FixedPoint32 {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl From<FixedPoint32> for f64 {
    fn from(v: FixedPoint32) -> f64 {
        v.0
    }
}

/// Everything up to the end of the atom, kept as is.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemainingBytes(pub Vec<u8>);

impl ser::Serialize for RemainingBytes {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> de::Deserialize<'de> for RemainingBytes {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> std::result::Result<RemainingBytes, D::Error> {
        struct BytesVisitor;

        impl<'de> de::Visitor<'de> for BytesVisitor {
            type Value = RemainingBytes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("bytes")
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<RemainingBytes, E> {
                Ok(RemainingBytes(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<RemainingBytes, E> {
                Ok(RemainingBytes(v.to_vec()))
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

/// An atom this library doesn't interpret, such as a codec configuration record.
#[derive(Clone, Debug, PartialEq)]
pub struct OpaqueAtom {
    pub typ: FourCC,
    pub data: Vec<u8>,
}

fn read_opaque_atoms<R: Read + Seek>(mut reader: R) -> Result<Vec<OpaqueAtom>> {
    let begin = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    let atoms = AtomReader::with_range(&mut reader, begin, end).collect::<Result<Vec<_>>>()?;
    atoms
        .iter()
        .map(|a| {
            let mut data = Vec::new();
            a.data(&mut reader).read_to_end(&mut data)?;
            Ok(OpaqueAtom { typ: a.typ, data })
        })
        .collect()
}

fn write_opaque_atoms<W: Write>(mut writer: W, atoms: &[OpaqueAtom]) -> Result<()> {
    for atom in atoms {
        writer.write_atom_header(atom.typ, atom.data.len())?;
        writer.write_all(&atom.data)?;
    }
    Ok(())
}

// Reads a field that is 64 bits wide in version 1 atoms and 32 bits wide otherwise.
fn read_versioned<R: Read>(mut reader: R, version: u8) -> Result<u64> {
    Ok(match version {
        1 => reader.read_u64::<BigEndian>()?,
        _ => reader.read_u32::<BigEndian>()? as u64,
    })
}

fn write_versioned<W: Write>(mut writer: W, version: u8, v: u64) -> Result<()> {
    match version {
        1 => writer.write_u64::<BigEndian>(v)?,
        _ => writer.write_u32::<BigEndian>(v as u32)?,
    }
    Ok(())
}

fn required_version(values: &[u64]) -> u8 {
    values.iter().any(|&v| v > u32::MAX as u64) as u8
}

pub const IDENTITY_MATRIX: [u32; 9] = [0x10000, 0, 0, 0, 0x10000, 0, 0, 0, 0x40000000];

#[derive(Clone, Debug, PartialEq)]
pub struct FileTypeData {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl AtomData for FileTypeData {
    const TYPE: FourCC = FourCC::FTYP;
}

impl ReadData for FileTypeData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let major_brand = FourCC(reader.read_u32::<BigEndian>()?);
        let minor_version = reader.read_u32::<BigEndian>()?;
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands: rest.chunks_exact(4).map(|c| FourCC(BigEndian::read_u32(c))).collect(),
        })
    }
}

impl WriteData for FileTypeData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_four_cc(self.major_brand)?;
        writer.write_u32::<BigEndian>(self.minor_version)?;
        for &brand in &self.compatible_brands {
            writer.write_four_cc(brand)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MovieData {
    pub header: MovieHeaderData,
    pub tracks: Vec<TrackData>,
}

impl AtomData for MovieData {
    const TYPE: FourCC = FourCC::MOOV;
}

impl ReadData for MovieData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            header: read_one(&mut reader)?.ok_or(Error::MalformedFile("missing movie header"))?,
            tracks: read_all(&mut reader)?,
        })
    }
}

impl WriteData for MovieData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_atom(&self.header)?;
        for track in &self.tracks {
            writer.write_atom(track)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MovieHeaderData {
    pub version: u8,
    pub flags: [u8; 3],
    pub creation_time: u64,
    pub modification_time: u64,
    pub time_scale: u32,
    pub duration: u64,
    pub preferred_rate: FixedPoint32,
    pub preferred_volume: FixedPoint16,
    pub reserved: [u8; 10],
    pub matrix_structure: [u32; 9],
    pub preview_time: u32,
    pub preview_duration: u32,
    pub poster_time: u32,
    pub selection_time: u32,
    pub selection_duration: u32,
    pub current_time: u32,
    pub next_track_id: u32,
}

impl MovieHeaderData {
    pub fn new(time_scale: u32, duration: u64, next_track_id: u32) -> Self {
        Self {
            version: 0,
            flags: [0; 3],
            creation_time: 0,
            modification_time: 0,
            time_scale,
            duration,
            preferred_rate: 1.0.into(),
            preferred_volume: 1.0.into(),
            reserved: [0; 10],
            matrix_structure: IDENTITY_MATRIX,
            preview_time: 0,
            preview_duration: 0,
            poster_time: 0,
            selection_time: 0,
            selection_duration: 0,
            current_time: 0,
            next_track_id,
        }
    }
}

impl AtomData for MovieHeaderData {
    const TYPE: FourCC = FourCC::MVHD;
}

impl ReadData for MovieHeaderData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let version = reader.read_u8()?;
        Ok(Self {
            version,
            flags: read(&mut reader)?,
            creation_time: read_versioned(&mut reader, version)?,
            modification_time: read_versioned(&mut reader, version)?,
            time_scale: read(&mut reader)?,
            duration: read_versioned(&mut reader, version)?,
            preferred_rate: read(&mut reader)?,
            preferred_volume: read(&mut reader)?,
            reserved: read(&mut reader)?,
            matrix_structure: read(&mut reader)?,
            preview_time: read(&mut reader)?,
            preview_duration: read(&mut reader)?,
            poster_time: read(&mut reader)?,
            selection_time: read(&mut reader)?,
            selection_duration: read(&mut reader)?,
            current_time: read(&mut reader)?,
            next_track_id: read(&mut reader)?,
        })
    }
}

impl WriteData for MovieHeaderData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let version = required_version(&[self.creation_time, self.modification_time, self.duration]);
        writer.write_u8(version)?;
        self.flags.write(&mut writer)?;
        write_versioned(&mut writer, version, self.creation_time)?;
        write_versioned(&mut writer, version, self.modification_time)?;
        self.time_scale.write(&mut writer)?;
        write_versioned(&mut writer, version, self.duration)?;
        (
            self.preferred_rate,
            self.preferred_volume,
            self.reserved,
            self.matrix_structure,
            self.preview_time,
            self.preview_duration,
            self.poster_time,
            self.selection_time,
            self.selection_duration,
            self.current_time,
            self.next_track_id,
        )
            .write(&mut writer)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackData {
    pub header: TrackHeaderData,
    pub media: MediaData,
    pub edit: Option<EditData>,
    pub reference: Option<TrackReferenceData>,
}

impl AtomData for TrackData {
    const TYPE: FourCC = FourCC::TRAK;
}

impl ReadData for TrackData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            header: read_one(&mut reader)?.ok_or(Error::MalformedFile("missing track header"))?,
            media: read_one(&mut reader)?.ok_or(Error::MalformedFile("missing track media"))?,
            edit: read_one(&mut reader)?,
            reference: read_one(&mut reader)?,
        })
    }
}

impl WriteData for TrackData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_atom(&self.header)?;
        if let Some(edit) = &self.edit {
            writer.write_atom(edit)?;
        }
        if let Some(reference) = &self.reference {
            writer.write_atom(reference)?;
        }
        writer.write_atom(&self.media)
    }
}

impl TrackData {
    pub fn handler_subtype(&self) -> Option<FourCC> {
        self.media.handler_reference.as_ref().map(|h| h.component_subtype)
    }

    pub fn sample_tables(&self) -> Option<&SampleTables> {
        self.media.information.as_ref()?.sample_tables()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackHeaderData {
    pub version: u8,
    pub flags: [u8; 3],
    pub creation_time: u64,
    pub modification_time: u64,
    pub id: u32,
    pub reserved: u32,
    pub duration: u64,
    pub reserved2: [u8; 8],
    pub layer: u16,
    pub alternate_group: u16,
    pub volume: FixedPoint16,
    pub reserved3: u16,
    pub matrix_structure: [u32; 9],
    pub width: FixedPoint32,
    pub height: FixedPoint32,
}

impl TrackHeaderData {
    /// A header for an enabled track that's used in the movie and its preview.
    pub fn new(id: u32, duration: u64) -> Self {
        Self {
            version: 0,
            flags: [0, 0, 0x0f],
            creation_time: 0,
            modification_time: 0,
            id,
            reserved: 0,
            duration,
            reserved2: [0; 8],
            layer: 0,
            alternate_group: 0,
            volume: 0.0.into(),
            reserved3: 0,
            matrix_structure: IDENTITY_MATRIX,
            width: 0.0.into(),
            height: 0.0.into(),
        }
    }
}

impl AtomData for TrackHeaderData {
    const TYPE: FourCC = FourCC::TKHD;
}

impl ReadData for TrackHeaderData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let version = reader.read_u8()?;
        Ok(Self {
            version,
            flags: read(&mut reader)?,
            creation_time: read_versioned(&mut reader, version)?,
            modification_time: read_versioned(&mut reader, version)?,
            id: read(&mut reader)?,
            reserved: read(&mut reader)?,
            duration: read_versioned(&mut reader, version)?,
            reserved2: read(&mut reader)?,
            layer: read(&mut reader)?,
            alternate_group: read(&mut reader)?,
            volume: read(&mut reader)?,
            reserved3: read(&mut reader)?,
            matrix_structure: read(&mut reader)?,
            width: read(&mut reader)?,
            height: read(&mut reader)?,
        })
    }
}

impl WriteData for TrackHeaderData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let version = required_version(&[self.creation_time, self.modification_time, self.duration]);
        writer.write_u8(version)?;
        self.flags.write(&mut writer)?;
        write_versioned(&mut writer, version, self.creation_time)?;
        write_versioned(&mut writer, version, self.modification_time)?;
        (self.id, self.reserved).write(&mut writer)?;
        write_versioned(&mut writer, version, self.duration)?;
        (
            self.reserved2,
            self.layer,
            self.alternate_group,
            self.volume,
            self.reserved3,
            self.matrix_structure,
            self.width,
            self.height,
        )
            .write(&mut writer)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackReferenceTypeData {
    pub typ: FourCC,
    pub track_ids: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackReferenceData {
    pub references: Vec<TrackReferenceTypeData>,
}

impl AtomData for TrackReferenceData {
    const TYPE: FourCC = FourCC::TREF;
}

impl ReadData for TrackReferenceData {
    fn read<R: Read + Seek>(reader: R) -> Result<Self> {
        let references = read_opaque_atoms(reader)?
            .into_iter()
            .map(|a| TrackReferenceTypeData {
                typ: a.typ,
                track_ids: a.data.chunks_exact(4).map(BigEndian::read_u32).collect(),
            })
            .collect();
        Ok(Self { references })
    }
}

impl WriteData for TrackReferenceData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        for r in &self.references {
            writer.write_atom_header(r.typ, r.track_ids.len() * 4)?;
            for &id in &r.track_ids {
                writer.write_u32::<BigEndian>(id)?;
            }
        }
        Ok(())
    }
}

impl TrackReferenceData {
    pub fn track_ids(&self, typ: FourCC) -> &[u32] {
        self.references.iter().find(|r| r.typ == typ).map(|r| r.track_ids.as_slice()).unwrap_or(&[])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MediaInformationData {
    Sound(SoundMediaInformationData),
    Video(VideoMediaInformationData),
    Timecode(BaseMediaInformationData<TimecodeMediaType>),
    Text(BaseMediaInformationData<TextMediaType>),
    Base(BaseMediaInformationData<GeneralMediaType>),
}

impl MediaInformationData {
    pub fn sample_tables(&self) -> Option<&SampleTables> {
        match self {
            Self::Sound(v) => v.sample_table.as_ref().map(|t| &t.tables),
            Self::Video(v) => v.sample_table.as_ref().map(|t| &t.tables),
            Self::Timecode(v) => v.sample_table.as_ref().map(|t| &t.tables),
            Self::Text(v) => v.sample_table.as_ref().map(|t| &t.tables),
            Self::Base(v) => v.sample_table.as_ref().map(|t| &t.tables),
        }
    }
}

impl WriteData for MediaInformationData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        match self {
            Self::Sound(v) => writer.write_atom(v),
            Self::Video(v) => writer.write_atom(v),
            Self::Timecode(v) => writer.write_atom(v),
            Self::Text(v) => writer.write_atom(v),
            Self::Base(v) => writer.write_atom(v),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaData {
    pub header: MediaHeaderData,
    pub handler_reference: Option<HandlerReferenceData>,
    pub information: Option<MediaInformationData>,
}

impl AtomData for MediaData {
    const TYPE: FourCC = FourCC::MDIA;
}

impl ReadData for MediaData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let handler_reference: Option<HandlerReferenceData> = read_one(&mut reader)?;
        Ok(Self {
            header: read_one(&mut reader)?.ok_or(Error::MalformedFile("missing media header"))?,
            information: {
                let component_subtype = handler_reference.as_ref().map(|v| v.component_subtype).unwrap_or_default();
                match component_subtype {
                    FourCC::VIDE => Some(MediaInformationData::Video(
                        read_one(&mut reader)?.ok_or(Error::MalformedFile("missing media video information"))?,
                    )),
                    FourCC::SOUN => Some(MediaInformationData::Sound(
                        read_one(&mut reader)?.ok_or(Error::MalformedFile("missing media sound information"))?,
                    )),
                    FourCC::TMCD => read_one(&mut reader)?.map(MediaInformationData::Timecode),
                    FourCC::TEXT | FourCC::SBTL => read_one(&mut reader)?.map(MediaInformationData::Text),
                    _ => read_one(&mut reader)?.map(MediaInformationData::Base),
                }
            },
            handler_reference,
        })
    }
}

impl WriteData for MediaData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_atom(&self.header)?;
        if let Some(hdlr) = &self.handler_reference {
            writer.write_atom(hdlr)?;
        }
        if let Some(information) = &self.information {
            information.write(&mut writer)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaHeaderData {
    pub version: u8,
    pub flags: [u8; 3],
    pub creation_time: u64,
    pub modification_time: u64,
    pub time_scale: u32,
    pub duration: u64,
    pub language: u16,
    pub quality: u16,
}

impl MediaHeaderData {
    pub fn new(time_scale: u32, duration: u64) -> Self {
        Self {
            version: 0,
            flags: [0; 3],
            creation_time: 0,
            modification_time: 0,
            time_scale,
            duration,
            language: 0,
            quality: 0,
        }
    }
}

impl AtomData for MediaHeaderData {
    const TYPE: FourCC = FourCC::MDHD;
}

impl ReadData for MediaHeaderData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let version = reader.read_u8()?;
        Ok(Self {
            version,
            flags: read(&mut reader)?,
            creation_time: read_versioned(&mut reader, version)?,
            modification_time: read_versioned(&mut reader, version)?,
            time_scale: read(&mut reader)?,
            duration: read_versioned(&mut reader, version)?,
            language: read(&mut reader)?,
            quality: read(&mut reader)?,
        })
    }
}

impl WriteData for MediaHeaderData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let version = required_version(&[self.creation_time, self.modification_time, self.duration]);
        writer.write_u8(version)?;
        self.flags.write(&mut writer)?;
        write_versioned(&mut writer, version, self.creation_time)?;
        write_versioned(&mut writer, version, self.modification_time)?;
        self.time_scale.write(&mut writer)?;
        write_versioned(&mut writer, version, self.duration)?;
        (self.language, self.quality).write(&mut writer)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HandlerReferenceData {
    pub version: u8,
    pub flags: [u8; 3],
    pub component_type: FourCC,
    pub component_subtype: FourCC,
    pub component_manufacturer: u32,
    pub component_flags: u32,
    pub component_flags_mask: u32,
    pub component_name: RemainingBytes,
}

impl AtomData for HandlerReferenceData {
    const TYPE: FourCC = FourCC::HDLR;
}

impl HandlerReferenceData {
    /// QuickTime stores the name as a Pascal string, MP4 as a C string.
    pub fn new(component_type: FourCC, component_subtype: FourCC, name: &str, pascal_name: bool) -> Self {
        let mut component_name = Vec::with_capacity(name.len() + 1);
        if pascal_name {
            component_name.push(name.len().min(255) as u8);
            component_name.extend_from_slice(&name.as_bytes()[..name.len().min(255)]);
        } else {
            component_name.extend_from_slice(name.as_bytes());
            component_name.push(0);
        }
        Self {
            version: 0,
            flags: [0; 3],
            component_type,
            component_subtype,
            component_manufacturer: 0,
            component_flags: 0,
            component_flags_mask: 0,
            component_name: RemainingBytes(component_name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataReferenceEntry {
    pub typ: FourCC,
    pub version: u8,
    pub flags: [u8; 3],
    pub data: Vec<u8>,
}

impl DataReferenceEntry {
    /// A reference to the file containing the movie itself.
    pub fn self_reference(typ: FourCC) -> Self {
        Self {
            typ,
            version: 0,
            flags: [0, 0, 1],
            data: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataInformationData {
    pub entries: Vec<DataReferenceEntry>,
}

impl AtomData for DataInformationData {
    const TYPE: FourCC = FourCC::DINF;
}

impl ReadData for DataInformationData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let atom = match AtomReader::new(&mut reader).find(|a| a.as_ref().map_or(true, |a| a.is(FourCC::DREF))) {
            Some(a) => a?,
            None => return Ok(Self { entries: vec![] }),
        };
        let mut dref = atom.data(&mut reader);
        let mut header = [0; 8];
        dref.read_exact(&mut header)?;
        let mut entries = Vec::new();
        for entry in read_opaque_atoms(&mut dref)? {
            if entry.data.len() < 4 {
                return Err(Error::MalformedFile("truncated data reference"));
            }
            entries.push(DataReferenceEntry {
                typ: entry.typ,
                version: entry.data[0],
                flags: [entry.data[1], entry.data[2], entry.data[3]],
                data: entry.data[4..].to_vec(),
            });
        }
        Ok(Self { entries })
    }
}

impl WriteData for DataInformationData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_container(FourCC::DREF, |buf| {
            buf.write_u32::<BigEndian>(0)?;
            buf.write_u32::<BigEndian>(self.entries.len() as _)?;
            for entry in &self.entries {
                buf.write_atom_header(entry.typ, entry.data.len() + 4)?;
                buf.write_u8(entry.version)?;
                buf.write_all(&entry.flags)?;
                buf.write_all(&entry.data)?;
            }
            Ok(())
        })
    }
}

pub trait MediaType: fmt::Debug {
    type SampleDescriptionDataEntry: Clone + std::cmp::PartialEq + fmt::Debug + ReadData + WriteData;

    fn constant_sample_size(_desc: &Self::SampleDescriptionDataEntry) -> Option<u32> {
        None
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneralMediaType;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GeneralSampleDescriptionDataEntry {
    pub data_format: u32,
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub data: RemainingBytes,
}

impl MediaType for GeneralMediaType {
    type SampleDescriptionDataEntry = GeneralSampleDescriptionDataEntry;
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextMediaType;

/// Text descriptions differ between QuickTime and 3GPP, so everything past the common header is kept
/// as is.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TextSampleDescriptionDataEntry {
    pub data_format: u32,
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub data: RemainingBytes,
}

impl TextSampleDescriptionDataEntry {
    /// A QuickTime 'text' description with default display settings: black text on white, no text
    /// box, system font.
    pub fn quicktime() -> Self {
        let mut data = Vec::with_capacity(43);
        data.extend_from_slice(&[0; 8]); // display flags, justification
        data.extend_from_slice(&[0xff; 6]); // background color
        data.extend_from_slice(&[0; 8]); // default text box
        data.extend_from_slice(&[0; 8]); // reserved
        data.extend_from_slice(&[0; 4]); // font number, font face
        data.extend_from_slice(&[0; 3]); // reserved
        data.extend_from_slice(&[0; 6]); // foreground color
        data.push(0); // empty font name
        Self {
            data_format: FourCC::TEXT.0,
            reserved: [0; 6],
            data_reference_index: 1,
            data: RemainingBytes(data),
        }
    }
}

impl MediaType for TextMediaType {
    type SampleDescriptionDataEntry = TextSampleDescriptionDataEntry;
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMediaType;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoSampleDescriptionDataEntry {
    pub data_format: u32,
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub version: u16,
    pub revision_level: u16,
    pub vendor: u32,
    pub temporal_quality: u32,
    pub spatial_quality: u32,
    pub width: u16,
    pub height: u16,
    pub horizontal_resolution: FixedPoint32,
    pub vertical_resolution: FixedPoint32,
    pub data_size: u32,
    pub frame_count: u16,
    pub compressor_name: [u8; 32],
    pub depth: u16,
    pub color_table_id: i16,

    pub extensions: Vec<OpaqueAtom>,
}

impl VideoSampleDescriptionDataEntry {
    pub fn new(data_format: FourCC, width: u16, height: u16, compressor_name: &str) -> Self {
        let mut name = [0; 32];
        let len = compressor_name.len().min(31);
        name[0] = len as u8;
        name[1..1 + len].copy_from_slice(&compressor_name.as_bytes()[..len]);
        Self {
            data_format: data_format.0,
            reserved: [0; 6],
            data_reference_index: 1,
            version: 0,
            revision_level: 0,
            vendor: 0,
            temporal_quality: 0,
            spatial_quality: 0,
            width,
            height,
            horizontal_resolution: 72.0.into(),
            vertical_resolution: 72.0.into(),
            data_size: 0,
            frame_count: 1,
            compressor_name: name,
            depth: 24,
            color_table_id: -1,
            extensions: vec![],
        }
    }

    /// Returns the compressor name, stored as a Pascal string.
    pub fn compressor(&self) -> String {
        let len = (self.compressor_name[0] as usize).min(31);
        String::from_utf8_lossy(&self.compressor_name[1..1 + len]).into_owned()
    }

    pub fn extension(&self, typ: FourCC) -> Option<&[u8]> {
        self.extensions.iter().find(|e| e.typ == typ).map(|e| e.data.as_slice())
    }
}

impl ReadData for VideoSampleDescriptionDataEntry {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            data_format: read(&mut reader)?,
            reserved: read(&mut reader)?,
            data_reference_index: read(&mut reader)?,
            version: read(&mut reader)?,
            revision_level: read(&mut reader)?,
            vendor: read(&mut reader)?,
            temporal_quality: read(&mut reader)?,
            spatial_quality: read(&mut reader)?,
            width: read(&mut reader)?,
            height: read(&mut reader)?,
            horizontal_resolution: read(&mut reader)?,
            vertical_resolution: read(&mut reader)?,
            data_size: read(&mut reader)?,
            frame_count: read(&mut reader)?,
            compressor_name: read(&mut reader)?,
            depth: read(&mut reader)?,
            color_table_id: read(&mut reader)?,
            extensions: read_opaque_atoms(&mut reader)?,
        })
    }
}

impl WriteData for VideoSampleDescriptionDataEntry {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        (
            self.data_format,
            self.reserved,
            self.data_reference_index,
            self.version,
            self.revision_level,
            self.vendor,
            self.temporal_quality,
            self.spatial_quality,
            self.width,
            self.height,
            self.horizontal_resolution,
            self.vertical_resolution,
        )
            .write(&mut writer)?;
        (self.data_size, self.frame_count, self.compressor_name, self.depth, self.color_table_id).write(&mut writer)?;
        write_opaque_atoms(writer, &self.extensions)
    }
}

impl MediaType for VideoMediaType {
    type SampleDescriptionDataEntry = VideoSampleDescriptionDataEntry;
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMediaInformationData {
    pub header: VideoMediaInformationHeaderData,
    pub handler_reference: Option<HandlerReferenceData>, // required for qtff, optional for mp4
    pub data_information: Option<DataInformationData>,
    pub sample_table: Option<SampleTableData<VideoMediaType>>,
}

impl AtomData for VideoMediaInformationData {
    const TYPE: FourCC = FourCC::MINF;
}

impl ReadData for VideoMediaInformationData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            header: read_one(&mut reader)?.ok_or(Error::MalformedFile("missing video media information header"))?,
            handler_reference: read_one(&mut reader)?,
            data_information: read_one(&mut reader)?,
            sample_table: read_one(&mut reader)?,
        })
    }
}

impl WriteData for VideoMediaInformationData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_atom(&self.header)?;
        write_media_information_tail(writer, &self.handler_reference, &self.data_information, &self.sample_table)
    }
}

fn write_media_information_tail<W: Write, M: MediaType>(
    mut writer: W,
    handler_reference: &Option<HandlerReferenceData>,
    data_information: &Option<DataInformationData>,
    sample_table: &Option<SampleTableData<M>>,
) -> Result<()> {
    if let Some(hdlr) = handler_reference {
        writer.write_atom(hdlr)?;
    }
    if let Some(dinf) = data_information {
        writer.write_atom(dinf)?;
    }
    if let Some(stbl) = sample_table {
        writer.write_atom(stbl)?;
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VideoMediaInformationHeaderData {
    pub version: u8,
    pub flags: [u8; 3],
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

impl Default for VideoMediaInformationHeaderData {
    fn default() -> Self {
        Self {
            version: 0,
            flags: [0, 0, 1],
            graphics_mode: 0x40,
            opcolor: [0x8000; 3],
        }
    }
}

impl AtomData for VideoMediaInformationHeaderData {
    const TYPE: FourCC = FourCC::VMHD;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SoundMediaType;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SoundSampleDescriptionDataEntryV0 {
    pub revision_level: u16,
    pub vendor: u32,
    pub number_of_channels: u16,
    pub sample_size: u16,
    pub compression_id: u16,
    pub packet_size: u16,
    pub sample_rate: FixedPoint32,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SoundSampleDescriptionDataEntryV1 {
    pub revision_level: u16,
    pub vendor: u32,
    pub number_of_channels: u16,
    pub sample_size: u16,
    pub compression_id: u16,
    pub packet_size: u16,
    pub sample_rate: FixedPoint32,
    pub samples_per_packet: u32,
    pub bytes_per_packet: u32,
    pub bytes_per_frame: u32,
    pub bytes_per_sample: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SoundSampleDescriptionDataEntryVersion {
    V0(SoundSampleDescriptionDataEntryV0),
    V1(SoundSampleDescriptionDataEntryV1),
    // TODO: decode v2 fields (64-bit float sample rate, explicit frame layout) once a v2 file is
    // needed for testing
    V2(u16, Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SoundSampleDescriptionDataEntry {
    pub data_format: u32,
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub version: SoundSampleDescriptionDataEntryVersion,
    pub extensions: Vec<OpaqueAtom>,
}

impl SoundSampleDescriptionDataEntry {
    pub fn new_v0(data_format: FourCC, channels: u16, bits: u16, sample_rate: u32) -> Self {
        Self {
            data_format: data_format.0,
            reserved: [0; 6],
            data_reference_index: 1,
            version: SoundSampleDescriptionDataEntryVersion::V0(SoundSampleDescriptionDataEntryV0 {
                number_of_channels: channels,
                sample_size: bits,
                sample_rate: (sample_rate as f64).into(),
                ..Default::default()
            }),
            extensions: vec![],
        }
    }

    pub fn channels(&self) -> u16 {
        match &self.version {
            SoundSampleDescriptionDataEntryVersion::V0(v) => v.number_of_channels,
            SoundSampleDescriptionDataEntryVersion::V1(v) => v.number_of_channels,
            SoundSampleDescriptionDataEntryVersion::V2(..) => 0,
        }
    }

    pub fn bits(&self) -> u16 {
        match &self.version {
            SoundSampleDescriptionDataEntryVersion::V0(v) => v.sample_size,
            SoundSampleDescriptionDataEntryVersion::V1(v) => v.sample_size,
            SoundSampleDescriptionDataEntryVersion::V2(..) => 0,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        match &self.version {
            SoundSampleDescriptionDataEntryVersion::V0(v) => v.sample_rate.into(),
            SoundSampleDescriptionDataEntryVersion::V1(v) => v.sample_rate.into(),
            SoundSampleDescriptionDataEntryVersion::V2(..) => 0.0,
        }
    }

    pub fn extension(&self, typ: FourCC) -> Option<&[u8]> {
        self.extensions.iter().find(|e| e.typ == typ).map(|e| e.data.as_slice())
    }
}

impl ReadData for SoundSampleDescriptionDataEntry {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let data_format = read(&mut reader)?;
        let reserved = read(&mut reader)?;
        let data_reference_index = read(&mut reader)?;
        let version = match reader.read_u16::<BigEndian>()? {
            0 => SoundSampleDescriptionDataEntryVersion::V0(read(&mut reader)?),
            1 => SoundSampleDescriptionDataEntryVersion::V1(read(&mut reader)?),
            v => {
                let mut rest = Vec::new();
                reader.read_to_end(&mut rest)?;
                SoundSampleDescriptionDataEntryVersion::V2(v, rest)
            }
        };
        let extensions = match version {
            SoundSampleDescriptionDataEntryVersion::V2(..) => vec![],
            _ => read_opaque_atoms(&mut reader)?,
        };
        Ok(Self {
            data_format,
            reserved,
            data_reference_index,
            version,
            extensions,
        })
    }
}

impl WriteData for SoundSampleDescriptionDataEntry {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        (self.data_format, self.reserved, self.data_reference_index).write(&mut writer)?;
        match &self.version {
            SoundSampleDescriptionDataEntryVersion::V0(v) => (0u16, v).write(&mut writer)?,
            SoundSampleDescriptionDataEntryVersion::V1(v) => (1u16, v).write(&mut writer)?,
            SoundSampleDescriptionDataEntryVersion::V2(version, data) => {
                writer.write_u16::<BigEndian>(*version)?;
                writer.write_all(data)?;
            }
        }
        write_opaque_atoms(writer, &self.extensions)
    }
}

impl MediaType for SoundMediaType {
    type SampleDescriptionDataEntry = SoundSampleDescriptionDataEntry;

    // The number of bytes per audio frame, for uncompressed audio. When the sample size table uses
    // a constant size of 1 this takes precedence over it.
    fn constant_sample_size(desc: &Self::SampleDescriptionDataEntry) -> Option<u32> {
        (match &desc.version {
            SoundSampleDescriptionDataEntryVersion::V0(v) => Some((v.sample_size / 8) as u32 * v.number_of_channels as u32),
            SoundSampleDescriptionDataEntryVersion::V1(v) => Some(v.bytes_per_frame as _),
            SoundSampleDescriptionDataEntryVersion::V2(..) => None,
        })
        .filter(|&size| size > 0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SoundMediaInformationData {
    pub header: SoundMediaInformationHeaderData,
    pub handler_reference: Option<HandlerReferenceData>, // required for qtff, optional for mp4
    pub data_information: Option<DataInformationData>,
    pub sample_table: Option<SampleTableData<SoundMediaType>>,
}

impl AtomData for SoundMediaInformationData {
    const TYPE: FourCC = FourCC::MINF;
}

impl ReadData for SoundMediaInformationData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            header: read_one(&mut reader)?.ok_or(Error::MalformedFile("missing sound media information header"))?,
            handler_reference: read_one(&mut reader)?,
            data_information: read_one(&mut reader)?,
            sample_table: read_one(&mut reader)?,
        })
    }
}

impl WriteData for SoundMediaInformationData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_atom(&self.header)?;
        write_media_information_tail(writer, &self.handler_reference, &self.data_information, &self.sample_table)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SoundMediaInformationHeaderData {
    pub version: u8,
    pub flags: [u8; 3],
    pub balance: i16,
    pub reserved: u16,
}

impl AtomData for SoundMediaInformationHeaderData {
    const TYPE: FourCC = FourCC::SMHD;
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimecodeMediaType;

impl MediaType for TimecodeMediaType {
    type SampleDescriptionDataEntry = TimecodeSampleDescriptionDataEntry;
}

#[derive(Clone, Debug, PartialEq)]
pub struct BaseMediaInformationData<M: MediaType> {
    pub header: Option<BaseMediaInformationHeaderData>,
    pub handler_reference: Option<HandlerReferenceData>,
    pub data_information: Option<DataInformationData>,
    pub sample_table: Option<SampleTableData<M>>,
}

impl<M: MediaType> AtomData for BaseMediaInformationData<M> {
    const TYPE: FourCC = FourCC::MINF;
}

impl<M: MediaType> ReadData for BaseMediaInformationData<M> {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            header: read_one(&mut reader)?,
            handler_reference: read_one(&mut reader)?,
            data_information: read_one(&mut reader)?,
            sample_table: read_one(&mut reader)?,
        })
    }
}

impl<M: MediaType> WriteData for BaseMediaInformationData<M> {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if let Some(header) = &self.header {
            writer.write_atom(header)?;
        }
        write_media_information_tail(writer, &self.handler_reference, &self.data_information, &self.sample_table)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BaseMediaInfoData {
    pub version: u8,
    pub flags: [u8; 3],
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
    pub balance: i16,
    pub reserved: u16,
}

impl AtomData for BaseMediaInfoData {
    const TYPE: FourCC = FourCC::GMIN;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BaseMediaInformationHeaderData {
    pub info: Option<BaseMediaInfoData>,
}

impl AtomData for BaseMediaInformationHeaderData {
    const TYPE: FourCC = FourCC::GMHD;
}

impl ReadData for BaseMediaInformationHeaderData {
    fn read<R: Read + Seek>(reader: R) -> Result<Self> {
        Ok(Self { info: read_one(reader)? })
    }
}

impl WriteData for BaseMediaInformationHeaderData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if let Some(info) = &self.info {
            writer.write_atom(info)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleTableData<M: MediaType> {
    pub sample_description: Option<SampleDescriptionData<M>>,
    pub tables: SampleTables,
}

impl<M: MediaType> Default for SampleTableData<M> {
    fn default() -> Self {
        Self {
            sample_description: None,
            tables: SampleTables::default(),
        }
    }
}

impl<M: MediaType> AtomData for SampleTableData<M> {
    const TYPE: FourCC = FourCC::STBL;
}

impl<M: MediaType> ReadData for SampleTableData<M> {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            sample_description: read_one(&mut reader)?,
            tables: read(&mut reader)?,
        })
    }
}

impl<M: MediaType> WriteData for SampleTableData<M> {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if let Some(stsd) = &self.sample_description {
            writer.write_atom(stsd)?;
        }
        self.tables.write(writer)
    }
}

impl<M: MediaType> SampleTableData<M> {
    pub fn sample_description(&self, id: u32) -> Option<&M::SampleDescriptionDataEntry> {
        self.sample_description.as_ref()?.entries.get(id as usize)
    }

    // The description-derived size only replaces a sample size table that counts one byte per
    // sample, which is how uncompressed QuickTime sound is stored.
    fn constant_sample_size(&self, chunk_info: &SampleChunkInfo) -> Option<u32> {
        let stsz = self.tables.sample_size.as_ref()?;
        if stsz.constant_sample_size != 1 {
            return None;
        }
        M::constant_sample_size(self.sample_description(chunk_info.sample_description)?)
    }

    // Returns the offset within the file of the given zero-based sample.
    pub fn sample_offset(&self, sample: u64, chunk_info: &SampleChunkInfo) -> Option<u64> {
        self.tables.sample_offset(sample, chunk_info, self.constant_sample_size(chunk_info))
    }

    pub fn sample_size(&self, sample: u64, chunk_info: &SampleChunkInfo) -> Option<u32> {
        self.tables.sample_size(sample, self.constant_sample_size(chunk_info))
    }

    pub fn sample_count(&self) -> u64 {
        self.tables.sample_count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleDescriptionData<M: MediaType> {
    pub entries: Vec<M::SampleDescriptionDataEntry>,
}

impl<M: MediaType> ReadData for SampleDescriptionData<M> {
    fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0; 8];
        reader.read_exact(&mut buf)?;
        let number_of_entries = BigEndian::read_u32(&buf[4..]);
        let mut entries = Vec::new();
        let mut size_prefix_buf = [0; 4];
        for _ in 0..number_of_entries {
            reader.read_exact(&mut size_prefix_buf)?;
            let size = BigEndian::read_u32(&size_prefix_buf);
            if size < 4 {
                break;
            }
            let mut buf = Vec::new();
            (&mut reader).take((size - 4) as u64).read_to_end(&mut buf)?;
            if buf.len() != (size - 4) as usize {
                return Err(Error::MalformedFile("truncated sample description"));
            }
            entries.push(M::SampleDescriptionDataEntry::read(Cursor::new(buf.as_slice()))?);
        }
        Ok(Self { entries })
    }
}

impl<M: MediaType> WriteData for SampleDescriptionData<M> {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<BigEndian>(0)?;
        writer.write_u32::<BigEndian>(self.entries.len() as _)?;
        for entry in &self.entries {
            let mut buf = Vec::new();
            entry.write(&mut buf)?;
            writer.write_u32::<BigEndian>(buf.len() as u32 + 4)?;
            writer.write_all(&buf)?;
        }
        Ok(())
    }
}

impl<M: MediaType> AtomData for SampleDescriptionData<M> {
    const TYPE: FourCC = FourCC::STSD;
}

#[derive(Clone, Debug, PartialEq)]
pub struct EditData {
    pub edit_list: Option<EditListData>,
}

impl AtomData for EditData {
    const TYPE: FourCC = FourCC::EDTS;
}

impl ReadData for EditData {
    fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        Ok(Self {
            edit_list: read_one(&mut reader)?,
        })
    }
}

impl WriteData for EditData {
    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if let Some(edit_list) = self.edit_list.as_ref() {
            writer.write_atom(edit_list)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EditListDataEntry {
    pub track_duration: u32,
    pub media_time: i32,
    pub media_rate: FixedPoint32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EditListData {
    pub version: u8,
    pub flags: [u8; 3],
    pub entries: Vec<EditListDataEntry>,
}

impl AtomData for EditListData {
    const TYPE: FourCC = FourCC::ELST;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_table::*;
    use std::io::Cursor;

    #[test]
    fn test_video_sample_description_data_entry() {
        let buf = vec![
            0x61, 0x76, 0x63, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x07, 0x80, 0x04, 0x38, 0x00, 0x48, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x36, 0x61, 0x76, 0x63, 0x43, 0x01, 0x64, 0x00, 0x29, 0xFF, 0xE1,
            0x00, 0x19, 0x67, 0x64, 0x00, 0x29, 0xAC, 0x2C, 0xA5, 0x01, 0xE0, 0x11, 0x1F, 0x73, 0x50, 0x10, 0x10, 0x14, 0x00, 0x00, 0x0F, 0xA4, 0x00, 0x03,
            0xA9, 0x82, 0x10, 0x01, 0x00, 0x06, 0x68, 0xE8, 0x81, 0x13, 0x52, 0x50, 0xFD, 0xF8, 0xF8, 0x00,
        ];
        let entry = VideoSampleDescriptionDataEntry::read(Cursor::new(&buf)).unwrap();
        assert_eq!(
            VideoSampleDescriptionDataEntry {
                data_format: 1635148593,
                reserved: [0; 6],
                data_reference_index: 1,
                version: 0,
                revision_level: 0,
                vendor: 0,
                temporal_quality: 0,
                spatial_quality: 0,
                width: 1920,
                height: 1080,
                horizontal_resolution: 72.0.into(),
                vertical_resolution: 72.0.into(),
                data_size: 0,
                frame_count: 1,
                compressor_name: [0; 32],
                depth: 24,
                color_table_id: -1,
                extensions: vec![OpaqueAtom {
                    typ: FourCC::new(b"avcC"),
                    data: vec![
                        0x01, 0x64, 0x00, 0x29, 0xFF, 0xE1, 0x00, 0x19, 0x67, 0x64, 0x00, 0x29, 0xAC, 0x2C, 0xA5, 0x01, 0xE0, 0x11, 0x1F, 0x73, 0x50, 0x10,
                        0x10, 0x14, 0x00, 0x00, 0x0F, 0xA4, 0x00, 0x03, 0xA9, 0x82, 0x10, 0x01, 0x00, 0x06, 0x68, 0xE8, 0x81, 0x13, 0x52, 0x50, 0xFD, 0xF8,
                        0xF8, 0x00
                    ]
                }],
            },
            entry
        );

        let mut written = Vec::new();
        entry.write(&mut written).unwrap();
        assert_eq!(buf, written);
    }

    #[test]
    fn test_video_sample_description_data_entry_with_terminating_zeros() {
        // "Some video sample descriptions contain an optional 4-byte terminator with all bytes set
        // to 0, following all other sample description and sample description extension data."
        let buf = vec![
            0x61, 0x70, 0x63, 0x73, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x61, 0x70, 0x70, 0x6c, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x03, 0xff, 0x10, 0x00, 0x08, 0x70, 0x00, 0x48, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x15, 0x41,
            0x70, 0x70, 0x6c, 0x65, 0x20, 0x50, 0x72, 0x6f, 0x52, 0x65, 0x73, 0x20, 0x34, 0x32, 0x32, 0x20, 0x28, 0x4c, 0x54, 0x29, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0xff, 0xff, 0x00, 0x00, 0x00, 0x0a, 0x66, 0x69, 0x65, 0x6c, 0x01, 0x00, 0x00, 0x00, 0x00, 0x12,
            0x63, 0x6f, 0x6c, 0x72, 0x6e, 0x63, 0x6c, 0x63, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x70, 0x61, 0x73, 0x70, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        let entry = VideoSampleDescriptionDataEntry::read(Cursor::new(&buf)).unwrap();
        assert_eq!("Apple ProRes 422 (LT)", entry.compressor());
        assert_eq!(
            vec![FourCC::new(b"fiel"), FourCC::new(b"colr"), FourCC::new(b"pasp")],
            entry.extensions.iter().map(|e| e.typ).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_sound_media_type() {
        let desc = SoundSampleDescriptionDataEntry {
            data_format: 1836069985,
            reserved: [0; 6],
            data_reference_index: 1,
            version: SoundSampleDescriptionDataEntryVersion::V1(SoundSampleDescriptionDataEntryV1 {
                revision_level: 0,
                vendor: 0,
                number_of_channels: 2,
                sample_size: 16,
                compression_id: 65534,
                packet_size: 0,
                sample_rate: 48000.0.into(),
                samples_per_packet: 1024,
                bytes_per_packet: 0,
                bytes_per_frame: 0,
                bytes_per_sample: 2,
            }),
            extensions: vec![],
        };
        assert_eq!(None, SoundMediaType::constant_sample_size(&desc));

        let desc = SoundSampleDescriptionDataEntry::new_v0(FourCC::new(b"twos"), 2, 16, 48000);
        assert_eq!(Some(4), SoundMediaType::constant_sample_size(&desc));
        assert_eq!(48000.0, desc.sample_rate());

        let mut buf = Vec::new();
        desc.write(&mut buf).unwrap();
        assert_eq!(desc, SoundSampleDescriptionDataEntry::read(Cursor::new(&buf)).unwrap());
    }

    fn pcm_table() -> SampleTableData<SoundMediaType> {
        SampleTableData {
            sample_description: Some(SampleDescriptionData {
                entries: vec![SoundSampleDescriptionDataEntry::new_v0(FourCC::new(b"twos"), 2, 16, 48000)],
            }),
            tables: SampleTables {
                time_to_sample: Some(TimeToSampleData::from_durations(vec![1; 4000])),
                sample_to_chunk: Some(SampleToChunkData {
                    entries: vec![SampleToChunkDataEntry {
                        first_chunk: 1,
                        samples_per_chunk: 2000,
                        sample_description_id: 1,
                    }],
                    ..Default::default()
                }),
                sample_size: Some(SampleSizeData {
                    constant_sample_size: 1,
                    sample_count: 4000,
                    ..Default::default()
                }),
                chunk_offset: Some(ChunkOffsetData {
                    offsets: vec![100, 9000],
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_sample_table_data() {
        let table = pcm_table();
        let info = table.tables.sample_chunk_info(2001, None).unwrap();
        assert_eq!(1, info.number);
        // uncompressed sound uses the description's bytes per frame
        assert_eq!(Some(9004), table.sample_offset(2001, &info));
        assert_eq!(Some(4), table.sample_size(2001, &info));
        assert_eq!(4000, table.sample_count());

        let mut buf = Vec::new();
        table.write(&mut buf).unwrap();
        assert_eq!(table, SampleTableData::<SoundMediaType>::read(Cursor::new(&buf)).unwrap());
    }

    #[test]
    fn test_movie_data() {
        let track = TrackData {
            header: TrackHeaderData::new(1, 4000),
            media: MediaData {
                header: MediaHeaderData::new(48000, 4000),
                handler_reference: Some(HandlerReferenceData::new(FourCC::MHLR, FourCC::SOUN, "Sound", true)),
                information: Some(MediaInformationData::Sound(SoundMediaInformationData {
                    header: SoundMediaInformationHeaderData::default(),
                    handler_reference: None,
                    data_information: Some(DataInformationData {
                        entries: vec![DataReferenceEntry::self_reference(FourCC::URL)],
                    }),
                    sample_table: Some(pcm_table()),
                })),
            },
            edit: None,
            reference: Some(TrackReferenceData {
                references: vec![TrackReferenceTypeData {
                    typ: FourCC::TMCD,
                    track_ids: vec![2],
                }],
            }),
        };
        let movie = MovieData {
            header: MovieHeaderData::new(600, 50, 3),
            tracks: vec![track],
        };

        let mut buf = Vec::new();
        buf.write_atom(&movie).unwrap();
        let read = read_one::<MovieData, _>(Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(movie, read);
        assert_eq!(Some(FourCC::SOUN), read.tracks[0].handler_subtype());
        assert_eq!(&[2], read.tracks[0].reference.as_ref().unwrap().track_ids(FourCC::TMCD));
        assert_eq!(4000, read.tracks[0].sample_tables().unwrap().sample_count());
    }

    #[test]
    fn test_versioned_headers() {
        let mut header = MediaHeaderData::new(90000, 1 << 33);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(1, buf[0]);
        let read = MediaHeaderData::read(Cursor::new(&buf)).unwrap();
        header.version = 1;
        assert_eq!(header, read);

        let header = MovieHeaderData::new(600, 1200, 2);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(100, buf.len());
        assert_eq!(header, MovieHeaderData::read(Cursor::new(&buf)).unwrap());
    }

    #[test]
    fn test_file_type_data() {
        let ftyp = FileTypeData {
            major_brand: FourCC::QT,
            minor_version: 0x200,
            compatible_brands: vec![FourCC::QT],
        };
        let mut buf = Vec::new();
        ftyp.write(&mut buf).unwrap();
        assert_eq!(12, buf.len());
        assert_eq!(ftyp, FileTypeData::read(Cursor::new(&buf)).unwrap());
    }
}
