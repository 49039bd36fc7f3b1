use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::chunk::ChunkId;
use super::error::Result;

pub const AVIF_HASINDEX: u32 = 0x10;
pub const AVIF_MUSTUSEINDEX: u32 = 0x20;
pub const AVIF_ISINTERLEAVED: u32 = 0x100;
pub const AVIF_TRUSTCKTYPE: u32 = 0x800;

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

fn read_id<R: Read>(reader: &mut R) -> Result<ChunkId> {
    let mut id = [0; 4];
    reader.read_exact(&mut id)?;
    Ok(ChunkId(id))
}

/// The `avih` chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MainAviHeader {
    pub micro_sec_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub padding_granularity: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub initial_frames: u32,
    pub streams: u32,
    pub suggested_buffer_size: u32,
    pub width: u32,
    pub height: u32,
    pub reserved: [u32; 4],
}

impl MainAviHeader {
    pub const SIZE: usize = 56;

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut h = Self {
            micro_sec_per_frame: reader.read_u32::<LittleEndian>()?,
            max_bytes_per_sec: reader.read_u32::<LittleEndian>()?,
            padding_granularity: reader.read_u32::<LittleEndian>()?,
            flags: reader.read_u32::<LittleEndian>()?,
            total_frames: reader.read_u32::<LittleEndian>()?,
            initial_frames: reader.read_u32::<LittleEndian>()?,
            streams: reader.read_u32::<LittleEndian>()?,
            suggested_buffer_size: reader.read_u32::<LittleEndian>()?,
            width: reader.read_u32::<LittleEndian>()?,
            height: reader.read_u32::<LittleEndian>()?,
            reserved: [0; 4],
        };
        reader.read_u32_into::<LittleEndian>(&mut h.reserved)?;
        Ok(h)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        for v in [
            self.micro_sec_per_frame,
            self.max_bytes_per_sec,
            self.padding_granularity,
            self.flags,
            self.total_frames,
            self.initial_frames,
            self.streams,
            self.suggested_buffer_size,
            self.width,
            self.height,
        ]
        .iter()
        .chain(self.reserved.iter())
        {
            writer.write_u32::<LittleEndian>(*v)?;
        }
        Ok(())
    }
}

/// The `strh` chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamHeader {
    pub fcc_type: ChunkId,
    pub fcc_handler: ChunkId,
    pub flags: u32,
    pub priority: u16,
    pub language: u16,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub suggested_buffer_size: u32,
    pub quality: u32,
    pub sample_size: u32,
    pub frame: [i16; 4],
}

impl StreamHeader {
    pub const SIZE: usize = 56;

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut h = Self {
            fcc_type: read_id(&mut reader)?,
            fcc_handler: read_id(&mut reader)?,
            flags: reader.read_u32::<LittleEndian>()?,
            priority: reader.read_u16::<LittleEndian>()?,
            language: reader.read_u16::<LittleEndian>()?,
            initial_frames: reader.read_u32::<LittleEndian>()?,
            scale: reader.read_u32::<LittleEndian>()?,
            rate: reader.read_u32::<LittleEndian>()?,
            start: reader.read_u32::<LittleEndian>()?,
            length: reader.read_u32::<LittleEndian>()?,
            suggested_buffer_size: reader.read_u32::<LittleEndian>()?,
            quality: reader.read_u32::<LittleEndian>()?,
            sample_size: reader.read_u32::<LittleEndian>()?,
            frame: [0; 4],
        };
        // some writers omit the frame rectangle
        if reader.read_i16_into::<LittleEndian>(&mut h.frame).is_err() {
            h.frame = [0; 4];
        }
        Ok(h)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.fcc_type.0)?;
        writer.write_all(&self.fcc_handler.0)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.priority)?;
        writer.write_u16::<LittleEndian>(self.language)?;
        for v in [
            self.initial_frames,
            self.scale,
            self.rate,
            self.start,
            self.length,
            self.suggested_buffer_size,
            self.quality,
            self.sample_size,
        ] {
            writer.write_u32::<LittleEndian>(v)?;
        }
        for v in self.frame {
            writer.write_i16::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

/// The `strf` chunk of a video stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BitmapInfoHeader {
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: ChunkId,
    pub size_image: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub clr_used: u32,
    pub clr_important: u32,
    pub extra: Vec<u8>,
}

impl BitmapInfoHeader {
    pub const SIZE: usize = 40;

    pub fn new(compression: ChunkId, width: i32, height: i32, bit_count: u16) -> Self {
        Self {
            width,
            height,
            planes: 1,
            bit_count,
            compression,
            size_image: (width.unsigned_abs() * height.unsigned_abs() * bit_count as u32) / 8,
            ..Default::default()
        }
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let size = reader.read_u32::<LittleEndian>()? as usize;
        let mut h = Self {
            width: reader.read_i32::<LittleEndian>()?,
            height: reader.read_i32::<LittleEndian>()?,
            planes: reader.read_u16::<LittleEndian>()?,
            bit_count: reader.read_u16::<LittleEndian>()?,
            compression: read_id(&mut reader)?,
            size_image: reader.read_u32::<LittleEndian>()?,
            x_pels_per_meter: reader.read_i32::<LittleEndian>()?,
            y_pels_per_meter: reader.read_i32::<LittleEndian>()?,
            clr_used: reader.read_u32::<LittleEndian>()?,
            clr_important: reader.read_u32::<LittleEndian>()?,
            extra: vec![],
        };
        let extra_start = size.clamp(Self::SIZE, data.len());
        h.extra = data[extra_start..].to_vec();
        Ok(h)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<LittleEndian>(Self::SIZE as u32 + self.extra.len() as u32)?;
        writer.write_i32::<LittleEndian>(self.width)?;
        writer.write_i32::<LittleEndian>(self.height)?;
        writer.write_u16::<LittleEndian>(self.planes)?;
        writer.write_u16::<LittleEndian>(self.bit_count)?;
        writer.write_all(&self.compression.0)?;
        writer.write_u32::<LittleEndian>(self.size_image)?;
        writer.write_i32::<LittleEndian>(self.x_pels_per_meter)?;
        writer.write_i32::<LittleEndian>(self.y_pels_per_meter)?;
        writer.write_u32::<LittleEndian>(self.clr_used)?;
        writer.write_u32::<LittleEndian>(self.clr_important)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }
}

/// The `strf` chunk of an audio stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaveFormatEx {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extra: Vec<u8>,
}

impl WaveFormatEx {
    pub fn pcm(channels: u16, samples_per_sec: u32, bits_per_sample: u16) -> Self {
        let block_align = channels * ((bits_per_sample + 7) / 8);
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            samples_per_sec,
            avg_bytes_per_sec: samples_per_sec * block_align as u32,
            block_align,
            bits_per_sample,
            extra: vec![],
        }
    }

    /// Reads a WAVEFORMAT, PCMWAVEFORMAT or WAVEFORMATEX structure.
    pub fn read(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let mut f = Self {
            format_tag: reader.read_u16::<LittleEndian>()?,
            channels: reader.read_u16::<LittleEndian>()?,
            samples_per_sec: reader.read_u32::<LittleEndian>()?,
            avg_bytes_per_sec: reader.read_u32::<LittleEndian>()?,
            block_align: reader.read_u16::<LittleEndian>()?,
            bits_per_sample: 0,
            extra: vec![],
        };
        if let Ok(bits) = reader.read_u16::<LittleEndian>() {
            f.bits_per_sample = bits;
        }
        if let Ok(cb_size) = reader.read_u16::<LittleEndian>() {
            let n = (cb_size as usize).min(reader.len());
            f.extra = reader[..n].to_vec();
        }
        Ok(f)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u16::<LittleEndian>(self.format_tag)?;
        writer.write_u16::<LittleEndian>(self.channels)?;
        writer.write_u32::<LittleEndian>(self.samples_per_sec)?;
        writer.write_u32::<LittleEndian>(self.avg_bytes_per_sec)?;
        writer.write_u16::<LittleEndian>(self.block_align)?;
        writer.write_u16::<LittleEndian>(self.bits_per_sample)?;
        writer.write_u16::<LittleEndian>(self.extra.len() as _)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }
}

/// The OpenDML `dmlh` chunk. Writers pad it to a fixed size so it can be rewritten in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtendedAviHeader {
    pub total_frames: u32,
}

impl ExtendedAviHeader {
    pub const SIZE: usize = 248;

    pub fn read(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        Ok(Self {
            total_frames: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.total_frames)?;
        writer.write_all(&[0; Self::SIZE - 4])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_avi_header() {
        let h = MainAviHeader {
            micro_sec_per_frame: 33367,
            flags: AVIF_HASINDEX | AVIF_ISINTERLEAVED,
            total_frames: 90,
            streams: 2,
            width: 720,
            height: 480,
            ..Default::default()
        };
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(MainAviHeader::SIZE, buf.len());
        assert_eq!(h, MainAviHeader::read(buf.as_slice()).unwrap());
    }

    #[test]
    fn test_stream_header() {
        let h = StreamHeader {
            fcc_type: ChunkId::VIDS,
            fcc_handler: ChunkId(*b"MJPG"),
            scale: 1001,
            rate: 30000,
            length: 90,
            quality: u32::MAX,
            frame: [0, 0, 720, 480],
            ..Default::default()
        };
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(StreamHeader::SIZE, buf.len());
        assert_eq!(h, StreamHeader::read(buf.as_slice()).unwrap());

        // without the frame rectangle
        let mut short = StreamHeader::read(&buf[..48]).unwrap();
        assert_eq!([0; 4], short.frame);
        short.frame = h.frame;
        assert_eq!(h, short);
    }

    #[test]
    fn test_stream_formats() {
        let bih = BitmapInfoHeader::new(ChunkId(*b"MJPG"), 720, 480, 24);
        let mut buf = Vec::new();
        bih.write(&mut buf).unwrap();
        assert_eq!(BitmapInfoHeader::SIZE, buf.len());
        assert_eq!(bih, BitmapInfoHeader::read(&buf).unwrap());

        let wfx = WaveFormatEx::pcm(2, 48000, 16);
        assert_eq!(4, wfx.block_align);
        assert_eq!(192000, wfx.avg_bytes_per_sec);
        let mut buf = Vec::new();
        wfx.write(&mut buf).unwrap();
        assert_eq!(18, buf.len());
        assert_eq!(wfx, WaveFormatEx::read(&buf).unwrap());

        // a 16 byte PCMWAVEFORMAT has no extra data
        assert_eq!(wfx, WaveFormatEx::read(&buf[..16]).unwrap());
    }
}
