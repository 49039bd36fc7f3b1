//! The C ABI codec modules implement.
//!
//! A module is a shared library exporting:
//!
//! - `get_codec_api_version() -> u32`, which must return [`CODEC_API_VERSION`]
//! - `get_num_codecs() -> i32`
//! - `get_codec_info(index: i32) -> *const c_char`, a JSON encoded [`CodecInfo`] owned by the module
//! - `get_codec(index: i32, format: *const RawStreamFormat, codec: *mut RawCodec) -> i32`
//!
//! Every function returning `i32` returns 0 on success.

use std::{
    ffi::{c_char, c_void, CStr, CString},
    path::{Path, PathBuf},
    ptr, slice,
    sync::Arc,
};

use av_traits::{AudioBuffer, AudioSamples, Codec, CodecError, CodecInfo, Colormodel, EncodedPacket, ParameterValue, StreamFormat, VideoFrame};
use libloading::Library;

use crate::{Error, Result};

pub const CODEC_API_VERSION: u32 = 1;

pub const MEDIA_AUDIO: u32 = 0;
pub const MEDIA_VIDEO: u32 = 1;
pub const MEDIA_TEXT: u32 = 2;

pub const SAMPLE_FORMAT_S16: u32 = 0;
pub const SAMPLE_FORMAT_F32: u32 = 1;

pub const MAX_PLANES: usize = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawStreamFormat {
    pub media: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bits: u32,
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
    pub frame_duration: u32,
}

impl From<&StreamFormat> for RawStreamFormat {
    fn from(format: &StreamFormat) -> Self {
        match *format {
            StreamFormat::Audio { channels, sample_rate, bits } => Self {
                media: MEDIA_AUDIO,
                channels: channels as _,
                sample_rate,
                bits: bits as _,
                ..Default::default()
            },
            StreamFormat::Video {
                width,
                height,
                timescale,
                frame_duration,
            } => Self {
                media: MEDIA_VIDEO,
                width,
                height,
                timescale,
                frame_duration,
                ..Default::default()
            },
            StreamFormat::Text => Self {
                media: MEDIA_TEXT,
                ..Default::default()
            },
        }
    }
}

#[repr(C)]
pub struct RawPacket {
    pub data: *const u8,
    pub size: usize,
    pub pts: i64,
    pub duration: u32,
    pub samples: u32,
    pub keyframe: u8,
}

/// A picture shared with the module. `colormodel` indexes the codec's published colormodel list.
#[repr(C)]
pub struct RawFrame {
    pub colormodel: u32,
    pub width: u32,
    pub height: u32,
    pub planes: [*mut u8; MAX_PLANES],
    pub plane_sizes: [usize; MAX_PLANES],
    pub row_spans: [usize; MAX_PLANES],
    pub timestamp: i64,
    pub duration: u32,
}

/// Interleaved audio. `data` points at `frames * channels` samples of the given format.
#[repr(C)]
pub struct RawAudio {
    pub format: u32,
    pub channels: u32,
    pub frames: usize,
    pub data: *const c_void,
}

/// Receives output from the module. Data passed to the callbacks is copied before they return.
#[repr(C)]
pub struct RawSink {
    pub context: *mut c_void,
    pub packet: unsafe extern "C" fn(context: *mut c_void, packet: *const RawPacket),
    pub audio: unsafe extern "C" fn(context: *mut c_void, audio: *const RawAudio),
}

/// A codec instance as filled in by `get_codec`. Operations the codec doesn't implement are left
/// null.
#[repr(C)]
pub struct RawCodec {
    pub instance: *mut c_void,
    pub decode_video: Option<unsafe extern "C" fn(instance: *mut c_void, packet: *const RawPacket, frame: *mut RawFrame) -> i32>,
    pub encode_video: Option<unsafe extern "C" fn(instance: *mut c_void, frame: *const RawFrame, sink: *const RawSink) -> i32>,
    pub decode_audio: Option<unsafe extern "C" fn(instance: *mut c_void, packet: *const RawPacket, sink: *const RawSink) -> i32>,
    pub encode_audio: Option<unsafe extern "C" fn(instance: *mut c_void, audio: *const RawAudio, sink: *const RawSink) -> i32>,
    /// The value is a JSON encoded `ParameterValue`.
    pub set_parameter: Option<unsafe extern "C" fn(instance: *mut c_void, key: *const c_char, value: *const c_char) -> i32>,
    pub set_pass: Option<unsafe extern "C" fn(instance: *mut c_void, pass: u32, total: u32, stats_file: *const c_char) -> i32>,
    pub flush: Option<unsafe extern "C" fn(instance: *mut c_void, sink: *const RawSink) -> i32>,
    pub resync: Option<unsafe extern "C" fn(instance: *mut c_void) -> i32>,
    pub delete: Option<unsafe extern "C" fn(instance: *mut c_void)>,
}

impl Default for RawCodec {
    fn default() -> Self {
        Self {
            instance: ptr::null_mut(),
            decode_video: None,
            encode_video: None,
            decode_audio: None,
            encode_audio: None,
            set_parameter: None,
            set_pass: None,
            flush: None,
            resync: None,
            delete: None,
        }
    }
}

struct SinkState<'a> {
    packets: Option<&'a mut Vec<EncodedPacket>>,
    audio: Option<&'a mut AudioBuffer>,
}

unsafe extern "C" fn sink_packet(context: *mut c_void, packet: *const RawPacket) {
    let (Some(state), Some(packet)) = ((context as *mut SinkState).as_mut(), packet.as_ref()) else {
        return;
    };
    let Some(packets) = state.packets.as_deref_mut() else {
        log::warn!("codec produced a packet while decoding");
        return;
    };
    let data = if packet.data.is_null() || packet.size == 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(packet.data, packet.size).to_vec()
    };
    packets.push(EncodedPacket {
        data,
        pts: packet.pts,
        duration: packet.duration,
        samples: packet.samples,
        keyframe: packet.keyframe != 0,
    });
}

unsafe extern "C" fn sink_audio(context: *mut c_void, audio: *const RawAudio) {
    let (Some(state), Some(audio)) = ((context as *mut SinkState).as_mut(), audio.as_ref()) else {
        return;
    };
    let Some(output) = state.audio.as_deref_mut() else {
        log::warn!("codec produced audio while encoding");
        return;
    };
    if audio.data.is_null() || audio.channels as u16 != output.channels {
        log::warn!("dropping {} audio frames with {} channels", audio.frames, audio.channels);
        return;
    }
    let n = audio.frames * audio.channels as usize;
    let samples = match audio.format {
        SAMPLE_FORMAT_S16 => AudioBuffer::from_s16(output.channels, slice::from_raw_parts(audio.data as *const i16, n).to_vec()),
        SAMPLE_FORMAT_F32 => AudioBuffer::from_f32(output.channels, slice::from_raw_parts(audio.data as *const f32, n).to_vec()),
        other => {
            log::warn!("unknown sample format {}", other);
            return;
        }
    };
    output.append(&samples);
}

fn check(op: &'static str, status: i32) -> std::result::Result<(), CodecError> {
    match status {
        0 => Ok(()),
        status => Err(CodecError::Failed(format!("{} returned {}", op, status))),
    }
}

fn unsupported(op: &'static str) -> std::result::Result<(), CodecError> {
    log::warn!("codec module does not implement {}", op);
    Err(CodecError::Unsupported(op))
}

fn raw_packet(packet: &EncodedPacket) -> RawPacket {
    RawPacket {
        data: packet.data.as_ptr(),
        size: packet.data.len(),
        pts: packet.pts,
        duration: packet.duration,
        samples: packet.samples,
        keyframe: packet.keyframe as u8,
    }
}

/// A codec implemented by a loaded module.
pub struct PluginCodec {
    name: String,
    raw: RawCodec,
    colormodels: Vec<Colormodel>,
    // Must outlive `raw`.
    _library: Option<Arc<Library>>,
}

// The module owns the instance and only ever sees it from the thread holding `&mut self`.
unsafe impl Send for PluginCodec {}

impl PluginCodec {
    pub(crate) fn new(raw: RawCodec, info: &CodecInfo, library: Option<Arc<Library>>) -> Self {
        Self {
            name: info.name.clone(),
            raw,
            colormodels: info.colormodels.clone(),
            _library: library,
        }
    }

    fn raw_frame(&self, frame: &VideoFrame) -> std::result::Result<RawFrame, CodecError> {
        let colormodel = self
            .colormodels
            .iter()
            .position(|&c| c == frame.colormodel)
            .ok_or_else(|| CodecError::InvalidParameter(format!("{} doesn't handle {:?}", self.name, frame.colormodel)))?;
        let mut raw = RawFrame {
            colormodel: colormodel as _,
            width: frame.width,
            height: frame.height,
            planes: [ptr::null_mut(); MAX_PLANES],
            plane_sizes: [0; MAX_PLANES],
            row_spans: [0; MAX_PLANES],
            timestamp: frame.timestamp,
            duration: frame.duration,
        };
        for (i, plane) in frame.planes.iter().take(MAX_PLANES).enumerate() {
            raw.planes[i] = plane.as_ptr() as *mut u8;
            raw.plane_sizes[i] = plane.len();
            raw.row_spans[i] = frame.row_spans.get(i).copied().unwrap_or(0);
        }
        Ok(raw)
    }
}

impl Codec for PluginCodec {
    fn decode_video(&mut self, packet: &EncodedPacket, frame: &mut VideoFrame) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.decode_video else {
            return unsupported("decode_video");
        };
        let mut raw = self.raw_frame(frame)?;
        for (i, plane) in frame.planes.iter_mut().take(MAX_PLANES).enumerate() {
            raw.planes[i] = plane.as_mut_ptr();
        }
        let packet = raw_packet(packet);
        check("decode_video", unsafe { f(self.raw.instance, &packet, &mut raw) })?;
        frame.timestamp = raw.timestamp;
        frame.duration = raw.duration;
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame, packets: &mut Vec<EncodedPacket>) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.encode_video else {
            return unsupported("encode_video");
        };
        let raw = self.raw_frame(frame)?;
        let mut state = SinkState {
            packets: Some(packets),
            audio: None,
        };
        let sink = new_sink(&mut state);
        check("encode_video", unsafe { f(self.raw.instance, &raw, &sink) })
    }

    fn decode_audio(&mut self, packet: &EncodedPacket, output: &mut AudioBuffer) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.decode_audio else {
            return unsupported("decode_audio");
        };
        let packet = raw_packet(packet);
        let mut state = SinkState {
            packets: None,
            audio: Some(output),
        };
        let sink = new_sink(&mut state);
        check("decode_audio", unsafe { f(self.raw.instance, &packet, &sink) })
    }

    fn encode_audio(&mut self, input: &AudioBuffer, packets: &mut Vec<EncodedPacket>) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.encode_audio else {
            return unsupported("encode_audio");
        };
        let (format, data) = match &input.samples {
            AudioSamples::S16(v) => (SAMPLE_FORMAT_S16, v.as_ptr() as *const c_void),
            AudioSamples::F32(v) => (SAMPLE_FORMAT_F32, v.as_ptr() as *const c_void),
        };
        let audio = RawAudio {
            format,
            channels: input.channels as _,
            frames: input.frames(),
            data,
        };
        let mut state = SinkState {
            packets: Some(packets),
            audio: None,
        };
        let sink = new_sink(&mut state);
        check("encode_audio", unsafe { f(self.raw.instance, &audio, &sink) })
    }

    fn set_parameter(&mut self, key: &str, value: &ParameterValue) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.set_parameter else {
            return unsupported("set_parameter");
        };
        let json = serde_json::to_string(value).map_err(|e| CodecError::InvalidParameter(e.to_string()))?;
        let key_c = CString::new(key).map_err(|_| CodecError::InvalidParameter(key.to_string()))?;
        let json = CString::new(json).map_err(|_| CodecError::InvalidParameter(key.to_string()))?;
        check("set_parameter", unsafe { f(self.raw.instance, key_c.as_ptr(), json.as_ptr()) })
    }

    fn set_pass(&mut self, pass: u32, total: u32, stats_file: Option<&str>) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.set_pass else {
            return unsupported("set_pass");
        };
        let stats_file = stats_file
            .map(CString::new)
            .transpose()
            .map_err(|_| CodecError::InvalidParameter("stats_file".into()))?;
        let stats_ptr = stats_file.as_ref().map(|s| s.as_ptr()).unwrap_or(ptr::null());
        check("set_pass", unsafe { f(self.raw.instance, pass, total, stats_ptr) })
    }

    fn flush(&mut self, packets: &mut Vec<EncodedPacket>) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.flush else {
            return unsupported("flush");
        };
        let mut state = SinkState {
            packets: Some(packets),
            audio: None,
        };
        let sink = new_sink(&mut state);
        check("flush", unsafe { f(self.raw.instance, &sink) })
    }

    fn resync(&mut self) -> std::result::Result<(), CodecError> {
        let Some(f) = self.raw.resync else {
            return unsupported("resync");
        };
        check("resync", unsafe { f(self.raw.instance) })
    }
}

impl Drop for PluginCodec {
    fn drop(&mut self) {
        if let Some(delete) = self.raw.delete {
            unsafe { delete(self.raw.instance) };
        }
    }
}

fn new_sink(state: &mut SinkState) -> RawSink {
    RawSink {
        context: state as *mut SinkState as *mut c_void,
        packet: sink_packet,
        audio: sink_audio,
    }
}

/// A loaded codec module.
pub trait Module: Send + Sync {
    fn api_version(&self) -> u32;

    fn codec_count(&self) -> usize;

    fn codec_info(&self, index: usize) -> Result<CodecInfo>;

    fn construct(&self, index: usize, info: &CodecInfo, format: &StreamFormat) -> Result<Box<dyn Codec>>;
}

pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Module>>;
}

type ApiVersionFn = unsafe extern "C" fn() -> u32;
type NumCodecsFn = unsafe extern "C" fn() -> i32;
type CodecInfoFn = unsafe extern "C" fn(index: i32) -> *const c_char;
type GetCodecFn = unsafe extern "C" fn(index: i32, format: *const RawStreamFormat, codec: *mut RawCodec) -> i32;

struct DylibModule {
    path: PathBuf,
    api_version: u32,
    num_codecs: NumCodecsFn,
    codec_info: CodecInfoFn,
    get_codec: GetCodecFn,
    library: Arc<Library>,
}

impl Module for DylibModule {
    fn api_version(&self) -> u32 {
        self.api_version
    }

    fn codec_count(&self) -> usize {
        unsafe { (self.num_codecs)() }.max(0) as usize
    }

    fn codec_info(&self, index: usize) -> Result<CodecInfo> {
        let json = unsafe { (self.codec_info)(index as i32) };
        if json.is_null() {
            return Err(Error::CodecLoadFailure {
                path: self.path.clone(),
                reason: format!("no info for codec #{}", index),
            });
        }
        let json = unsafe { CStr::from_ptr(json) };
        serde_json::from_slice(json.to_bytes()).map_err(|e| Error::CodecLoadFailure {
            path: self.path.clone(),
            reason: format!("malformed info for codec #{}: {}", index, e),
        })
    }

    fn construct(&self, index: usize, info: &CodecInfo, format: &StreamFormat) -> Result<Box<dyn Codec>> {
        let format = RawStreamFormat::from(format);
        let mut raw = RawCodec::default();
        let status = unsafe { (self.get_codec)(index as i32, &format, &mut raw) };
        if status != 0 || raw.instance.is_null() {
            return Err(CodecError::Failed(format!("{} could not be constructed ({})", info.name, status)).into());
        }
        Ok(Box::new(PluginCodec::new(raw, info, Some(self.library.clone()))))
    }
}

/// Loads modules as shared libraries.
#[derive(Clone, Copy, Debug, Default)]
pub struct DylibLoader;

impl DylibLoader {
    fn symbol<T: Copy>(library: &Library, path: &Path, name: &'static str) -> Result<T> {
        let mut symbol = name.as_bytes().to_vec();
        symbol.push(0);
        match unsafe { library.get::<T>(&symbol) } {
            Ok(s) => Ok(*s),
            Err(_) => Err(Error::MissingSymbol {
                path: path.to_path_buf(),
                symbol: name,
            }),
        }
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Module>> {
        let library = unsafe { Library::new(path) }.map_err(|e| Error::CodecLoadFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let api_version: ApiVersionFn = Self::symbol(&library, path, "get_codec_api_version")?;
        let num_codecs = Self::symbol(&library, path, "get_num_codecs")?;
        let codec_info = Self::symbol(&library, path, "get_codec_info")?;
        let get_codec = Self::symbol(&library, path, "get_codec")?;
        Ok(Arc::new(DylibModule {
            path: path.to_path_buf(),
            api_version: unsafe { api_version() },
            num_codecs,
            codec_info,
            get_codec,
            library: Arc::new(library),
        }))
    }
}
