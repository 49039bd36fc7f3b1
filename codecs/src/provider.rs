use av_traits::{Codec, CodecError, CodecInfo, StreamFormat};

use crate::Result;

/// A source of codecs linked into the process.
pub trait CodecProvider: Send + Sync {
    fn codecs(&self) -> Vec<CodecInfo>;

    /// Constructs the codec at `index` in the list returned by `codecs`.
    fn construct(&self, index: usize, format: &StreamFormat) -> Result<Box<dyn Codec>>;
}

type Constructor = Box<dyn Fn(&StreamFormat) -> std::result::Result<Box<dyn Codec>, CodecError> + Send + Sync>;

/// A provider backed by a list of constructor functions.
#[derive(Default)]
pub struct StaticProvider {
    codecs: Vec<(CodecInfo, Constructor)>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec<F>(mut self, info: CodecInfo, constructor: F) -> Self
    where
        F: Fn(&StreamFormat) -> std::result::Result<Box<dyn Codec>, CodecError> + Send + Sync + 'static,
    {
        self.codecs.push((info, Box::new(constructor)));
        self
    }
}

impl CodecProvider for StaticProvider {
    fn codecs(&self) -> Vec<CodecInfo> {
        self.codecs.iter().map(|(info, _)| info.clone()).collect()
    }

    fn construct(&self, index: usize, format: &StreamFormat) -> Result<Box<dyn Codec>> {
        match self.codecs.get(index) {
            Some((_, constructor)) => Ok(constructor(format)?),
            None => Err(crate::Error::CodecNotFound {
                query: format!("static codec #{}", index),
            }),
        }
    }
}
