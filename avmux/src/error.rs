use av_traits::{CodecError, Colormodel};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed {kind} '{typ}' at offset {offset}: {reason}")]
    MalformedAtom {
        kind: &'static str,
        typ: String,
        offset: u64,
        reason: String,
    },
    #[error("malformed index for track {track}: {reason}")]
    MalformedIndex { track: usize, reason: String },
    #[error("not a QuickTime, MP4 or AVI file")]
    UnknownFormat,
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("no codec found for {query}")]
    CodecNotFound { query: String },
    #[error("unable to load codec: {reason}")]
    CodecLoadFailure { reason: String },
    #[error("no conversion path to or from {colormodel:?}")]
    UnsupportedColormodel { colormodel: Colormodel },
    #[error("codec error: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },
    #[error("{0}")]
    Usage(String),
    #[error("quicktime error: {0}")]
    Qtff(#[source] qtff::Error),
    #[error("riff error: {0}")]
    Riff(#[source] riff::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<qtff::Error> for Error {
    fn from(err: qtff::Error) -> Self {
        match err {
            qtff::Error::IOError(source) => Error::Io { source },
            qtff::Error::MalformedAtom { typ, offset, reason } => Error::MalformedAtom {
                kind: "atom",
                typ: format!("{}", typ),
                offset,
                reason: reason.to_string(),
            },
            err => Error::Qtff(err),
        }
    }
}

impl From<riff::Error> for Error {
    fn from(err: riff::Error) -> Self {
        match err {
            riff::Error::IOError(source) => Error::Io { source },
            riff::Error::MalformedChunk { id, offset, reason } => Error::MalformedAtom {
                kind: "chunk",
                typ: id.to_string(),
                offset,
                reason: reason.to_string(),
            },
            err => Error::Riff(err),
        }
    }
}

impl From<codecs::Error> for Error {
    fn from(err: codecs::Error) -> Self {
        match err {
            codecs::Error::CodecNotFound { query } => Error::CodecNotFound { query },
            codecs::Error::Codec { source } => Error::Codec { source },
            codecs::Error::UnsupportedColormodel { colormodel } => Error::UnsupportedColormodel { colormodel },
            err => Error::CodecLoadFailure { reason: err.to_string() },
        }
    }
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }
}
