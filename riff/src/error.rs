use std::io;

use super::chunk::ChunkId;

#[derive(Debug)]
pub enum Error {
    IOError(io::Error),
    MalformedChunk { id: ChunkId, offset: u64, reason: &'static str },
    MalformedFile(&'static str),
    Other(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IOError(err) => err.fmt(f),
            Error::MalformedChunk { id, offset, reason } => write!(f, "malformed chunk '{}' at offset {}: {}", id, offset, reason),
            Error::MalformedFile(reason) => write!(f, "malformed file: {}", reason),
            Error::Other(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IOError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IOError(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
