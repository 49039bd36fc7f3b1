//! Reads and writes QuickTime, MP4 and AVI files, with codecs looked up from the `codecs`
//! registry.

pub mod avi;
pub mod config;
pub mod convert;
pub mod error;
pub mod file;
pub mod index;
pub mod io;
pub mod qt;
pub mod track;

pub use config::*;
pub use convert::*;
pub use error::*;
pub use file::*;
pub use io::{BufferedStream, StreamState};
pub use track::{Track, TrackFormat, TrackKind, TrackState};
