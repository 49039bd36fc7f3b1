use av_traits::{CodecError, Colormodel};
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("no codec found for {query}"))]
    CodecNotFound { query: String },
    #[snafu(display("unable to load codec module {}: {reason}", path.display()))]
    CodecLoadFailure { path: PathBuf, reason: String },
    #[snafu(display("codec module {} has api version {found}, expected {expected}", path.display()))]
    ApiVersionMismatch { path: PathBuf, found: u32, expected: u32 },
    #[snafu(display("codec module {} doesn't export {symbol}", path.display()))]
    MissingSymbol { path: PathBuf, symbol: &'static str },
    #[snafu(display("unable to access the codec cache {}", path.display()))]
    Cache { path: PathBuf, source: std::io::Error },
    #[snafu(display("malformed codec cache {}", path.display()))]
    CacheFormat { path: PathBuf, source: serde_json::Error },
    #[snafu(context(false), display("codec error"))]
    Codec { source: CodecError },
    #[snafu(display("no conversion path to or from {colormodel:?}"))]
    UnsupportedColormodel { colormodel: Colormodel },
}

pub type Result<T> = std::result::Result<T, Error>;
