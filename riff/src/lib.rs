pub mod chunk;
pub mod error;
pub mod header;
pub mod index;

pub use chunk::*;
pub use error::*;
pub use header::*;
pub use index::*;
