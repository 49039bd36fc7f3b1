#[macro_use]
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod atom;
pub mod data;
pub mod deserializer;
pub mod error;
pub mod sample_table;
pub mod serializer;
pub mod timecode;

pub use atom::*;
pub use data::*;
pub use error::*;
pub use sample_table::*;
pub use timecode::*;
