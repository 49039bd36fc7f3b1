#[macro_use]
extern crate lazy_static;

mod builtin;
pub use builtin::*;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod negotiate;
pub use negotiate::*;

pub mod plugin;

mod provider;
pub use provider::*;

mod registry;
pub use registry::*;
