#![no_std]

extern crate alloc;

mod audio;
pub use audio::*;

mod codec;
pub use codec::*;

mod colormodel;
pub use colormodel::*;

mod parameter;
pub use parameter::*;

mod video;
pub use video::*;
