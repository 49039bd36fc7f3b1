use av_traits::{best_colormodel, best_source_colormodel, CodecInfo, Colormodel, Direction};

use crate::{Error, Result};

/// Picks the colormodel the codec should work in, given the caller's colormodel.
///
/// When decoding, the codec produces frames that are converted into `caller`. When encoding, the
/// caller's frames are converted into what the codec consumes. Returns `caller` itself whenever the
/// codec supports it, and fails only when none of the codec's colormodels can be converted.
pub fn negotiate_colormodel(info: &CodecInfo, direction: Direction, caller: Colormodel) -> Result<Colormodel> {
    if info.colormodels.contains(&caller) {
        return Ok(caller);
    }
    let chosen = match direction {
        Direction::Decode => best_source_colormodel(caller, &info.colormodels),
        _ => best_colormodel(caller, &info.colormodels),
    };
    match chosen {
        Some(colormodel) => {
            log::debug!("{} will work in {:?}, converting from {:?}", info.name, colormodel, caller);
            Ok(colormodel)
        }
        None => Err(Error::UnsupportedColormodel { colormodel: caller }),
    }
}
