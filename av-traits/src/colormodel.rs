use serde::{Deserialize, Serialize};

/// A pixel memory layout. Codecs declare the colormodels they handle natively and the engine
/// negotiates between those and the caller's layout.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Colormodel {
    Rgb565,
    Bgr565,
    Rgb888,
    Bgr888,
    /// BGR with a padding byte, no alpha.
    Bgr8888,
    Rgba8888,
    Rgb161616,
    Rgba16161616,
    Yuva8888,
    /// Packed 4:2:2, YUYV byte order.
    Yuv422,
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuv411p,
    Yuvj420p,
    Yuvj422p,
    Yuvj444p,
    Yuv422p16,
    Yuv444p16,
    /// A codec-private layout such as a hardware surface. The engine can't convert to or from it.
    Opaque(u32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColorFamily {
    Rgb,
    Yuv,
    Unknown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComponentLayout {
    Packed,
    Planar,
}

/// The attributes conversion costs are derived from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ColormodelCaps {
    pub family: ColorFamily,
    pub layout: ComponentLayout,
    pub bits_per_pixel: u8,
    pub alpha: bool,
    /// Horizontal and vertical chroma subsampling factors. (1, 1) for packed layouts.
    pub chroma_subsampling: (u8, u8),
    pub bytes_per_component: u8,
}

impl ColormodelCaps {
    const fn packed(family: ColorFamily, bits_per_pixel: u8, alpha: bool, bytes_per_component: u8) -> Self {
        Self {
            family,
            layout: ComponentLayout::Packed,
            bits_per_pixel,
            alpha,
            chroma_subsampling: (1, 1),
            bytes_per_component,
        }
    }

    const fn planar(bits_per_pixel: u8, chroma_subsampling: (u8, u8), bytes_per_component: u8) -> Self {
        Self {
            family: ColorFamily::Yuv,
            layout: ComponentLayout::Planar,
            bits_per_pixel,
            alpha: false,
            chroma_subsampling,
            bytes_per_component,
        }
    }
}

/// Exact match.
pub const COST_NONE: u8 = 0;
/// Same family and bit depth, components only need to be reordered or resampled.
pub const COST_REORDER: u8 = 1;
/// Same family, different bit depth.
pub const COST_DEPTH: u8 = 2;
/// YUV <-> RGB at equal bit depth.
pub const COST_FAMILY: u8 = 4;
/// YUV <-> RGB with a bit depth change.
pub const COST_FAMILY_AND_DEPTH: u8 = 5;
/// An alpha channel has to be added or dropped.
pub const COST_ALPHA: u8 = 6;
/// No conversion path is known.
pub const COST_IMPOSSIBLE: u8 = 7;

impl Colormodel {
    pub const fn caps(self) -> ColormodelCaps {
        use ColorFamily::*;
        match self {
            Self::Rgb565 | Self::Bgr565 => ColormodelCaps::packed(Rgb, 16, false, 1),
            Self::Rgb888 | Self::Bgr888 => ColormodelCaps::packed(Rgb, 24, false, 1),
            Self::Bgr8888 => ColormodelCaps::packed(Rgb, 32, false, 1),
            Self::Rgba8888 => ColormodelCaps::packed(Rgb, 32, true, 1),
            Self::Rgb161616 => ColormodelCaps::packed(Rgb, 48, false, 2),
            Self::Rgba16161616 => ColormodelCaps::packed(Rgb, 64, true, 2),
            Self::Yuva8888 => ColormodelCaps::packed(Yuv, 32, true, 1),
            Self::Yuv422 => ColormodelCaps::packed(Yuv, 16, false, 1),
            Self::Yuv420p | Self::Yuvj420p => ColormodelCaps::planar(12, (2, 2), 1),
            Self::Yuv422p | Self::Yuvj422p => ColormodelCaps::planar(16, (2, 1), 1),
            Self::Yuv444p | Self::Yuvj444p => ColormodelCaps::planar(24, (1, 1), 1),
            Self::Yuv411p => ColormodelCaps::planar(12, (4, 1), 1),
            Self::Yuv422p16 => ColormodelCaps::planar(32, (2, 1), 2),
            Self::Yuv444p16 => ColormodelCaps::planar(48, (1, 1), 2),
            Self::Opaque(_) => ColormodelCaps {
                family: Unknown,
                layout: ComponentLayout::Packed,
                bits_per_pixel: 0,
                alpha: false,
                chroma_subsampling: (1, 1),
                bytes_per_component: 0,
            },
        }
    }

    pub fn is_planar(self) -> bool {
        self.caps().layout == ComponentLayout::Planar
    }

    pub fn plane_count(self) -> usize {
        match self.caps().layout {
            ComponentLayout::Planar => 3,
            ComponentLayout::Packed => 1,
        }
    }

    /// The minimum number of bytes per row of the given plane.
    pub fn default_row_span(self, plane: usize, width: u32) -> usize {
        let caps = self.caps();
        let width = width as usize;
        match caps.layout {
            ComponentLayout::Packed => width * caps.bits_per_pixel as usize / 8,
            ComponentLayout::Planar if plane == 0 => width * caps.bytes_per_component as usize,
            ComponentLayout::Planar => {
                let sub = caps.chroma_subsampling.0 as usize;
                (width + sub - 1) / sub * caps.bytes_per_component as usize
            }
        }
    }

    /// The number of rows in the given plane.
    pub fn plane_height(self, plane: usize, height: u32) -> usize {
        let caps = self.caps();
        let height = height as usize;
        match caps.layout {
            ComponentLayout::Planar if plane > 0 => {
                let sub = caps.chroma_subsampling.1 as usize;
                (height + sub - 1) / sub
            }
            _ => height,
        }
    }
}

/// Returns the price of converting a frame from one colormodel to another.
pub fn conversion_cost(from: Colormodel, to: Colormodel) -> u8 {
    if from == to {
        return COST_NONE;
    }
    let (a, b) = (from.caps(), to.caps());
    if a.family == ColorFamily::Unknown || b.family == ColorFamily::Unknown {
        log::warn!("no conversion path from {:?} to {:?}", from, to);
        return COST_IMPOSSIBLE;
    }
    if a.alpha != b.alpha {
        return COST_ALPHA;
    }
    match (a.family == b.family, a.bits_per_pixel == b.bits_per_pixel) {
        (true, true) => COST_REORDER,
        (true, false) => COST_DEPTH,
        (false, true) => COST_FAMILY,
        (false, false) => COST_FAMILY_AND_DEPTH,
    }
}

/// Picks the candidate that is cheapest to convert `source` into. Ties go to the earliest
/// candidate. Returns `None` if no candidate can be reached.
pub fn best_colormodel(source: Colormodel, candidates: &[Colormodel]) -> Option<Colormodel> {
    best_by_cost(candidates, |c| conversion_cost(source, c))
}

/// Picks the candidate that is cheapest to convert into `destination`.
pub fn best_source_colormodel(destination: Colormodel, candidates: &[Colormodel]) -> Option<Colormodel> {
    best_by_cost(candidates, |c| conversion_cost(c, destination))
}

fn best_by_cost<F: Fn(Colormodel) -> u8>(candidates: &[Colormodel], cost: F) -> Option<Colormodel> {
    let mut best: Option<(Colormodel, u8)> = None;
    for &candidate in candidates {
        let c = cost(candidate);
        if c >= COST_IMPOSSIBLE {
            continue;
        }
        match best {
            Some((_, best_cost)) if best_cost <= c => {}
            _ => best = Some((candidate, c)),
        }
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_conversion_cost() {
        assert_eq!(COST_NONE, conversion_cost(Colormodel::Yuv420p, Colormodel::Yuv420p));
        assert_eq!(COST_REORDER, conversion_cost(Colormodel::Rgb888, Colormodel::Bgr888));
        assert_eq!(COST_REORDER, conversion_cost(Colormodel::Yuv420p, Colormodel::Yuvj420p));
        assert_eq!(COST_DEPTH, conversion_cost(Colormodel::Rgb888, Colormodel::Rgb161616));
        assert_eq!(COST_FAMILY, conversion_cost(Colormodel::Yuv444p, Colormodel::Rgb888));
        assert_eq!(COST_FAMILY_AND_DEPTH, conversion_cost(Colormodel::Yuv420p, Colormodel::Rgb888));
        assert_eq!(COST_ALPHA, conversion_cost(Colormodel::Rgb888, Colormodel::Rgba8888));
        assert_eq!(COST_IMPOSSIBLE, conversion_cost(Colormodel::Opaque(1), Colormodel::Rgb888));
    }

    #[test]
    fn test_best_colormodel() {
        // the source itself is always chosen when it's a candidate
        assert_eq!(
            Some(Colormodel::Yuv422p),
            best_colormodel(Colormodel::Yuv422p, &[Colormodel::Rgb888, Colormodel::Yuv422p, Colormodel::Yuv420p])
        );

        assert_eq!(
            Some(Colormodel::Bgr888),
            best_colormodel(Colormodel::Rgb888, &[Colormodel::Yuv444p, Colormodel::Bgr8888, Colormodel::Bgr888])
        );

        // ties keep the first candidate
        assert_eq!(
            Some(Colormodel::Yuv411p),
            best_colormodel(Colormodel::Yuv420p, &[Colormodel::Yuv411p, Colormodel::Yuvj420p])
        );

        // unreachable candidates are never chosen over reachable ones
        assert_eq!(
            Some(Colormodel::Rgba8888),
            best_colormodel(Colormodel::Yuv420p, &[Colormodel::Opaque(7), Colormodel::Rgba8888])
        );
        assert_eq!(None, best_colormodel(Colormodel::Yuv420p, &[Colormodel::Opaque(7)]));
        assert_eq!(None, best_colormodel(Colormodel::Yuv420p, &[]));
    }

    #[test]
    fn test_plane_geometry() {
        assert_eq!(3, Colormodel::Yuv420p.plane_count());
        assert_eq!(720, Colormodel::Yuv420p.default_row_span(0, 720));
        assert_eq!(360, Colormodel::Yuv420p.default_row_span(1, 720));
        assert_eq!(240, Colormodel::Yuv420p.plane_height(2, 480));
        assert_eq!(480, Colormodel::Yuv422p.plane_height(2, 480));
        assert_eq!(1440, Colormodel::Yuv422.default_row_span(0, 720));
        assert_eq!(180, Colormodel::Yuv411p.default_row_span(1, 720));
        assert_eq!(2160, Colormodel::Rgb888.default_row_span(0, 720));
    }
}
