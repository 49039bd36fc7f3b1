use av_traits::VideoFrame;

use crate::{Error, Result};

/// Converts pictures between the colormodel a codec works in and the one the caller uses.
pub trait FrameConverter: Send {
    fn convert(&mut self, source: &VideoFrame, destination: &mut VideoFrame) -> Result<()>;
}

/// Copies between frames of the same colormodel and size, honoring each side's row spans.
/// Anything else is reported as an unsupported conversion.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyConverter;

impl FrameConverter for CopyConverter {
    fn convert(&mut self, source: &VideoFrame, destination: &mut VideoFrame) -> Result<()> {
        if source.colormodel != destination.colormodel {
            return Err(Error::UnsupportedColormodel {
                colormodel: source.colormodel,
            });
        }
        if source.width != destination.width || source.height != destination.height {
            return Err(Error::usage(format!(
                "can't scale {}x{} to {}x{}",
                source.width, source.height, destination.width, destination.height
            )));
        }
        let colormodel = source.colormodel;
        for plane in 0..colormodel.plane_count() {
            let span = destination.row_spans.get(plane).copied().unwrap_or(0);
            let rows = colormodel.plane_height(plane, source.height);
            for y in 0..rows {
                let row = source.row(plane, y);
                let dst = destination.plane_mut(plane);
                let begin = y * span;
                let len = row.len().min(dst.len().saturating_sub(begin));
                dst[begin..begin + len].copy_from_slice(&row[..len]);
            }
        }
        destination.timestamp = source.timestamp;
        destination.duration = source.duration;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use av_traits::Colormodel;

    #[test]
    fn test_copy_converter() {
        let mut source = VideoFrame::new(Colormodel::Yuv420p, 4, 2);
        source.plane_mut(0).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        source.plane_mut(1).copy_from_slice(&[9, 10]);
        source.timestamp = 42;

        let mut destination = VideoFrame::with_row_spans(Colormodel::Yuv420p, 4, 2, &[8, 4, 4]);
        CopyConverter.convert(&source, &mut destination).unwrap();
        assert_eq!(&[1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0], destination.plane(0));
        assert_eq!(&[9, 10, 0, 0], destination.plane(1));
        assert_eq!(42, destination.timestamp);

        let mut rgb = VideoFrame::new(Colormodel::Rgb888, 4, 2);
        assert!(matches!(
            CopyConverter.convert(&source, &mut rgb),
            Err(Error::UnsupportedColormodel { .. })
        ));
    }
}
