use alloc::{vec, vec::Vec};

use super::Colormodel;

/// An uncompressed picture. Each plane holds `row_spans[plane]` bytes per row.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub colormodel: Colormodel,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Vec<u8>>,
    pub row_spans: Vec<usize>,
    /// Presentation time in the track's timescale.
    pub timestamp: i64,
    pub duration: u32,
}

impl VideoFrame {
    /// Allocates a zeroed frame with tightly packed rows.
    pub fn new(colormodel: Colormodel, width: u32, height: u32) -> Self {
        let row_spans: Vec<usize> = (0..colormodel.plane_count()).map(|p| colormodel.default_row_span(p, width)).collect();
        Self::with_row_spans(colormodel, width, height, &row_spans)
    }

    /// Allocates a zeroed frame with caller-chosen row spans. Spans smaller than the colormodel
    /// requires are widened.
    pub fn with_row_spans(colormodel: Colormodel, width: u32, height: u32, row_spans: &[usize]) -> Self {
        let mut spans = Vec::with_capacity(colormodel.plane_count());
        let mut planes = Vec::with_capacity(colormodel.plane_count());
        for plane in 0..colormodel.plane_count() {
            let span = row_spans
                .get(plane)
                .copied()
                .unwrap_or(0)
                .max(colormodel.default_row_span(plane, width));
            planes.push(vec![0; span * colormodel.plane_height(plane, height)]);
            spans.push(span);
        }
        Self {
            colormodel,
            width,
            height,
            planes,
            row_spans: spans,
            timestamp: 0,
            duration: 0,
        }
    }

    pub fn plane(&self, plane: usize) -> &[u8] {
        self.planes.get(plane).map(|p| p.as_slice()).unwrap_or(&[])
    }

    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        match self.planes.get_mut(plane) {
            Some(p) => p.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Returns the bytes of one row, without any padding.
    pub fn row(&self, plane: usize, y: usize) -> &[u8] {
        let span = self.row_spans.get(plane).copied().unwrap_or(0);
        let len = self.colormodel.default_row_span(plane, self.width);
        let data = self.plane(plane);
        let begin = (y * span).min(data.len());
        &data[begin..(begin + len).min(data.len())]
    }

    pub fn same_geometry(&self, other: &VideoFrame) -> bool {
        self.colormodel == other.colormodel && self.width == other.width && self.height == other.height
    }
}

/// A compressed unit produced by an encoder or consumed by a decoder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    /// Presentation time in the track's timescale.
    pub pts: i64,
    pub duration: u32,
    /// The number of audio frames the packet decodes to. 1 for video.
    pub samples: u32,
    pub keyframe: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_video_frame_allocation() {
        let frame = VideoFrame::new(Colormodel::Yuv420p, 720, 480);
        assert_eq!(vec![720, 360, 360], frame.row_spans);
        assert_eq!(720 * 480, frame.plane(0).len());
        assert_eq!(360 * 240, frame.plane(1).len());

        let frame = VideoFrame::with_row_spans(Colormodel::Rgb888, 4, 2, &[16]);
        assert_eq!(vec![16], frame.row_spans);
        assert_eq!(32, frame.plane(0).len());
        assert_eq!(12, frame.row(0, 1).len());

        // too-small spans get widened
        let frame = VideoFrame::with_row_spans(Colormodel::Rgb888, 4, 2, &[3]);
        assert_eq!(vec![12], frame.row_spans);
    }
}
