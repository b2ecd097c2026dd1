//! Operator overlay: outlines every detection on the result image.
//!
//! Counted boxes are green, excluded boxes red. Rendered images go to a [`FrameSink`];
//! on-screen display is left to whoever implements one.

use image::{Rgb, RgbImage};

use crate::mask::BoundingBox;

pub const COUNTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const EXCLUDED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const LINE_WIDTH: i32 = 2;

/// Detection box after exclusion classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassifiedBox {
    pub bbox: BoundingBox,
    pub excluded: bool,
}

/// One annotated result image.
pub struct AnnotatedFrame {
    pub camera_id: String,
    pub frame_id: u64,
    pub counted: usize,
    pub image: RgbImage,
}

pub trait FrameSink: Send {
    fn show(&mut self, frame: &AnnotatedFrame);
}

/// Sink that only logs what would have been displayed.
#[derive(Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn show(&mut self, frame: &AnnotatedFrame) {
        log::trace!(
            "{} frame {}: {} counted ({}x{})",
            frame.camera_id,
            frame.frame_id,
            frame.counted,
            frame.image.width(),
            frame.image.height()
        );
    }
}

impl LogSink {
    /// A boxed `LogSink` when trace logging is on, so frames are not annotated for nothing.
    pub fn when_tracing() -> Option<Box<dyn FrameSink>> {
        log::log_enabled!(log::Level::Trace).then(|| Box::new(LogSink) as Box<dyn FrameSink>)
    }
}

/// Outline `boxes` on `image`.
pub fn annotate(image: &mut RgbImage, boxes: &[ClassifiedBox]) {
    for classified in boxes {
        let color = if classified.excluded {
            EXCLUDED_COLOR
        } else {
            COUNTED_COLOR
        };
        draw_box(image, &classified.bbox, color);
    }
}

/// Rectangle outline `LINE_WIDTH` pixels thick, drawn inside the box and clipped to
/// the image.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x0 = bbox.x.max(0);
    let y0 = bbox.y.max(0);
    let x1 = (bbox.x + bbox.width).min(w);
    let y1 = (bbox.y + bbox.height).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x - bbox.x < LINE_WIDTH
                || bbox.x + bbox.width - 1 - x < LINE_WIDTH
                || y - bbox.y < LINE_WIDTH
                || bbox.y + bbox.height - 1 - y < LINE_WIDTH;
            if on_edge {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
