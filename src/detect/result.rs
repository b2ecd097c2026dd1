use crate::mask::BoundingBox;

/// Class id of "person" in the single-class occupancy models.
pub const PERSON_CLASS: u32 = 0;

/// One recognized object instance in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn person(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            class_id: PERSON_CLASS,
            confidence,
            bbox,
        }
    }
}

/// Input tensor geometry an engine expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}
