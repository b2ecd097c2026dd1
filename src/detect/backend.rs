use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

use super::result::{Detection, InputShape};

/// Inference engine capability interface.
///
/// One instance serves one worker thread; implementations may keep per-call scratch
/// buffers. Engines receive frames by reference and never retain them past `run`.
pub trait InferenceEngine: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load model weights. Called once before the engine joins a worker pool.
    fn load(&mut self, model_path: &Path) -> Result<()>;

    /// Expected input geometry, once a model is loaded.
    fn input_shape(&self) -> Option<InputShape>;

    /// Run detection on a frame, returning boxes in frame pixel coordinates.
    fn run(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}
