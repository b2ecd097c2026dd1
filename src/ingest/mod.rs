//! Camera frame sources.
//!
//! A source yields decoded RGB frames; a [`CameraFeed`] thread pulls them and publishes
//! each one into the camera's [`crate::frame::FrameSlot`]. Vendor camera SDKs plug in
//! behind [`FrameSource`]. Only `stub://` addresses are served by a built-in source.

mod feed;
mod synthetic;

pub use feed::CameraFeed;
pub use synthetic::{SyntheticConfig, SyntheticSource};

use anyhow::{bail, Result};

use crate::camera::CameraSpec;
use crate::frame::Frame;

pub const STUB_SCHEME: &str = "stub://";

pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;
}

/// Source for a configured camera.
pub fn open_source(camera: &CameraSpec) -> Result<Box<dyn FrameSource>> {
    if camera.ip.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            url: camera.ip.clone(),
            width: camera.width,
            height: camera.height,
        })));
    }
    bail!(
        "camera {} has no built-in source (only {} addresses are supported)",
        camera.unique_id,
        STUB_SCHEME
    )
}
