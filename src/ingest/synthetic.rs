use anyhow::Result;

use super::FrameSource;
use crate::frame::{Frame, RGB_CHANNELS};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 640,
            height: 360,
        }
    }
}

/// Deterministic frames for `stub://` cameras.
///
/// The scene changes every 50 frames, which changes what the stub engine reports.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            connected: false,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = self.config.width as usize * self.config.height as usize * RGB_CHANNELS;
        let seed = self.scene_state as usize;
        (0..len)
            .map(|i| ((i / RGB_CHANNELS + seed * 37) % 251) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("{}: connected (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            anyhow::bail!("{} is not connected", self.config.url);
        }
        self.frame_count += 1;
        let pixels = self.pixels();
        Frame::new(self.config.width, self.config.height, pixels)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }
}
