use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::detect::backend::InferenceEngine;
use crate::detect::result::{Detection, InputShape};
use crate::frame::Frame;
use crate::mask::BoundingBox;

/// Largest synthetic crowd the stub reports for one frame.
const MAX_SYNTHETIC_PEOPLE: u8 = 4;

/// Stub engine for tests and camera-less runs.
///
/// Without a script, detections are derived from a SHA-256 of the pixels, so identical
/// frames always yield identical boxes.
pub struct StubEngine {
    loaded: bool,
    script: Option<Vec<Detection>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            loaded: false,
            script: None,
        }
    }

    /// Engine that reports the same detections for every frame.
    pub fn scripted(detections: Vec<Detection>) -> Self {
        Self {
            loaded: false,
            script: Some(detections),
        }
    }

    fn synthesize(frame: &Frame) -> Vec<Detection> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let people = digest[0] % (MAX_SYNTHETIC_PEOPLE + 1);
        (0..people as usize)
            .map(|i| {
                let b = &digest[1 + i * 6..7 + i * 6];
                let x = b[0] as i32 * w / 256;
                let y = b[1] as i32 * h / 256;
                let width = (b[2] as i32 * w / 512).max(8);
                let height = (b[3] as i32 * h / 256).max(16);
                let confidence = 0.5 + b[4] as f32 / 512.0;
                Detection::person(BoundingBox::new(x, y, width, height), confidence)
            })
            .collect()
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&mut self, _model_path: &Path) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn input_shape(&self) -> Option<InputShape> {
        self.loaded.then_some(InputShape {
            width: 640,
            height: 640,
            channels: 3,
        })
    }

    fn run(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if !self.loaded {
            return Err(anyhow!("stub engine used before load"));
        }
        match &self.script {
            Some(detections) => Ok(detections.clone()),
            None => Ok(Self::synthesize(frame)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_requires_load() {
        let mut engine = StubEngine::new();
        assert!(engine.input_shape().is_none());
        assert!(engine.run(&Frame::filled(8, 8, 0)).is_err());
        engine.load(Path::new("unused")).unwrap();
        assert_eq!(engine.input_shape().unwrap().channels, 3);
    }

    #[test]
    fn stub_is_deterministic_per_frame() {
        let mut engine = StubEngine::new();
        engine.load(Path::new("unused")).unwrap();
        let frame = Frame::filled(320, 240, 17);
        let first = engine.run(&frame).unwrap();
        let second = engine.run(&frame).unwrap();
        assert_eq!(first, second);
        assert!(first.len() <= MAX_SYNTHETIC_PEOPLE as usize);
        for det in &first {
            assert!(det.bbox.x >= 0 && det.bbox.x < 320);
            assert!(det.bbox.y >= 0 && det.bbox.y < 240);
            assert!((0.0..=1.0).contains(&det.confidence));
        }
    }

    #[test]
    fn scripted_stub_replays_detections() {
        let script = vec![Detection::person(BoundingBox::new(1, 2, 3, 4), 0.9)];
        let mut engine = StubEngine::scripted(script.clone());
        engine.load(Path::new("unused")).unwrap();
        assert_eq!(engine.run(&Frame::filled(8, 8, 1)).unwrap(), script);
        assert_eq!(engine.run(&Frame::filled(8, 8, 2)).unwrap(), script);
    }
}
