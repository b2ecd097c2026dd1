#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceEngine;
use crate::detect::result::{Detection, InputShape};
use crate::frame::{Frame, RGB_CHANNELS};
use crate::mask::BoundingBox;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based engine for YOLOv8 ONNX exports.
///
/// Expects a single output shaped `[1, 4 + classes, anchors]` with center-format boxes in
/// model input pixels. Frames are resampled to the model input (nearest neighbour) and
/// boxes are scaled back to frame pixels.
pub struct TractEngine {
    model: Option<RunnableModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractEngine {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            model: None,
            width,
            height,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let (mw, mh) = (self.width as usize, self.height as usize);
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);
        if fw == 0 || fh == 0 {
            return Err(anyhow!("empty frame"));
        }
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, mh, mw), |(_, channel, y, x)| {
            let sx = x * fw / mw;
            let sy = y * fh / mh;
            pixels[(sy * fw + sx) * RGB_CHANNELS + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let (rows, anchors) = (shape[1], shape[2]);
        let sx = frame.width() as f32 / self.width as f32;
        let sy = frame.height() as f32 / self.height as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|r| (r - 4, view[[0, r, a]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score < self.confidence_threshold {
                continue;
            }
            let (cx, cy) = (view[[0, 0, a]], view[[0, 1, a]]);
            let (w, h) = (view[[0, 2, a]], view[[0, 3, a]]);
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx).round() as i32,
                ((cy - h / 2.0) * sy).round() as i32,
                (w * sx).round() as i32,
                (h * sy).round() as i32,
            );
            candidates.push(Detection {
                class_id: class_id as u32,
                confidence: score.clamp(0.0, 1.0),
                bbox,
            });
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&mut self, model_path: &Path) -> Result<()> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.model = Some(model);
        Ok(())
    }

    fn input_shape(&self) -> Option<InputShape> {
        self.model.as_ref().map(|_| InputShape {
            width: self.width,
            height: self.height,
            channels: 3,
        })
    }

    fn run(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract engine used before load"))?;
        let input = self.build_input(frame)?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);
    let inter = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = (a.width * a.height + b.width * b.height) as f32 - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(&k.bbox, &cand.bbox) > threshold);
        if !overlaps {
            kept.push(cand);
        }
    }
    kept
}
