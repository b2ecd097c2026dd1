//! Per-camera pipeline loop.
//!
//! Each cycle takes the latest frame without waiting, submits it under the next frame id,
//! claims that same id's result within a short bound, filters detections through the
//! exclusion mask, persists a positive count and offers it to the elector. A missing
//! frame or a missing result ends the cycle early; nothing is retried.

use chrono::{DateTime, Local};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{Detection, EngineRegistry, ModelReference};
use crate::elector::AggregationElector;
use crate::frame::{FrameIdSequence, FrameSlot};
use crate::mask::ExclusionMask;
use crate::overlay::{annotate, AnnotatedFrame, ClassifiedBox, FrameSink};
use crate::store::{DetectionLog, DetectionRecord};
use crate::timestamp::seconds_stamp;
use crate::worker_pool::{FrameUnit, WorkerPool};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bound on waiting for the current frame's result.
    pub result_wait: Duration,
    pub target_period: Duration,
    pub min_sleep: Duration,
    /// Cycles per FPS report.
    pub fps_window: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            result_wait: Duration::from_millis(100),
            target_period: Duration::from_millis(30),
            min_sleep: Duration::from_millis(5),
            fps_window: 30,
        }
    }
}

impl PipelineConfig {
    /// Sleep after a cycle that took `elapsed`.
    pub fn pacing(&self, elapsed: Duration) -> Duration {
        self.target_period
            .saturating_sub(elapsed)
            .max(self.min_sleep)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The slot was empty or the producer held it.
    NoFrame,
    /// The frame was submitted but its result was not ready in time.
    ResultMissed { frame_id: u64 },
    Reported {
        frame_id: u64,
        raw: usize,
        counted: usize,
        persisted: bool,
        new_max: bool,
    },
}

/// Clip every detection to the frame and classify it against the mask.
///
/// Boxes left with no area after clipping are dropped.
pub fn filter_detections(
    mask: &ExclusionMask,
    detections: &[Detection],
    width: u32,
    height: u32,
) -> Vec<ClassifiedBox> {
    detections
        .iter()
        .filter_map(|det| det.bbox.clip_to(width, height))
        .map(|bbox| ClassifiedBox {
            excluded: mask.should_exclude(&bbox),
            bbox,
        })
        .collect()
}

#[derive(Debug)]
struct FpsMeter {
    window: u32,
    frames: u32,
    started: Instant,
}

impl FpsMeter {
    fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            frames: 0,
            started: Instant::now(),
        }
    }

    fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        if self.frames < self.window {
            return None;
        }
        let secs = self.started.elapsed().as_secs_f64();
        let fps = if secs > 0.0 {
            f64::from(self.frames) / secs
        } else {
            0.0
        };
        self.frames = 0;
        self.started = Instant::now();
        Some(fps)
    }
}

pub struct CameraPipeline {
    camera_id: String,
    slot: Arc<FrameSlot>,
    pool: WorkerPool,
    mask: Arc<RwLock<ExclusionMask>>,
    log: Arc<dyn DetectionLog>,
    elector: Arc<AggregationElector>,
    sink: Option<Box<dyn FrameSink>>,
    ids: FrameIdSequence,
    fps: FpsMeter,
    config: PipelineConfig,
    stop: Arc<AtomicBool>,
}

impl CameraPipeline {
    pub fn new(
        camera_id: impl Into<String>,
        slot: Arc<FrameSlot>,
        pool: WorkerPool,
        mask: Arc<RwLock<ExclusionMask>>,
        log: Arc<dyn DetectionLog>,
        elector: Arc<AggregationElector>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            slot,
            pool,
            mask,
            log,
            elector,
            sink: None,
            ids: FrameIdSequence::new(),
            fps: FpsMeter::new(config.fps_window),
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use `stop` as the per-camera stop flag, e.g. one held by the daemon.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Per-camera stop flag, checked every cycle next to the process-wide flag.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// One pass through the cycle, stamped with `now`.
    pub fn run_cycle(&mut self, now: DateTime<Local>) -> CycleOutcome {
        let Some(frame) = self.slot.try_latest() else {
            return CycleOutcome::NoFrame;
        };
        let frame_id = self.ids.next_id(&now);
        self.pool.submit(FrameUnit::new(frame_id, frame));

        let Some(result) = self
            .pool
            .wait_result_with_detections(frame_id, self.config.result_wait)
        else {
            log::trace!("{}: frame {} not ready", self.camera_id, frame_id);
            return CycleOutcome::ResultMissed { frame_id };
        };

        let detections = result.detections.unwrap_or_default();
        let classified = {
            let mask = self.mask.read().unwrap_or_else(PoisonError::into_inner);
            let (width, height) = result
                .image
                .as_ref()
                .map(|img| (img.width(), img.height()))
                .unwrap_or((mask.width(), mask.height()));
            filter_detections(&mask, &detections, width, height)
        };
        let counted = classified.iter().filter(|c| !c.excluded).count();

        if let (Some(sink), Some(image)) = (self.sink.as_mut(), result.image) {
            if let Some(mut image) = image.into_rgb_image() {
                annotate(&mut image, &classified);
                sink.show(&AnnotatedFrame {
                    camera_id: self.camera_id.clone(),
                    frame_id,
                    counted,
                    image,
                });
            }
        }

        let timestamp = seconds_stamp(&now);
        let persisted = counted > 0 && self.persist(&timestamp, counted);
        let count = u16::try_from(counted).unwrap_or(u16::MAX);
        let new_max = self.elector.offer(count, &self.camera_id, &timestamp);
        if new_max {
            log::debug!("{}: new maximum {}", self.camera_id, count);
        }

        CycleOutcome::Reported {
            frame_id,
            raw: detections.len(),
            counted,
            persisted,
            new_max,
        }
    }

    fn persist(&self, timestamp: &str, counted: usize) -> bool {
        let record = DetectionRecord::new(self.camera_id.as_str(), timestamp, counted as i64);
        match self.log.insert(&record) {
            Ok(()) => true,
            Err(e) => {
                log::error!("{}: failed to persist count: {:#}", self.camera_id, e);
                false
            }
        }
    }

    /// Cycle until `running` clears or the per-camera stop flag is set, pacing near
    /// `target_period`.
    pub fn run(&mut self, running: &AtomicBool) {
        log::info!(
            "{}: pipeline started ({} engine)",
            self.camera_id,
            self.pool.engine_name()
        );
        while running.load(Ordering::SeqCst) && !self.stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            let outcome = self.run_cycle(Local::now());
            if outcome != CycleOutcome::NoFrame {
                if let Some(fps) = self.fps.tick() {
                    let stats = self.pool.stats();
                    log::info!(
                        "{}: {:.1} fps (dropped {}, failed {})",
                        self.camera_id,
                        fps,
                        stats.dropped,
                        stats.failed
                    );
                }
            }
            std::thread::sleep(self.config.pacing(started.elapsed()));
        }
        self.pool.stop();
        log::info!("{}: pipeline stopped", self.camera_id);
    }
}

/// Everything a camera thread needs besides its worker pool.
pub struct CameraWiring {
    pub camera_id: String,
    pub slot: Arc<FrameSlot>,
    pub mask: Arc<RwLock<ExclusionMask>>,
    pub log: Arc<dyn DetectionLog>,
    pub elector: Arc<AggregationElector>,
    pub config: PipelineConfig,
    pub sink: Option<Box<dyn FrameSink>>,
    /// Per-camera stop flag; setting it ends only this camera's thread.
    pub stop: Arc<AtomicBool>,
}

/// Start a camera thread that sets up its own worker pool and runs the pipeline.
///
/// A pool setup failure ends only this thread.
pub fn spawn_camera(
    wiring: CameraWiring,
    registry: Arc<EngineRegistry>,
    reference: ModelReference,
    workers: usize,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("cam-{}", wiring.camera_id))
        .spawn(move || {
            let pool = match WorkerPool::setup(&registry, &reference, workers) {
                Ok(pool) => pool,
                Err(e) => {
                    log::error!("{}: worker pool setup failed: {:#}", wiring.camera_id, e);
                    return;
                }
            };
            let mut pipeline = CameraPipeline::new(
                wiring.camera_id,
                wiring.slot,
                pool,
                wiring.mask,
                wiring.log,
                wiring.elector,
                wiring.config,
            )
            .with_stop(wiring.stop);
            if let Some(sink) = wiring.sink {
                pipeline = pipeline.with_sink(sink);
            }
            pipeline.run(&running);
        })
}
