//! Bounded inference worker pool for one camera.
//!
//! Frames are submitted with a caller-assigned id and never block the caller: when the
//! task queue is full the oldest pending frame is dropped. Each worker owns its own
//! engine instance. A finished frame is indexed by id until it is claimed once, and its
//! `(id, count)` pair is pushed onto the camera's [`FrameResultQueue`] so a waiting
//! pipeline loop wakes up.
//!
//! Unclaimed results are held up to the task capacity (`2 * workers`); beyond that the
//! oldest completion is expired together with its frame.

use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::correlation::FrameResultQueue;
use crate::detect::{Detection, EngineRegistry, InferenceEngine, ModelReference};
use crate::frame::Frame;

const IDLE_WAIT: Duration = Duration::from_millis(100);
const TASKS_PER_WORKER: usize = 2;

/// Labeled frame handed to the pool. Ownership of the frame moves with it.
#[derive(Debug)]
pub struct FrameUnit {
    pub id: u64,
    pub frame: Frame,
}

impl FrameUnit {
    pub fn new(id: u64, frame: Frame) -> Self {
        Self { id, frame }
    }
}

/// Result of one frame, returned to the claimer together with the frame.
#[derive(Debug)]
pub struct ResultUnit {
    pub id: u64,
    /// Raw detection count before exclusion filtering.
    pub count: usize,
    pub detections: Option<Vec<Detection>>,
    pub image: Option<Frame>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    /// Unclaimed results expired to keep the result map bounded.
    pub expired: u64,
    pub pending: usize,
    pub unclaimed: usize,
}

struct Completed {
    detections: Vec<Detection>,
    frame: Frame,
    seq: u64,
}

struct Shared {
    tasks: Mutex<VecDeque<FrameUnit>>,
    task_ready: Condvar,
    results: Mutex<HashMap<u64, Completed>>,
    completions: Arc<FrameResultQueue>,
    running: AtomicBool,
    capacity: usize,
    submitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    engine: &'static str,
}

impl WorkerPool {
    /// Build `workers` engines for `reference` and start one thread per engine.
    ///
    /// Fails without starting anything if any engine cannot be created or loaded.
    pub fn setup(
        registry: &EngineRegistry,
        reference: &ModelReference,
        workers: usize,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(anyhow!("worker pool needs at least one worker"));
        }
        let engines = (0..workers)
            .map(|_| registry.instantiate(reference))
            .collect::<Result<Vec<_>>>()?;
        let engine = engines.first().map(|e| e.name()).unwrap_or("unknown");

        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            task_ready: Condvar::new(),
            results: Mutex::new(HashMap::new()),
            completions: Arc::new(FrameResultQueue::new()),
            running: AtomicBool::new(true),
            capacity: workers * TASKS_PER_WORKER,
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        });

        let pool = Self {
            shared: shared.clone(),
            workers: Mutex::new(Vec::with_capacity(workers)),
            engine,
        };
        for (index, engine) in engines.into_iter().enumerate() {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("infer-{}", index))
                .spawn(move || worker_loop(shared, engine))
                .context("failed to spawn inference worker")?;
            pool.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        log::info!("worker pool started: {} x {}", workers, engine);
        Ok(pool)
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine
    }

    /// Completion queue fed by the workers.
    pub fn completions(&self) -> Arc<FrameResultQueue> {
        self.shared.completions.clone()
    }

    /// Queue a frame. Never blocks; returns the frame id.
    pub fn submit(&self, unit: FrameUnit) -> u64 {
        let id = unit.id;
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        if !self.shared.running.load(Ordering::SeqCst) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return id;
        }
        self.shared
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        let mut tasks = self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if tasks.len() >= self.shared.capacity {
            if let Some(oldest) = tasks.pop_front() {
                log::trace!("pool saturated, dropping frame {}", oldest.id);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        tasks.push_back(unit);
        self.shared.task_ready.notify_one();
        id
    }

    /// Claim the result for `id` without its detections.
    pub fn try_get_result(&self, id: u64) -> Option<ResultUnit> {
        self.claim(id).map(|done| ResultUnit {
            id,
            count: done.detections.len(),
            detections: None,
            image: Some(done.frame),
        })
    }

    /// Claim the result for `id` including raw detections.
    pub fn try_get_result_with_detections(&self, id: u64) -> Option<ResultUnit> {
        self.claim(id).map(|done| ResultUnit {
            id,
            count: done.detections.len(),
            detections: Some(done.detections),
            image: Some(done.frame),
        })
    }

    /// Like [`Self::try_get_result_with_detections`], waiting up to `timeout` on the
    /// completion queue. A zero timeout is a single non-blocking attempt.
    pub fn wait_result_with_detections(&self, id: u64, timeout: Duration) -> Option<ResultUnit> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.try_get_result_with_detections(id) {
                return Some(result);
            }
            let now = Instant::now();
            if now >= deadline || self.shared.completions.is_stopped() {
                return None;
            }
            self.shared.completions.pop(deadline - now);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            expired: self.shared.expired.load(Ordering::Relaxed),
            pending: self
                .shared
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            unclaimed: self
                .shared
                .results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Stop the workers, wake every waiter and join. Idempotent.
    pub fn stop(&self) {
        {
            let _tasks = self
                .shared
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.running.store(false, Ordering::SeqCst);
            self.shared.task_ready.notify_all();
        }
        self.shared.completions.stop();
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("inference worker panicked");
            }
        }
    }

    fn claim(&self, id: u64) -> Option<Completed> {
        self.shared
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>, mut engine: Box<dyn InferenceEngine>) {
    while let Some(unit) = next_task(&shared) {
        match engine.run(&unit.frame) {
            Ok(detections) => {
                let count = detections.len();
                let seq = shared.completed.fetch_add(1, Ordering::Relaxed);
                store_result(
                    &shared,
                    unit.id,
                    Completed {
                        detections,
                        frame: unit.frame,
                        seq,
                    },
                );
                shared.completions.push(unit.id, count);
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("{} inference failed for frame {}: {:#}", engine.name(), unit.id, e);
            }
        }
    }
}

fn store_result(shared: &Shared, id: u64, done: Completed) {
    let mut results = shared
        .results
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    results.insert(id, done);
    while results.len() > shared.capacity {
        let Some(oldest) = results
            .iter()
            .min_by_key(|(_, done)| done.seq)
            .map(|(id, _)| *id)
        else {
            break;
        };
        results.remove(&oldest);
        shared.expired.fetch_add(1, Ordering::Relaxed);
        log::trace!("result for frame {} expired unclaimed", oldest);
    }
}

fn next_task(shared: &Shared) -> Option<FrameUnit> {
    let mut tasks = shared.tasks.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(unit) = tasks.pop_front() {
            return Some(unit);
        }
        tasks = shared
            .task_ready
            .wait_timeout(tasks, IDLE_WAIT)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}
