//! Gate occupancy counter.
//!
//! Counts people across several camera streams, drops detections that fall inside
//! operator-declared exclusion zones, elects the largest count across cameras and
//! answers a supervisory master over a checksummed serial protocol.
//!
//! # Data flow
//!
//! camera frame → [`pipeline`] → [`worker_pool`] → [`correlation`] → [`mask`] filter →
//! [`store`] record + [`elector`] offer → [`protocol`] live/history replies.
//!
//! # Module Structure
//!
//! - `mask`: exclusion-zone rasterization and box classification
//! - `frame`: decoded frames, the latest-frame slot, per-minute frame ids
//! - `correlation`: bounded completion queue between workers and a pipeline loop
//! - `worker_pool`: per-camera inference workers
//! - `pipeline`: the per-camera cycle
//! - `elector`: cross-camera maximum and the live-count register
//! - `protocol`: frame codec, stream assembly, command dispatch
//! - `store`: SQLite detection log and its connection registry
//! - `camera`, `ingest`, `detect`, `overlay`: collaborators at the edges

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod camera;
pub mod config;
pub mod correlation;
pub mod detect;
pub mod elector;
pub mod frame;
pub mod ingest;
pub mod mask;
pub mod overlay;
pub mod pipeline;
pub mod protocol;
pub mod store;
pub mod timestamp;
pub mod ui;
pub mod worker_pool;

pub use camera::{load_camera_config, parse_camera_config, CameraSpec};
pub use config::{ConfigOverrides, GateConfig};
pub use correlation::FrameResultQueue;
pub use detect::{Detection, EngineRegistry, InferenceEngine, ModelReference, StubEngine};
pub use elector::{AggregationElector, Leader, LiveRegister};
pub use frame::{Frame, FrameIdSequence, FrameSlot};
pub use ingest::{CameraFeed, FrameSource, SyntheticSource};
pub use mask::{BoundingBox, ExclusionMask, ExclusionZone, Point};
pub use pipeline::{CameraPipeline, CycleOutcome, PipelineConfig};
pub use protocol::{Disposition, FrameError, ProtocolConfig, ProtocolEngine, WireFrame};
pub use store::{
    DetectionLog, DetectionRecord, InMemoryDetectionLog, SqliteDetectionLog, StoreRegistry,
};
pub use worker_pool::{FrameUnit, ResultUnit, WorkerPool};

/// Shared-cache in-memory SQLite URI, unique per call.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:gate_counter_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
