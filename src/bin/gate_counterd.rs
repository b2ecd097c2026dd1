//! gate_counterd - multi-camera occupancy counter daemon
//!
//! This daemon:
//! 1. Loads the camera list and builds one exclusion mask per camera
//! 2. Starts a frame feed and a pipeline (with its own worker pool) per camera
//! 3. Drains the cross-camera maximum into the live-count register every interval
//! 4. Answers live and history queries on the serial link
//! 5. Stops every thread on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use gate_counter::ingest::open_source;
use gate_counter::overlay::LogSink;
use gate_counter::pipeline::{spawn_camera, CameraWiring};
use gate_counter::{
    load_camera_config, AggregationElector, CameraFeed, ConfigOverrides, DetectionLog,
    EngineRegistry, FrameSlot, GateConfig, InMemoryDetectionLog, LiveRegister, ModelReference,
    PipelineConfig, ProtocolConfig, ProtocolEngine, StoreRegistry,
};

const FEED_INTERVAL: Duration = Duration::from_millis(30);
const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera configuration file.
    #[arg(long, value_name = "PATH")]
    cameras: Option<PathBuf>,
    /// Model reference: `stub` or `tract:<path to .onnx>`.
    #[arg(long)]
    model: Option<String>,
    /// Inference workers per camera (0 picks from the CPU count).
    #[arg(long)]
    workers: Option<usize>,
    /// Serial device connected to the master.
    #[arg(long, value_name = "PATH")]
    serial_device: Option<String>,
    /// Directory holding the SQLite stores and saved masks.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Write each camera's exclusion mask as a PNG into the data directory.
    #[arg(long)]
    save_masks: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = GateConfig::load_with(ConfigOverrides {
        data_dir: args.data_dir,
        serial_device: args.serial_device,
        camera_config: args.cameras,
        model: args.model,
        workers_per_camera: args.workers,
        save_masks: args.save_masks,
    })?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            running.store(false, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let stores = StoreRegistry::new(&cfg.data_dir);
    let detection_log = open_log(&stores, &cfg.detection_db);
    let send_log = open_log(&stores, &cfg.send_db);

    let cameras = load_camera_config(&cfg.camera_config)?;
    let engines = Arc::new(EngineRegistry::with_defaults());
    let reference = ModelReference::parse(&cfg.model)?;
    log::info!(
        "model {} ({} backend), {} worker(s) per camera",
        cfg.model,
        reference.backend,
        cfg.workers_per_camera
    );

    let elector = Arc::new(AggregationElector::new());
    let live = Arc::new(LiveRegister::new());
    let drain = elector
        .clone()
        .spawn_drain(live.clone(), cfg.drain_interval, running.clone())
        .context("failed to start drain loop")?;

    let port = open_serial(&cfg.serial_device)?;
    let protocol = ProtocolEngine::new(
        ProtocolConfig {
            slave_addr: cfg.slave_addr,
            master_addr: cfg.master_addr,
            fallback_device: cfg.fallback_device.clone(),
        },
        live,
        elector.clone(),
        send_log,
    )
    .spawn(port)?;
    log::info!("serial link open on {}", cfg.serial_device);

    let pipeline_config = PipelineConfig {
        result_wait: cfg.result_wait,
        ..PipelineConfig::default()
    };
    let mut running_cameras = Vec::new();
    for camera in &cameras {
        let mask = camera.build_mask();
        log::info!(
            "{}: {}x{}, {} exclusion zone(s), {} excluded px",
            camera.unique_id,
            camera.width,
            camera.height,
            camera.zones.len(),
            mask.excluded_pixels()
        );
        if cfg.save_masks {
            let path = cfg.data_dir.join(camera.mask_file_name());
            if let Err(e) = mask.save_png(&path) {
                log::error!("{}: {:#}", camera.unique_id, e);
            }
        }

        let source = match open_source(camera) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("{}: skipped: {:#}", camera.unique_id, e);
                continue;
            }
        };
        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));
        let feed = CameraFeed::spawn(
            &camera.unique_id,
            source,
            slot.clone(),
            FEED_INTERVAL,
            running.clone(),
            stop.clone(),
        )?;
        let pipeline = spawn_camera(
            CameraWiring {
                camera_id: camera.unique_id.clone(),
                slot,
                mask: Arc::new(RwLock::new(mask)),
                log: detection_log.clone(),
                elector: elector.clone(),
                config: pipeline_config.clone(),
                sink: LogSink::when_tracing(),
                stop: stop.clone(),
            },
            engines.clone(),
            reference.clone(),
            cfg.workers_per_camera,
            running.clone(),
        )?;
        running_cameras.push(CameraThreads {
            id: camera.unique_id.clone(),
            stop,
            feed,
            pipeline,
        });
    }
    if running_cameras.is_empty() {
        log::warn!("no camera is running; only the serial link is served");
    }

    log::info!(
        "gate_counterd running with {} camera(s)",
        running_cameras.len()
    );
    while running.load(Ordering::SeqCst) {
        for camera in &running_cameras {
            if camera.pipeline.is_finished() && !camera.stop.swap(true, Ordering::SeqCst) {
                log::warn!("{}: pipeline ended, stopping its feed", camera.id);
            }
        }
        std::thread::sleep(IDLE_POLL);
    }

    for camera in running_cameras {
        camera.stop.store(true, Ordering::SeqCst);
        if camera.feed.join().is_err() {
            log::error!("{}: feed thread panicked", camera.id);
        }
        if camera.pipeline.join().is_err() {
            log::error!("{}: pipeline thread panicked", camera.id);
        }
    }
    if drain.join().is_err() {
        log::error!("drain thread panicked");
    }
    protocol.stop()?;
    stores.close_all();
    log::info!("gate_counterd stopped");
    Ok(())
}

/// Threads and stop flag of one camera.
struct CameraThreads {
    id: String,
    stop: Arc<AtomicBool>,
    feed: JoinHandle<()>,
    pipeline: JoinHandle<()>,
}

/// Open a store, falling back to memory so counting goes on without persistence.
fn open_log(stores: &StoreRegistry, name: &str) -> Arc<dyn DetectionLog> {
    match stores.connect(name) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            log::error!("store {} unavailable, records kept in memory: {:#}", name, e);
            Arc::new(InMemoryDetectionLog::new())
        }
    }
}

fn open_serial(path: &str) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK);
    }
    options
        .open(path)
        .with_context(|| format!("failed to open serial device {}", path))
}
