use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{MASTER_ADDR, SLAVE_ADDR};

const DEFAULT_DATA_DIR: &str = ".";
const DEFAULT_DETECTION_DB: &str = "detection_results.db";
const DEFAULT_SEND_DB: &str = "detection_results_send.db";
const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyS9";
const DEFAULT_CAMERA_CONFIG: &str = "cameras.conf";
const DEFAULT_MODEL: &str = "stub";
const DEFAULT_RESULT_WAIT_MS: u64 = 100;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 1000;
const DEFAULT_FALLBACK_DEVICE: &str = "unknown_device";

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    store: Option<StoreConfigFile>,
    serial: Option<SerialConfigFile>,
    cameras: Option<CamerasConfigFile>,
    inference: Option<InferenceConfigFile>,
    drain_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    data_dir: Option<PathBuf>,
    detection_db: Option<String>,
    send_db: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    device: Option<String>,
    slave_addr: Option<u8>,
    master_addr: Option<u8>,
    fallback_device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    config: Option<PathBuf>,
    save_masks: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    model: Option<String>,
    workers_per_camera: Option<usize>,
    result_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub data_dir: PathBuf,
    pub detection_db: String,
    pub send_db: String,
    pub serial_device: String,
    pub slave_addr: u8,
    pub master_addr: u8,
    pub fallback_device: String,
    pub camera_config: PathBuf,
    pub save_masks: bool,
    pub model: String,
    /// Resolved by `validate`; 0 in the file means "pick from the CPU count".
    pub workers_per_camera: usize,
    pub result_wait: Duration,
    pub drain_interval: Duration,
}

/// Command-line values that win over the file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub serial_device: Option<String>,
    pub camera_config: Option<PathBuf>,
    pub model: Option<String>,
    pub workers_per_camera: Option<usize>,
    pub save_masks: bool,
}

impl GateConfig {
    pub fn load() -> Result<Self> {
        Self::load_with(ConfigOverrides::default())
    }

    pub fn load_with(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = std::env::var("GATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GateConfigFile) -> Self {
        let store = file.store.unwrap_or_default();
        let serial = file.serial.unwrap_or_default();
        let cameras = file.cameras.unwrap_or_default();
        let inference = file.inference.unwrap_or_default();
        Self {
            data_dir: store
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            detection_db: store
                .detection_db
                .unwrap_or_else(|| DEFAULT_DETECTION_DB.to_string()),
            send_db: store.send_db.unwrap_or_else(|| DEFAULT_SEND_DB.to_string()),
            serial_device: serial
                .device
                .unwrap_or_else(|| DEFAULT_SERIAL_DEVICE.to_string()),
            slave_addr: serial.slave_addr.unwrap_or(SLAVE_ADDR),
            master_addr: serial.master_addr.unwrap_or(MASTER_ADDR),
            fallback_device: serial
                .fallback_device
                .unwrap_or_else(|| DEFAULT_FALLBACK_DEVICE.to_string()),
            camera_config: cameras
                .config
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAMERA_CONFIG)),
            save_masks: cameras.save_masks.unwrap_or(false),
            model: inference.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            workers_per_camera: inference.workers_per_camera.unwrap_or(0),
            result_wait: Duration::from_millis(
                inference.result_wait_ms.unwrap_or(DEFAULT_RESULT_WAIT_MS),
            ),
            drain_interval: Duration::from_millis(
                file.drain_interval_ms.unwrap_or(DEFAULT_DRAIN_INTERVAL_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("GATE_SERIAL_DEVICE") {
            if !device.trim().is_empty() {
                self.serial_device = device;
            }
        }
        if let Ok(path) = std::env::var("GATE_CAMERAS") {
            if !path.trim().is_empty() {
                self.camera_config = PathBuf::from(path);
            }
        }
        if let Ok(model) = std::env::var("GATE_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        if let Ok(dir) = std::env::var("GATE_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(workers) = std::env::var("GATE_WORKERS") {
            self.workers_per_camera = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("GATE_WORKERS must be a non-negative integer"))?;
        }
        if let Ok(addr) = std::env::var("GATE_SLAVE_ADDR") {
            self.slave_addr = parse_addr(&addr)
                .ok_or_else(|| anyhow!("GATE_SLAVE_ADDR must be a byte, e.g. 1 or 0x01"))?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(device) = overrides.serial_device {
            self.serial_device = device;
        }
        if let Some(path) = overrides.camera_config {
            self.camera_config = path;
        }
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(workers) = overrides.workers_per_camera {
            self.workers_per_camera = workers;
        }
        if overrides.save_masks {
            self.save_masks = true;
        }
    }

    fn validate(&mut self) -> Result<()> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers_per_camera = resolve_workers(self.workers_per_camera, cpus);

        if self.slave_addr == self.master_addr {
            return Err(anyhow!(
                "slave address 0x{:02X} must differ from master address",
                self.slave_addr
            ));
        }
        if self.drain_interval.is_zero() {
            return Err(anyhow!("drain interval must be greater than zero"));
        }
        if self.detection_db.trim().is_empty() || self.send_db.trim().is_empty() {
            return Err(anyhow!("store names must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model reference must not be empty"));
        }
        Ok(())
    }
}

/// Workers per camera: 0 picks `cpus / 4`; anything is clamped to `[1, cpus / 2]`.
pub fn resolve_workers(requested: usize, cpus: usize) -> usize {
    let ceiling = (cpus / 2).max(1);
    let wanted = if requested == 0 { cpus / 4 } else { requested };
    wanted.clamp(1, ceiling)
}

fn parse_addr(value: &str) -> Option<u8> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn read_config_file(path: &Path) -> Result<GateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
