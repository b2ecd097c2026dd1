use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use gate_counter::config::{ConfigOverrides, GateConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GATE_CONFIG",
        "GATE_SERIAL_DEVICE",
        "GATE_CAMERAS",
        "GATE_MODEL",
        "GATE_WORKERS",
        "GATE_DATA_DIR",
        "GATE_SLAVE_ADDR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "store": { "data_dir": "/var/lib/gate", "send_db": "sent.db" },
        "serial": { "device": "/dev/ttyS1", "slave_addr": 5, "fallback_device": "gate-a" },
        "cameras": { "config": "/etc/gate/cameras.conf", "save_masks": true },
        "inference": { "model": "stub", "workers_per_camera": 1, "result_wait_ms": 40 },
        "drain_interval_ms": 500
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("GATE_CONFIG", file.path());
    std::env::set_var("GATE_SERIAL_DEVICE", "/dev/ttyUSB0");
    std::env::set_var("GATE_SLAVE_ADDR", "0x02");

    let cfg = GateConfig::load().expect("load config");

    assert_eq!(cfg.data_dir.to_str(), Some("/var/lib/gate"));
    assert_eq!(cfg.detection_db, "detection_results.db");
    assert_eq!(cfg.send_db, "sent.db");
    assert_eq!(cfg.serial_device, "/dev/ttyUSB0");
    assert_eq!(cfg.slave_addr, 0x02);
    assert_eq!(cfg.master_addr, 0x00);
    assert_eq!(cfg.fallback_device, "gate-a");
    assert_eq!(cfg.camera_config.to_str(), Some("/etc/gate/cameras.conf"));
    assert!(cfg.save_masks);
    assert_eq!(cfg.workers_per_camera, 1);
    assert_eq!(cfg.result_wait, Duration::from_millis(40));
    assert_eq!(cfg.drain_interval, Duration::from_millis(500));

    clear_env();
}

#[test]
fn loads_toml_config_and_cli_wins() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        drain_interval_ms = 250

        [serial]
        device = "/dev/ttyS3"

        [inference]
        model = "stub"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("GATE_CONFIG", file.path());
    std::env::set_var("GATE_MODEL", "tract:/models/env.onnx");

    let cfg = GateConfig::load_with(ConfigOverrides {
        model: Some("tract:/models/cli.onnx".to_string()),
        ..ConfigOverrides::default()
    })
    .expect("load config");

    assert_eq!(cfg.serial_device, "/dev/ttyS3");
    assert_eq!(cfg.model, "tract:/models/cli.onnx");
    assert_eq!(cfg.drain_interval, Duration::from_millis(250));
    assert!(cfg.workers_per_camera >= 1);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GateConfig::load().expect("load config");
    assert_eq!(cfg.serial_device, "/dev/ttyS9");
    assert_eq!(cfg.model, "stub");
    assert_eq!(cfg.fallback_device, "unknown_device");
    assert_eq!(cfg.camera_config.to_str(), Some("cameras.conf"));
    assert!(cfg.workers_per_camera >= 1);
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GATE_SLAVE_ADDR", "0x00");
    assert!(GateConfig::load().is_err());
    std::env::set_var("GATE_SLAVE_ADDR", "not-an-address");
    assert!(GateConfig::load().is_err());
    std::env::remove_var("GATE_SLAVE_ADDR");

    std::env::set_var("GATE_WORKERS", "-3");
    assert!(GateConfig::load().is_err());
    std::env::remove_var("GATE_WORKERS");

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "drain_interval_ms": 0 }"#).expect("write");
    std::env::set_var("GATE_CONFIG", file.path());
    assert!(GateConfig::load().is_err());

    clear_env();
}
