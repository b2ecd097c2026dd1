//! Camera pipeline end to end: frames in, filtered counts out to the store and elector.

use chrono::{DateTime, Local, TimeZone};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use gate_counter::ingest::{SyntheticConfig, SyntheticSource};
use gate_counter::pipeline::{spawn_camera, CameraWiring};
use gate_counter::timestamp::{is_seconds_stamp, seconds_stamp};
use gate_counter::{
    shared_memory_uri, AggregationElector, BoundingBox, CameraFeed, CameraPipeline,
    CycleOutcome, Detection, DetectionLog, EngineRegistry, ExclusionMask, ExclusionZone, Frame,
    FrameSlot, InMemoryDetectionLog, LiveRegister, ModelReference, PipelineConfig, Point,
    StoreRegistry, StubEngine, WorkerPool,
};

fn left_half_mask() -> ExclusionMask {
    let zone = ExclusionZone::new(
        [
            Point::new(0, 0),
            Point::new(49, 0),
            Point::new(49, 99),
            Point::new(0, 99),
        ],
        100,
        100,
    )
    .unwrap();
    ExclusionMask::build(100, 100, &[zone])
}

fn scripted(boxes: Vec<BoundingBox>) -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    registry.register("scripted", move || {
        Box::new(StubEngine::scripted(
            boxes.iter().map(|b| Detection::person(*b, 0.8)).collect(),
        ))
    });
    registry
}

fn local(secs: i64) -> DateTime<Local> {
    Local.timestamp_opt(secs, 0).single().expect("valid instant")
}

struct Rig {
    pipeline: CameraPipeline,
    slot: Arc<FrameSlot>,
    elector: Arc<AggregationElector>,
}

fn rig(boxes: Vec<BoundingBox>, log: Arc<dyn DetectionLog>) -> Rig {
    let registry = scripted(boxes);
    let pool = WorkerPool::setup(&registry, &ModelReference::parse("scripted").unwrap(), 2)
        .expect("pool");
    let slot = Arc::new(FrameSlot::new());
    let elector = Arc::new(AggregationElector::new());
    let pipeline = CameraPipeline::new(
        "10.0.0.7_Ch1_1",
        slot.clone(),
        pool,
        Arc::new(RwLock::new(left_half_mask())),
        log,
        elector.clone(),
        PipelineConfig {
            result_wait: Duration::from_secs(2),
            ..PipelineConfig::default()
        },
    );
    Rig {
        pipeline,
        slot,
        elector,
    }
}

#[test]
fn excluded_boxes_do_not_count() {
    let log = Arc::new(InMemoryDetectionLog::new());
    let mut rig = rig(
        vec![
            BoundingBox::new(10, 10, 20, 20),
            BoundingBox::new(60, 10, 20, 20),
            BoundingBox::new(60, 60, 20, 20),
        ],
        log.clone(),
    );
    rig.slot.publish(Frame::filled(100, 100, 0));
    let now = local(1_700_000_000);

    let outcome = rig.pipeline.run_cycle(now);
    assert_eq!(
        outcome,
        CycleOutcome::Reported {
            frame_id: 1,
            raw: 3,
            counted: 2,
            persisted: true,
            new_max: true,
        }
    );

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device, "10.0.0.7_Ch1_1");
    assert_eq!(records[0].count, 2);
    assert!(is_seconds_stamp(&records[0].timestamp));
    assert_eq!(records[0].timestamp, seconds_stamp(&now));

    let register = LiveRegister::new();
    assert_eq!(rig.elector.drain(&register), Some(2));
    assert_eq!(register.get(), 2);
    assert_eq!(rig.elector.leader().unwrap().device, "10.0.0.7_Ch1_1");
}

#[test]
fn zero_count_cycles_are_not_persisted() {
    let log = Arc::new(InMemoryDetectionLog::new());
    let mut rig = rig(vec![BoundingBox::new(10, 10, 20, 20)], log.clone());
    rig.slot.publish(Frame::filled(100, 100, 0));

    let outcome = rig.pipeline.run_cycle(local(1_700_000_000));
    assert!(matches!(
        outcome,
        CycleOutcome::Reported {
            counted: 0,
            persisted: false,
            new_max: false,
            ..
        }
    ));
    assert!(log.records().is_empty());
    assert_eq!(rig.elector.current_max(), 0);
}

#[test]
fn frame_ids_restart_on_new_minute_and_history_follows_wall_clock() {
    let stores = StoreRegistry::new(".");
    let log = Arc::new(stores.connect(&shared_memory_uri()).unwrap());
    let mut rig = rig(vec![BoundingBox::new(60, 10, 20, 20)], log.clone());
    rig.slot.publish(Frame::filled(100, 100, 0));

    // 1_700_000_040 is a minute boundary.
    let times = [1_700_000_038, 1_700_000_039, 1_700_000_040, 1_700_000_041];
    let ids: Vec<u64> = times
        .iter()
        .map(|secs| match rig.pipeline.run_cycle(local(*secs)) {
            CycleOutcome::Reported { frame_id, .. } => frame_id,
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 1, 2]);

    // Records are keyed by timestamp, so reused ids are not double counted.
    let start = seconds_stamp(&local(times[0]));
    let end = seconds_stamp(&local(times[3]));
    assert_eq!(log.sum_positive_between(&start, &end).unwrap(), 4);
    let boundary = seconds_stamp(&local(times[2]));
    assert_eq!(log.sum_positive_between(&boundary, &boundary).unwrap(), 1);
}

#[test]
fn failed_pool_setup_only_stops_its_camera() {
    let running = Arc::new(AtomicBool::new(true));
    let elector = Arc::new(AggregationElector::new());
    let log: Arc<dyn DetectionLog> = Arc::new(InMemoryDetectionLog::new());
    let registry = Arc::new(scripted(vec![BoundingBox::new(60, 10, 20, 20)]));

    let wiring = |id: &str, slot: Arc<FrameSlot>| CameraWiring {
        camera_id: id.to_string(),
        slot,
        mask: Arc::new(RwLock::new(left_half_mask())),
        log: log.clone(),
        elector: elector.clone(),
        config: PipelineConfig::default(),
        sink: None,
        stop: Arc::new(AtomicBool::new(false)),
    };

    let broken = spawn_camera(
        wiring("broken", Arc::new(FrameSlot::new())),
        registry.clone(),
        ModelReference::parse("missing:model.onnx").unwrap(),
        1,
        running.clone(),
    )
    .unwrap();
    broken.join().expect("broken camera thread returns cleanly");

    let slot = Arc::new(FrameSlot::new());
    let feed = CameraFeed::spawn(
        "healthy",
        Box::new(SyntheticSource::new(SyntheticConfig {
            url: "stub://healthy".to_string(),
            width: 100,
            height: 100,
        })),
        slot.clone(),
        Duration::from_millis(10),
        running.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    let healthy = spawn_camera(
        wiring("healthy", slot),
        registry,
        ModelReference::parse("scripted").unwrap(),
        1,
        running.clone(),
    )
    .unwrap();

    let register = Arc::new(LiveRegister::new());
    let drain = elector
        .clone()
        .spawn_drain(register.clone(), Duration::from_millis(20), running.clone())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while register.get() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    running.store(false, Ordering::SeqCst);
    feed.join().unwrap();
    healthy.join().unwrap();
    drain.join().unwrap();

    assert_eq!(register.get(), 1);
    assert_eq!(elector.leader().unwrap().device, "healthy");
}

#[test]
fn one_camera_stops_while_the_other_keeps_counting() {
    let running = Arc::new(AtomicBool::new(true));
    let elector = Arc::new(AggregationElector::new());
    let registry = Arc::new(scripted(vec![BoundingBox::new(60, 10, 20, 20)]));

    let start = |id: &str| {
        let slot = Arc::new(FrameSlot::new());
        slot.publish(Frame::filled(100, 100, 0));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_camera(
            CameraWiring {
                camera_id: id.to_string(),
                slot,
                mask: Arc::new(RwLock::new(left_half_mask())),
                log: Arc::new(InMemoryDetectionLog::new()),
                elector: elector.clone(),
                config: PipelineConfig::default(),
                sink: None,
                stop: stop.clone(),
            },
            registry.clone(),
            ModelReference::parse("scripted").unwrap(),
            1,
            running.clone(),
        )
        .unwrap();
        (stop, handle)
    };
    let (stop_a, camera_a) = start("cam-a");
    let (_stop_b, camera_b) = start("cam-b");

    stop_a.store(true, Ordering::SeqCst);
    camera_a.join().unwrap();
    assert!(running.load(Ordering::SeqCst));

    // Only the remaining camera can still raise the maximum.
    let register = LiveRegister::new();
    elector.drain(&register);
    let deadline = Instant::now() + Duration::from_secs(10);
    while elector.current_max() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!camera_b.is_finished());
    assert_eq!(elector.leader().unwrap().device, "cam-b");

    running.store(false, Ordering::SeqCst);
    camera_b.join().unwrap();
}
