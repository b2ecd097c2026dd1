use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::FrameSlot;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Producer thread moving frames from a source into a slot.
pub struct CameraFeed;

impl CameraFeed {
    /// Pull a frame every `frame_interval` until `running` clears or `stop` is set.
    ///
    /// Frames arriving while the pipeline holds the slot are dropped. Connection and
    /// capture errors are logged and retried after a fixed delay.
    pub fn spawn(
        name: &str,
        mut source: Box<dyn FrameSource>,
        slot: Arc<FrameSlot>,
        frame_interval: Duration,
        running: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let label = name.to_string();
        std::thread::Builder::new()
            .name(format!("feed-{}", name))
            .spawn(move || {
                let mut connected = false;
                while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                    if !connected {
                        match source.connect() {
                            Ok(()) => connected = true,
                            Err(e) => {
                                log::warn!("{}: connect failed: {:#}", label, e);
                                std::thread::sleep(RECONNECT_DELAY);
                                continue;
                            }
                        }
                    }
                    let started = Instant::now();
                    match source.next_frame() {
                        Ok(frame) => {
                            if !slot.publish(frame) {
                                log::trace!("{}: slot busy, frame dropped", label);
                            }
                        }
                        Err(e) => {
                            log::warn!("{}: capture failed: {:#}", label, e);
                            connected = source.is_healthy();
                        }
                    }
                    std::thread::sleep(frame_interval.saturating_sub(started.elapsed()));
                }
                log::debug!("{}: feed stopped", label);
            })
    }
}
