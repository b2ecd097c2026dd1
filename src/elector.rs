//! Cross-camera maximum election.
//!
//! Every pipeline loop offers its filtered count; only a strictly greater count replaces
//! the current maximum, so equal counts keep the first writer. A periodic drain moves a
//! nonzero maximum into the live-count register and restarts the election at zero.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Count answered by live queries. Holds the value of the last nonzero drain.
#[derive(Debug, Default)]
pub struct LiveRegister {
    count: AtomicU16,
}

impl LiveRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u16 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn set(&self, count: u16) {
        self.count.store(count, Ordering::SeqCst);
    }
}

/// Device and timestamp that produced a maximum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leader {
    pub device: String,
    pub timestamp: String,
    pub count: u16,
}

#[derive(Debug, Default)]
pub struct AggregationElector {
    max: AtomicU16,
    /// Held across the compare-and-set so the leader always matches `max`.
    leader: Mutex<Option<Leader>>,
}

impl AggregationElector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a count. Returns true when it became the new maximum.
    pub fn offer(&self, count: u16, device: &str, timestamp: &str) -> bool {
        if count <= self.max.load(Ordering::SeqCst) {
            return false;
        }
        let mut leader = self.leader.lock().unwrap_or_else(PoisonError::into_inner);
        let won = self
            .max
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (count > current).then_some(count)
            })
            .is_ok();
        if won {
            *leader = Some(Leader {
                device: device.to_string(),
                timestamp: timestamp.to_string(),
                count,
            });
        }
        won
    }

    /// Maximum offered since the last drain.
    pub fn current_max(&self) -> u16 {
        self.max.load(Ordering::SeqCst)
    }

    /// Most recent leader. Survives drains so live queries can attribute the register.
    pub fn leader(&self) -> Option<Leader> {
        self.leader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a nonzero maximum into `register` and reset it to zero.
    pub fn drain(&self, register: &LiveRegister) -> Option<u16> {
        self.publish(register).map(|(max, _)| max)
    }

    /// [`Self::drain`], returning the leader whose count was published.
    pub fn drain_leader(&self, register: &LiveRegister) -> Option<Leader> {
        self.publish(register).and_then(|(_, leader)| leader)
    }

    fn publish(&self, register: &LiveRegister) -> Option<(u16, Option<Leader>)> {
        let leader = self.leader.lock().unwrap_or_else(PoisonError::into_inner);
        let max = self.max.swap(0, Ordering::SeqCst);
        if max == 0 {
            return None;
        }
        register.set(max);
        Some((max, leader.clone()))
    }

    /// Drain every `interval` until `running` is cleared.
    pub fn spawn_drain(
        self: Arc<Self>,
        register: Arc<LiveRegister>,
        interval: Duration,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("count-drain".to_string())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while running.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now < next {
                        std::thread::sleep((next - now).min(DRAIN_POLL));
                        continue;
                    }
                    next += interval;
                    if let Some(max) = self.drain(&register) {
                        log::debug!("live count published: {}", max);
                    }
                }
            })
    }
}
