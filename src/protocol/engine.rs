use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{
    FrameAssembler, FrameError, WireFrame, FN_HISTORY_QUERY, FN_HISTORY_REPLY, FN_LIVE_QUERY,
    FN_LIVE_REPLY, HISTORY_QUERY_LEN, MASTER_ADDR, MAX_FRAME_LEN, SLAVE_ADDR,
};
use crate::elector::{AggregationElector, LiveRegister};
use crate::store::{DetectionLog, DetectionRecord};
use crate::timestamp::{millis_stamp, TIMESTAMP_LEN};

/// Pause after an empty or failed read.
const READ_BACKOFF: Duration = Duration::from_millis(10);

/// Line silence that ends a partial frame.
pub const FRAME_GAP: Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    pub slave_addr: u8,
    pub master_addr: u8,
    /// Device recorded for live queries answered before any camera reported.
    pub fallback_device: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            slave_addr: SLAVE_ADDR,
            master_addr: MASTER_ADDR,
            fallback_device: "unknown_device".to_string(),
        }
    }
}

/// What happened to one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Encoded response to write back.
    Reply(Vec<u8>),
    /// Valid frame for another address on the bus.
    Ignored { to: u8 },
    Rejected(FrameError),
    Unsupported { function: u8, data_len: usize },
}

/// Answers live and history queries from the live register and the send-record log.
pub struct ProtocolEngine {
    config: ProtocolConfig,
    live: Arc<LiveRegister>,
    elector: Arc<AggregationElector>,
    send_log: Arc<dyn DetectionLog>,
}

impl ProtocolEngine {
    pub fn new(
        config: ProtocolConfig,
        live: Arc<LiveRegister>,
        elector: Arc<AggregationElector>,
        send_log: Arc<dyn DetectionLog>,
    ) -> Self {
        Self {
            config,
            live,
            elector,
            send_log,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn handle_frame(&self, raw: &[u8]) -> Disposition {
        self.handle_frame_at(raw, Local::now())
    }

    /// Dispatch one complete frame; `now` stamps send records without a leader.
    pub fn handle_frame_at(&self, raw: &[u8], now: DateTime<Local>) -> Disposition {
        let frame = match WireFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame rejected: {}", e);
                return Disposition::Rejected(e);
            }
        };
        if frame.to != self.config.slave_addr {
            log::debug!("ignoring frame for address 0x{:02X}", frame.to);
            return Disposition::Ignored { to: frame.to };
        }
        match (frame.function, frame.data.len()) {
            (FN_LIVE_QUERY, 0) => self.answer_live(&now),
            (FN_HISTORY_QUERY, HISTORY_QUERY_LEN) => self.answer_history(&frame.data),
            (function, data_len) => {
                log::warn!(
                    "unsupported command: func=0x{:02X} len={}",
                    function,
                    data_len
                );
                Disposition::Unsupported { function, data_len }
            }
        }
    }

    fn answer_live(&self, now: &DateTime<Local>) -> Disposition {
        let count = self.live.get();
        let (device, timestamp) = match self.elector.leader() {
            Some(leader) => (leader.device, leader.timestamp),
            None => (self.config.fallback_device.clone(), millis_stamp(now)),
        };
        let record = DetectionRecord::new(device, timestamp, i64::from(count));
        if let Err(e) = self.send_log.insert(&record) {
            log::error!("failed to persist send record: {:#}", e);
        }
        log::debug!("live query answered: {}", count);
        self.reply(FN_LIVE_REPLY, count.to_be_bytes().to_vec())
    }

    fn answer_history(&self, data: &[u8]) -> Disposition {
        let total = match history_bounds(data) {
            Ok((start, end)) => match self.send_log.sum_positive_between(start, end) {
                Ok(total) => total,
                Err(e) => {
                    log::error!("history query failed: {:#}", e);
                    0
                }
            },
            Err(e) => {
                log::warn!("history query rejected: {}", e);
                0
            }
        };
        let total = u16::try_from(total.max(0)).unwrap_or(u16::MAX);
        log::debug!("history query answered: {}", total);
        self.reply(FN_HISTORY_REPLY, total.to_be_bytes().to_vec())
    }

    fn reply(&self, function: u8, data: Vec<u8>) -> Disposition {
        let frame = WireFrame::new(self.config.master_addr, self.config.slave_addr, function, data);
        match frame.encode() {
            Ok(bytes) => Disposition::Reply(bytes),
            Err(e) => {
                log::error!("failed to encode reply: {}", e);
                Disposition::Rejected(e)
            }
        }
    }

    /// Receive loop: read, assemble, dispatch, write replies, until `running` clears.
    ///
    /// Empty reads and read timeouts back off briefly. A partial frame is kept across
    /// them and dropped only after [`FRAME_GAP`] of silence. Errors are logged and never
    /// end the loop.
    pub fn serve<S: Read + Write>(&self, stream: &mut S, running: &AtomicBool) {
        let mut assembler = FrameAssembler::new();
        let mut chunk = [0u8; MAX_FRAME_LEN];
        let mut last_rx = Instant::now();
        while running.load(Ordering::SeqCst) {
            match stream.read(&mut chunk) {
                Ok(0) => self.idle(&mut assembler, last_rx),
                Ok(n) => {
                    last_rx = Instant::now();
                    assembler.push(&chunk[..n]);
                    while let Some(raw) = assembler.next_frame() {
                        log::debug!("RX {}", hex::encode_upper(&raw));
                        if let Disposition::Reply(bytes) = self.handle_frame(&raw) {
                            log::debug!("TX {}", hex::encode_upper(&bytes));
                            if let Err(e) = stream.write_all(&bytes).and_then(|_| stream.flush())
                            {
                                log::warn!("failed to write reply: {}", e);
                            }
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    self.idle(&mut assembler, last_rx);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("serial read failed: {}", e);
                    assembler.reset();
                    std::thread::sleep(READ_BACKOFF);
                }
            }
        }
    }

    /// An empty read. A partial frame survives until the line has been quiet for
    /// [`FRAME_GAP`].
    fn idle(&self, assembler: &mut FrameAssembler, last_rx: Instant) {
        if assembler.pending() > 0 && last_rx.elapsed() >= FRAME_GAP {
            log::debug!("dropping {} byte partial frame", assembler.pending());
            assembler.reset();
        }
        std::thread::sleep(READ_BACKOFF);
    }

    /// Run [`Self::serve`] on its own thread.
    pub fn spawn<S>(self, mut stream: S) -> Result<ProtocolHandle>
    where
        S: Read + Write + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let join = std::thread::Builder::new()
            .name("protocol-rx".to_string())
            .spawn(move || {
                log::info!(
                    "protocol engine listening as 0x{:02X}",
                    self.config.slave_addr
                );
                self.serve(&mut stream, &running_thread);
            })?;
        Ok(ProtocolHandle {
            running,
            join: Some(join),
        })
    }
}

fn history_bounds(data: &[u8]) -> Result<(&str, &str)> {
    let text = std::str::from_utf8(data).map_err(|_| anyhow!("history bounds are not text"))?;
    if !text.is_char_boundary(TIMESTAMP_LEN) {
        return Err(anyhow!("history bounds are not two timestamps"));
    }
    Ok(text.split_at(TIMESTAMP_LEN))
}

pub struct ProtocolHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ProtocolHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    pub fn stop(mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("protocol thread panicked"))?;
        }
        Ok(())
    }
}
