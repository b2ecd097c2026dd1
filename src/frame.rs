//! Decoded camera frames and the hand-off points around them.
//!
//! - `Frame`: one decoded RGB image. Ownership moves into the worker pool at submit time
//!   and comes back with the result.
//! - `FrameSlot`: latest-frame holder shared by a camera producer and its pipeline loop.
//!   Both sides use try-lock-and-skip; neither ever waits on the other.
//! - `FrameIdSequence`: per-camera frame ids, restarted at 1 on every wall-clock minute.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, TryLockError};
use std::time::Instant;

/// Bytes per pixel for RGB8 frames.
pub const RGB_CHANNELS: usize = 3;

/// Decoded RGB8 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
            captured_at: Instant::now(),
        })
    }

    /// Uniform frame, mostly for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize * RGB_CHANNELS],
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn into_rgb_image(self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data)
    }
}

/// Latest decoded frame of one camera.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    published: AtomicU64,
    skipped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame. Returns false (frame dropped) when the slot is busy.
    pub fn publish(&self, frame: Frame) -> bool {
        match self.latest.try_lock() {
            Ok(mut guard) => {
                *guard = Some(frame);
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TryLockError::WouldBlock) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                *poisoned.into_inner() = Some(frame);
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Copy of the latest frame, or `None` when empty or busy.
    pub fn try_latest(&self) -> Option<Frame> {
        match self.latest.try_lock() {
            Ok(guard) => guard.clone(),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames dropped because the consumer held the slot.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Per-camera frame id counter with a minute-boundary reset.
#[derive(Debug, Default)]
pub struct FrameIdSequence {
    next: u64,
    minute: Option<i64>,
}

impl FrameIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for a frame observed at `now`.
    ///
    /// The first id handed out in a new wall-clock minute is always 1, no matter how
    /// many ids were issued in the previous minute.
    pub fn next_id<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> u64 {
        let minute = now.timestamp().div_euclid(60);
        if self.minute != Some(minute) {
            self.minute = Some(minute);
            self.next = 1;
        }
        let id = self.next;
        self.next += 1;
        id
    }
}
