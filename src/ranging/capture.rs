//! Interrupt-side echo timing
//!
//! One [`EchoCapture`] per sensor is shared between the echo-edge interrupt
//! (single writer of the timestamps) and the main loop (single reader).
//!
//! Rules for the interrupt side:
//! - only [`EchoCapture::on_edge`] runs in interrupt context
//! - no allocation, no locking, a handful of atomic stores
//! - once the falling edge is stored nothing is written until the main loop
//!   re-arms the channel, so the reader never sees a torn start/end pair

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Progress of the measurement a channel has in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeasurementState {
    /// Not armed, no measurement running
    Idle,
    /// Triggered, echo not complete yet
    InProgress,
    /// Both edges captured
    Complete { start_us: u32, end_us: u32 },
}

/// Echo edge timestamps of one sensor
pub struct EchoCapture {
    start_us: AtomicU32,
    end_us: AtomicU32,
    armed: AtomicBool,
    started: AtomicBool,
    complete: AtomicBool,
    level: AtomicBool,
}

impl EchoCapture {
    pub const fn new() -> Self {
        Self {
            start_us: AtomicU32::new(0),
            end_us: AtomicU32::new(0),
            armed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            level: AtomicBool::new(false),
        }
    }

    /// Echo pin edge, called from interrupt context
    pub fn on_edge(&self, rising: bool, now_us: u32) {
        self.level.store(rising, Ordering::Relaxed);
        if !self.armed.load(Ordering::Acquire) {
            return;
        }
        if rising {
            self.start_us.store(now_us, Ordering::Relaxed);
            self.started.store(true, Ordering::Release);
        } else if self.started.load(Ordering::Acquire) {
            self.end_us.store(now_us, Ordering::Relaxed);
            self.armed.store(false, Ordering::Relaxed);
            self.complete.store(true, Ordering::Release);
        }
    }

    /// Last level seen on the echo pin
    pub fn echo_high(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }

    /// Rising-edge time of the running measurement, if it started
    pub fn start(&self) -> Option<u32> {
        self.started
            .load(Ordering::Acquire)
            .then(|| self.start_us.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> MeasurementState {
        if self.complete.load(Ordering::Acquire) {
            MeasurementState::Complete {
                start_us: self.start_us.load(Ordering::Relaxed),
                end_us: self.end_us.load(Ordering::Relaxed),
            }
        } else if self.armed.load(Ordering::Acquire) {
            MeasurementState::InProgress
        } else {
            MeasurementState::Idle
        }
    }

    /// Clear the previous result and accept edges for a new measurement
    pub(crate) fn arm(&self) {
        self.complete.store(false, Ordering::Relaxed);
        self.started.store(false, Ordering::Relaxed);
        self.armed.store(true, Ordering::Release);
    }

    /// Stop accepting edges and drop any result
    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        self.complete.store(false, Ordering::Relaxed);
    }

    /// Result has been consumed by the main loop
    pub(crate) fn acknowledge(&self) {
        self.complete.store(false, Ordering::Release);
    }
}

impl Default for EchoCapture {
    fn default() -> Self {
        Self::new()
    }
}
