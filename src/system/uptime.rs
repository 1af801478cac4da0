//! Time since boot for the measurement core

use embassy_time::Instant;
use overtake_sensor::clock::Clock;

/// [`Clock`] on the embassy time driver
///
/// Both counters are truncated to 32 bits and wrap; the core compares them
/// with wrapping arithmetic only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uptime;

impl Clock for Uptime {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn now_us(&self) -> u32 {
        now_us()
    }
}

/// Microsecond timestamp for edge capture
pub fn now_us() -> u32 {
    Instant::now().as_micros() as u32
}
