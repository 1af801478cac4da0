//! Time sources
//!
//! All timestamps in the core are 32-bit tick counts that wrap around; compare
//! them only through [`elapsed`]. The firmware implements [`Clock`] on top of
//! `embassy_time::Instant`, tests use a hand-advanced counter.

use chrono::{NaiveDateTime, TimeDelta};

/// Monotonic microcontroller time
pub trait Clock {
    /// Milliseconds since boot, wrapping
    fn now_ms(&self) -> u32;
    /// Microseconds since boot, wrapping
    fn now_us(&self) -> u32;
}

/// Ticks from `since` to `now`, correct across one wraparound
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// UTC wall clock anchored to the millisecond counter
///
/// Set from GPS time; until then it has no answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock {
    anchor: Option<(NaiveDateTime, u32)>,
}

impl WallClock {
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    /// Anchor `utc` to the millisecond tick `at_ms`
    pub fn set(&mut self, utc: NaiveDateTime, at_ms: u32) {
        self.anchor = Some((utc, at_ms));
    }

    pub fn is_set(&self) -> bool {
        self.anchor.is_some()
    }

    /// UTC at tick `now_ms`
    pub fn now(&self, now_ms: u32) -> Option<NaiveDateTime> {
        let (utc, at_ms) = self.anchor?;
        utc.checked_add_signed(TimeDelta::milliseconds(i64::from(elapsed(now_ms, at_ms))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn elapsed_handles_wraparound() {
        assert_eq!(elapsed(10, 5), 5);
        assert_eq!(elapsed(5, u32::MAX - 4), 10);
    }

    #[test]
    fn wall_clock_advances_with_ticks() {
        let mut clock = WallClock::new();
        assert!(clock.now(1000).is_none());

        let utc = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid date");
        clock.set(utc, 1_000);

        let later = clock.now(3_500).expect("clock is set");
        assert_eq!(later, utc + TimeDelta::milliseconds(2_500));
    }
}
