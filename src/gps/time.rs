//! System clock from NAV-TIMEUTC

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use super::ubx::NavTimeUtc;
use crate::clock::{elapsed, WallClock};

/// Time older than this when decoded is not applied
pub const MAX_LATENCY_MS: u32 = 150;
/// Receiver accuracy estimate must be below this
pub const MAX_TIME_ACCURACY_NS: u32 = 50_000_000;
/// Once set, the clock is re-synchronised at most this often
pub const RESYNC_INTERVAL_MS: u32 = 120_000;

/// `validTOW | validWKN | validUTC`
const VALID_ALL: u8 = 0x07;

/// What happened to an offered time message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeSyncOutcome {
    Applied,
    /// Clock was set recently
    Throttled,
    /// Decoded too long after the frame started
    Late,
    /// Receiver does not trust its own time yet
    Inaccurate,
    Invalid,
}

/// Applies receiver time to a [`WallClock`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSync {
    last_set_ms: Option<u32>,
}

impl TimeSync {
    pub const fn new() -> Self {
        Self { last_set_ms: None }
    }

    /// Tick of the last applied time
    pub fn last_set_ms(&self) -> Option<u32> {
        self.last_set_ms
    }

    /// Offer a time message whose frame started at `started_ms` and was decoded at `now_ms`
    pub fn offer(&mut self, msg: &NavTimeUtc, started_ms: u32, now_ms: u32, clock: &mut WallClock) -> TimeSyncOutcome {
        if let Some(last) = self.last_set_ms {
            if elapsed(now_ms, last) < RESYNC_INTERVAL_MS {
                return TimeSyncOutcome::Throttled;
            }
        }
        let latency_ms = elapsed(now_ms, started_ms);
        if latency_ms >= MAX_LATENCY_MS {
            debug!("gps: time message {} ms late, ignored", latency_ms);
            return TimeSyncOutcome::Late;
        }
        if msg.t_acc_ns >= MAX_TIME_ACCURACY_NS {
            return TimeSyncOutcome::Inaccurate;
        }
        if msg.valid & VALID_ALL != VALID_ALL {
            return TimeSyncOutcome::Invalid;
        }
        let Some(utc) = utc_of(msg) else {
            return TimeSyncOutcome::Invalid;
        };
        let Some(utc) = utc.checked_add_signed(TimeDelta::milliseconds(i64::from(latency_ms))) else {
            return TimeSyncOutcome::Invalid;
        };

        clock.set(utc, now_ms);
        self.last_set_ms = Some(now_ms);
        info!(
            "gps: clock set to {}-{}-{} {}:{}:{} (latency {} ms)",
            msg.year,
            msg.month,
            msg.day,
            msg.hour,
            msg.minute,
            msg.second,
            latency_ms
        );
        TimeSyncOutcome::Applied
    }
}

fn utc_of(msg: &NavTimeUtc) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::from(msg.year), u32::from(msg.month), u32::from(msg.day))?
        .and_hms_opt(u32::from(msg.hour), u32::from(msg.minute), u32::from(msg.second))?
        .checked_add_signed(TimeDelta::nanoseconds(i64::from(msg.nano)))
}
