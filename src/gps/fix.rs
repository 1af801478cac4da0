//! Fix assembly
//!
//! A fix is built from four navigation messages of the same epoch: position
//! (NAV-POSLLH), velocity (NAV-VELNED), solution info (NAV-SOL) and dilution
//! of precision (NAV-DOP). Parts of different epochs are never merged.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use super::ubx::{NavDop, NavPosLlh, NavSol, NavVelNed};

/// Milliseconds in a GPS week, the period of the time of week
pub const WEEK_MS: u32 = 604_800_000;

/// GPS time runs ahead of UTC by this many seconds (since 2017-01-01)
pub const GPS_UTC_LEAP_SECONDS: i64 = 18;

const PART_POSITION: u8 = 0x01;
const PART_VELOCITY: u8 = 0x02;
const PART_INFO: u8 = 0x04;
const PART_HDOP: u8 = 0x08;
const PARTS_ALL: u8 = PART_POSITION | PART_VELOCITY | PART_INFO | PART_HDOP;

/// NAV-SOL flags
const FLAG_GPS_FIX_OK: u8 = 0x01;
const FLAG_WEEK_VALID: u8 = 0x04;
const FLAG_TOW_VALID: u8 = 0x08;

/// NAV-SOL fix types that carry a position
const FIX_2D: u8 = 2;
const FIX_GPS_DEAD_RECKONING: u8 = 4;

/// One complete navigation epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsFix {
    /// Time of week, ms
    pub tow: u32,
    pub week: i16,
    /// 1e-7 degrees
    pub lat: i32,
    /// 1e-7 degrees
    pub lon: i32,
    /// Height above mean sea level, mm
    pub altitude_mm: i32,
    /// Ground speed, cm/s
    pub speed_cm_s: u32,
    /// Course over ground, 1e-5 degrees
    pub heading: i32,
    /// Horizontal dilution of precision, 0.01
    pub hdop: u16,
    pub satellites: u8,
    pub fix_type: u8,
    pub flags: u8,
}

impl GpsFix {
    /// Position can be trusted
    pub fn has_position(&self) -> bool {
        self.flags & FLAG_GPS_FIX_OK != 0 && (FIX_2D..=FIX_GPS_DEAD_RECKONING).contains(&self.fix_type)
    }

    /// Week and time of week are both known
    pub fn has_time(&self) -> bool {
        self.flags & (FLAG_WEEK_VALID | FLAG_TOW_VALID) == FLAG_WEEK_VALID | FLAG_TOW_VALID
    }

    pub fn latitude(&self) -> f64 {
        f64::from(self.lat) * 1e-7
    }

    pub fn longitude(&self) -> f64 {
        f64::from(self.lon) * 1e-7
    }

    /// Epoch time in UTC, when the receiver knows the week
    pub fn utc(&self) -> Option<NaiveDateTime> {
        if !self.has_time() || self.week < 0 {
            return None;
        }
        let epoch = NaiveDate::from_ymd_opt(1980, 1, 6)?.and_hms_opt(0, 0, 0)?;
        let since_epoch = TimeDelta::try_weeks(i64::from(self.week))?
            + TimeDelta::milliseconds(i64::from(self.tow))
            - TimeDelta::seconds(GPS_UTC_LEAP_SECONDS);
        epoch.checked_add_signed(since_epoch)
    }
}

/// Counters of the merge step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixStats {
    pub complete: u32,
    /// Epochs dropped because a newer one started before they completed
    pub abandoned: u32,
    /// Parts older than the epoch being assembled
    pub stale: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Assembly {
    fix: GpsFix,
    parts: u8,
}

/// Collects navigation messages into complete [`GpsFix`]es
#[derive(Debug, Default)]
pub struct FixAssembler {
    assembling: Option<Assembly>,
    current: Option<GpsFix>,
    fresh: bool,
    stats: FixStats,
}

impl FixAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last complete fix
    pub fn current(&self) -> Option<&GpsFix> {
        self.current.as_ref()
    }

    /// Last complete fix, once per epoch
    pub fn take_new_fix(&mut self) -> Option<GpsFix> {
        if core::mem::take(&mut self.fresh) {
            self.current
        } else {
            None
        }
    }

    pub fn stats(&self) -> FixStats {
        self.stats
    }

    pub fn position(&mut self, msg: &NavPosLlh) -> bool {
        self.merge(msg.itow, PART_POSITION, |fix| {
            fix.lat = msg.lat;
            fix.lon = msg.lon;
            fix.altitude_mm = msg.hmsl_mm;
        })
    }

    pub fn velocity(&mut self, msg: &NavVelNed) -> bool {
        self.merge(msg.itow, PART_VELOCITY, |fix| {
            fix.speed_cm_s = msg.ground_speed_cm_s;
            fix.heading = msg.heading;
        })
    }

    pub fn info(&mut self, msg: &NavSol) -> bool {
        self.merge(msg.itow, PART_INFO, |fix| {
            fix.week = msg.week;
            fix.fix_type = msg.fix_type;
            fix.flags = msg.flags;
            fix.satellites = msg.satellites;
        })
    }

    pub fn hdop(&mut self, msg: &NavDop) -> bool {
        self.merge(msg.itow, PART_HDOP, |fix| fix.hdop = msg.hdop)
    }

    /// Merge one part; returns true when it completed its epoch
    fn merge(&mut self, tow: u32, part: u8, apply: impl FnOnce(&mut GpsFix)) -> bool {
        let assembly = match &mut self.assembling {
            Some(assembly) if assembly.fix.tow == tow => assembly,
            Some(assembly) if is_older(tow, assembly.fix.tow) => {
                self.stats.stale += 1;
                debug!("gps: stale part for tow {} while assembling {}", tow, assembly.fix.tow);
                return false;
            }
            slot => {
                if let Some(previous) = slot.as_ref() {
                    if previous.parts != PARTS_ALL {
                        self.stats.abandoned += 1;
                        warn!(
                            "gps: tow {} incomplete (parts {:#x}), starting {}",
                            previous.fix.tow,
                            previous.parts,
                            tow
                        );
                    }
                }
                slot.insert(Assembly {
                    fix: GpsFix {
                        tow,
                        ..GpsFix::default()
                    },
                    parts: 0,
                })
            }
        };

        let was_complete = assembly.parts == PARTS_ALL;
        apply(&mut assembly.fix);
        assembly.parts |= part;
        if was_complete || assembly.parts != PARTS_ALL {
            return false;
        }

        self.current = Some(assembly.fix);
        self.fresh = true;
        self.stats.complete += 1;
        true
    }
}

/// Whether `tow` lies before `reference`, allowing for the weekly rollover
fn is_older(tow: u32, reference: u32) -> bool {
    let behind = (reference % WEEK_MS + WEEK_MS - tow % WEEK_MS) % WEEK_MS;
    behind != 0 && behind < WEEK_MS / 2
}
