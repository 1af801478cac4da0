//! Per-sensor state kept by the main loop

use crate::clock::elapsed;
use crate::config::{Side, MAX_DURATION_MICRO_SEC, MIN_DURATION_MICRO_SEC};
use crate::filter::{MedianOf3, RunningMedian};

use super::{EchoCapture, Transducer};

/// Value pushed through the spike filter for "no reading"
const NO_READING_CM: u16 = u16::MAX;

/// Convert an echo pulse to centimetres
///
/// Pulses outside `[MIN_DURATION_MICRO_SEC, MAX_DURATION_MICRO_SEC)` are no reading.
pub fn distance_from_duration(duration_us: u32, micro_sec_to_cm_divider: u32) -> Option<u16> {
    if !(MIN_DURATION_MICRO_SEC..MAX_DURATION_MICRO_SEC).contains(&duration_us) {
        return None;
    }
    Some((duration_us / micro_sec_to_cm_divider.max(1)) as u16)
}

/// Distance from the bike's edge, never negative
pub fn apply_offset(raw_cm: u16, offset_cm: u16) -> u16 {
    raw_cm.saturating_sub(offset_cm)
}

/// One completed (or abandoned) measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub side: Side,
    /// When the trigger pulse was sent
    pub trigger_us: u32,
    /// Echo pulse length, `None` when the echo never completed
    pub duration_us: Option<u32>,
    /// Spike-filtered distance before offset correction
    pub raw_cm: Option<u16>,
    /// Offset-corrected distance
    pub distance_cm: Option<u16>,
}

impl Reading {
    /// Echo never arrived
    pub fn timed_out(&self) -> bool {
        self.duration_us.is_none()
    }
}

/// Diagnostic counters of one sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelStats {
    pub triggers: u32,
    pub no_signal: u32,
    pub min_duration_us: Option<u32>,
    pub max_duration_us: Option<u32>,
}

impl ChannelStats {
    fn record_duration(&mut self, duration_us: u32) {
        self.min_duration_us = Some(self.min_duration_us.map_or(duration_us, |d| d.min(duration_us)));
        self.max_duration_us = Some(self.max_duration_us.map_or(duration_us, |d| d.max(duration_us)));
    }
}

/// One ultrasonic sensor as seen from the main loop
pub struct SensorChannel<'a, T> {
    pub(super) side: Side,
    pub(super) transducer: T,
    pub(super) capture: &'a EchoCapture,
    offset_cm: u16,
    pub(super) in_flight: bool,
    pub(super) trigger_us: Option<u32>,
    pub(super) end_us: Option<u32>,
    pub(super) forced_ready: bool,
    spike_filter: MedianOf3,
    report_filter: RunningMedian,
    distance_cm: Option<u16>,
    min_cm: Option<u16>,
    pub(super) stats: ChannelStats,
}

impl<'a, T: Transducer> SensorChannel<'a, T> {
    pub fn new(side: Side, transducer: T, capture: &'a EchoCapture, offset_cm: u16) -> Self {
        Self {
            side,
            transducer,
            capture,
            offset_cm,
            in_flight: false,
            trigger_us: None,
            end_us: None,
            forced_ready: false,
            spike_filter: MedianOf3::new(),
            report_filter: RunningMedian::new(),
            distance_cm: None,
            min_cm: None,
            stats: ChannelStats::default(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Last corrected distance
    pub fn distance(&self) -> Option<u16> {
        self.distance_cm
    }

    /// 5-sample median of corrected distances
    pub fn reported_distance(&self) -> Option<u16> {
        self.report_filter.median()
    }

    /// Smallest corrected distance since [`Self::reset_minimum`]
    pub fn minimum(&self) -> Option<u16> {
        self.min_cm
    }

    pub fn reset_minimum(&mut self) {
        self.min_cm = None;
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Mark the trigger and hand the channel to the echo interrupt
    pub(super) fn start(&mut self, now_us: u32) {
        self.capture.arm();
        self.in_flight = true;
        self.trigger_us = Some(now_us);
        self.forced_ready = false;
        self.stats.triggers += 1;
    }

    /// Turn captured edges into a reading
    pub(super) fn complete(&mut self, start_us: u32, end_us: u32, divider: u32) -> Reading {
        self.capture.acknowledge();
        self.in_flight = false;
        self.end_us = Some(end_us);

        let duration_us = elapsed(end_us, start_us);
        self.stats.record_duration(duration_us);

        let filtered = self
            .spike_filter
            .push(distance_from_duration(duration_us, divider).unwrap_or(NO_READING_CM));
        let raw_cm = (filtered != NO_READING_CM).then_some(filtered);
        self.finish(raw_cm, Some(duration_us))
    }

    /// Abandon a measurement whose echo never completed
    pub(super) fn abandon(&mut self, now_us: u32) -> Reading {
        self.capture.disarm();
        self.in_flight = false;
        self.end_us = Some(now_us);
        self.forced_ready = true;
        self.stats.no_signal += 1;
        self.spike_filter.push(NO_READING_CM);
        debug!("{} sensor: no echo, re-arming", self.side.tag());
        self.finish(None, None)
    }

    fn finish(&mut self, raw_cm: Option<u16>, duration_us: Option<u32>) -> Reading {
        let distance_cm = raw_cm.map(|cm| apply_offset(cm, self.offset_cm));
        self.distance_cm = distance_cm;
        if let Some(cm) = distance_cm {
            self.report_filter.update(cm);
            self.min_cm = Some(self.min_cm.map_or(cm, |min| min.min(cm)));
        }
        Reading {
            side: self.side,
            trigger_us: self.trigger_us.unwrap_or_default(),
            duration_us,
            raw_cm,
            distance_cm,
        }
    }
}
