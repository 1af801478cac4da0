//! One cycle's worth of measurement data

use chrono::NaiveDateTime;
use heapless::Vec;

use crate::config::Side;
use crate::gps::GpsFix;
use crate::ranging::PollOutcome;

/// Poll results kept per record
pub const MAX_SAMPLES: usize = 30;
/// Button confirmations kept per record
pub const MAX_CONFIRMED: usize = 8;

/// Identifies a record for as long as it lives in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordId(pub u32);

/// Raw echo durations of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimedSample {
    /// Milliseconds since the record's cycle started
    pub offset_ms: u16,
    /// Echo length per side, `None` when that side had no result in this poll
    pub durations_us: [Option<u32>; 2],
}

/// A distance the rider confirmed with the button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfirmedDistance {
    /// `None` when the button was pressed without a pending minimum
    pub distance_cm: Option<u16>,
    /// Index into [`MeasurementRecord::samples`] of the minimum, `None` if
    /// the poll came after the sample buffer filled up
    pub sample_index: Option<usize>,
}

/// Everything measured during one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementRecord {
    pub id: RecordId,
    /// Tick at which the cycle started
    pub millis: u32,
    pub time: Option<NaiveDateTime>,
    pub gps: Option<GpsFix>,
    pub battery_percent: Option<u8>,
    /// Smallest corrected distance per side during the cycle
    pub min_distance_cm: [Option<u16>; 2],
    pub samples: Vec<TimedSample, MAX_SAMPLES>,
    pub confirmed: Vec<ConfirmedDistance, MAX_CONFIRMED>,
    pub in_privacy_area: bool,
    /// Readings taken, including those that did not fit into `samples`
    pub measurements: u16,
}

impl MeasurementRecord {
    pub fn new(id: RecordId, millis: u32) -> Self {
        Self {
            id,
            millis,
            time: None,
            gps: None,
            battery_percent: None,
            min_distance_cm: [None; 2],
            samples: Vec::new(),
            confirmed: Vec::new(),
            in_privacy_area: false,
            measurements: 0,
        }
    }

    pub fn min_distance(&self, side: Side) -> Option<u16> {
        self.min_distance_cm[side.index()]
    }

    /// Add the readings of one poll
    ///
    /// Returns the index the sample got, or `None` once [`MAX_SAMPLES`] are
    /// stored. Minimums and the measurement count are updated either way.
    pub fn add_poll(&mut self, outcome: &PollOutcome, now_ms: u32) -> Option<usize> {
        let index = self.samples.len();
        let mut sample = TimedSample {
            offset_ms: now_ms.wrapping_sub(self.millis).min(u32::from(u16::MAX)) as u16,
            durations_us: [None; 2],
        };
        for reading in outcome.readings() {
            let side = reading.side.index();
            sample.durations_us[side] = reading.duration_us;
            if let Some(cm) = reading.distance_cm {
                self.min_distance_cm[side] = Some(self.min_distance_cm[side].map_or(cm, |min| min.min(cm)));
            }
        }
        self.measurements = self.measurements.saturating_add(1);
        if self.samples.push(sample).is_err() {
            trace!("record {}: sample buffer full", self.id.0);
            return None;
        }
        Some(index)
    }

    /// Index of the newest stored sample
    pub fn last_sample_index(&self) -> Option<usize> {
        self.samples.len().checked_sub(1)
    }

    /// Attach a confirmation; false if the record already holds the maximum
    pub fn confirm(&mut self, confirmed: ConfirmedDistance) -> bool {
        self.confirmed.push(confirmed).is_ok()
    }
}

/// A record as written to the sink
///
/// A record with confirmations is written once per confirmation, each time
/// with the confirmed value as the primary side's distance.
#[derive(Debug, Clone, Copy)]
pub struct EmittedRecord<'a> {
    pub record: &'a MeasurementRecord,
    pub distance_cm: [Option<u16>; 2],
    pub confirmed: Option<&'a ConfirmedDistance>,
}

impl<'a> EmittedRecord<'a> {
    /// The rows `record` produces
    pub fn all(record: &'a MeasurementRecord, primary: Side) -> impl Iterator<Item = EmittedRecord<'a>> {
        let plain = record.confirmed.is_empty().then_some(EmittedRecord {
            record,
            distance_cm: record.min_distance_cm,
            confirmed: None,
        });
        let confirmed = record.confirmed.iter().map(move |c| {
            let mut distance_cm = record.min_distance_cm;
            distance_cm[primary.index()] = c.distance_cm;
            EmittedRecord {
                record,
                distance_cm,
                confirmed: Some(c),
            }
        });
        plain.into_iter().chain(confirmed)
    }
}
