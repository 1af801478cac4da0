//! Measurement and confirmation pipeline
//!
//! Each cycle builds one [`MeasurementRecord`]. Finished records wait in a
//! [`LookbackBuffer`] so that a button press can still attach the pending
//! minimum to the record it was measured in; everything older than that
//! record is written to the [`RecordSink`].
//!
//! The pending minimum refers to its record by [`RecordId`]. Once the record
//! has left the buffer a lookup simply finds nothing.

pub mod confirm;
pub mod csv;
pub mod lookback;
pub mod record;

use chrono::NaiveDateTime;
use thiserror::Error;

pub use confirm::{ConfirmationState, PendingMinimum};
pub use csv::{new_track_id, CsvSink, TrackId};
pub use lookback::{LookbackBuffer, LOOKBACK_CAPACITY};
pub use record::{ConfirmedDistance, EmittedRecord, MeasurementRecord, RecordId, TimedSample, MAX_SAMPLES};

use crate::config::{SensorConfig, Side};
use crate::gps::GpsFix;
use crate::ranging::PollOutcome;

/// Failure of the persistent sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkError {
    #[error("row does not fit the line buffer")]
    LineTooLong,
    #[error("write to storage failed")]
    Write,
    #[error("sink is not ready")]
    NotReady,
}

/// Where finished records go
pub trait RecordSink {
    /// Start a new track
    fn write_header(&mut self, track_id: &str) -> Result<(), SinkError>;
    fn append(&mut self, row: &EmittedRecord<'_>) -> Result<(), SinkError>;
    fn flush(&mut self) -> Result<(), SinkError>;
}

/// Data known only when a cycle closes
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleInfo {
    pub time: Option<NaiveDateTime>,
    pub gps: Option<GpsFix>,
    pub battery_percent: Option<u8>,
    pub in_privacy_area: bool,
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipelineStats {
    pub records: u32,
    pub rows_written: u32,
    pub sink_failures: u32,
    /// Minimums that timed out without a button press
    pub expired: u32,
    /// Records written before they could be confirmed because the buffer was full
    pub forced_out: u32,
    /// Button presses whose record had already been written
    pub missed_confirmations: u32,
}

pub struct Pipeline<const N: usize = LOOKBACK_CAPACITY> {
    primary: Side,
    confirmation: ConfirmationState,
    buffer: LookbackBuffer<N>,
    current: MeasurementRecord,
    next_id: u32,
    stats: PipelineStats,
}

impl<const N: usize> Pipeline<N> {
    pub fn new(config: &SensorConfig, now_ms: u32) -> Self {
        Self {
            primary: config.primary,
            confirmation: ConfirmationState::new(config.confirmation_window_ms()),
            buffer: LookbackBuffer::new(),
            current: MeasurementRecord::new(RecordId(0), now_ms),
            next_id: 1,
            stats: PipelineStats::default(),
        }
    }

    /// Record being filled in this cycle
    pub fn current(&self) -> &MeasurementRecord {
        &self.current
    }

    pub fn confirmation(&self) -> &ConfirmationState {
        &self.confirmation
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Add one poll's readings to the current record
    pub fn on_poll(&mut self, outcome: &PollOutcome, now_ms: u32) {
        if !outcome.has_readings() {
            return;
        }
        let index = self.current.add_poll(outcome, now_ms);
        if let Some(cm) = outcome.reading(self.primary).and_then(|r| r.distance_cm) {
            self.confirmation.offer(cm, index, self.current.id, now_ms);
        }
    }

    /// Debounced button release
    pub fn on_button_release(&mut self) {
        let Some(pending) = self.confirmation.confirm() else {
            let marker = ConfirmedDistance {
                distance_cm: None,
                sample_index: self.current.last_sample_index(),
            };
            if !self.current.confirm(marker) {
                warn!("record {}: confirmation list full", self.current.id.0);
            }
            return;
        };

        let confirmed = ConfirmedDistance {
            distance_cm: Some(pending.distance_cm),
            sample_index: pending.sample_index,
        };
        let record = if self.current.id == pending.record {
            Some(&mut self.current)
        } else {
            self.buffer.get_mut(pending.record)
        };
        match record {
            Some(record) => {
                if record.confirm(confirmed) {
                    info!("confirmed {} cm in record {}", pending.distance_cm, pending.record.0);
                } else {
                    warn!("record {}: confirmation list full", pending.record.0);
                }
            }
            None => {
                self.stats.missed_confirmations += 1;
                warn!("record {} already written, confirmation lost", pending.record.0);
            }
        }
    }

    /// Close the current record and start the next one
    ///
    /// Returns the number of rows written to `sink`.
    pub fn end_cycle<S: RecordSink + ?Sized>(&mut self, info: CycleInfo, now_ms: u32, sink: &mut S) -> u32 {
        let next = MeasurementRecord::new(RecordId(self.next_id), now_ms);
        self.next_id = self.next_id.wrapping_add(1);
        let mut record = core::mem::replace(&mut self.current, next);
        record.time = info.time;
        record.gps = info.gps;
        record.battery_percent = info.battery_percent;
        record.in_privacy_area = info.in_privacy_area;
        self.stats.records += 1;

        let mut rows = 0;
        if let Some(evicted) = self.buffer.push(record) {
            if self.confirmation.awaiting() == Some(evicted.id) {
                self.confirmation.forget(evicted.id);
                self.stats.forced_out += 1;
                debug!("record {} forced out while awaiting confirmation", evicted.id.0);
            }
            rows += self.emit(&evicted, sink);
        }

        let awaiting = self.confirmation.awaiting();
        while let Some(front) = self.buffer.front() {
            if Some(front.id) == awaiting {
                break;
            }
            if let Some(record) = self.buffer.pop_front() {
                rows += self.emit(&record, sink);
            }
        }

        if rows > 0 {
            if let Err(error) = sink.flush() {
                self.sink_failed(error);
            }
        }
        rows
    }

    /// Start-of-cycle housekeeping: expire a stale pending minimum
    pub fn begin_cycle(&mut self, now_ms: u32) {
        if self.confirmation.expire(now_ms) {
            self.stats.expired += 1;
        }
    }

    /// Write out everything still buffered, e.g. before shutdown
    pub fn drain<S: RecordSink + ?Sized>(&mut self, sink: &mut S) -> u32 {
        let mut rows = 0;
        while let Some(record) = self.buffer.pop_front() {
            self.confirmation.forget(record.id);
            rows += self.emit(&record, sink);
        }
        if let Err(error) = sink.flush() {
            self.sink_failed(error);
        }
        rows
    }

    fn emit<S: RecordSink + ?Sized>(&mut self, record: &MeasurementRecord, sink: &mut S) -> u32 {
        let mut rows = 0;
        for row in EmittedRecord::all(record, self.primary) {
            match sink.append(&row) {
                Ok(()) => rows += 1,
                Err(error) => self.sink_failed(error),
            }
        }
        self.stats.rows_written += rows;
        rows
    }

    fn sink_failed(&mut self, error: SinkError) {
        self.stats.sink_failures += 1;
        error!("record sink: {}", error);
    }
}
