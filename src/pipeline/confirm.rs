//! Minimum awaiting a button press

use super::record::RecordId;
use crate::clock::elapsed;

/// Smallest primary distance seen since the last confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingMinimum {
    pub distance_cm: u16,
    /// `None` when the sample did not fit into the record
    pub sample_index: Option<usize>,
    /// Record the sample belongs to
    pub record: RecordId,
    /// Tick at which this minimum was taken
    pub since_ms: u32,
}

/// Confirmation candidate and its expiry
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationState {
    pending: Option<PendingMinimum>,
    window_ms: u32,
    last_confirmed: Option<u16>,
}

impl ConfirmationState {
    pub fn new(window_ms: u32) -> Self {
        Self {
            pending: None,
            window_ms,
            last_confirmed: None,
        }
    }

    pub fn pending(&self) -> Option<&PendingMinimum> {
        self.pending.as_ref()
    }

    /// Record a pending minimum refers to
    pub fn awaiting(&self) -> Option<RecordId> {
        self.pending.map(|p| p.record)
    }

    /// Last distance the rider confirmed
    pub fn last_confirmed(&self) -> Option<u16> {
        self.last_confirmed
    }

    /// Drop the pending minimum once it is older than the window
    pub fn expire(&mut self, now_ms: u32) -> bool {
        match self.pending {
            Some(p) if elapsed(now_ms, p.since_ms) > self.window_ms => {
                debug!("minimum {} cm expired unconfirmed", p.distance_cm);
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Offer a primary distance; kept if it is a new, non-zero minimum
    pub fn offer(&mut self, distance_cm: u16, sample_index: Option<usize>, record: RecordId, now_ms: u32) -> bool {
        if distance_cm == 0 || self.pending.is_some_and(|p| distance_cm >= p.distance_cm) {
            return false;
        }
        self.pending = Some(PendingMinimum {
            distance_cm,
            sample_index,
            record,
            since_ms: now_ms,
        });
        true
    }

    /// Button released: hand out the pending minimum and clear it
    pub fn confirm(&mut self) -> Option<PendingMinimum> {
        let pending = self.pending.take()?;
        self.last_confirmed = Some(pending.distance_cm);
        Some(pending)
    }

    /// Forget the pending minimum if it belongs to `record`
    pub fn forget(&mut self, record: RecordId) {
        if self.awaiting() == Some(record) {
            self.pending = None;
        }
    }
}
