//! Recent records kept back for late confirmation

use heapless::Deque;

use super::record::{MeasurementRecord, RecordId};

/// Records held back by default
pub const LOOKBACK_CAPACITY: usize = 10;

/// Bounded FIFO of finished records
pub struct LookbackBuffer<const N: usize = LOOKBACK_CAPACITY> {
    records: Deque<MeasurementRecord, N>,
}

impl<const N: usize> LookbackBuffer<N> {
    pub const fn new() -> Self {
        Self { records: Deque::new() }
    }

    /// Append a record; when full, the oldest one is pushed out and returned
    pub fn push(&mut self, record: MeasurementRecord) -> Option<MeasurementRecord> {
        let evicted = if self.records.is_full() {
            self.records.pop_front()
        } else {
            None
        };
        // Room was made above
        let _ = self.records.push_back(record);
        evicted
    }

    pub fn front(&self) -> Option<&MeasurementRecord> {
        self.records.front()
    }

    pub fn pop_front(&mut self) -> Option<MeasurementRecord> {
        self.records.pop_front()
    }

    /// Record with `id`, if it has not left the buffer yet
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut MeasurementRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.is_full()
    }
}

impl<const N: usize> Default for LookbackBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleventh_record_pushes_out_the_first() {
        let mut buffer: LookbackBuffer = LookbackBuffer::new();
        let mut evicted = std::vec::Vec::new();
        for id in 0..11 {
            evicted.extend(buffer.push(MeasurementRecord::new(RecordId(id), id * 1_000)));
        }
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, RecordId(0));
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.front().map(|r| r.id), Some(RecordId(1)));
    }

    #[test]
    fn lookup_by_id_fails_after_eviction() {
        let mut buffer: LookbackBuffer<2> = LookbackBuffer::new();
        buffer.push(MeasurementRecord::new(RecordId(1), 0));
        assert!(buffer.get_mut(RecordId(1)).is_some());
        buffer.push(MeasurementRecord::new(RecordId(2), 0));
        buffer.push(MeasurementRecord::new(RecordId(3), 0));
        assert!(buffer.get_mut(RecordId(1)).is_none());
        assert!(buffer.get_mut(RecordId(3)).is_some());
    }
}
