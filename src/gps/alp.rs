//! Assisted GPS (AID-ALPSRV)
//!
//! With AssistNow Autonomous/Offline data available the receiver asks the
//! host for pieces of the ALP file. Each request names an offset and a size in
//! 16-bit words; the answer repeats the request header with `dataSize` filled
//! in, followed by the data.

use heapless::Vec;

use super::command::{CommandError, GpsLink};
use super::ubx::{write_frame, AlpRequest, AID_ALPSRV, MAX_FRAME, MAX_PAYLOAD};
use super::GpsEngine;

/// Most data one answer can carry
pub const MAX_ALP_CHUNK: usize = MAX_PAYLOAD - AlpRequest::LEN;

/// Source of ALP file contents
pub trait AlpStore {
    /// Copy bytes starting at `offset` into `buf`, returning how many were available
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> usize;
}

/// ALP file held in memory
pub struct SliceAlpStore<'a>(pub &'a [u8]);

impl AlpStore for SliceAlpStore<'_> {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        let available = self.0.get(offset..).unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }
}

impl GpsEngine {
    /// Request the receiver is waiting on
    pub fn pending_alp_request(&self) -> Option<&AlpRequest> {
        self.alp_request.as_ref()
    }

    /// Answer the pending ALP request, if any
    ///
    /// Returns whether an answer was sent.
    pub fn serve_alp<L: GpsLink, S: AlpStore + ?Sized>(
        &mut self,
        link: &mut L,
        store: &mut S,
    ) -> Result<bool, CommandError> {
        let Some(request) = self.alp_request.take() else {
            return Ok(false);
        };

        let mut payload: Vec<u8, MAX_PAYLOAD> = Vec::new();
        // Capacity covers the header
        let _ = payload.extend_from_slice(&request.header);

        let wanted = (usize::from(request.size_words) * 2).min(MAX_ALP_CHUNK);
        let mut data = [0u8; MAX_ALP_CHUNK];
        let n = store.read(usize::from(request.offset_words) * 2, &mut data[..wanted]);
        let _ = payload.extend_from_slice(&data[..n]);
        let data_size = (n as u16).to_le_bytes();
        payload[AlpRequest::DATA_SIZE_OFFSET] = data_size[0];
        payload[AlpRequest::DATA_SIZE_OFFSET + 1] = data_size[1];

        let mut frame: Vec<u8, MAX_FRAME> = Vec::new();
        if !write_frame(AID_ALPSRV, &payload, &mut frame) {
            return Err(CommandError::FrameTooLarge);
        }
        link.write_all(&frame).map_err(|_| CommandError::Link)?;
        self.stats.alp_served += 1;
        trace!(
            "gps: served ALP file {} offset {} words, {} bytes",
            request.file_id,
            request.offset_words,
            n
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::ubx::tests::frame;
    use core::convert::Infallible;

    #[derive(Default)]
    struct Capture {
        written: std::vec::Vec<u8>,
    }

    impl GpsLink for Capture {
        type Error = Infallible;

        fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
            Ok(None)
        }
    }

    fn request(kind: u8, offset_words: u16, size_words: u16) -> std::vec::Vec<u8> {
        let mut header = [0u8; AlpRequest::LEN];
        header[0] = 2;
        header[1] = kind;
        header[2..4].copy_from_slice(&offset_words.to_le_bytes());
        header[4..6].copy_from_slice(&size_words.to_le_bytes());
        header[6..8].copy_from_slice(&7u16.to_le_bytes());
        frame(AID_ALPSRV, &header)
    }

    fn feed(engine: &mut GpsEngine, bytes: &[u8]) {
        for &b in bytes {
            engine.encode(b, 0);
        }
    }

    #[test]
    fn request_is_answered_from_store() {
        let file: std::vec::Vec<u8> = (0..=255u8).collect();
        let mut engine = GpsEngine::new();
        feed(&mut engine, &request(0, 4, 3));
        assert!(engine.pending_alp_request().is_some());

        let mut link = Capture::default();
        assert_eq!(engine.serve_alp(&mut link, &mut SliceAlpStore(&file)), Ok(true));
        assert!(engine.pending_alp_request().is_none());

        let written = &link.written;
        assert_eq!(&written[2..4], &[0x0B, 0x32]);
        let payload = &written[6..written.len() - 2];
        assert_eq!(payload.len(), AlpRequest::LEN + 6);
        assert_eq!(&payload[8..10], &6u16.to_le_bytes());
        assert_eq!(&payload[6..8], &7u16.to_le_bytes());
        assert_eq!(&payload[AlpRequest::LEN..], &[8, 9, 10, 11, 12, 13]);
        assert_eq!(engine.stats().alp_served, 1);
    }

    #[test]
    fn read_past_end_sends_what_exists() {
        let file = [1u8, 2, 3, 4];
        let mut engine = GpsEngine::new();
        feed(&mut engine, &request(0, 1, 8));
        let mut link = Capture::default();
        assert_eq!(engine.serve_alp(&mut link, &mut SliceAlpStore(&file)), Ok(true));
        let payload = &link.written[6..link.written.len() - 2];
        assert_eq!(&payload[8..10], &2u16.to_le_bytes());
        assert_eq!(&payload[AlpRequest::LEN..], &[3, 4]);
    }

    #[test]
    fn upload_and_idle_need_no_answer() {
        let mut engine = GpsEngine::new();
        let mut link = Capture::default();
        assert_eq!(engine.serve_alp(&mut link, &mut SliceAlpStore(&[])), Ok(false));
        feed(&mut engine, &request(AlpRequest::KIND_UPLOAD, 0, 4));
        assert_eq!(engine.serve_alp(&mut link, &mut SliceAlpStore(&[])), Ok(false));
        assert!(link.written.is_empty());
    }
}
