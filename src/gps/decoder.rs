//! Byte-at-a-time framing of the receiver output
//!
//! UBX and NMEA share one serial line. The decoder validates framing and
//! checksums only; what a frame means is decided by the engine.

use heapless::Vec;

use super::ubx::{Checksum, MessageId, MAX_PAYLOAD, SYNC_1, SYNC_2};

/// Longest NMEA body (between `$` and `*`) we accept
pub const MAX_SENTENCE: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Null,
    UbxSync,
    /// Collecting class, id and the two length bytes
    UbxSync1 { received: u8 },
    UbxPayload,
    UbxChecksum,
    UbxChecksum1,
    TextStart,
    TextData,
    TextChecksum1,
    TextChecksum2,
    TextCr,
    TextLf,
}

/// A validated frame, borrowed from the decoder's buffer
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Ubx {
        id: MessageId,
        payload: &'a [u8],
        /// Tick at which the first sync byte arrived
        started_ms: u32,
    },
    /// NMEA sentence body without `$`, checksum and line end
    Text(&'a str),
}

/// Framing error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderStats {
    pub ubx_checksum_failures: u32,
    pub text_checksum_failures: u32,
    /// Frames longer than the receive buffer
    pub oversize_frames: u32,
    /// Bytes seen outside any frame
    pub discarded_bytes: u32,
    /// Sentences cut short by an unexpected byte
    pub text_aborts: u32,
}

pub struct FrameDecoder {
    state: State,
    header: [u8; 4],
    expected_len: usize,
    checksum: Checksum,
    text_checksum: u8,
    started_ms: u32,
    buf: Vec<u8, MAX_PAYLOAD>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            state: State::Null,
            header: [0; 4],
            expected_len: 0,
            checksum: Checksum { a: 0, b: 0 },
            text_checksum: 0,
            started_ms: 0,
            buf: Vec::new(),
            stats: DecoderStats {
                ubx_checksum_failures: 0,
                text_checksum_failures: 0,
                oversize_frames: 0,
                discarded_bytes: 0,
                text_aborts: 0,
            },
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Whether the decoder is between frames
    pub fn is_idle(&self) -> bool {
        self.state == State::Null
    }

    /// Feed one byte; returns the frame it completed, if any
    pub fn feed(&mut self, byte: u8, now_ms: u32) -> Option<Frame<'_>> {
        match self.state {
            State::Null => {
                if !self.start(byte, now_ms) {
                    self.stats.discarded_bytes += 1;
                    trace!("gps: discarded byte {:#x}", byte);
                }
            }
            State::UbxSync => {
                if byte == SYNC_2 {
                    self.state = State::UbxSync1 { received: 0 };
                    self.checksum = Checksum::default();
                } else {
                    self.reset();
                    self.start(byte, now_ms);
                }
            }
            State::UbxSync1 { received } => {
                self.header[received as usize] = byte;
                self.checksum.update(byte);
                if received < 3 {
                    self.state = State::UbxSync1 { received: received + 1 };
                } else {
                    self.expected_len = usize::from(u16::from_le_bytes([self.header[2], self.header[3]]));
                    if self.expected_len > MAX_PAYLOAD {
                        self.stats.oversize_frames += 1;
                        debug!("gps: UBX frame of {} bytes exceeds buffer", self.expected_len);
                        self.reset();
                    } else {
                        self.buf.clear();
                        self.state = if self.expected_len == 0 {
                            State::UbxChecksum
                        } else {
                            State::UbxPayload
                        };
                    }
                }
            }
            State::UbxPayload => {
                self.checksum.update(byte);
                // Length was checked against capacity in the header state
                let _ = self.buf.push(byte);
                if self.buf.len() == self.expected_len {
                    self.state = State::UbxChecksum;
                }
            }
            State::UbxChecksum => {
                if byte == self.checksum.a {
                    self.state = State::UbxChecksum1;
                } else {
                    self.ubx_checksum_failed();
                }
            }
            State::UbxChecksum1 => {
                if byte != self.checksum.b {
                    self.ubx_checksum_failed();
                    return None;
                }
                self.state = State::Null;
                return Some(Frame::Ubx {
                    id: MessageId::new(self.header[0], self.header[1]),
                    payload: &self.buf,
                    started_ms: self.started_ms,
                });
            }
            State::TextStart | State::TextData => {
                if byte == b'*' && self.state == State::TextData {
                    self.state = State::TextChecksum1;
                } else if byte == b'$' || byte == SYNC_1 || !is_printable(byte) || byte == b'*' {
                    self.abort_text(byte, now_ms);
                } else if self.buf.push(byte).is_err() || self.buf.len() > MAX_SENTENCE {
                    self.stats.oversize_frames += 1;
                    self.reset();
                } else {
                    self.text_checksum ^= byte;
                    self.state = State::TextData;
                }
            }
            State::TextChecksum1 | State::TextChecksum2 if byte == b'$' || byte == SYNC_1 => {
                self.abort_text(byte, now_ms);
            }
            State::TextChecksum1 => {
                if hex_value(byte) == Some(self.text_checksum >> 4) {
                    self.state = State::TextChecksum2;
                } else {
                    self.text_checksum_failed();
                }
            }
            State::TextChecksum2 => {
                if hex_value(byte) == Some(self.text_checksum & 0x0F) {
                    self.state = State::TextCr;
                } else {
                    self.text_checksum_failed();
                }
            }
            State::TextCr => {
                if byte == b'\r' {
                    self.state = State::TextLf;
                } else {
                    self.abort_text(byte, now_ms);
                }
            }
            State::TextLf => {
                if byte != b'\n' {
                    self.abort_text(byte, now_ms);
                    return None;
                }
                self.state = State::Null;
                // Only printable ASCII reaches the buffer
                return core::str::from_utf8(&self.buf).ok().map(Frame::Text);
            }
        }
        None
    }

    /// Enter a frame if `byte` starts one
    fn start(&mut self, byte: u8, now_ms: u32) -> bool {
        match byte {
            SYNC_1 => {
                self.state = State::UbxSync;
                self.started_ms = now_ms;
                true
            }
            b'$' => {
                self.state = State::TextStart;
                self.started_ms = now_ms;
                self.text_checksum = 0;
                self.buf.clear();
                true
            }
            _ => false,
        }
    }

    fn reset(&mut self) {
        self.state = State::Null;
        self.buf.clear();
    }

    /// Drop the sentence in progress and resynchronise on `byte`
    fn abort_text(&mut self, byte: u8, now_ms: u32) {
        self.stats.text_aborts += 1;
        debug!("gps: sentence aborted by byte {:#x}", byte);
        self.reset();
        self.start(byte, now_ms);
    }

    fn ubx_checksum_failed(&mut self) {
        self.stats.ubx_checksum_failures += 1;
        debug!(
            "gps: UBX checksum mismatch on {:#x}/{:#x}",
            self.header[0],
            self.header[1]
        );
        self.reset();
    }

    fn text_checksum_failed(&mut self) {
        self.stats.text_checksum_failures += 1;
        debug!("gps: NMEA checksum mismatch");
        self.reset();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}
