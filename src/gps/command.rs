//! Outbound commands and receiver configuration
//!
//! Commands are written whole, then the engine keeps decoding incoming bytes
//! until the matching ACK/NAK arrives or [`ACK_TIMEOUT_MS`] passes. Failed
//! commands are retried; a command that never succeeds is reported, never
//! fatal.

use embedded_io::{Read, ReadReady, Write};
use heapless::Vec;
use thiserror::Error;

use super::ubx::{
    self, write_frame, MessageId, PortConfig, CFG_MSG, CFG_NAV5, CFG_PRT, CFG_RATE, CFG_SBAS, MAX_FRAME, MON_VER,
};
use super::{Acknowledgement, GpsEngine, GPS_BAUD_RATE};
use crate::clock::{elapsed, Clock};

/// How long to wait for an ACK/NAK or a poll answer
pub const ACK_TIMEOUT_MS: u32 = 1_000;
/// Total attempts per command
pub const COMMAND_ATTEMPTS: u8 = 3;

/// Navigation solution period
const MEASUREMENT_RATE_MS: u16 = 1_000;
/// CFG-NAV5 dynamic platform model: automotive
const DYNAMIC_MODEL_AUTOMOTIVE: u8 = 4;

/// Messages enabled on UART1 with their rate in navigation epochs
const PERIODIC_MESSAGES: [(MessageId, u8); 8] = [
    (ubx::NAV_POSLLH, 1),
    (ubx::NAV_VELNED, 1),
    (ubx::NAV_SOL, 1),
    (ubx::NAV_DOP, 1),
    (ubx::NAV_TIMEUTC, 1),
    (ubx::NAV_STATUS, 1),
    (ubx::NAV_SBAS, 10),
    (ubx::MON_HW, 10),
];

/// Serial connection to the receiver
///
/// `read_byte` must not block: it returns `None` when nothing is buffered.
pub trait GpsLink {
    type Error;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error>;
}

impl<T: Read + Write + ReadReady> GpsLink for T {
    type Error = T::Error;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        Write::write_all(self, bytes)?;
        self.flush()
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        if !self.read_ready()? {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        Ok((self.read(&mut byte)? == 1).then_some(byte[0]))
    }
}

/// Why a command did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    #[error("receiver rejected {0:?}")]
    Nak(MessageId),
    #[error("no answer to {0:?}")]
    Timeout(MessageId),
    #[error("serial link failed")]
    Link,
    #[error("command payload too large")]
    FrameTooLarge,
}

/// Result of [`GpsEngine::configure`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    /// Commands sent, including the version poll
    pub sent: u8,
    pub failures: Vec<CommandError, 16>,
}

impl ConfigureReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl GpsEngine {
    /// Send a command and wait for its acknowledgement, retrying on NAK or timeout
    pub fn send_command<L: GpsLink, C: Clock>(
        &mut self,
        link: &mut L,
        clock: &C,
        id: MessageId,
        payload: &[u8],
    ) -> Result<(), CommandError> {
        self.exchange(link, clock, id, payload, |engine| match engine.last_ack {
            Some(Acknowledgement::Ack(acked)) if acked == id => Some(Ok(())),
            Some(Acknowledgement::Nak(nacked)) if nacked == id => Some(Err(CommandError::Nak(id))),
            _ => None,
        })
    }

    /// Request a message and wait until it has been decoded
    pub fn poll<L: GpsLink, C: Clock>(&mut self, link: &mut L, clock: &C, id: MessageId) -> Result<(), CommandError> {
        self.exchange(link, clock, id, &[], |engine| {
            (engine.last_decoded == Some(id)).then_some(Ok(()))
        })
    }

    /// Read and decode everything the link has buffered
    pub fn pump<L: GpsLink>(&mut self, link: &mut L, now_ms: u32) -> Result<usize, CommandError> {
        let mut decoded = 0;
        while let Some(byte) = link.read_byte().map_err(|_| CommandError::Link)? {
            if self.encode(byte, now_ms) {
                decoded += 1;
            }
        }
        Ok(decoded)
    }

    /// Put the receiver into the configuration the engine expects
    ///
    /// UBX-only output, 1 Hz solutions, automotive model, SBAS, the periodic
    /// messages the engine dispatches, and a version poll.
    pub fn configure<L: GpsLink, C: Clock>(&mut self, link: &mut L, clock: &C) -> ConfigureReport {
        let mut report = ConfigureReport::default();

        let port = PortConfig {
            port_id: PortConfig::UART1,
            mode: PortConfig::MODE_8N1,
            baud_rate: GPS_BAUD_RATE,
            in_proto: PortConfig::PROTO_UBX,
            out_proto: PortConfig::PROTO_UBX,
        };
        let step = self.send_command(link, clock, CFG_PRT, &port.to_payload());
        report.record(step);

        let rate = MEASUREMENT_RATE_MS.to_le_bytes();
        let step = self.send_command(link, clock, CFG_RATE, &[rate[0], rate[1], 0x01, 0x00, 0x01, 0x00]);
        report.record(step);

        let mut nav5 = [0u8; 36];
        // Apply the dynamic model only
        nav5[0] = 0x01;
        nav5[2] = DYNAMIC_MODEL_AUTOMOTIVE;
        let step = self.send_command(link, clock, CFG_NAV5, &nav5);
        report.record(step);

        // Enabled; ranging, corrections and integrity; up to 3 channels; auto scan
        let step = self.send_command(link, clock, CFG_SBAS, &[0x01, 0x07, 0x03, 0x00, 0, 0, 0, 0]);
        report.record(step);

        for (id, rate) in PERIODIC_MESSAGES {
            let step = self.send_command(link, clock, CFG_MSG, &[id.class(), id.id(), rate]);
            report.record(step);
        }

        let step = self.poll(link, clock, MON_VER);
        report.record(step);

        if report.is_complete() {
            info!("gps: receiver configured ({} commands)", report.sent);
        } else {
            warn!(
                "gps: {} of {} configuration commands failed, continuing",
                report.failures.len(),
                report.sent
            );
        }
        report
    }

    fn exchange<L: GpsLink, C: Clock>(
        &mut self,
        link: &mut L,
        clock: &C,
        id: MessageId,
        payload: &[u8],
        done: impl Fn(&Self) -> Option<Result<(), CommandError>>,
    ) -> Result<(), CommandError> {
        let mut frame: Vec<u8, MAX_FRAME> = Vec::new();
        if !write_frame(id, payload, &mut frame) {
            return Err(CommandError::FrameTooLarge);
        }

        let mut last_error = CommandError::Timeout(id);
        for attempt in 1..=COMMAND_ATTEMPTS {
            self.last_ack = None;
            self.last_decoded = None;
            link.write_all(&frame).map_err(|_| CommandError::Link)?;

            match self.wait(link, clock, id, &done) {
                Ok(()) => return Ok(()),
                Err(CommandError::Link) => return Err(CommandError::Link),
                Err(error) => {
                    warn!(
                        "gps: {:#x}/{:#x} attempt {} of {}: {}",
                        id.class(),
                        id.id(),
                        attempt,
                        COMMAND_ATTEMPTS,
                        error
                    );
                    last_error = error;
                }
            }
        }
        self.stats.command_failures += 1;
        Err(last_error)
    }

    /// Decode until `done` has an answer or the timeout passes
    fn wait<L: GpsLink, C: Clock>(
        &mut self,
        link: &mut L,
        clock: &C,
        id: MessageId,
        done: &impl Fn(&Self) -> Option<Result<(), CommandError>>,
    ) -> Result<(), CommandError> {
        let since = clock.now_ms();
        loop {
            while let Some(byte) = link.read_byte().map_err(|_| CommandError::Link)? {
                if self.encode(byte, clock.now_ms()) {
                    if let Some(answer) = done(self) {
                        return answer;
                    }
                }
            }
            if elapsed(clock.now_ms(), since) >= ACK_TIMEOUT_MS {
                return Err(CommandError::Timeout(id));
            }
        }
    }
}

impl ConfigureReport {
    fn record(&mut self, step: Result<(), CommandError>) {
        self.sent += 1;
        if let Err(error) = step {
            let _ = self.failures.push(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::ubx::tests::frame;
    use crate::gps::ubx::{ACK_ACK, ACK_NAK};
    use core::cell::Cell;
    use core::convert::Infallible;
    use std::collections::VecDeque;

    /// Advances one millisecond per query
    struct TickClock(Cell<u32>);

    impl Clock for TickClock {
        fn now_ms(&self) -> u32 {
            let now = self.0.get();
            self.0.set(now + 1);
            now
        }

        fn now_us(&self) -> u32 {
            self.now_ms() * 1_000
        }
    }

    /// Receiver stand-in answering each flushed frame through `respond`
    struct MockReceiver {
        rx: VecDeque<u8>,
        pending: std::vec::Vec<u8>,
        written: std::vec::Vec<std::vec::Vec<u8>>,
        respond: fn(&[u8], usize) -> Option<std::vec::Vec<u8>>,
    }

    impl MockReceiver {
        fn new(respond: fn(&[u8], usize) -> Option<std::vec::Vec<u8>>) -> Self {
            Self {
                rx: VecDeque::new(),
                pending: std::vec::Vec::new(),
                written: std::vec::Vec::new(),
                respond,
            }
        }
    }

    impl embedded_io::ErrorType for MockReceiver {
        type Error = Infallible;
    }

    impl Read for MockReceiver {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let mut n = 0;
            while n < buf.len() {
                let Some(byte) = self.rx.pop_front() else { break };
                buf[n] = byte;
                n += 1;
            }
            Ok(n)
        }
    }

    impl ReadReady for MockReceiver {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.rx.is_empty())
        }
    }

    impl Write for MockReceiver {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.pending.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            let sent = core::mem::take(&mut self.pending);
            if let Some(answer) = (self.respond)(&sent, self.written.len()) {
                self.rx.extend(answer);
            }
            self.written.push(sent);
            Ok(())
        }
    }

    fn ack(sent: &[u8], _: usize) -> Option<std::vec::Vec<u8>> {
        Some(frame(ACK_ACK, &sent[2..4]))
    }

    fn nak_then_ack(sent: &[u8], index: usize) -> Option<std::vec::Vec<u8>> {
        let id = if index == 0 { ACK_NAK } else { ACK_ACK };
        Some(frame(id, &sent[2..4]))
    }

    fn silent(_: &[u8], _: usize) -> Option<std::vec::Vec<u8>> {
        None
    }

    fn cooperative(sent: &[u8], _: usize) -> Option<std::vec::Vec<u8>> {
        if MessageId::new(sent[2], sent[3]) == MON_VER {
            let mut version = [0u8; 40];
            version[..4].copy_from_slice(b"7.03");
            version[30..38].copy_from_slice(b"00040007");
            Some(frame(MON_VER, &version))
        } else {
            ack(sent, 0)
        }
    }

    #[test]
    fn acknowledged_command_is_sent_once() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(ack);
        let clock = TickClock(Cell::new(0));
        assert_eq!(engine.send_command(&mut link, &clock, CFG_RATE, &[0xE8, 0x03, 1, 0, 1, 0]), Ok(()));
        assert_eq!(link.written.len(), 1);
        assert_eq!(link.written[0], frame(CFG_RATE, &[0xE8, 0x03, 1, 0, 1, 0]));
    }

    #[test]
    fn nak_is_retried() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(nak_then_ack);
        let clock = TickClock(Cell::new(0));
        assert_eq!(engine.send_command(&mut link, &clock, CFG_SBAS, &[1, 7, 3, 0, 0, 0, 0, 0]), Ok(()));
        assert_eq!(link.written.len(), 2);
        assert_eq!(engine.stats().command_failures, 0);
    }

    #[test]
    fn ack_for_other_message_does_not_count() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(|_, _| Some(frame(ACK_ACK, &[0x06, 0x24])));
        let clock = TickClock(Cell::new(0));
        assert_eq!(
            engine.send_command(&mut link, &clock, CFG_RATE, &[0xE8, 0x03, 1, 0, 1, 0]),
            Err(CommandError::Timeout(CFG_RATE))
        );
    }

    #[test]
    fn silent_receiver_times_out_after_all_attempts() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(silent);
        let clock = TickClock(Cell::new(0));
        assert_eq!(
            engine.send_command(&mut link, &clock, CFG_NAV5, &[0; 36]),
            Err(CommandError::Timeout(CFG_NAV5))
        );
        assert_eq!(link.written.len(), usize::from(COMMAND_ATTEMPTS));
        assert_eq!(engine.stats().command_failures, 1);
    }

    #[test]
    fn configure_runs_full_sequence() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(cooperative);
        let clock = TickClock(Cell::new(0));
        let report = engine.configure(&mut link, &clock);
        assert!(report.is_complete());
        assert_eq!(report.sent, 13);
        assert_eq!(link.written.len(), 13);
        assert_eq!(MessageId::new(link.written[0][2], link.written[0][3]), CFG_PRT);
        let version = engine.version().expect("version polled");
        assert_eq!(version.hardware.as_str(), "00040007");
    }

    #[test]
    fn configure_failure_is_reported_not_fatal() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(silent);
        let clock = TickClock(Cell::new(0));
        let report = engine.configure(&mut link, &clock);
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 13);
        assert_eq!(report.failures[12], CommandError::Timeout(MON_VER));
    }

    #[test]
    fn pump_drains_buffered_bytes() {
        let mut engine = GpsEngine::new();
        let mut link = MockReceiver::new(silent);
        link.rx.extend(frame(ACK_ACK, &[0x06, 0x01]));
        assert_eq!(engine.pump(&mut link, 0), Ok(1));
        assert!(link.rx.is_empty());
    }
}
