//! u-blox GPS protocol engine
//!
//! Bytes from the receiver go through [`GpsEngine::encode`] one at a time.
//! The engine frames them ([`decoder`]), decodes UBX payloads into typed
//! messages ([`ubx`]), assembles complete fixes ([`fix`]), sets the wall clock
//! from receiver time ([`time`]) and answers assisted-GPS requests ([`alp`]).
//! Outbound configuration with ACK handling lives in [`command`].

pub mod alp;
pub mod command;
pub mod decoder;
pub mod fix;
pub mod nmea;
pub mod time;
pub mod ubx;

use chrono::NaiveDateTime;

pub use alp::AlpStore;
pub use command::{CommandError, ConfigureReport, GpsLink};
pub use decoder::{DecoderStats, Frame, FrameDecoder};
pub use fix::{FixAssembler, FixStats, GpsFix};
pub use time::{TimeSync, TimeSyncOutcome};
pub use ubx::{MessageId, ParseError, UbxMessage};

use self::nmea::{Sentence, SentenceLog};
use self::ubx::{AlpRequest, MonHw, MonVer, NavSbas, NavStatus, PortConfig};
use crate::clock::{elapsed, WallClock};
use crate::config::FixWaitPolicy;

/// Serial speed of the receiver's UART1
pub const GPS_BAUD_RATE: u32 = 9_600;

/// Age after which the last fix no longer counts as tracked: one missed
/// 1 Hz epoch plus margin
pub const FIX_STALE_MS: u32 = 1_500;

/// Outcome of the last acknowledged command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Acknowledgement {
    Ack(MessageId),
    Nak(MessageId),
}

/// Counters of the whole engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsStats {
    pub decoder: DecoderStats,
    pub fixes: FixStats,
    /// Valid frames whose payload could not be decoded
    pub parse_errors: u32,
    /// Valid frames of messages we do not handle
    pub unhandled: u32,
    /// Commands given up on after all attempts
    pub command_failures: u32,
    pub alp_served: u32,
}

/// Receiver state as far as the engine has seen it
#[derive(Default)]
pub struct GpsEngine {
    decoder: FrameDecoder,
    fixes: FixAssembler,
    time: TimeSync,
    wall_clock: WallClock,
    sentences: SentenceLog,
    last_ack: Option<Acknowledgement>,
    last_decoded: Option<MessageId>,
    status: Option<NavStatus>,
    hardware: Option<MonHw>,
    version: Option<MonVer>,
    sbas: Option<NavSbas>,
    port: Option<PortConfig>,
    alp_request: Option<AlpRequest>,
    /// Tick at which the last epoch completed
    last_fix_ms: Option<u32>,
    stats: GpsStats,
}

impl GpsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received byte
    ///
    /// Returns true when the byte completed a frame with a valid checksum.
    /// Frames we have no use for, or whose payload is too short, are counted
    /// and otherwise ignored.
    pub fn encode(&mut self, byte: u8, now_ms: u32) -> bool {
        let (id, parsed, started_ms) = match self.decoder.feed(byte, now_ms) {
            None => return false,
            Some(Frame::Text(body)) => {
                self.sentences.record(Sentence::new(body));
                return true;
            }
            Some(Frame::Ubx {
                id,
                payload,
                started_ms,
            }) => (id, UbxMessage::parse(id, payload), started_ms),
        };

        match parsed {
            Ok(message) => {
                self.last_decoded = Some(id);
                self.dispatch(message, started_ms, now_ms);
                true
            }
            Err(ParseError::Unsupported(id)) => {
                self.stats.unhandled += 1;
                debug!("gps: ignoring UBX {:#x}/{:#x}", id.class(), id.id());
                true
            }
            Err(ParseError::TooShort { id, expected, actual }) => {
                self.stats.parse_errors += 1;
                warn!(
                    "gps: UBX {:#x}/{:#x} payload {} bytes, expected {}",
                    id.class(),
                    id.id(),
                    actual,
                    expected
                );
                true
            }
        }
    }

    fn dispatch(&mut self, message: UbxMessage, started_ms: u32, now_ms: u32) {
        match message {
            UbxMessage::Ack(id) => self.last_ack = Some(Acknowledgement::Ack(id)),
            UbxMessage::Nak(id) => self.last_ack = Some(Acknowledgement::Nak(id)),
            UbxMessage::PortConfig(port) => self.port = Some(port),
            UbxMessage::Version(version) => {
                info!("gps: receiver {} / {}", version.software.as_str(), version.hardware.as_str());
                self.version = Some(version);
            }
            UbxMessage::Hardware(hw) => self.hardware = Some(hw),
            UbxMessage::Status(status) => self.status = Some(status),
            UbxMessage::Dop(dop) => {
                let completed = self.fixes.hdop(&dop);
                self.fix_part(completed, now_ms);
            }
            UbxMessage::Solution(sol) => {
                let completed = self.fixes.info(&sol);
                self.fix_part(completed, now_ms);
            }
            UbxMessage::Velocity(vel) => {
                let completed = self.fixes.velocity(&vel);
                self.fix_part(completed, now_ms);
            }
            UbxMessage::Position(pos) => {
                let completed = self.fixes.position(&pos);
                self.fix_part(completed, now_ms);
            }
            UbxMessage::TimeUtc(t) => {
                self.time.offer(&t, started_ms, now_ms, &mut self.wall_clock);
            }
            UbxMessage::Sbas(sbas) => self.sbas = Some(sbas),
            UbxMessage::AlpRequest(request) => {
                if request.kind != AlpRequest::KIND_UPLOAD {
                    self.alp_request = Some(request);
                }
            }
        }
    }

    fn fix_part(&mut self, completed: bool, now_ms: u32) {
        if completed {
            self.last_fix_ms = Some(now_ms);
        }
    }

    /// Last complete fix, however old
    pub fn fix(&self) -> Option<&GpsFix> {
        self.fixes.current()
    }

    /// Last complete fix if it arrived less than [`FIX_STALE_MS`] ago
    pub fn recent_fix(&self, now_ms: u32) -> Option<&GpsFix> {
        let at = self.last_fix_ms?;
        if elapsed(now_ms, at) < FIX_STALE_MS {
            self.fix()
        } else {
            None
        }
    }

    /// Whether a positioned fix is still being tracked
    pub fn has_recent_position(&self, now_ms: u32) -> bool {
        self.recent_fix(now_ms).is_some_and(GpsFix::has_position)
    }

    /// Last complete fix, once per epoch
    pub fn take_new_fix(&mut self) -> Option<GpsFix> {
        self.fixes.take_new_fix()
    }

    /// Whether the last fix has a usable position
    pub fn has_position(&self) -> bool {
        self.fix().is_some_and(GpsFix::has_position)
    }

    /// Current UTC from the GPS-set wall clock
    pub fn utc_now(&self, now_ms: u32) -> Option<NaiveDateTime> {
        self.wall_clock.now(now_ms)
    }

    pub fn wall_clock(&self) -> &WallClock {
        &self.wall_clock
    }

    pub fn last_ack(&self) -> Option<Acknowledgement> {
        self.last_ack
    }

    pub fn status(&self) -> Option<&NavStatus> {
        self.status.as_ref()
    }

    pub fn hardware(&self) -> Option<&MonHw> {
        self.hardware.as_ref()
    }

    pub fn version(&self) -> Option<&MonVer> {
        self.version.as_ref()
    }

    pub fn sbas(&self) -> Option<&NavSbas> {
        self.sbas.as_ref()
    }

    pub fn port(&self) -> Option<&PortConfig> {
        self.port.as_ref()
    }

    /// Last NMEA sentence, if any arrived
    pub fn last_sentence(&self) -> Option<&str> {
        self.sentences.last()
    }

    pub fn stats(&self) -> GpsStats {
        GpsStats {
            decoder: self.decoder.stats(),
            fixes: self.fixes.stats(),
            ..self.stats
        }
    }

    /// Whether the start condition of `policy` holds
    pub fn fix_wait_satisfied(&self, policy: FixWaitPolicy) -> bool {
        match policy {
            FixWaitPolicy::None => true,
            FixWaitPolicy::Position => self.has_position(),
            FixWaitPolicy::Time => self.wall_clock.is_set(),
            FixWaitPolicy::Satellites(n) => self.fix().is_some_and(|fix| fix.satellites >= n),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::ubx::tests::frame;
    use super::ubx::{ACK_ACK, MON_VER, NAV_DOP, NAV_POSLLH, NAV_SOL, NAV_TIMEUTC, NAV_VELNED};
    use super::*;

    fn feed(engine: &mut GpsEngine, bytes: &[u8], now_ms: u32) -> usize {
        bytes.iter().filter(|&&b| engine.encode(b, now_ms)).count()
    }

    /// Position, velocity, solution and DOP of one epoch, as the receiver sends them
    pub(crate) fn epoch(itow: u32, satellites: u8) -> std::vec::Vec<u8> {
        let tow = itow.to_le_bytes();
        let mut pos = [0u8; 28];
        pos[..4].copy_from_slice(&tow);
        pos[8..12].copy_from_slice(&487_000_000i32.to_le_bytes());
        let mut vel = [0u8; 36];
        vel[..4].copy_from_slice(&tow);
        vel[20..24].copy_from_slice(&420u32.to_le_bytes());
        let mut sol = [0u8; 52];
        sol[..4].copy_from_slice(&tow);
        sol[8..10].copy_from_slice(&2_300u16.to_le_bytes());
        sol[10] = 3;
        sol[11] = 0x0D;
        sol[47] = satellites;
        let mut dop = [0u8; 18];
        dop[..4].copy_from_slice(&tow);
        dop[12..14].copy_from_slice(&110u16.to_le_bytes());

        let mut bytes = frame(NAV_POSLLH, &pos);
        bytes.extend(frame(NAV_VELNED, &vel));
        bytes.extend(frame(NAV_SOL, &sol));
        bytes.extend(frame(NAV_DOP, &dop));
        bytes
    }

    #[test]
    fn ubx_frame_dispatches_once() {
        let mut engine = GpsEngine::new();
        let bytes = frame(ACK_ACK, &[0x06, 0x08]);
        let mut completed = std::vec::Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            if engine.encode(b, 0) {
                completed.push(i);
            }
        }
        assert_eq!(completed, [bytes.len() - 1]);
        assert_eq!(engine.last_ack(), Some(Acknowledgement::Ack(ubx::CFG_RATE)));
    }

    #[test]
    fn corrupted_frame_is_not_dispatched() {
        let mut engine = GpsEngine::new();
        let mut bytes = frame(ACK_ACK, &[0x06, 0x08]);
        bytes[6] = 0x07;
        assert_eq!(feed(&mut engine, &bytes, 0), 0);
        assert_eq!(engine.last_ack(), None);
        assert_eq!(engine.stats().decoder.ubx_checksum_failures, 1);
    }

    #[test]
    fn epoch_produces_fix() {
        let mut engine = GpsEngine::new();
        assert_eq!(feed(&mut engine, &epoch(5_000, 7), 0), 4);
        let fix = engine.take_new_fix().expect("fix");
        assert_eq!(fix.tow, 5_000);
        assert_eq!(fix.lat, 487_000_000);
        assert_eq!(fix.speed_cm_s, 420);
        assert_eq!(fix.hdop, 110);
        assert!(engine.has_position());
        assert!(engine.fix_wait_satisfied(FixWaitPolicy::Satellites(7)));
        assert!(!engine.fix_wait_satisfied(FixWaitPolicy::Satellites(8)));
    }

    #[test]
    fn fix_goes_stale_without_new_epochs() {
        let mut engine = GpsEngine::new();
        assert!(engine.recent_fix(0).is_none());
        feed(&mut engine, &epoch(5_000, 7), 2_000);
        assert!(engine.has_recent_position(2_000));
        assert!(engine.has_recent_position(2_000 + FIX_STALE_MS - 1));
        assert!(engine.recent_fix(2_000 + FIX_STALE_MS).is_none());
        assert!(!engine.has_recent_position(2_000 + FIX_STALE_MS));
        // The fix itself is kept
        assert!(engine.has_position());

        feed(&mut engine, &epoch(6_000, 7), 4_000);
        assert_eq!(engine.recent_fix(4_100).map(|f| f.tow), Some(6_000));
    }

    /// NAV-TIMEUTC for 2024-06-01 08:00:00, all validity flags set
    pub(crate) fn time_utc() -> std::vec::Vec<u8> {
        let mut p = [0u8; 20];
        p[4..8].copy_from_slice(&20u32.to_le_bytes());
        p[12..14].copy_from_slice(&2024u16.to_le_bytes());
        p[14] = 6;
        p[15] = 1;
        p[16] = 8;
        p[19] = 0x07;
        frame(NAV_TIMEUTC, &p)
    }

    #[test]
    fn time_message_sets_clock() {
        let mut engine = GpsEngine::new();
        assert!(!engine.fix_wait_satisfied(FixWaitPolicy::Time));
        feed(&mut engine, &time_utc(), 500);
        assert!(engine.fix_wait_satisfied(FixWaitPolicy::Time));
        assert!(engine.utc_now(1_500).is_some());
    }

    #[test]
    fn unsupported_and_short_frames_are_counted() {
        let mut engine = GpsEngine::new();
        assert_eq!(feed(&mut engine, &frame(MessageId::new(0x02, 0x10), &[1, 2, 3]), 0), 1);
        assert_eq!(feed(&mut engine, &frame(MessageId::new(0x0A, 0x99), &[1, 2, 3, 4]), 0), 1);
        assert_eq!(feed(&mut engine, &frame(MON_VER, &[b'x'; 8]), 0), 1);
        let stats = engine.stats();
        assert_eq!(stats.unhandled, 2);
        assert_eq!(stats.parse_errors, 1);
        assert!(engine.version().is_none());
        assert_eq!(engine.last_decoded, None);
    }

    #[test]
    fn nmea_sentence_is_kept() {
        let mut engine = GpsEngine::new();
        assert_eq!(feed(&mut engine, b"$GPTXT,01,01,02,ANTSTATUS=OK*3B\r\n", 0), 1);
        assert_eq!(engine.last_sentence(), Some("GPTXT,01,01,02,ANTSTATUS=OK"));
    }
}
