//! UBX message layer
//!
//! Payloads are decoded field by field at their documented offsets into
//! plain structs; nothing is reinterpreted in place.

use heapless::{String, Vec};
use thiserror::Error;

/// First sync byte
pub const SYNC_1: u8 = 0xB5;
/// Second sync byte
pub const SYNC_2: u8 = 0x62;
/// Sync, class, id, length
pub const HEADER_LEN: usize = 6;
/// Largest payload the receive buffer holds
pub const MAX_PAYLOAD: usize = 512;
/// Largest frame we send
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD + 2;

/// Message class and id as one number, class in the high byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageId(pub u16);

impl MessageId {
    pub const fn new(class: u8, id: u8) -> Self {
        Self(((class as u16) << 8) | id as u16)
    }

    pub const fn class(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn id(self) -> u8 {
        self.0 as u8
    }
}

pub const NAV_POSLLH: MessageId = MessageId::new(0x01, 0x02);
pub const NAV_STATUS: MessageId = MessageId::new(0x01, 0x03);
pub const NAV_DOP: MessageId = MessageId::new(0x01, 0x04);
pub const NAV_SOL: MessageId = MessageId::new(0x01, 0x06);
pub const NAV_VELNED: MessageId = MessageId::new(0x01, 0x12);
pub const NAV_TIMEUTC: MessageId = MessageId::new(0x01, 0x21);
pub const NAV_SBAS: MessageId = MessageId::new(0x01, 0x32);
pub const ACK_NAK: MessageId = MessageId::new(0x05, 0x00);
pub const ACK_ACK: MessageId = MessageId::new(0x05, 0x01);
pub const CFG_PRT: MessageId = MessageId::new(0x06, 0x00);
pub const CFG_MSG: MessageId = MessageId::new(0x06, 0x01);
pub const CFG_RATE: MessageId = MessageId::new(0x06, 0x08);
pub const CFG_SBAS: MessageId = MessageId::new(0x06, 0x16);
pub const CFG_NAV5: MessageId = MessageId::new(0x06, 0x24);
pub const MON_VER: MessageId = MessageId::new(0x0A, 0x04);
pub const MON_HW: MessageId = MessageId::new(0x0A, 0x09);
pub const AID_ALPSRV: MessageId = MessageId::new(0x0B, 0x32);

/// Payload decoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    #[error("payload of {id:?} has {actual} bytes, expected {expected}")]
    TooShort { id: MessageId, expected: usize, actual: usize },
    #[error("no decoder for {0:?}")]
    Unsupported(MessageId),
}

/// Running 8-bit Fletcher checksum over class, id, length and payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    pub a: u8,
    pub b: u8,
}

impl Checksum {
    pub fn update(&mut self, byte: u8) {
        self.a = self.a.wrapping_add(byte);
        self.b = self.b.wrapping_add(self.a);
    }

    pub fn over(bytes: &[u8]) -> Self {
        let mut checksum = Self::default();
        for &byte in bytes {
            checksum.update(byte);
        }
        checksum
    }
}

/// Serialise a complete frame into `out`
///
/// Returns `false` if the payload does not fit.
pub fn write_frame<const N: usize>(id: MessageId, payload: &[u8], out: &mut Vec<u8, N>) -> bool {
    out.clear();
    let Ok(len) = u16::try_from(payload.len()) else {
        return false;
    };
    let len = len.to_le_bytes();
    let header = [SYNC_1, SYNC_2, id.class(), id.id(), len[0], len[1]];
    if out.extend_from_slice(&header).is_err() || out.extend_from_slice(payload).is_err() {
        return false;
    }
    let checksum = Checksum::over(&out[2..]);
    out.extend_from_slice(&[checksum.a, checksum.b]).is_ok()
}

fn u16_at(p: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([p[offset], p[offset + 1]])
}

fn u32_at(p: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([p[offset], p[offset + 1], p[offset + 2], p[offset + 3]])
}

fn i32_at(p: &[u8], offset: usize) -> i32 {
    u32_at(p, offset) as i32
}

fn text_at<const N: usize>(p: &[u8], offset: usize) -> String<N> {
    let field = &p[offset..offset + N];
    let end = field.iter().position(|&b| b == 0).unwrap_or(N);
    let mut text = String::new();
    for &b in &field[..end] {
        if b.is_ascii_graphic() || b == b' ' {
            let _ = text.push(b as char);
        }
    }
    text
}

/// NAV-POSLLH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavPosLlh {
    pub itow: u32,
    /// 1e-7 degrees
    pub lon: i32,
    /// 1e-7 degrees
    pub lat: i32,
    /// Height above ellipsoid, mm
    pub height_mm: i32,
    /// Height above mean sea level, mm
    pub hmsl_mm: i32,
    pub h_acc_mm: u32,
}

/// NAV-STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavStatus {
    pub itow: u32,
    pub fix_type: u8,
    pub flags: u8,
    pub ttff_ms: u32,
    /// Milliseconds since receiver start-up
    pub uptime_ms: u32,
}

/// NAV-DOP, values in 0.01
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavDop {
    pub itow: u32,
    pub gdop: u16,
    pub pdop: u16,
    pub vdop: u16,
    pub hdop: u16,
}

/// NAV-SOL, the parts we use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavSol {
    pub itow: u32,
    pub week: i16,
    pub fix_type: u8,
    pub flags: u8,
    pub satellites: u8,
}

/// NAV-VELNED, the parts we use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavVelNed {
    pub itow: u32,
    /// Ground speed, cm/s
    pub ground_speed_cm_s: u32,
    /// Course over ground, 1e-5 degrees
    pub heading: i32,
}

/// NAV-TIMEUTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavTimeUtc {
    pub itow: u32,
    /// Time accuracy estimate, ns
    pub t_acc_ns: u32,
    pub nano: i32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub valid: u8,
}

impl NavTimeUtc {
    /// UTC fully resolved (`validUTC`)
    pub const VALID_UTC: u8 = 0x04;
}

/// NAV-SBAS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavSbas {
    pub itow: u32,
    pub geo: u8,
    pub mode: u8,
    pub system: i8,
    pub service: u8,
    pub count: u8,
}

/// MON-HW, antenna and noise health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonHw {
    pub noise_per_ms: u16,
    pub agc_count: u16,
    pub antenna_status: u8,
    pub antenna_power: u8,
    pub jamming: u8,
}

/// MON-VER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonVer {
    pub software: String<30>,
    pub hardware: String<10>,
}

/// CFG-PRT echo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortConfig {
    pub port_id: u8,
    pub mode: u32,
    pub baud_rate: u32,
    pub in_proto: u16,
    pub out_proto: u16,
}

impl PortConfig {
    pub const UART1: u8 = 1;
    pub const PROTO_UBX: u16 = 0x0001;
    pub const PROTO_NMEA: u16 = 0x0002;
    /// 8 data bits, no parity, 1 stop bit
    pub const MODE_8N1: u32 = 0x0000_08D0;

    pub fn to_payload(&self) -> [u8; 20] {
        let mut p = [0u8; 20];
        p[0] = self.port_id;
        p[4..8].copy_from_slice(&self.mode.to_le_bytes());
        p[8..12].copy_from_slice(&self.baud_rate.to_le_bytes());
        p[12..14].copy_from_slice(&self.in_proto.to_le_bytes());
        p[14..16].copy_from_slice(&self.out_proto.to_le_bytes());
        p
    }
}

/// AID-ALPSRV request from the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlpRequest {
    /// Raw request header, echoed back in the answer
    pub header: [u8; AlpRequest::LEN],
    pub id_size: u8,
    pub kind: u8,
    /// Offset into the file, in 16-bit words
    pub offset_words: u16,
    /// Requested length, in 16-bit words
    pub size_words: u16,
    pub file_id: u16,
}

impl AlpRequest {
    pub const LEN: usize = 16;
    /// Offset of `dataSize` in the header
    pub const DATA_SIZE_OFFSET: usize = 8;
    /// Receiver pushes data instead of requesting it
    pub const KIND_UPLOAD: u8 = 0xFF;
}

/// A decoded UBX message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UbxMessage {
    Ack(MessageId),
    Nak(MessageId),
    PortConfig(PortConfig),
    Version(MonVer),
    Hardware(MonHw),
    Status(NavStatus),
    Dop(NavDop),
    Solution(NavSol),
    Velocity(NavVelNed),
    Position(NavPosLlh),
    TimeUtc(NavTimeUtc),
    Sbas(NavSbas),
    AlpRequest(AlpRequest),
}

impl UbxMessage {
    pub fn parse(id: MessageId, p: &[u8]) -> Result<Self, ParseError> {
        let need = |expected: usize| {
            if p.len() < expected {
                Err(ParseError::TooShort {
                    id,
                    expected,
                    actual: p.len(),
                })
            } else {
                Ok(())
            }
        };

        match id {
            ACK_ACK | ACK_NAK => {
                need(2)?;
                let acked = MessageId::new(p[0], p[1]);
                Ok(if id == ACK_ACK {
                    Self::Ack(acked)
                } else {
                    Self::Nak(acked)
                })
            }
            CFG_PRT => {
                need(20)?;
                Ok(Self::PortConfig(PortConfig {
                    port_id: p[0],
                    mode: u32_at(p, 4),
                    baud_rate: u32_at(p, 8),
                    in_proto: u16_at(p, 12),
                    out_proto: u16_at(p, 14),
                }))
            }
            MON_VER => {
                need(40)?;
                Ok(Self::Version(MonVer {
                    software: text_at(p, 0),
                    hardware: text_at(p, 30),
                }))
            }
            MON_HW => {
                need(46)?;
                Ok(Self::Hardware(MonHw {
                    noise_per_ms: u16_at(p, 16),
                    agc_count: u16_at(p, 18),
                    antenna_status: p[20],
                    antenna_power: p[21],
                    jamming: p[45],
                }))
            }
            NAV_STATUS => {
                need(16)?;
                Ok(Self::Status(NavStatus {
                    itow: u32_at(p, 0),
                    fix_type: p[4],
                    flags: p[5],
                    ttff_ms: u32_at(p, 8),
                    uptime_ms: u32_at(p, 12),
                }))
            }
            NAV_DOP => {
                need(18)?;
                Ok(Self::Dop(NavDop {
                    itow: u32_at(p, 0),
                    gdop: u16_at(p, 4),
                    pdop: u16_at(p, 6),
                    vdop: u16_at(p, 10),
                    hdop: u16_at(p, 12),
                }))
            }
            NAV_SOL => {
                need(52)?;
                Ok(Self::Solution(NavSol {
                    itow: u32_at(p, 0),
                    week: u16_at(p, 8) as i16,
                    fix_type: p[10],
                    flags: p[11],
                    satellites: p[47],
                }))
            }
            NAV_VELNED => {
                need(36)?;
                Ok(Self::Velocity(NavVelNed {
                    itow: u32_at(p, 0),
                    ground_speed_cm_s: u32_at(p, 20),
                    heading: i32_at(p, 24),
                }))
            }
            NAV_POSLLH => {
                need(28)?;
                Ok(Self::Position(NavPosLlh {
                    itow: u32_at(p, 0),
                    lon: i32_at(p, 4),
                    lat: i32_at(p, 8),
                    height_mm: i32_at(p, 12),
                    hmsl_mm: i32_at(p, 16),
                    h_acc_mm: u32_at(p, 20),
                }))
            }
            NAV_TIMEUTC => {
                need(20)?;
                Ok(Self::TimeUtc(NavTimeUtc {
                    itow: u32_at(p, 0),
                    t_acc_ns: u32_at(p, 4),
                    nano: i32_at(p, 8),
                    year: u16_at(p, 12),
                    month: p[14],
                    day: p[15],
                    hour: p[16],
                    minute: p[17],
                    second: p[18],
                    valid: p[19],
                }))
            }
            NAV_SBAS => {
                need(12)?;
                Ok(Self::Sbas(NavSbas {
                    itow: u32_at(p, 0),
                    geo: p[4],
                    mode: p[5],
                    system: p[6] as i8,
                    service: p[7],
                    count: p[8],
                }))
            }
            AID_ALPSRV => {
                need(AlpRequest::LEN)?;
                let mut header = [0u8; AlpRequest::LEN];
                header.copy_from_slice(&p[..AlpRequest::LEN]);
                Ok(Self::AlpRequest(AlpRequest {
                    header,
                    id_size: p[0],
                    kind: p[1],
                    offset_words: u16_at(p, 2),
                    size_words: u16_at(p, 4),
                    file_id: u16_at(p, 6),
                }))
            }
            other => Err(ParseError::Unsupported(other)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Frame bytes for `payload`, for feeding decoders in tests
    pub(crate) fn frame(id: MessageId, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut out: Vec<u8, MAX_FRAME> = Vec::new();
        assert!(write_frame(id, payload, &mut out));
        out.to_vec()
    }

    #[test]
    fn checksum_of_known_frame() {
        // CFG-MSG poll for NAV-POSLLH as printed by u-center
        let bytes = frame(CFG_MSG, &[0x01, 0x02]);
        assert_eq!(bytes, [0xB5, 0x62, 0x06, 0x01, 0x02, 0x00, 0x01, 0x02, 0x0C, 0x35]);
    }

    #[test]
    fn message_id_splits_into_class_and_id() {
        assert_eq!(NAV_VELNED.class(), 0x01);
        assert_eq!(NAV_VELNED.id(), 0x12);
        assert_eq!(NAV_VELNED, MessageId(0x0112));
    }

    #[test]
    fn short_payload_is_rejected() {
        assert_eq!(
            UbxMessage::parse(NAV_POSLLH, &[0; 10]),
            Err(ParseError::TooShort {
                id: NAV_POSLLH,
                expected: 28,
                actual: 10
            })
        );
    }

    #[test]
    fn unknown_message_is_unsupported() {
        let id = MessageId::new(0x02, 0x15);
        assert_eq!(UbxMessage::parse(id, &[]), Err(ParseError::Unsupported(id)));
    }

    #[test]
    fn posllh_fields_at_offsets() {
        let mut p = [0u8; 28];
        p[0..4].copy_from_slice(&1_000u32.to_le_bytes());
        p[4..8].copy_from_slice(&93_000_000i32.to_le_bytes());
        p[8..12].copy_from_slice(&487_000_000i32.to_le_bytes());
        p[16..20].copy_from_slice(&(-1_500i32).to_le_bytes());
        let Ok(UbxMessage::Position(pos)) = UbxMessage::parse(NAV_POSLLH, &p) else {
            panic!("not a position");
        };
        assert_eq!(pos.itow, 1_000);
        assert_eq!(pos.lon, 93_000_000);
        assert_eq!(pos.lat, 487_000_000);
        assert_eq!(pos.hmsl_mm, -1_500);
    }

    #[test]
    fn mon_ver_strings_stop_at_nul() {
        let mut p = [0u8; 40];
        p[..11].copy_from_slice(b"ROM CORE 1.");
        p[30..38].copy_from_slice(b"00080000");
        let Ok(UbxMessage::Version(version)) = UbxMessage::parse(MON_VER, &p) else {
            panic!("not a version");
        };
        assert_eq!(version.software.as_str(), "ROM CORE 1.");
        assert_eq!(version.hardware.as_str(), "00080000");
    }

    #[test]
    fn port_config_round_trips_through_payload() {
        let config = PortConfig {
            port_id: PortConfig::UART1,
            mode: PortConfig::MODE_8N1,
            baud_rate: 115_200,
            in_proto: PortConfig::PROTO_UBX | PortConfig::PROTO_NMEA,
            out_proto: PortConfig::PROTO_UBX,
        };
        assert_eq!(
            UbxMessage::parse(CFG_PRT, &config.to_payload()),
            Ok(UbxMessage::PortConfig(config))
        );
    }
}
