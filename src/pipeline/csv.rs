//! `;`-separated track file format
//!
//! A track starts with a metadata line and a header line, followed by one row
//! per emitted record. Missing values are empty fields.

use core::fmt::{self, Write};

use chrono::{Datelike, Timelike};
use heapless::String;
use nanorand::{Rng, WyRand};

use super::record::{EmittedRecord, MAX_SAMPLES};
use super::{RecordSink, SinkError};
use crate::gps::GpsFix;

/// Version of the row layout
pub const FORMAT_VERSION: u8 = 2;
/// Longest line the sink formats
pub const MAX_LINE: usize = 2_048;

const COLUMNS: &str = "Date;Time;Millis;Comment;Latitude;Longitude;Altitude;Course;Speed;HDOP;Satellites;\
BatteryLevel;Left;Right;Confirmed;Marked;InsidePrivacyArea;Factor;Measurements";

/// Random UUID naming one recording session
pub type TrackId = String<36>;

/// New version 4 UUID for [`write_metadata`]
pub fn new_track_id(rng: &mut WyRand) -> TrackId {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&rng.generate::<u64>().to_le_bytes());
    bytes[8..].copy_from_slice(&rng.generate::<u64>().to_le_bytes());
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    let mut id = TrackId::new();
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            let _ = id.push('-');
        }
        // 32 digits and 4 dashes fill the string exactly
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// `DataFormat=2&FirmwareVersion=...&TrackId=...`
pub fn write_metadata(out: &mut impl Write, firmware: &str, track_id: &str) -> fmt::Result {
    writeln!(
        out,
        "DataFormat={}&FirmwareVersion={}&TrackId={}",
        FORMAT_VERSION, firmware, track_id
    )
}

/// Column names, with one `Tms;Lus;Rus` triple per possible sample
pub fn write_header(out: &mut impl Write) -> fmt::Result {
    out.write_str(COLUMNS)?;
    for i in 1..=MAX_SAMPLES {
        write!(out, ";Tms{i};Lus{i};Rus{i}")?;
    }
    out.write_char('\n')
}

pub fn write_row(out: &mut impl Write, row: &EmittedRecord<'_>, factor: u32) -> fmt::Result {
    let record = row.record;
    match record.time {
        Some(t) => write!(
            out,
            "{:02}.{:02}.{:04};{:02}:{:02}:{:02};",
            t.day(),
            t.month(),
            t.year(),
            t.hour(),
            t.minute(),
            t.second()
        )?,
        None => out.write_str(";;")?,
    }
    write!(out, "{};", record.millis)?;
    // Names the confirmed sample by its header number, `ConfirmedSample=2` is `Tms2;Lus2;Rus2`
    if let Some(index) = row.confirmed.and_then(|c| c.sample_index) {
        write!(out, "ConfirmedSample={}", index + 1)?;
    }
    out.write_char(';')?;

    match record.gps.as_ref().filter(|fix| fix.has_position()) {
        Some(fix) => write_position(out, fix)?,
        None => out.write_str(";;;;;;")?,
    }
    match record.gps {
        Some(fix) => write!(out, "{};", fix.satellites)?,
        None => out.write_char(';')?,
    }
    write_optional(out, record.battery_percent)?;
    for distance in row.distance_cm {
        write_optional(out, distance)?;
    }

    let confirmed = row.confirmed.is_some_and(|c| c.distance_cm.is_some());
    let marked = row.confirmed.is_some_and(|c| c.distance_cm.is_none());
    write!(
        out,
        "{};{};{};{};{}",
        u8::from(confirmed),
        u8::from(marked),
        u8::from(record.in_privacy_area),
        factor,
        record.measurements
    )?;

    for sample in &record.samples {
        write!(out, ";{}", sample.offset_ms)?;
        for duration in sample.durations_us {
            out.write_char(';')?;
            if let Some(us) = duration {
                write!(out, "{us}")?;
            }
        }
    }
    out.write_char('\n')
}

fn write_position(out: &mut impl Write, fix: &GpsFix) -> fmt::Result {
    write!(
        out,
        "{:.6};{:.6};{:.1};{:.2};{:.2};{:.2};",
        fix.latitude(),
        fix.longitude(),
        f64::from(fix.altitude_mm) / 1_000.0,
        f64::from(fix.heading) * 1e-5,
        // cm/s to km/h
        f64::from(fix.speed_cm_s) * 0.036,
        f64::from(fix.hdop) / 100.0
    )
}

fn write_optional<T: fmt::Display>(out: &mut impl Write, value: Option<T>) -> fmt::Result {
    if let Some(value) = value {
        write!(out, "{value}")?;
    }
    out.write_char(';')
}

/// Writes track files to any byte sink
pub struct CsvSink<W> {
    writer: W,
    firmware: &'static str,
    factor: u32,
    line: String<MAX_LINE>,
}

impl<W: embedded_io::Write> CsvSink<W> {
    /// `factor` is the µs/cm divider recorded in every row
    pub fn new(writer: W, firmware: &'static str, factor: u32) -> Self {
        Self {
            writer,
            firmware,
            factor,
            line: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit_line(&mut self) -> Result<(), SinkError> {
        self.writer
            .write_all(self.line.as_bytes())
            .map_err(|_| SinkError::Write)
    }
}

impl<W: embedded_io::Write> RecordSink for CsvSink<W> {
    fn write_header(&mut self, track_id: &str) -> Result<(), SinkError> {
        self.line.clear();
        write_metadata(&mut self.line, self.firmware, track_id).map_err(|_| SinkError::LineTooLong)?;
        self.emit_line()?;
        self.line.clear();
        write_header(&mut self.line).map_err(|_| SinkError::LineTooLong)?;
        self.emit_line()
    }

    fn append(&mut self, row: &EmittedRecord<'_>) -> Result<(), SinkError> {
        self.line.clear();
        write_row(&mut self.line, row, self.factor).map_err(|_| SinkError::LineTooLong)?;
        self.emit_line()
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(|_| SinkError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Side;
    use crate::pipeline::record::{ConfirmedDistance, MeasurementRecord, RecordId, TimedSample};
    use chrono::NaiveDate;

    fn record() -> MeasurementRecord {
        let mut record = MeasurementRecord::new(RecordId(4), 12_345);
        record.time = NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(7, 8, 9));
        record.min_distance_cm = [Some(87), None];
        record.battery_percent = Some(76);
        record.measurements = 2;
        let _ = record.samples.push(TimedSample {
            offset_ms: 12,
            durations_us: [Some(7_076), None],
        });
        let _ = record.samples.push(TimedSample {
            offset_ms: 50,
            durations_us: [None, Some(9_000)],
        });
        record
    }

    fn row_text(row: &EmittedRecord<'_>) -> std::string::String {
        let mut out = std::string::String::new();
        write_row(&mut out, row, 58).expect("formats");
        out
    }

    #[test]
    fn track_id_is_a_version_4_uuid() {
        let id = new_track_id(&mut WyRand::new_seed(42));
        let groups: std::vec::Vec<_> = id.split('-').map(str::len).collect();
        assert_eq!(groups, [8, 4, 4, 4, 12]);
        assert_eq!(id.as_bytes()[14], b'4');
        assert!(matches!(id.as_bytes()[19], b'8' | b'9' | b'a' | b'b'));
        assert_ne!(id, new_track_id(&mut WyRand::new_seed(43)));
    }

    #[test]
    fn header_has_a_triple_per_sample() {
        let mut out = std::string::String::new();
        write_header(&mut out).expect("formats");
        assert!(out.starts_with("Date;Time;Millis;Comment;Latitude;"));
        assert!(out.contains(";Measurements;Tms1;Lus1;Rus1;Tms2;"));
        assert!(out.ends_with(";Tms30;Lus30;Rus30\n"));
        assert!(!out.contains("Tms31"));
        let fields = out.trim_end().split(';').count();
        assert_eq!(fields, 19 + 3 * 30);
    }

    #[test]
    fn row_without_fix() {
        let record = record();
        let row = EmittedRecord::all(&record, Side::Left).next().expect("one row");
        assert_eq!(
            row_text(&row),
            "01.05.2024;07:08:09;12345;;;;;;;;;76;87;;0;0;0;58;2;12;7076;;50;;9000\n"
        );
    }

    #[test]
    fn row_with_fix_and_confirmation() {
        let mut record = record();
        record.gps = Some(GpsFix {
            lat: 487_654_321,
            lon: 93_000_000,
            altitude_mm: 245_500,
            heading: 18_000_000,
            speed_cm_s: 500,
            hdop: 95,
            satellites: 8,
            fix_type: 3,
            flags: 0x0D,
            ..GpsFix::default()
        });
        record.confirm(ConfirmedDistance {
            distance_cm: Some(64),
            sample_index: Some(1),
        });
        record.in_privacy_area = true;
        let row = EmittedRecord::all(&record, Side::Left).next().expect("one row");
        let text = row_text(&row);
        assert!(
            text.starts_with("01.05.2024;07:08:09;12345;ConfirmedSample=2;48.765432;9.300000;245.5;180.00;18.00;0.95;8;76;64;;1;0;1;58;2;"),
            "{text}"
        );
    }

    #[test]
    fn marker_without_stored_sample_leaves_comment_empty() {
        let mut record = record();
        record.confirm(ConfirmedDistance {
            distance_cm: None,
            sample_index: None,
        });
        let row = EmittedRecord::all(&record, Side::Left).next().expect("one row");
        let text = row_text(&row);
        assert!(text.starts_with("01.05.2024;07:08:09;12345;;;"), "{text}");
        assert!(text.contains(";76;;;0;1;0;58;2;"), "{text}");
    }

    #[test]
    fn field_count_is_stable_without_samples() {
        let record = MeasurementRecord::new(RecordId(1), 0);
        let row = EmittedRecord::all(&record, Side::Left).next().expect("one row");
        assert_eq!(row_text(&row).trim_end().split(';').count(), 19);
    }

    struct Lines(std::vec::Vec<u8>);

    impl embedded_io::ErrorType for Lines {
        type Error = core::convert::Infallible;
    }

    impl embedded_io::Write for Lines {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn sink_writes_metadata_header_and_rows() {
        let mut sink = CsvSink::new(Lines(std::vec::Vec::new()), "0.1.0", 58);
        sink.write_header("track-7").expect("header");
        let record = record();
        for row in EmittedRecord::all(&record, Side::Left) {
            sink.append(&row).expect("row");
        }
        sink.flush().expect("flush");

        let text = std::string::String::from_utf8(sink.into_inner().0).expect("utf8");
        let lines: std::vec::Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "DataFormat=2&FirmwareVersion=0.1.0&TrackId=track-7");
        assert!(lines[1].starts_with("Date;"));
        assert!(lines[2].starts_with("01.05.2024;"));
    }
}
