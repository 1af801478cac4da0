//! NMEA sentences
//!
//! The receiver is switched to UBX-only output during configuration, so text
//! sentences only show up before that or after a receiver reset. They are kept
//! for diagnostics, not used for fixes.

use heapless::String;

use super::decoder::MAX_SENTENCE;

/// A checksum-validated sentence body, e.g. `GPGGA,092750.000,...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence<'a> {
    body: &'a str,
}

impl<'a> Sentence<'a> {
    pub fn new(body: &'a str) -> Self {
        Self { body }
    }

    /// Address field, talker id plus sentence type
    pub fn address(&self) -> &'a str {
        self.body.split(',').next().unwrap_or_default()
    }

    /// Two-letter talker id (`GP`, `GN`, ...); proprietary sentences have none
    pub fn talker(&self) -> Option<&'a str> {
        let address = self.address();
        (address.len() == 5 && !address.starts_with('P')).then(|| &address[..2])
    }

    /// Sentence type (`GGA`, `TXT`, ...)
    pub fn kind(&self) -> &'a str {
        let address = self.address();
        match self.talker() {
            Some(_) => &address[2..],
            None => address,
        }
    }

    /// Data fields after the address
    pub fn fields(&self) -> impl Iterator<Item = &'a str> {
        self.body.split(',').skip(1)
    }
}

/// Last text sentence seen, kept for the status page
#[derive(Debug, Clone, Default)]
pub struct SentenceLog {
    last: String<MAX_SENTENCE>,
    count: u32,
}

impl SentenceLog {
    pub fn record(&mut self, sentence: Sentence<'_>) {
        self.count += 1;
        self.last.clear();
        // Bodies are bounded by the decoder to the same capacity
        let _ = self.last.push_str(sentence.body);
        debug!("gps: NMEA {}", sentence.address());
    }

    pub fn last(&self) -> Option<&str> {
        (!self.last.is_empty()).then_some(self.last.as_str())
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_address_and_fields() {
        let sentence = Sentence::new("GNRMC,092750.000,A,5321.6802,N");
        assert_eq!(sentence.talker(), Some("GN"));
        assert_eq!(sentence.kind(), "RMC");
        assert_eq!(
            sentence.fields().collect::<std::vec::Vec<_>>(),
            ["092750.000", "A", "5321.6802", "N"]
        );
    }

    #[test]
    fn proprietary_sentence_has_no_talker() {
        let sentence = Sentence::new("PUBX,00,081350.00");
        assert_eq!(sentence.talker(), None);
        assert_eq!(sentence.kind(), "PUBX");
    }

    #[test]
    fn log_keeps_last_sentence() {
        let mut log = SentenceLog::default();
        assert_eq!(log.last(), None);
        log.record(Sentence::new("GPTXT,01,01,02,ANTSTATUS=OK"));
        log.record(Sentence::new("GPGSA,A,3"));
        assert_eq!(log.last(), Some("GPGSA,A,3"));
        assert_eq!(log.count(), 2);
    }
}
