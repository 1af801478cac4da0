//! Record output
//!
//! Durable storage is not part of this firmware: finished CSV lines are
//! printed over defmt, where the host side collects them. The measurement
//! loop never waits for the log. Lines go through a queue, and a full queue
//! is reported back to the pipeline as a failed write.

use defmt::*;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_io::{ErrorKind, ErrorType, Write};
use heapless::String;
use overtake_sensor::pipeline::csv::MAX_LINE;

/// Lines waiting to be printed
const LINE_QUEUE_SIZE: usize = 4;

static LINE_CHANNEL: Channel<CriticalSectionRawMutex, String<MAX_LINE>, LINE_QUEUE_SIZE> = Channel::new();

/// Byte sink feeding [`record_log`] one line at a time
#[derive(Default)]
pub struct LineQueue {
    line: String<MAX_LINE>,
}

impl ErrorType for LineQueue {
    type Error = ErrorKind;
}

impl Write for LineQueue {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &byte in buf {
            if byte == b'\n' {
                let line = core::mem::take(&mut self.line);
                LINE_CHANNEL.try_send(line).map_err(|_| ErrorKind::OutOfMemory)?;
            } else if self.line.push(char::from(byte)).is_err() {
                self.line.clear();
                return Err(ErrorKind::OutOfMemory);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Prints queued record lines
#[embassy_executor::task]
pub async fn record_log() {
    loop {
        let line = LINE_CHANNEL.receive().await;
        info!("{=str}", line.as_str());
    }
}
