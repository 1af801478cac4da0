//! AssistNow Offline data in flash
//!
//! The ALP file is written to the top of flash by the update tooling. An
//! erased region means there is no file, and requests are answered empty.

use defmt::*;
use embassy_rp::flash::{Blocking, Flash, ERASE_SIZE};
use embassy_rp::peripherals::FLASH;
use overtake_sensor::gps::AlpStore;

/// Total flash of the board
pub const FLASH_SIZE: usize = 2048 * 1024;

/// Size reserved for the ALP file (32 sectors)
const ALP_SIZE: usize = 32 * ERASE_SIZE;

/// Region start, from the beginning of flash
const ALP_OFFSET: usize = FLASH_SIZE - ALP_SIZE;

pub struct FlashAlpStore {
    flash: Flash<'static, FLASH, Blocking, FLASH_SIZE>,
    present: bool,
}

impl FlashAlpStore {
    pub fn new(mut flash: Flash<'static, FLASH, Blocking, FLASH_SIZE>) -> Self {
        let mut magic = [0u8; 4];
        let present = flash.blocking_read(ALP_OFFSET as u32, &mut magic).is_ok() && magic != [0xFF; 4];
        info!("ALP data {}", if present { "found" } else { "missing" });
        Self { flash, present }
    }
}

impl AlpStore for FlashAlpStore {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        if !self.present || offset >= ALP_SIZE {
            return 0;
        }
        let n = buf.len().min(ALP_SIZE - offset);
        match self.flash.blocking_read((ALP_OFFSET + offset) as u32, &mut buf[..n]) {
            Ok(()) => n,
            Err(e) => {
                warn!("ALP flash read failed: {}", e);
                0
            }
        }
    }
}
