//! System State Management
//!
//! The latest sensor state, published for the display and status
//! collaborators. The measurement task writes it once per cycle; readers
//! only ever get copies.
//!
//! # State Access Pattern
//! ```rust
//! let state = SYSTEM_STATE.lock().await;
//! // Read or modify state here
//! // Lock automatically released when state goes out of scope
//! ```

use defmt::Format;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use heapless::String;
use overtake_sensor::gps::ConfigureReport;
use overtake_sensor::{Diagnostics, LiveStatus};

/// Global system state protected by a mutex
pub static SYSTEM_STATE: Mutex<CriticalSectionRawMutex, SystemState> = Mutex::new(SystemState {
    status: None,
    diagnostics: None,
    battery_voltage: None,
    receiver: ReceiverStatus::Unconfigured,
    receiver_version: None,
});

/// Outcome of the receiver configuration at start-up
#[derive(Debug, Clone, Copy, PartialEq, Format)]
pub enum ReceiverStatus {
    /// Configuration has not run yet
    Unconfigured,
    /// Every command was acknowledged
    Configured,
    /// Some commands failed; the receiver keeps its previous settings for those
    Degraded { failures: u8 },
}

impl From<&ConfigureReport> for ReceiverStatus {
    fn from(report: &ConfigureReport) -> Self {
        if report.is_complete() {
            ReceiverStatus::Configured
        } else {
            ReceiverStatus::Degraded {
                failures: report.failures.len() as u8,
            }
        }
    }
}

/// Sensor state as last published
#[derive(Format)]
pub struct SystemState {
    /// Distances, pending minimum and fix state
    /// - None: measurement task has not published yet
    pub status: Option<LiveStatus>,
    /// Error and health counters
    pub diagnostics: Option<Diagnostics>,
    /// Smoothed battery voltage in volts
    pub battery_voltage: Option<f32>,
    pub receiver: ReceiverStatus,
    /// Receiver software version from MON-VER
    pub receiver_version: Option<String<30>>,
}
