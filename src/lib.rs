//! Overtaking-distance sensor core
//!
//! Hardware-independent part of the firmware: dual ultrasonic ranging, the
//! u-blox GPS protocol engine and the measurement/confirmation pipeline. The
//! firmware binary wires these to the RP2350 peripherals; everything in here
//! runs on the host as well.
//!
//! # Modules
//! - [`filter`]: median and exponential smoothing filters
//! - [`ranging`]: two-channel HC-SR04 scheduler with interrupt-fed echo capture
//! - [`gps`]: UBX/NMEA framing, message dispatch, fix assembly, commands
//! - [`pipeline`]: per-cycle records, lookback buffer, button confirmation
//! - [`measure`]: the cooperative loop tying the three together

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod battery;
pub mod button;
pub mod clock;
pub mod config;
pub mod filter;
pub mod gps;
pub mod measure;
pub mod pipeline;
pub mod privacy;
pub mod ranging;

pub use config::{FixWaitPolicy, RangingConfig, SensorConfig, Side};
pub use measure::{Diagnostics, LiveStatus, MeasurementLoop};
