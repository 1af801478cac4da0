//! Battery charge monitoring
//!
//! Monitors Li-Ion battery voltage and reports the charge level that goes
//! into every record.
//!
//! # Measurement Strategy
//! - Reads voltage through ADC every 20 seconds
//! - Uses voltage divider (3:1 ratio) to scale battery voltage to ADC range
//! - Exponential smoothing damps load-dependent dips (e.g. sensor bursts)
//! - Initial 500ms delay ensures system stabilization
//!
//! Conversion and charge curve live in [`overtake_sensor::battery`].

use defmt::*;
use embassy_rp::adc::{Adc, Channel, Config as AdcConfig};
use embassy_rp::gpio::Pull;
use embassy_time::{Duration, Timer};
use overtake_sensor::battery::BatteryMonitor;

use crate::system::{
    event,
    resources::{BatteryChargeResources, Irqs},
    state::SYSTEM_STATE,
};

/// Time between voltage measurements
const MEASUREMENT_INTERVAL: Duration = Duration::from_secs(20);

/// Battery monitoring task that continuously measures voltage and
/// reports charge level as a percentage
#[embassy_executor::task]
pub async fn battery_charge_read(r: BatteryChargeResources) {
    let mut adc = Adc::new(r.adc, Irqs, AdcConfig::default());
    let mut channel = Channel::new_pin(r.vsys_pin, Pull::None);
    let mut monitor = BatteryMonitor::new();

    // Initial delay to ensure system stabilization before first reading
    Timer::after(Duration::from_millis(500)).await;

    loop {
        match adc.read(&mut channel).await {
            Ok(raw) => {
                let level = monitor.update(raw);
                SYSTEM_STATE.lock().await.battery_voltage = monitor.voltage();
                debug!("battery {}%", level);
                event::post(event::Events::BatteryLevelMeasured(level));
            }
            Err(_) => warn!("battery: ADC read failed"),
        }

        Timer::after(MEASUREMENT_INTERVAL).await;
    }
}
