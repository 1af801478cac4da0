//! Battery charge level
//!
//! Converts raw ADC readings of the divided battery voltage into a charge
//! percentage for the records.
//!
//! # Voltage Calculations
//! ```text
//! Battery Voltage = (ADC Value * 3.3V * 3.0) / 4096
//! ```
//!
//! # Charge Level Calculation
//! - Maps voltage range 2.5V-4.2V to 0%-99%
//! - Linear interpolation between min/max voltages
//! - Caps at 99% to indicate charging might still occur

use crate::filter::ExponentialSmoother;

/// Minimum battery voltage (2.5V indicates battery needs charging)
pub const BATTERY_VOLTAGE_LOWER: f32 = 2.5;

/// Maximum battery voltage (4.2V is typical Li-Ion full charge)
pub const BATTERY_VOLTAGE_UPPER: f32 = 4.2;

/// ADC reference voltage
const REF_VOLTAGE: f32 = 3.3;

/// Hardware voltage divider ratio
const V_DIVIDER_RATIO: f32 = 3.0;

/// ADC resolution (12-bit)
const ADC_RANGE: f32 = 4096.0;

/// Weight of a new reading in the smoothed voltage
pub const SMOOTHING_ALPHA: f32 = 0.2;

/// Battery voltage for a raw ADC value
pub fn adc_to_voltage(raw: u16) -> f32 {
    f32::from(raw) * REF_VOLTAGE * V_DIVIDER_RATIO / ADC_RANGE
}

/// Charge level in percent, 0..=99
pub fn charge_percent(voltage: f32) -> u8 {
    let level = if voltage >= BATTERY_VOLTAGE_UPPER {
        0.99
    } else if voltage <= BATTERY_VOLTAGE_LOWER {
        0.0
    } else {
        (voltage - BATTERY_VOLTAGE_LOWER) / (BATTERY_VOLTAGE_UPPER - BATTERY_VOLTAGE_LOWER)
    };
    (level * 100.0) as u8
}

/// Smoothed battery voltage and the charge level derived from it
#[derive(Debug, Clone, Copy)]
pub struct BatteryMonitor {
    voltage: ExponentialSmoother,
}

impl BatteryMonitor {
    pub fn new() -> Self {
        Self {
            voltage: ExponentialSmoother::new(SMOOTHING_ALPHA),
        }
    }

    /// Feed one ADC reading, returning the new charge level
    pub fn update(&mut self, raw: u16) -> u8 {
        let voltage = self.voltage.update(adc_to_voltage(raw));
        charge_percent(voltage)
    }

    pub fn voltage(&self) -> Option<f32> {
        self.voltage.value()
    }

    pub fn percent(&self) -> Option<u8> {
        self.voltage.value().map(charge_percent)
    }
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn full_scale_adc_reads_divided_reference() {
        assert_relative_eq!(adc_to_voltage(4096), 9.9, max_relative = 1e-6);
        assert_relative_eq!(adc_to_voltage(0), 0.0);
    }

    #[test]
    fn percent_is_capped_at_99() {
        assert_eq!(charge_percent(4.2), 99);
        assert_eq!(charge_percent(5.0), 99);
    }

    #[test]
    fn percent_is_zero_at_or_below_lower_limit() {
        assert_eq!(charge_percent(2.5), 0);
        assert_eq!(charge_percent(1.0), 0);
    }

    #[test]
    fn percent_interpolates_linearly() {
        assert_eq!(charge_percent(3.36), 50);
        assert_eq!(charge_percent(3.0), 29);
    }

    #[test]
    fn monitor_smooths_a_single_outlier() {
        let mut monitor = BatteryMonitor::new();
        assert_eq!(monitor.percent(), None);
        // ~3.7 V
        let steady = 1_531;
        let first = monitor.update(steady);
        for _ in 0..5 {
            monitor.update(steady);
        }
        assert_eq!(monitor.percent(), Some(first));

        // A dip to ~2.9 V moves the level by a fifth of the difference only
        let level = monitor.update(1_200);
        assert!(level < first && level > charge_percent(adc_to_voltage(1_200)));
        assert_relative_eq!(
            monitor.voltage().unwrap_or_default(),
            0.8 * adc_to_voltage(steady) + 0.2 * adc_to_voltage(1_200),
            max_relative = 1e-5
        );
    }
}
