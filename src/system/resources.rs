//! Hardware Resource Management
//!
//! Allocates pins and peripherals to the tasks that own them. Every group is
//! handed to exactly one task; nothing here is shared.
//!
//! # Resource Groups
//! - Ultrasonic sensors: trigger and echo pin per HC-SR04
//! - GPS: UART1 to the u-blox receiver
//! - Button: confirmation push button
//! - Battery Monitor: ADC and system voltage pin
//! - Assistance data: flash region holding the ALP file

use assign_resources::assign_resources;
use embassy_rp::adc::InterruptHandler as AdcInterruptHandler;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::{self, UART1};
use embassy_rp::uart::BufferedInterruptHandler;

assign_resources! {
    /// HC-SR04 towards the road
    left_sensor: LeftSensorResources {
        trigger_pin: PIN_15,
        echo_pin: PIN_14,
    },
    /// HC-SR04 towards the kerb
    right_sensor: RightSensorResources {
        trigger_pin: PIN_17,
        echo_pin: PIN_16,
    },
    /// u-blox receiver on UART1
    gps: GpsResources {
        uart: UART1,
        tx_pin: PIN_4,
        rx_pin: PIN_5,
    },
    /// Close-pass confirmation button, active low
    button: ButtonResources {
        pin: PIN_2,
    },
    /// Battery voltage monitoring
    battery_charge: BatteryChargeResources {
        adc: ADC,
        vsys_pin: PIN_29,
    },
    /// Flash holding AssistNow Offline data
    alp_flash: AlpFlashResources {
        flash: FLASH,
    },
}

bind_interrupts!(pub struct Irqs {
    ADC_IRQ_FIFO => AdcInterruptHandler;
    UART1_IRQ => BufferedInterruptHandler<UART1>;
});
