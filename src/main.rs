//! Overtaking-distance sensor firmware entry point
//!
//! Initializes the board, starts the high-priority executor for echo capture
//! and spawns the tasks.

#![no_std]
#![no_main]

use crate::task::{
    battery_charge_read::battery_charge_read,
    echo_capture::{echo_capture, ECHO_CAPTURE},
    measure::measure,
    record_log::record_log,
};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_rp::block::ImageDef;
use embassy_rp::config::Config;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use system::resources::{
    AlpFlashResources, AssignedResources, BatteryChargeResources, ButtonResources, GpsResources,
    LeftSensorResources, RightSensorResources,
};
use {defmt_rtt as _, panic_probe as _};

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// Board resources, shared state and events
mod system;
/// Task implementations
mod task;

/// Runs the echo edge tasks above everything else
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    EXECUTOR_HIGH.on_interrupt()
}

/// Firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Config::default());

    // Split the resources into separate groups for each task
    let r = split_resources!(p);

    let left_trigger = Output::new(r.left_sensor.trigger_pin, Level::Low);
    let right_trigger = Output::new(r.right_sensor.trigger_pin, Level::Low);
    let left_echo = Input::new(r.left_sensor.echo_pin, Pull::None);
    let right_echo = Input::new(r.right_sensor.echo_pin, Pull::None);

    // Echo edges must be timestamped before anything else runs
    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let high = EXECUTOR_HIGH.start(interrupt::SWI_IRQ_1);
    high.spawn(echo_capture(left_echo, &ECHO_CAPTURE[0])).unwrap();
    high.spawn(echo_capture(right_echo, &ECHO_CAPTURE[1])).unwrap();

    spawner.spawn(record_log()).unwrap();
    spawner
        .spawn(battery_charge_read(r.battery_charge))
        .unwrap();
    spawner
        .spawn(measure([left_trigger, right_trigger], r.gps, r.button, r.alp_flash))
        .unwrap();
}
