//! Measurement task
//!
//! Owns the trigger pins, the GPS link and the record pipeline.
//!
//! # Sequence
//! 1. Configure the receiver (blocking, bounded by the command timeouts)
//! 2. Run the measurement loop forever; it waits for a fix on its own
//! 3. Publish live status and counters to [`SYSTEM_STATE`] a few times a second
//!
//! The loop yields after every pass so the battery and log tasks keep running;
//! echo timing does not depend on it, that happens on the interrupt executor.

use defmt::*;
use embassy_futures::yield_now;
use embassy_rp::flash::Flash;
use embassy_rp::gpio::{Input, Output, Pull};
use embassy_rp::uart::{BufferedUart, Config as UartConfig};
use embassy_time::{Delay, Duration, Instant, Timer};
use nanorand::WyRand;
use overtake_sensor::gps::{GpsEngine, GPS_BAUD_RATE};
use overtake_sensor::pipeline::{new_track_id, CsvSink};
use overtake_sensor::ranging::{Hcsr04, RangingScheduler};
use overtake_sensor::{MeasurementLoop, SensorConfig, Side};
use static_cell::StaticCell;

use crate::system::{
    alp_flash::FlashAlpStore,
    event::{self, Events},
    resources::{AlpFlashResources, ButtonResources, GpsResources, Irqs},
    state::{ReceiverStatus, SYSTEM_STATE},
    uptime::Uptime,
};
use crate::task::echo_capture::ECHO_CAPTURE;
use crate::task::record_log::LineQueue;

/// How often the display state is refreshed
const STATUS_INTERVAL: Duration = Duration::from_millis(200);

/// Pause after a sensor pin failure before trying again
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

const UART_TX_BUF_SIZE: usize = 64;
const UART_RX_BUF_SIZE: usize = 1024;

#[embassy_executor::task]
pub async fn measure(
    triggers: [Output<'static>; 2],
    gps: GpsResources,
    button: ButtonResources,
    alp_flash: AlpFlashResources,
) {
    let config = SensorConfig::default();
    let clock = Uptime;

    let [left_trigger, right_trigger] = triggers;
    let left = &ECHO_CAPTURE[Side::Left.index()];
    let right = &ECHO_CAPTURE[Side::Right.index()];
    let ranging = RangingScheduler::new(
        &config,
        (Hcsr04::new(left_trigger, Delay, left), left),
        (Hcsr04::new(right_trigger, Delay, right), right),
    );

    static TX_BUF: StaticCell<[u8; UART_TX_BUF_SIZE]> = StaticCell::new();
    static RX_BUF: StaticCell<[u8; UART_RX_BUF_SIZE]> = StaticCell::new();
    let tx_buf = &mut TX_BUF.init([0; UART_TX_BUF_SIZE])[..];
    let rx_buf = &mut RX_BUF.init([0; UART_RX_BUF_SIZE])[..];
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = GPS_BAUD_RATE;
    let mut link = BufferedUart::new(gps.uart, Irqs, gps.tx_pin, gps.rx_pin, tx_buf, rx_buf, uart_config);

    let mut engine = GpsEngine::new();
    let report = engine.configure(&mut link, &clock);
    if !report.is_complete() {
        warn!("gps: {} of {} commands failed", report.failures.len(), report.sent);
    }
    {
        let mut state = SYSTEM_STATE.lock().await;
        state.receiver = ReceiverStatus::from(&report);
        state.receiver_version = engine.version().map(|v| v.software.clone());
    }

    let track_id = new_track_id(&mut WyRand::new_seed(Instant::now().as_ticks()));
    let mut store = FlashAlpStore::new(Flash::new_blocking(alp_flash.flash));
    let mut sink = CsvSink::new(
        LineQueue::default(),
        env!("CARGO_PKG_VERSION"),
        config.ranging.micro_sec_to_cm_divider,
    );
    let button = Input::new(button.pin, Pull::Up);

    let mut ml: MeasurementLoop<'_, _> = MeasurementLoop::new(config, ranging, engine, track_id);
    ml.set_alp_store(&mut store);
    info!("waiting for GPS, track {}", ml.track_id());

    let mut last_publish = Instant::now();
    loop {
        while let Some(event) = event::try_receive() {
            match event {
                Events::BatteryLevelMeasured(level) => ml.set_battery_percent(Some(level)),
            }
        }

        match ml.tick(&clock, &mut link, &mut sink, button.is_low()) {
            Ok(outcome) => {
                if outcome.rows_written > 0 {
                    debug!("{} rows written", outcome.rows_written);
                }
            }
            Err(e) => {
                error!("ranging: {}", e);
                Timer::after(ERROR_BACKOFF).await;
            }
        }

        if last_publish.elapsed() >= STATUS_INTERVAL {
            let mut state = SYSTEM_STATE.lock().await;
            state.status = Some(ml.status());
            state.diagnostics = Some(ml.diagnostics());
            last_publish = Instant::now();
        }

        yield_now().await;
    }
}
