//! Echo edge capture
//!
//! One task per HC-SR04 echo pin, spawned on the high-priority interrupt
//! executor so the timestamp is taken right after the edge. The task only
//! stores into the channel's [`EchoCapture`] atomics; all interpretation
//! happens in the measurement loop.

use embassy_rp::gpio::Input;
use overtake_sensor::ranging::EchoCapture;

use crate::system::uptime::now_us;

/// Edge timestamps of the left and right sensor, indexed by `Side::index`
pub static ECHO_CAPTURE: [EchoCapture; 2] = [EchoCapture::new(), EchoCapture::new()];

/// Timestamps every edge on `echo` into `capture`
#[embassy_executor::task(pool_size = 2)]
pub async fn echo_capture(mut echo: Input<'static>, capture: &'static EchoCapture) {
    loop {
        echo.wait_for_high().await;
        capture.on_edge(true, now_us());
        echo.wait_for_low().await;
        capture.on_edge(false, now_us());
    }
}
