//! HC-SR04 trigger side
//!
//! The scheduler only needs two things from the hardware: the current echo
//! level and a trigger pulse. Echo timing itself arrives through
//! [`EchoCapture`](super::EchoCapture).

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use super::EchoCapture;

/// Hardware access the scheduler needs for one sensor
pub trait Transducer {
    type Error;

    /// Whether the echo line is currently high
    fn echo_high(&mut self) -> Result<bool, Self::Error>;

    /// Drive the trigger high for `pulse_us`, then low
    fn fire(&mut self, pulse_us: u32) -> Result<(), Self::Error>;
}

/// HC-SR04 on a trigger output pin
///
/// The echo pin belongs to the edge interrupt; its level is read back from the
/// capture cell that interrupt feeds.
pub struct Hcsr04<'a, O, D> {
    trigger: O,
    delay: D,
    capture: &'a EchoCapture,
}

impl<'a, O: OutputPin, D: DelayNs> Hcsr04<'a, O, D> {
    pub fn new(trigger: O, delay: D, capture: &'a EchoCapture) -> Self {
        Self {
            trigger,
            delay,
            capture,
        }
    }
}

impl<O: OutputPin, D: DelayNs> Transducer for Hcsr04<'_, O, D> {
    type Error = O::Error;

    fn echo_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.capture.echo_high())
    }

    fn fire(&mut self, pulse_us: u32) -> Result<(), Self::Error> {
        self.trigger.set_high()?;
        self.delay.delay_us(pulse_us);
        self.trigger.set_low()
    }
}
