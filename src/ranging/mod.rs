//! Dual ultrasonic ranging
//!
//! Two HC-SR04 sensors share the air: a ping from one can be heard by the
//! other. The scheduler therefore only triggers a channel when
//! - its echo line is low and its previous measurement is done,
//! - `quiet_after_end` has passed since that measurement ended,
//! - `quiet_after_own_start` has passed since its own last trigger,
//! - `quiet_after_opposite_start` has passed since the other channel's trigger.
//!
//! A measurement that does not complete within twice the sensor timeout is
//! abandoned, counted as "no signal", and the channel may fire again without
//! looking at the echo line.
//!
//! # Polling
//! [`RangingScheduler::poll`] never blocks. Call it as often as possible; it
//! collects finished echoes and fires whichever channel is allowed to.
//! - [`PollMode::Alternating`]: left, right, left, ... (used while waiting for GPS)
//! - [`PollMode::Parallel`]: each channel fires as soon as it is allowed,
//!   primary first (main measurement loop, highest sample rate)

mod capture;
mod channel;
mod transducer;

use thiserror::Error;

use crate::clock::elapsed;
use crate::config::{RangingConfig, SensorConfig, Side};

pub use capture::{EchoCapture, MeasurementState};
pub use channel::{apply_offset, distance_from_duration, ChannelStats, Reading, SensorChannel};
pub use transducer::{Hcsr04, Transducer};

/// Ranging failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangingError {
    #[error("{0:?} sensor pin access failed")]
    Pin(Side),
}

/// Trigger strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollMode {
    Alternating,
    Parallel,
}

/// What happened during one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollOutcome {
    readings: [Option<Reading>; 2],
    triggered: [bool; 2],
}

impl PollOutcome {
    /// Outcome carrying finished readings, indexed by [`Side::index`]
    pub fn from_readings(readings: [Option<Reading>; 2]) -> Self {
        Self {
            readings,
            triggered: [false; 2],
        }
    }

    /// Reading finished on `side` during this poll
    pub fn reading(&self, side: Side) -> Option<&Reading> {
        self.readings[side.index()].as_ref()
    }

    /// All readings finished during this poll
    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter().flatten()
    }

    /// Whether `side` was triggered during this poll
    pub fn triggered(&self, side: Side) -> bool {
        self.triggered[side.index()]
    }

    pub fn has_readings(&self) -> bool {
        self.readings.iter().any(Option::is_some)
    }
}

/// Owner of both sensor channels
pub struct RangingScheduler<'a, T> {
    channels: [SensorChannel<'a, T>; 2],
    config: RangingConfig,
    primary: Side,
    mode: PollMode,
    next_alternate: Side,
}

impl<'a, T: Transducer> RangingScheduler<'a, T> {
    /// `left` and `right` pair each sensor's trigger side with the capture
    /// cell its echo interrupt writes to
    pub fn new(config: &SensorConfig, left: (T, &'a EchoCapture), right: (T, &'a EchoCapture)) -> Self {
        Self {
            channels: [
                SensorChannel::new(Side::Left, left.0, left.1, config.offset(Side::Left)),
                SensorChannel::new(Side::Right, right.0, right.1, config.offset(Side::Right)),
            ],
            config: config.ranging,
            primary: config.primary,
            mode: PollMode::Alternating,
            next_alternate: config.primary,
        }
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PollMode) {
        if self.mode != mode {
            debug!("ranging mode {:?}", mode);
        }
        self.mode = mode;
    }

    pub fn channel(&self, side: Side) -> &SensorChannel<'a, T> {
        &self.channels[side.index()]
    }

    /// Last corrected distance of `side`
    pub fn distance(&self, side: Side) -> Option<u16> {
        self.channel(side).distance()
    }

    /// 5-sample median for display
    pub fn reported_distance(&self, side: Side) -> Option<u16> {
        self.channel(side).reported_distance()
    }

    /// Smallest corrected distance of `side` since the last reset
    pub fn minimum(&self, side: Side) -> Option<u16> {
        self.channel(side).minimum()
    }

    pub fn reset_minimum(&mut self) {
        for channel in &mut self.channels {
            channel.reset_minimum();
        }
    }

    pub fn stats(&self, side: Side) -> ChannelStats {
        self.channel(side).stats()
    }

    /// Collect finished echoes, then fire what may fire
    pub fn poll(&mut self, now_us: u32) -> Result<PollOutcome, RangingError> {
        let mut outcome = PollOutcome::default();
        for side in Side::ALL {
            outcome.readings[side.index()] = self.collect(side, now_us);
        }

        match self.mode {
            PollMode::Alternating => {
                let side = self.next_alternate;
                if self.is_ready(side, now_us)? {
                    self.fire(side, now_us)?;
                    outcome.triggered[side.index()] = true;
                    self.next_alternate = side.other();
                }
            }
            PollMode::Parallel => {
                for side in [self.primary, self.primary.other()] {
                    if self.is_ready(side, now_us)? {
                        self.fire(side, now_us)?;
                        outcome.triggered[side.index()] = true;
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Whether `side` may be triggered at `now_us`
    pub fn is_ready(&mut self, side: Side, now_us: u32) -> Result<bool, RangingError> {
        let other_trigger = self.channels[side.other().index()].trigger_us;
        let config = self.config;
        let channel = &mut self.channels[side.index()];

        if channel.in_flight {
            return Ok(false);
        }
        let quiet = |since: Option<u32>, period: u32| since.map_or(true, |t| elapsed(now_us, t) >= period);
        if !quiet(channel.end_us, config.quiet_after_end_us)
            || !quiet(channel.trigger_us, config.quiet_after_own_start_us)
            || !quiet(other_trigger, config.quiet_after_opposite_start_us)
        {
            return Ok(false);
        }
        if channel.forced_ready {
            return Ok(true);
        }
        let echo_high = channel
            .transducer
            .echo_high()
            .map_err(|_| RangingError::Pin(side))?;
        Ok(!echo_high)
    }

    fn fire(&mut self, side: Side, now_us: u32) -> Result<(), RangingError> {
        let pulse_us = self.config.trigger_pulse_us;
        let channel = &mut self.channels[side.index()];
        channel.start(now_us);
        channel
            .transducer
            .fire(pulse_us)
            .map_err(|_| RangingError::Pin(side))
    }

    fn collect(&mut self, side: Side, now_us: u32) -> Option<Reading> {
        let other = &self.channels[side.other().index()];
        let other_timing = (other.trigger_us, other.capture.start());
        let config = self.config;
        let channel = &mut self.channels[side.index()];

        if !channel.in_flight {
            return None;
        }
        let trigger_us = channel.trigger_us.unwrap_or(now_us);
        match channel.capture.state() {
            MeasurementState::Complete { start_us, end_us } => {
                let start_us = corrected_start(&config, start_us, trigger_us, other_timing);
                Some(channel.complete(start_us, end_us, config.micro_sec_to_cm_divider))
            }
            _ if elapsed(now_us, trigger_us) >= 2 * config.max_timeout_us => Some(channel.abandon(now_us)),
            _ => None,
        }
    }
}

/// Work around a timer read returning the trigger time as echo start
///
/// Observed on ESP32 when both sensors fire together. If this channel's start
/// equals its trigger and the other channel was triggered within the
/// correction window, the other channel's (plausible) start is used instead.
///
/// Only reachable when `quiet_after_opposite_start_us` is below
/// `start_correction_window_us`. With the default 30 ms opposite-start quiet
/// period the two triggers are never that close, so it never applies.
fn corrected_start(
    config: &RangingConfig,
    start_us: u32,
    trigger_us: u32,
    (other_trigger, other_start): (Option<u32>, Option<u32>),
) -> u32 {
    if !config.start_correction || start_us != trigger_us {
        return start_us;
    }
    match (other_trigger, other_start) {
        (Some(other_trigger), Some(other_start))
            if other_start != other_trigger
                && abs_diff(trigger_us, other_trigger) < config.start_correction_window_us =>
        {
            trace!("start correction applied");
            other_start
        }
        _ => start_us,
    }
}

fn abs_diff(a: u32, b: u32) -> u32 {
    elapsed(a, b).min(elapsed(b, a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use core::convert::Infallible;

    struct MockSensor<'a> {
        side: Side,
        capture: &'a EchoCapture,
        clock: &'a Cell<u32>,
        fired: &'a RefCell<Vec<(Side, u32)>>,
    }

    impl Transducer for MockSensor<'_> {
        type Error = Infallible;

        fn echo_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.capture.echo_high())
        }

        fn fire(&mut self, _pulse_us: u32) -> Result<(), Infallible> {
            self.fired.borrow_mut().push((self.side, self.clock.get()));
            Ok(())
        }
    }

    /// Echo delay after the trigger, as the HC-SR04 does
    const ECHO_DELAY_US: u32 = 250;
    const STEP_US: u32 = 100;

    struct Bench {
        captures: [EchoCapture; 2],
        clock: Cell<u32>,
        fired: RefCell<Vec<(Side, u32)>>,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                captures: [EchoCapture::new(), EchoCapture::new()],
                clock: Cell::new(0),
                fired: RefCell::new(Vec::new()),
            }
        }

        fn scheduler(&self, config: &SensorConfig) -> RangingScheduler<'_, MockSensor<'_>> {
            let sensor = |side: Side| MockSensor {
                side,
                capture: &self.captures[side.index()],
                clock: &self.clock,
                fired: &self.fired,
            };
            RangingScheduler::new(
                config,
                (sensor(Side::Left), &self.captures[0]),
                (sensor(Side::Right), &self.captures[1]),
            )
        }

        /// Run for `until_us`, answering each trigger with an echo of the
        /// given length (`None`: no echo at all)
        fn run(
            &self,
            scheduler: &mut RangingScheduler<'_, MockSensor<'_>>,
            echo_us: [Option<u32>; 2],
            until_us: u32,
        ) -> Vec<Reading> {
            let mut readings = Vec::new();
            let mut pending: [Option<(u32, bool)>; 2] = [None, None];
            let mut seen = self.fired.borrow().len();
            let mut now = self.clock.get();
            while now < until_us {
                self.clock.set(now);
                for side in Side::ALL {
                    let i = side.index();
                    let (Some((fired_at, rose)), Some(length)) = (pending[i], echo_us[i]) else {
                        continue;
                    };
                    let rise = fired_at + ECHO_DELAY_US;
                    if !rose && now >= rise {
                        self.captures[i].on_edge(true, rise);
                        pending[i] = Some((fired_at, true));
                    }
                    if now >= rise + length {
                        self.captures[i].on_edge(false, rise + length);
                        pending[i] = None;
                    }
                }
                let outcome = scheduler.poll(now).unwrap();
                readings.extend(outcome.readings().copied());
                let fired = self.fired.borrow();
                for &(side, at) in &fired[seen..] {
                    pending[side.index()] = Some((at, false));
                }
                seen = fired.len();
                now += STEP_US;
            }
            self.clock.set(now);
            readings
        }
    }

    #[test]
    fn channels_never_fire_within_opposite_quiet_period() {
        let bench = Bench::new();
        let config = SensorConfig::default();
        let mut scheduler = bench.scheduler(&config);
        scheduler.set_mode(PollMode::Parallel);

        bench.run(&mut scheduler, [Some(3_000), Some(9_000)], 2_000_000);

        let fired = bench.fired.borrow();
        assert!(fired.iter().filter(|(s, _)| *s == Side::Left).count() > 10);
        assert!(fired.iter().filter(|(s, _)| *s == Side::Right).count() > 10);
        for (i, &(side, at)) in fired.iter().enumerate() {
            for &(earlier_side, earlier_at) in &fired[..i] {
                let gap = at - earlier_at;
                if earlier_side != side {
                    assert!(
                        gap >= config.ranging.quiet_after_opposite_start_us,
                        "{side:?} fired {gap} us after {earlier_side:?}"
                    );
                } else {
                    assert!(gap >= config.ranging.quiet_after_own_start_us);
                }
            }
        }
    }

    #[test]
    fn alternating_mode_alternates() {
        let bench = Bench::new();
        let config = SensorConfig::default();
        let mut scheduler = bench.scheduler(&config);

        bench.run(&mut scheduler, [Some(2_000), Some(2_000)], 500_000);

        let fired = bench.fired.borrow();
        assert!(fired.len() > 6);
        for pair in fired.windows(2) {
            assert_ne!(pair[0].0, pair[1].0);
        }
        assert_eq!(fired[0].0, Side::Left);
    }

    #[test]
    fn readings_are_offset_corrected() {
        let bench = Bench::new();
        let config = SensorConfig::default();
        let mut scheduler = bench.scheduler(&config);
        scheduler.set_mode(PollMode::Parallel);

        // 100 cm left, 50 cm right
        let readings = bench.run(&mut scheduler, [Some(5_800), Some(2_900)], 400_000);

        let left: Vec<_> = readings.iter().filter(|r| r.side == Side::Left).collect();
        let right: Vec<_> = readings.iter().filter(|r| r.side == Side::Right).collect();
        assert!(!left.is_empty() && !right.is_empty());
        for reading in left {
            assert_eq!(reading.duration_us, Some(5_800));
            assert_eq!(reading.raw_cm, Some(100));
            assert_eq!(reading.distance_cm, Some(100 - config.offset(Side::Left)));
        }
        for reading in right {
            assert_eq!(reading.distance_cm, Some(50 - config.offset(Side::Right)));
        }
        assert_eq!(scheduler.minimum(Side::Left), Some(65));
        assert_eq!(scheduler.reported_distance(Side::Left), Some(65));
    }

    #[test]
    fn missing_echo_is_recovered_and_counted() {
        let bench = Bench::new();
        let config = SensorConfig::default();
        let mut scheduler = bench.scheduler(&config);
        scheduler.set_mode(PollMode::Parallel);

        let readings = bench.run(&mut scheduler, [Some(2_000), None], 1_000_000);

        let right: Vec<_> = readings.iter().filter(|r| r.side == Side::Right).collect();
        assert!(right.len() >= 4);
        assert!(right.iter().all(|r| r.timed_out() && r.distance_cm.is_none()));
        let stats = scheduler.stats(Side::Right);
        assert_eq!(stats.no_signal as usize, right.len());
        assert!(stats.triggers as usize >= right.len());
        assert_eq!(scheduler.stats(Side::Left).no_signal, 0);
    }

    #[test]
    fn out_of_range_echo_is_no_reading() {
        let bench = Bench::new();
        let config = SensorConfig::default();
        let mut scheduler = bench.scheduler(&config);

        let readings = bench.run(&mut scheduler, [Some(40_000), Some(40_000)], 600_000);

        assert!(!readings.is_empty());
        assert!(readings.iter().all(|r| r.duration_us == Some(40_000) && r.distance_cm.is_none()));
        assert_eq!(scheduler.stats(Side::Left).max_duration_us, Some(40_000));
    }

    #[test]
    fn high_echo_line_blocks_trigger() {
        let bench = Bench::new();
        let config = SensorConfig::default();
        let mut scheduler = bench.scheduler(&config);

        bench.captures[0].on_edge(true, 0);
        assert!(!scheduler.is_ready(Side::Left, 0).unwrap());
        bench.captures[0].on_edge(false, 10);
        assert!(scheduler.is_ready(Side::Left, 20).unwrap());
    }

    #[test]
    fn simultaneous_start_is_corrected_from_other_channel() {
        let bench = Bench::new();
        let mut config = SensorConfig::default();
        config.ranging.quiet_after_opposite_start_us = 0;
        let mut scheduler = bench.scheduler(&config);
        scheduler.set_mode(PollMode::Parallel);

        let outcome = scheduler.poll(1_000).unwrap();
        assert!(outcome.triggered(Side::Left) && outcome.triggered(Side::Right));

        // left's start was sampled as the trigger time
        bench.captures[0].on_edge(true, 1_000);
        bench.captures[1].on_edge(true, 1_300);
        bench.captures[1].on_edge(false, 1_300 + 2_900);
        bench.captures[0].on_edge(false, 1_300 + 5_800);

        let outcome = scheduler.poll(8_000).unwrap();
        assert_eq!(outcome.reading(Side::Left).and_then(|r| r.duration_us), Some(5_800));
        assert_eq!(outcome.reading(Side::Right).and_then(|r| r.duration_us), Some(2_900));
    }

    #[test]
    fn start_correction_can_be_disabled() {
        let bench = Bench::new();
        let mut config = SensorConfig::default();
        config.ranging.quiet_after_opposite_start_us = 0;
        config.ranging.start_correction = false;
        let mut scheduler = bench.scheduler(&config);
        scheduler.set_mode(PollMode::Parallel);

        scheduler.poll(1_000).unwrap();
        bench.captures[0].on_edge(true, 1_000);
        bench.captures[1].on_edge(true, 1_300);
        bench.captures[0].on_edge(false, 1_300 + 5_800);

        let outcome = scheduler.poll(8_000).unwrap();
        assert_eq!(outcome.reading(Side::Left).and_then(|r| r.duration_us), Some(6_100));
    }

    #[test]
    fn default_quiet_period_leaves_start_uncorrected() {
        let config = SensorConfig::default();
        assert!(config.ranging.quiet_after_opposite_start_us >= config.ranging.start_correction_window_us);
        let bench = Bench::new();
        let mut scheduler = bench.scheduler(&config);
        scheduler.set_mode(PollMode::Parallel);

        let outcome = scheduler.poll(1_000).unwrap();
        assert!(outcome.triggered(Side::Left) && !outcome.triggered(Side::Right));

        // left's start was sampled as the trigger time, right is still held back
        bench.captures[0].on_edge(true, 1_000);
        bench.captures[0].on_edge(false, 1_000 + 6_100);

        let outcome = scheduler.poll(8_000).unwrap();
        assert!(!outcome.triggered(Side::Right));
        assert_eq!(outcome.reading(Side::Left).and_then(|r| r.duration_us), Some(6_100));
    }
}
