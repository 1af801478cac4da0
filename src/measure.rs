//! The cooperative measurement loop
//!
//! [`MeasurementLoop::tick`] is one pass of the main loop:
//! 1. drain the GPS receiver and answer assisted-GPS requests
//! 2. leave the fix-wait phase once the configured policy holds
//! 3. poll the ranging scheduler and feed its readings to the pipeline
//! 4. debounce the button, a release confirms the pending minimum
//! 5. close the cycle on a new GPS epoch or when the cycle time is up
//!
//! While waiting for a fix the sensors alternate and nothing is recorded, the
//! distances are only shown. Once measuring, both sensors fire as fast as
//! the quiet periods allow.

use crate::button::{ButtonEdge, Debouncer};
use crate::clock::{elapsed, Clock};
use crate::config::{SensorConfig, Side};
use crate::gps::{AlpStore, GpsEngine, GpsFix, GpsLink, GpsStats};
use crate::pipeline::{CycleInfo, Pipeline, PipelineStats, RecordSink, TrackId, LOOKBACK_CAPACITY};
use crate::privacy::inside_any;
use crate::ranging::{ChannelStats, PollMode, RangingError, RangingScheduler, Transducer};

/// Cycle length while no fix is tracked
pub const CYCLE_MS: u32 = 1_000;

/// Cycle length while a fix is tracked; normally the next epoch closes it first
pub const CYCLE_WITH_FIX_MS: u32 = 1_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Fix-wait policy not met yet, nothing is recorded
    #[default]
    WaitingForFix,
    Measuring,
}

/// Snapshot for the display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LiveStatus {
    pub phase: Phase,
    /// Running median per side, indexed by [`Side::index`]
    pub distance_cm: [Option<u16>; 2],
    /// Minimum a button press would confirm now
    pub pending_cm: Option<u16>,
    pub last_confirmed_cm: Option<u16>,
    pub has_fix: bool,
    pub satellites: u8,
    pub battery_percent: Option<u8>,
}

/// Counters for the status page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    pub ranging: [ChannelStats; 2],
    pub gps: GpsStats,
    pub pipeline: PipelineStats,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickOutcome {
    pub button: Option<ButtonEdge>,
    pub cycle_closed: bool,
    pub rows_written: u32,
}

pub struct MeasurementLoop<'a, T, const N: usize = LOOKBACK_CAPACITY> {
    config: SensorConfig,
    ranging: RangingScheduler<'a, T>,
    gps: GpsEngine,
    pipeline: Pipeline<N>,
    button: Debouncer,
    alp_store: Option<&'a mut dyn AlpStore>,
    track_id: TrackId,
    phase: Phase,
    cycle_start_ms: u32,
    /// Time of the last tick
    now_ms: u32,
    battery_percent: Option<u8>,
}

impl<'a, T: Transducer, const N: usize> MeasurementLoop<'a, T, N> {
    /// `gps` is usually already configured; see [`GpsEngine::configure`]
    pub fn new(config: SensorConfig, ranging: RangingScheduler<'a, T>, gps: GpsEngine, track_id: TrackId) -> Self {
        let pipeline = Pipeline::new(&config, 0);
        let mut this = Self {
            config,
            ranging,
            gps,
            pipeline,
            button: Debouncer::new(),
            alp_store: None,
            track_id,
            phase: Phase::WaitingForFix,
            cycle_start_ms: 0,
            now_ms: 0,
            battery_percent: None,
        };
        this.ranging.set_mode(PollMode::Alternating);
        this
    }

    /// Serve AID-ALPSRV requests from `store`
    pub fn set_alp_store(&mut self, store: &'a mut dyn AlpStore) {
        self.alp_store = Some(store);
    }

    /// Latest battery level, stored in each following record
    pub fn set_battery_percent(&mut self, percent: Option<u8>) {
        self.battery_percent = percent;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn gps(&self) -> &GpsEngine {
        &self.gps
    }

    pub fn gps_mut(&mut self) -> &mut GpsEngine {
        &mut self.gps
    }

    pub fn ranging(&self) -> &RangingScheduler<'a, T> {
        &self.ranging
    }

    pub fn pipeline(&self) -> &Pipeline<N> {
        &self.pipeline
    }

    /// One pass of the main loop
    ///
    /// Only a failing sensor pin is reported; everything else is counted in
    /// [`Diagnostics`] and the loop carries on.
    pub fn tick<C, L, S>(
        &mut self,
        clock: &C,
        link: &mut L,
        sink: &mut S,
        button_pressed: bool,
    ) -> Result<TickOutcome, RangingError>
    where
        C: Clock,
        L: GpsLink,
        S: RecordSink + ?Sized,
    {
        let now_ms = clock.now_ms();
        self.now_ms = now_ms;
        let mut outcome = TickOutcome::default();

        if let Err(error) = self.gps.pump(link, now_ms) {
            warn!("gps: {}", error);
        }
        if let Some(store) = self.alp_store.as_deref_mut() {
            if let Err(error) = self.gps.serve_alp(link, store) {
                warn!("gps: ALP answer failed: {}", error);
            }
        }

        if self.phase == Phase::WaitingForFix && self.gps.fix_wait_satisfied(self.config.fix_wait) {
            self.start(now_ms, sink);
        }

        let polled = self.ranging.poll(clock.now_us())?;
        outcome.button = self.button.update(button_pressed, now_ms);

        if self.phase == Phase::Measuring {
            self.pipeline.on_poll(&polled, now_ms);
            if outcome.button == Some(ButtonEdge::Released) {
                self.pipeline.on_button_release();
            }

            let new_fix = self.gps.take_new_fix();
            let cycle_ms = if self.gps.has_recent_position(now_ms) {
                CYCLE_WITH_FIX_MS
            } else {
                CYCLE_MS
            };
            if new_fix.is_some() || elapsed(now_ms, self.cycle_start_ms) >= cycle_ms {
                outcome.rows_written = self.close_cycle(new_fix, now_ms, sink);
                outcome.cycle_closed = true;
            }
        }
        Ok(outcome)
    }

    /// Write out all buffered records, e.g. before power-off
    pub fn finish<S: RecordSink + ?Sized>(&mut self, sink: &mut S) -> u32 {
        self.pipeline.drain(sink)
    }

    pub fn status(&self) -> LiveStatus {
        let fix = self.gps.recent_fix(self.now_ms);
        LiveStatus {
            phase: self.phase,
            distance_cm: Side::ALL.map(|side| self.ranging.reported_distance(side)),
            pending_cm: self.pipeline.confirmation().pending().map(|p| p.distance_cm),
            last_confirmed_cm: self.pipeline.confirmation().last_confirmed(),
            has_fix: self.gps.has_recent_position(self.now_ms),
            satellites: fix.map_or(0, |f| f.satellites),
            battery_percent: self.battery_percent,
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            ranging: Side::ALL.map(|side| self.ranging.stats(side)),
            gps: self.gps.stats(),
            pipeline: self.pipeline.stats(),
        }
    }

    fn start<S: RecordSink + ?Sized>(&mut self, now_ms: u32, sink: &mut S) {
        info!("measuring, track {}", self.track_id.as_str());
        self.phase = Phase::Measuring;
        self.ranging.set_mode(PollMode::Parallel);
        self.ranging.reset_minimum();
        self.pipeline = Pipeline::new(&self.config, now_ms);
        self.cycle_start_ms = now_ms;
        // The epoch that satisfied the policy belongs to no record
        let _ = self.gps.take_new_fix();
        if let Err(error) = sink.write_header(&self.track_id) {
            error!("record sink: {}", error);
        }
    }

    fn close_cycle<S: RecordSink + ?Sized>(&mut self, new_fix: Option<GpsFix>, now_ms: u32, sink: &mut S) -> u32 {
        // A fix older than one missed epoch says nothing about this cycle
        let fix = new_fix.or_else(|| self.gps.recent_fix(now_ms).copied());
        let info = CycleInfo {
            time: new_fix.and_then(|f| f.utc()).or_else(|| self.gps.utc_now(now_ms)),
            gps: fix,
            battery_percent: self.battery_percent,
            in_privacy_area: fix.is_some_and(|f| inside_any(&self.config.privacy_areas, &f)),
        };
        let rows = self.pipeline.end_cycle(info, now_ms, sink);

        self.cycle_start_ms = now_ms;
        self.ranging.reset_minimum();
        self.pipeline.begin_cycle(now_ms);
        rows
    }
}
