//! Runtime configuration
//!
//! The configuration is an explicit value handed to the components that need
//! it. Where it comes from (web UI, JSON on flash) is not this crate's concern;
//! the firmware starts from [`SensorConfig::default`].

use heapless::Vec;

use crate::privacy::PrivacyArea;

/// Maximum number of privacy areas kept in the configuration
pub const MAX_PRIVACY_AREAS: usize = 8;

/// Microseconds of echo per centimetre of distance (340 m/s, two-way)
pub const MICRO_SEC_TO_CM_DIVIDER: u32 = 58;

/// Closest distance the HC-SR04 reports reliably
pub const MIN_DISTANCE_MEASURED_CM: u32 = 2;

/// Farthest distance still considered a reading
pub const MAX_DISTANCE_MEASURED_CM: u32 = 320;

/// Shortest accepted echo pulse
pub const MIN_DURATION_MICRO_SEC: u32 = MIN_DISTANCE_MEASURED_CM * MICRO_SEC_TO_CM_DIVIDER;

/// Longest accepted echo pulse (exclusive)
pub const MAX_DURATION_MICRO_SEC: u32 = MAX_DISTANCE_MEASURED_CM * MICRO_SEC_TO_CM_DIVIDER;

/// Upper bound of an echo pulse the sensor emits when nothing is in range
pub const MAX_TIMEOUT_MICRO_SEC: u32 = 75_000;

/// Physical mounting side of an ultrasonic sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    /// Towards the road, measures overtaking vehicles
    Left,
    /// Towards the kerb
    Right,
}

impl Side {
    /// Both sides in channel order
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    /// Channel index of this side
    pub const fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    /// The opposite sensor
    pub const fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Human readable location tag
    pub const fn tag(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// What the firmware waits for before starting to record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FixWaitPolicy {
    /// Start immediately
    None,
    /// Wait for a valid position fix
    Position,
    /// Wait until the clock has been set from GPS time
    Time,
    /// Wait until the receiver uses at least this many satellites
    Satellites(u8),
}

/// Timing parameters of the ultrasonic scheduler, all in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangingConfig {
    /// Minimum time between a channel's echo end and its next trigger
    pub quiet_after_end_us: u32,
    /// Minimum time between two triggers of the same channel
    pub quiet_after_own_start_us: u32,
    /// Minimum time between a trigger and the other channel's last trigger
    pub quiet_after_opposite_start_us: u32,
    /// A measurement without completion after twice this is abandoned
    pub max_timeout_us: u32,
    /// Length of the trigger pulse
    pub trigger_pulse_us: u32,
    /// Echo microseconds per centimetre
    pub micro_sec_to_cm_divider: u32,
    /// Replace a `start == trigger` timestamp with the other channel's start
    pub start_correction: bool,
    /// Window within which two starts are considered the same event
    pub start_correction_window_us: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            quiet_after_end_us: 10_000,
            quiet_after_own_start_us: 35_000,
            quiet_after_opposite_start_us: 30_000,
            max_timeout_us: MAX_TIMEOUT_MICRO_SEC,
            trigger_pulse_us: 20,
            micro_sec_to_cm_divider: MICRO_SEC_TO_CM_DIVIDER,
            start_correction: true,
            start_correction_window_us: 500,
        }
    }
}

/// Complete sensor configuration
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Distance from each sensor to the outer edge of the bike (cm), indexed by [`Side::index`]
    pub offsets_cm: [u16; 2],
    /// Sensor whose minimum can be confirmed with the button
    pub primary: Side,
    /// Seconds a minimum stays eligible for confirmation
    pub confirmation_window_s: u16,
    /// Areas in which records are flagged as private
    pub privacy_areas: Vec<PrivacyArea, MAX_PRIVACY_AREAS>,
    /// Start condition
    pub fix_wait: FixWaitPolicy,
    /// Ultrasonic timing
    pub ranging: RangingConfig,
}

impl SensorConfig {
    /// Offset for one side
    pub fn offset(&self, side: Side) -> u16 {
        self.offsets_cm[side.index()]
    }

    /// Confirmation window in milliseconds
    pub fn confirmation_window_ms(&self) -> u32 {
        u32::from(self.confirmation_window_s) * 1000
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            offsets_cm: [35, 30],
            primary: Side::Left,
            confirmation_window_s: 5,
            privacy_areas: Vec::new(),
            fix_wait: FixWaitPolicy::Position,
            ranging: RangingConfig::default(),
        }
    }
}
