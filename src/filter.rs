//! Smoothing filters
//!
//! - [`median3`] / [`MedianOf3`]: rejects single-sample spikes in raw ranging data
//! - [`RunningMedian`]: 5-sample median of corrected distances for reporting
//! - [`ExponentialSmoother`]: first-order low pass for slowly moving values (battery)

use moving_median::MovingMedian;

/// Window of the reporting median
pub const RUNNING_MEDIAN_WINDOW: usize = 5;

/// Middle value of three
pub fn median3<T: PartialOrd + Copy>(a: T, b: T, c: T) -> T {
    if a > b {
        if b > c {
            b
        } else if a > c {
            c
        } else {
            a
        }
    } else if a > c {
        a
    } else if b > c {
        c
    } else {
        b
    }
}

/// Ring of the last three values, answering their median
///
/// Until three values have been pushed the missing slots repeat the first
/// value, so a fresh filter passes its first reading through unchanged.
#[derive(Debug, Clone)]
pub struct MedianOf3 {
    values: [u16; 3],
    next: usize,
    filled: bool,
}

impl MedianOf3 {
    pub const fn new() -> Self {
        Self {
            values: [0; 3],
            next: 0,
            filled: false,
        }
    }

    /// Adds a value and returns the median of the window
    pub fn push(&mut self, value: u16) -> u16 {
        if !self.filled {
            self.values = [value; 3];
            self.filled = true;
        }
        self.values[self.next] = value;
        self.next = (self.next + 1) % self.values.len();
        median3(self.values[0], self.values[1], self.values[2])
    }

    pub fn reset(&mut self) {
        self.filled = false;
        self.next = 0;
    }
}

impl Default for MedianOf3 {
    fn default() -> Self {
        Self::new()
    }
}

/// Median over the last [`RUNNING_MEDIAN_WINDOW`] readings
pub struct RunningMedian {
    filter: MovingMedian<f32, RUNNING_MEDIAN_WINDOW>,
    current: Option<u16>,
}

impl RunningMedian {
    pub fn new() -> Self {
        Self {
            filter: MovingMedian::new(),
            current: None,
        }
    }

    /// Add a value, returns the current median
    pub fn update(&mut self, value: u16) -> u16 {
        self.filter.add_value(f32::from(value));
        let median = libm::roundf(self.filter.median()) as u16;
        self.current = Some(median);
        median
    }

    /// Current median, `None` before the first value
    pub fn median(&self) -> Option<u16> {
        self.current
    }

    pub fn reset(&mut self) {
        self.filter = MovingMedian::new();
        self.current = None;
    }
}

impl Default for RunningMedian {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential smoothing: `y += alpha * (x - y)`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialSmoother {
    alpha: f32,
    value: Option<f32>,
}

impl ExponentialSmoother {
    /// `alpha` is clamped to `(0, 1]`; 1 disables smoothing
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, sample: f32) -> f32 {
        let next = match self.value {
            Some(previous) => previous + self.alpha * (sample - previous),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }
}
