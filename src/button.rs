//! Confirmation button debouncing
//!
//! The level must hold for [`DEBOUNCE_MS`] before an edge is reported.
//! Releasing the button confirms the pending minimum.

use crate::clock::elapsed;

/// Button debounce interval (ms)
pub const DEBOUNCE_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEdge {
    Pressed,
    Released,
}

/// Debounce state machine fed with raw levels
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    /// Debounced level, `true` while pressed
    stable: bool,
    /// Last raw level and when it was first seen
    candidate: bool,
    since_ms: u32,
}

impl Debouncer {
    pub const fn new() -> Self {
        Self {
            stable: false,
            candidate: false,
            since_ms: 0,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Sample the raw level; returns an edge once a change has been stable long enough
    pub fn update(&mut self, pressed: bool, now_ms: u32) -> Option<ButtonEdge> {
        if pressed != self.candidate {
            self.candidate = pressed;
            self.since_ms = now_ms;
            return None;
        }
        if pressed == self.stable || elapsed(now_ms, self.since_ms) < DEBOUNCE_MS {
            return None;
        }
        self.stable = pressed;
        Some(if pressed {
            ButtonEdge::Pressed
        } else {
            ButtonEdge::Released
        })
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(debouncer: &mut Debouncer, pressed: bool, from_ms: u32, to_ms: u32) -> Vec<(u32, ButtonEdge)> {
        (from_ms..to_ms)
            .step_by(5)
            .filter_map(|t| debouncer.update(pressed, t).map(|e| (t, e)))
            .collect()
    }

    #[test]
    fn press_and_release_after_stable_level() {
        let mut debouncer = Debouncer::new();
        assert!(feed(&mut debouncer, false, 0, 100).is_empty());
        assert_eq!(feed(&mut debouncer, true, 100, 300), [(150, ButtonEdge::Pressed)]);
        assert!(debouncer.is_pressed());
        assert_eq!(feed(&mut debouncer, false, 300, 400), [(350, ButtonEdge::Released)]);
        assert!(!debouncer.is_pressed());
    }

    #[test]
    fn bouncing_contact_gives_one_edge() {
        let mut debouncer = Debouncer::new();
        let mut edges = Vec::new();
        for (t, level) in [(0, true), (3, false), (7, true), (12, false), (15, true)] {
            edges.extend(debouncer.update(level, t));
        }
        assert!(edges.is_empty());
        edges.extend(feed(&mut debouncer, true, 20, 120).into_iter().map(|(_, e)| e));
        assert_eq!(edges, [ButtonEdge::Pressed]);
    }

    #[test]
    fn short_glitch_is_ignored() {
        let mut debouncer = Debouncer::new();
        debouncer.update(true, 0);
        debouncer.update(true, 30);
        debouncer.update(false, 40);
        assert!(feed(&mut debouncer, false, 45, 200).is_empty());
        assert!(!debouncer.is_pressed());
    }

    #[test]
    fn survives_tick_wraparound() {
        let mut debouncer = Debouncer::new();
        let start = u32::MAX - 20;
        assert_eq!(debouncer.update(true, start), None);
        assert_eq!(debouncer.update(true, start.wrapping_add(49)), None);
        assert_eq!(debouncer.update(true, start.wrapping_add(50)), Some(ButtonEdge::Pressed));
    }
}
