//! Events for the measurement task
//!
//! Side tasks post here; the measurement loop drains the queue between
//! ticks and never waits on it.

use defmt::Format;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

/// Events that can pile up between two ticks
const EVENT_QUEUE_SIZE: usize = 10;

static EVENTS: Channel<CriticalSectionRawMutex, Events, EVENT_QUEUE_SIZE> = Channel::new();

#[derive(Debug, Clone, Copy, PartialEq, Format)]
pub enum Events {
    /// Smoothed charge level in percent, goes into the following records
    BatteryLevelMeasured(u8),
}

/// Queue an event, dropping it if the measurement task is far behind
pub fn post(event: Events) {
    if EVENTS.try_send(event).is_err() {
        defmt::warn!("event queue full, dropped {}", event);
    }
}

/// Next queued event, if any
pub fn try_receive() -> Option<Events> {
    EVENTS.try_receive().ok()
}
