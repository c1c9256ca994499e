//! Pulse anemometer
//!
//! The reed switch interrupt calls [`PulseCounter::on_pulse`]; the control loop
//! calls [`WindSampler::poll`] which drains the counter once per window and
//! converts the pulse rate into a wind speed.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use log::trace;

use crate::config::WindConfig;

#[derive(Debug, Clone, Copy, Default)]
struct PulseState {
    count: u32,
    last_pulse: Option<Instant>,
}

/// Pulse counter shared between the interrupt handler and the control loop.
///
/// Both sides go through a critical section, so the interrupt only ever does a
/// compare, an increment and a timestamp store. Construct it once (usually in a
/// `static` or `StaticCell`) and hand a reference to the station.
pub struct PulseCounter {
    state: Mutex<CriticalSectionRawMutex, Cell<PulseState>>,
    debounce: Duration,
}

impl PulseCounter {
    pub const fn new(debounce: Duration) -> Self {
        Self {
            state: Mutex::new(Cell::new(PulseState {
                count: 0,
                last_pulse: None,
            })),
            debounce,
        }
    }

    pub fn from_config(config: &WindConfig) -> Self {
        Self::new(Duration::from_micros(config.debounce_us))
    }

    /// Interrupt-side entry point: count one edge unless it is contact bounce.
    pub fn on_pulse(&self, at: Instant) {
        self.state.lock(|cell| {
            let mut state = cell.get();
            if let Some(last) = state.last_pulse {
                if at.saturating_duration_since(last) < self.debounce {
                    return;
                }
            }
            state.count = state.count.saturating_add(1);
            state.last_pulse = Some(at);
            cell.set(state);
        });
    }

    /// Loop-side entry point: read and clear the pulse count atomically.
    ///
    /// The debounce timestamp survives the drain so a bounce straddling the
    /// window edge is still rejected.
    pub fn drain(&self) -> u32 {
        self.state.lock(|cell| {
            let mut state = cell.get();
            let count = state.count;
            state.count = 0;
            cell.set(state);
            count
        })
    }
}

/// One wind measurement derived from a pulse window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindReading {
    pub pulses: u32,
    pub pulses_per_second: f32,
    pub speed_ms: f32,
}

impl WindReading {
    /// Convert a pulse count over an elapsed window into a rate and a speed.
    pub fn from_pulses(pulses: u32, elapsed: Duration, pps_to_ms: f32) -> Option<Self> {
        let micros = elapsed.as_micros();
        if micros == 0 {
            return None;
        }
        let pulses_per_second = pulses as f32 * 1_000_000.0 / micros as f32;
        Some(Self {
            pulses,
            pulses_per_second,
            speed_ms: pulses_per_second * pps_to_ms,
        })
    }
}

/// Loop-side windowing over a [`PulseCounter`].
pub struct WindSampler {
    window: Duration,
    pps_to_ms: f32,
    window_start: Option<Instant>,
}

impl WindSampler {
    pub fn new(config: &WindConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            pps_to_ms: config.pps_to_ms,
            window_start: None,
        }
    }

    /// Produce a reading when the current window has elapsed.
    ///
    /// The first call only opens a window; pulses counted before it are
    /// discarded because their window length is unknown.
    pub fn poll(&mut self, counter: &PulseCounter, now: Instant) -> Option<WindReading> {
        let Some(start) = self.window_start else {
            counter.drain();
            self.window_start = Some(now);
            return None;
        };

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.window {
            return None;
        }

        let pulses = counter.drain();
        self.window_start = Some(now);
        let reading = WindReading::from_pulses(pulses, elapsed, self.pps_to_ms)?;
        trace!(
            "Wind window: {} pulses, {:.2} pps, {:.2} m/s",
            reading.pulses, reading.pulses_per_second, reading.speed_ms
        );
        Some(reading)
    }
}
