//! Accelerated clock driving the simulated 24-hour cycle.

use chrono::{Local, NaiveDateTime};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulationClock {
    current: NaiveDateTime,
    interval_minutes: u32,
    speed_factor: u32,
}

impl SimulationClock {
    /// `speed_factor` is clamped to at least 1.
    pub fn new(start: NaiveDateTime, interval_minutes: u32, speed_factor: u32) -> Self {
        Self {
            current: start,
            interval_minutes,
            speed_factor: speed_factor.max(1),
        }
    }

    /// Clock starting at today's local midnight.
    pub fn from_midnight(interval_minutes: u32, speed_factor: u32) -> Self {
        let midnight = Local::now().date_naive().and_time(chrono::NaiveTime::MIN);
        Self::new(midnight, interval_minutes, speed_factor)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.current
    }

    /// Simulated time half an interval after the current tick.
    pub fn half_step(&self) -> NaiveDateTime {
        self.current + chrono::Duration::seconds(i64::from(self.interval_minutes) * 30)
    }

    /// Move to the next tick and return it.
    pub fn advance(&mut self) -> NaiveDateTime {
        self.current += chrono::Duration::minutes(i64::from(self.interval_minutes));
        self.current
    }

    /// Real time to wait between two ticks.
    pub fn real_delay(&self) -> Duration {
        let millis = u64::from(self.interval_minutes) * (1000 / u64::from(self.speed_factor));
        Duration::from_millis(millis)
    }
}
