//! Pluggable sources of simulated sensor values.

use super::rules;
use crate::measurement::{DayPhase, Measurement};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Raw values of one simulated measurement cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedReading {
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub pressure: f64,
    pub is_raining: bool,
    /// Second temperature sample taken half an interval later under low
    /// pressure.
    pub extra_temperature: Option<f64>,
}

impl SimulatedReading {
    pub fn to_measurement(&self, at: NaiveDateTime) -> Measurement {
        Measurement::new(at, self.temperature, self.humidity, self.pressure, self.is_raining)
    }
}

/// Produces one reading per simulated tick.
pub trait WeatherSource: Send {
    /// `at` is the simulated capture time; `extra_at` the time of the
    /// optional second temperature sample.
    fn measure(&mut self, at: NaiveDateTime, extra_at: NaiveDateTime) -> SimulatedReading;
}

/// Randomised station with day/night adjustments.
pub struct RandomWeatherSource<R: Rng> {
    rng: R,
}

impl<R: Rng> RandomWeatherSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn rain(&mut self, phase: DayPhase) -> bool {
        let raining = self.rng.gen_bool(0.5);
        // nights are a bit wetter
        raining || (!phase.is_day() && self.rng.gen_ratio(1, 5))
    }

    fn temperature(&mut self, phase: DayPhase) -> f64 {
        let base = f64::from(self.rng.gen_range(15..30_u32));
        let value = if phase.is_day() {
            base + self.rng.gen_range(0.0..5.0)
        } else {
            base - (2.0 + self.rng.gen_range(0.0..6.0))
        };
        round1(value)
    }

    fn humidity(&mut self, phase: DayPhase) -> f64 {
        let base = f64::from(self.rng.gen_range(30..90_u32));
        let value = if phase.is_day() {
            (base - self.rng.gen_range(0.0..5.0)).max(0.0)
        } else {
            (base + 5.0 + self.rng.gen_range(0.0..10.0)).min(100.0)
        };
        round1(value)
    }
}

impl RandomWeatherSource<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng + Send> WeatherSource for RandomWeatherSource<R> {
    fn measure(&mut self, at: NaiveDateTime, extra_at: NaiveDateTime) -> SimulatedReading {
        let phase = DayPhase::at(&at);
        let is_raining = self.rain(phase);
        let pressure = f64::from(self.rng.gen_range(930..=1020_u32));
        let temperature = self.temperature(phase);
        let humidity = rules::measures_humidity(is_raining).then(|| self.humidity(phase));
        let extra_temperature = (rules::temperature_frequency(pressure) == 2)
            .then(|| self.temperature(DayPhase::at(&extra_at)));

        SimulatedReading {
            temperature,
            humidity,
            pressure,
            is_raining,
            extra_temperature,
        }
    }
}

/// Replays a fixed list of readings, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    readings: Vec<SimulatedReading>,
    next: usize,
}

impl ScriptedSource {
    pub fn new(readings: Vec<SimulatedReading>) -> Self {
        Self { readings, next: 0 }
    }
}

impl WeatherSource for ScriptedSource {
    fn measure(&mut self, _at: NaiveDateTime, _extra_at: NaiveDateTime) -> SimulatedReading {
        if self.readings.is_empty() {
            return SimulatedReading {
                temperature: 0.0,
                humidity: None,
                pressure: 1013.25,
                is_raining: false,
                extra_temperature: None,
            };
        }
        let reading = self.readings[self.next % self.readings.len()].clone();
        self.next += 1;
        reading
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 19)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_random_readings_respect_rules_and_ranges() {
        let mut source = RandomWeatherSource::new(StdRng::seed_from_u64(7));
        for i in 0..500 {
            let hour = i % 24;
            let reading = source.measure(at(hour), at(hour));

            assert!((930.0..=1020.0).contains(&reading.pressure));
            assert_eq!(reading.humidity.is_some(), !reading.is_raining);
            assert_eq!(reading.extra_temperature.is_some(), reading.pressure < 950.0);
            if let Some(h) = reading.humidity {
                assert!((0.0..=100.0).contains(&h));
            }
            if DayPhase::from_hour(hour).is_day() {
                assert!((15.0..=34.0).contains(&reading.temperature));
            } else {
                assert!((7.0..=27.0).contains(&reading.temperature));
            }
        }
    }

    #[test]
    fn test_scripted_source_cycles() {
        let dry = SimulatedReading {
            temperature: 20.0,
            humidity: Some(40.0),
            pressure: 1000.0,
            is_raining: false,
            extra_temperature: None,
        };
        let wet = SimulatedReading {
            temperature: 12.0,
            humidity: None,
            pressure: 940.0,
            is_raining: true,
            extra_temperature: Some(11.5),
        };
        let mut source = ScriptedSource::new(vec![dry.clone(), wet.clone()]);
        assert_eq!(source.measure(at(1), at(1)), dry);
        assert_eq!(source.measure(at(2), at(2)), wet);
        assert_eq!(source.measure(at(3), at(3)), dry);
    }

    #[test]
    fn test_reading_to_measurement_uses_capture_hour() {
        let reading = SimulatedReading {
            temperature: 8.0,
            humidity: None,
            pressure: 990.0,
            is_raining: true,
            extra_temperature: None,
        };
        let m = reading.to_measurement(at(19));
        assert_eq!(m.day_phase, DayPhase::Night);
        assert_eq!(m.timestamp, "2025-10-19 19:00:00");
        assert_eq!(m.humidity, None);
    }
}
