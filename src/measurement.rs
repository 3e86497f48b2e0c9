//! Weather measurement value type.
//!
//! A measurement is produced once per sensor cycle and copied by value
//! through the hub and into the aggregator. The capture timestamp is kept as
//! the producer's display string; anything that needs ordering uses the
//! receive time tracked next to it.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display format of the capture timestamp (`YYYY-MM-DD HH:mm:ss`, local
/// time of the producing clock, no zone suffix).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Day/night tag attached to each reading.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DayPhase {
    Day,
    Night,
}

impl DayPhase {
    /// Day runs from 06:00 (inclusive) to 18:00 (exclusive).
    pub fn from_hour(hour: u32) -> Self {
        if (6..18).contains(&hour) {
            DayPhase::Day
        } else {
            DayPhase::Night
        }
    }

    pub fn at(time: &NaiveDateTime) -> Self {
        Self::from_hour(time.hour())
    }

    pub fn is_day(self) -> bool {
        self == DayPhase::Day
    }
}

/// One sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Capture time as formatted by the producer.
    pub timestamp: String,
    pub day_phase: DayPhase,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent; absent while it rains.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Hectopascal.
    pub pressure: f64,
    pub is_raining: bool,
}

impl Measurement {
    /// Build a measurement captured at `captured_at`, deriving the day phase
    /// from the capture hour.
    pub fn new(
        captured_at: NaiveDateTime,
        temperature: f64,
        humidity: Option<f64>,
        pressure: f64,
        is_raining: bool,
    ) -> Self {
        Self {
            timestamp: format_timestamp(&captured_at),
            day_phase: DayPhase::at(&captured_at),
            temperature,
            humidity,
            pressure,
            is_raining,
        }
    }

    /// Parse the display timestamp back. `None` if the producer used some
    /// other format; the string is still carried unchanged in that case.
    pub fn captured_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] temp={:.1}°C, ",
            self.timestamp, self.day_phase, self.temperature
        )?;
        match self.humidity {
            Some(h) => write!(f, "humidity={:.1}%, ", h)?,
            None => write!(f, "humidity=--, ")?,
        }
        write!(
            f,
            "pressure={:.1} hPa, rain={}",
            self.pressure,
            if self.is_raining { "yes" } else { "no" }
        )
    }
}

pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 19)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_day_phase_boundaries() {
        assert_eq!(DayPhase::from_hour(5), DayPhase::Night);
        assert_eq!(DayPhase::from_hour(6), DayPhase::Day);
        assert_eq!(DayPhase::from_hour(17), DayPhase::Day);
        assert_eq!(DayPhase::from_hour(18), DayPhase::Night);
        assert_eq!(DayPhase::from_hour(0), DayPhase::Night);
    }

    #[test]
    fn test_day_phase_text_form() {
        assert_eq!(DayPhase::Day.to_string(), "DAY");
        assert_eq!(DayPhase::from_str("NIGHT").unwrap(), DayPhase::Night);
        assert_eq!(serde_json::to_string(&DayPhase::Day).unwrap(), "\"DAY\"");
    }

    #[test]
    fn test_new_formats_timestamp_and_phase() {
        let m = Measurement::new(at(14, 30), 22.5, Some(45.0), 1013.2, false);
        assert_eq!(m.timestamp, "2025-10-19 14:30:00");
        assert_eq!(m.day_phase, DayPhase::Day);
        assert_eq!(m.captured_at(), Some(at(14, 30)));
    }

    #[test]
    fn test_missing_humidity_deserializes_as_none() {
        let json = r#"{"timestamp":"2025-10-19 02:00:00","day_phase":"NIGHT","temperature":11.0,"pressure":940.0,"is_raining":true}"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.humidity, None);
        assert!(m.is_raining);
    }

    #[test]
    fn test_display_line() {
        let m = Measurement::new(at(2, 15), 9.04, None, 941.0, true);
        assert_eq!(
            m.to_string(),
            "[2025-10-19 02:15:00] [NIGHT] temp=9.0°C, humidity=--, pressure=941.0 hPa, rain=yes"
        );
    }
}
