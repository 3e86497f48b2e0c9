//! Measurement rules applied by the simulated station.

/// Below this pressure the temperature is sampled twice per interval.
pub const LOW_PRESSURE_HPA: f64 = 950.0;

/// Humidity is only measured while it is dry.
pub fn measures_humidity(is_raining: bool) -> bool {
    !is_raining
}

/// Temperature samples per measurement interval: 2 under low pressure,
/// otherwise 1.
pub fn temperature_frequency(pressure: f64) -> u32 {
    if pressure < LOW_PRESSURE_HPA { 2 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humidity_only_when_dry() {
        assert!(measures_humidity(false));
        assert!(!measures_humidity(true));
    }

    #[test]
    fn test_low_pressure_doubles_frequency() {
        assert_eq!(temperature_frequency(930.0), 2);
        assert_eq!(temperature_frequency(949.9), 2);
        assert_eq!(temperature_frequency(950.0), 1);
        assert_eq!(temperature_frequency(1020.0), 1);
    }
}
