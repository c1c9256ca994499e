//! Metrics and samples flowing from the sensors into the aggregator

/// Number of metrics tracked per bucket.
pub const METRIC_COUNT: usize = 7;

/// Every quantity the station aggregates.
///
/// The discriminant doubles as the index into per-metric arrays, so the order
/// here is the storage order used by [`crate::storage::Bucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Wind speed in m/s
    Wind = 0,
    /// Air temperature in °C
    Temperature = 1,
    /// Relative humidity in %
    Humidity = 2,
    /// Pressure in hPa
    Pressure = 3,
    /// PM1.0 in µg/m³
    Pm1 = 4,
    /// PM2.5 in µg/m³
    Pm25 = 5,
    /// PM10 in µg/m³
    Pm10 = 6,
}

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::Wind,
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::Pm1,
        Metric::Pm25,
        Metric::Pm10,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Wind => "wind",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Pm1 => "pm1",
            Self::Pm25 => "pm25",
            Self::Pm10 => "pm10",
        }
    }
}

/// One reading of one metric at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub metric: Metric,
    pub value: f32,
    /// False when the producing sensor reported a failure
    pub valid: bool,
    /// Unix epoch seconds
    pub timestamp: i64,
}

impl Sample {
    pub const fn new(metric: Metric, value: f32, timestamp: i64) -> Self {
        Self {
            metric,
            value,
            valid: true,
            timestamp,
        }
    }

    pub const fn invalid(metric: Metric, timestamp: i64) -> Self {
        Self {
            metric,
            value: 0.0,
            valid: false,
            timestamp,
        }
    }

    /// Whether the value may be folded into an aggregate.
    pub fn is_usable(&self) -> bool {
        self.valid && self.value.is_finite()
    }
}

/// Latest instantaneous readings, copied out whole for snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatestReadings {
    pub wind_pps: Option<f32>,
    pub wind_ms: Option<f32>,
    pub environment_ok: bool,
    pub temperature_c: Option<f32>,
    pub humidity_rh: Option<f32>,
    pub pressure_hpa: Option<f32>,
    pub particulate_ok: bool,
    pub pm1: Option<f32>,
    pub pm25: Option<f32>,
    pub pm10: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_indices_match_order() {
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
        }
    }

    #[test]
    fn test_non_finite_samples_are_not_usable() {
        assert!(Sample::new(Metric::Wind, 1.0, 0).is_usable());
        assert!(!Sample::new(Metric::Wind, f32::NAN, 0).is_usable());
        assert!(!Sample::invalid(Metric::Pm25, 0).is_usable());
    }
}
