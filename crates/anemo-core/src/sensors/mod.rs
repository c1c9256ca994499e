//! Sensor traits and typed readings
//!
//! Register-level drivers live in the firmware; the core only sees typed
//! readings and whether the last read succeeded.

mod wind;

pub use wind::*;

use thiserror_no_std::Error;

use crate::sampling::{Metric, Sample};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} read failed during {operation}: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor} is not responding")]
    NotResponding { sensor: &'static str },
    #[error("{sensor} timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
}

/// Trait for sensor reading data structures.
/// Provides compile-time guarantees about the number of values and the metric each one feeds.
pub trait SensorReadings<const COUNT: usize> {
    /// Metrics produced by this sensor, in the order of [`SensorReadings::to_array`].
    const METRICS: [Metric; COUNT];

    /// Convert the readings into a fixed-size array.
    fn to_array(&self) -> [f32; COUNT];

    /// Tag every value with its metric and the sampling instant.
    fn to_samples(&self, timestamp: i64) -> [Sample; COUNT] {
        let values = self.to_array();
        let mut i = 0;
        Self::METRICS.map(|metric| {
            let sample = Sample::new(metric, values[i], timestamp);
            i += 1;
            sample
        })
    }
}

/// Trait for sensors that produce typed readings.
pub trait Sensor<const COUNT: usize> {
    /// The type of readings this sensor produces.
    type Readings: SensorReadings<COUNT>;

    /// Name used in logs and error messages.
    const NAME: &'static str;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

/// Temperature, humidity and pressure from the environmental sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReadings {
    pub temperature_c: f32,
    pub humidity_rh: f32,
    pub pressure_hpa: f32,
}

impl SensorReadings<3> for EnvironmentReadings {
    const METRICS: [Metric; 3] = [Metric::Temperature, Metric::Humidity, Metric::Pressure];

    fn to_array(&self) -> [f32; 3] {
        [self.temperature_c, self.humidity_rh, self.pressure_hpa]
    }
}

/// Mass concentrations from the particulate sensor, in µg/m³.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticulateReadings {
    pub pm1: f32,
    pub pm25: f32,
    pub pm10: f32,
}

impl SensorReadings<3> for ParticulateReadings {
    const METRICS: [Metric; 3] = [Metric::Pm1, Metric::Pm25, Metric::Pm10];

    fn to_array(&self) -> [f32; 3] {
        [self.pm1, self.pm25, self.pm10]
    }
}

/// The polled sensors of the station. A disabled sensor is simply `None`.
pub struct SensorSet<E, P>
where
    E: Sensor<3, Readings = EnvironmentReadings>,
    P: Sensor<3, Readings = ParticulateReadings>,
{
    pub environment: Option<E>,
    pub particulate: Option<P>,
}

impl<E, P> SensorSet<E, P>
where
    E: Sensor<3, Readings = EnvironmentReadings>,
    P: Sensor<3, Readings = ParticulateReadings>,
{
    pub fn new(environment: Option<E>, particulate: Option<P>) -> Self {
        Self {
            environment,
            particulate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_samples_carry_metrics() {
        let readings = EnvironmentReadings {
            temperature_c: 21.5,
            humidity_rh: 48.0,
            pressure_hpa: 1013.2,
        };
        let samples = readings.to_samples(1000);
        assert_eq!(samples[0].metric, Metric::Temperature);
        assert_eq!(samples[1].metric, Metric::Humidity);
        assert_eq!(samples[2].metric, Metric::Pressure);
        assert_eq!(samples[2].value, 1013.2);
        assert!(samples.iter().all(|s| s.timestamp == 1000 && s.valid));
    }

    #[test]
    fn test_particulate_samples_carry_metrics() {
        let readings = ParticulateReadings {
            pm1: 3.0,
            pm25: 7.0,
            pm10: 11.0,
        };
        let metrics = readings.to_samples(5).map(|s| s.metric);
        assert_eq!(metrics, [Metric::Pm1, Metric::Pm25, Metric::Pm10]);
    }
}
