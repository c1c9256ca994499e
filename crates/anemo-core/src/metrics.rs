//! Air quality index for particulate readings
//!
//! Implements the US EPA piecewise-linear AQI for PM2.5 and PM10. Each
//! breakpoint row maps a concentration range onto an index range; the index is
//! interpolated linearly inside the row and rounded to the nearest integer.

/// AQI category for a computed index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const fn from_index(index: u16) -> Self {
        match index {
            0..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthySensitive,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    /// Get the display label for this category
    pub const fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthySensitive => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }
}

/// Pollutants with an AQI breakpoint table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pollutant {
    Pm25,
    Pm10,
}

/// `(c_lo, c_hi, i_lo, i_hi)` with concentrations in scaled integer units
type Breakpoint = (u32, u32, u32, u32);

// µg/m³ × 10, truncated to one decimal
const PM25_BREAKPOINTS: [Breakpoint; 7] = [
    (0, 120, 0, 50),
    (121, 354, 51, 100),
    (355, 554, 101, 150),
    (555, 1504, 151, 200),
    (1505, 2504, 201, 300),
    (2505, 3504, 301, 400),
    (3505, 5004, 401, 500),
];

// µg/m³, truncated to an integer
const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    (0, 54, 0, 50),
    (55, 154, 51, 100),
    (155, 254, 101, 150),
    (255, 354, 151, 200),
    (355, 424, 201, 300),
    (425, 504, 301, 400),
    (505, 604, 401, 500),
];

pub const AQI_MAX: u16 = 500;

/// Computed index and its category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AqiReading {
    pub index: u16,
    pub category: AqiCategory,
}

impl Pollutant {
    const fn table(self) -> (&'static [Breakpoint], f32) {
        match self {
            Self::Pm25 => (&PM25_BREAKPOINTS, 10.0),
            Self::Pm10 => (&PM10_BREAKPOINTS, 1.0),
        }
    }

    /// AQI for a concentration in µg/m³.
    ///
    /// Negative or non-finite readings have no index; concentrations beyond the
    /// table clamp to 500.
    pub fn aqi(self, concentration: f32) -> Option<AqiReading> {
        if !concentration.is_finite() || concentration < 0.0 {
            return None;
        }
        let (table, scale) = self.table();
        // `as` truncates toward zero and saturates
        let c = (concentration * scale) as u32;

        let index = table
            .iter()
            .find(|&&(_, c_hi, _, _)| c <= c_hi)
            .map(|&(c_lo, c_hi, i_lo, i_hi)| {
                // Round half up: (2n + d) / 2d
                let num = (i_hi - i_lo) * (c.max(c_lo) - c_lo);
                let den = c_hi - c_lo;
                i_lo + (2 * num + den) / (2 * den)
            })
            .map_or(AQI_MAX, |i| i as u16);

        Some(AqiReading {
            index,
            category: AqiCategory::from_index(index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pm25_breakpoint_edges() {
        assert_eq!(Pollutant::Pm25.aqi(0.0).unwrap().index, 0);
        assert_eq!(Pollutant::Pm25.aqi(12.0).unwrap().index, 50);
        assert_eq!(Pollutant::Pm25.aqi(12.1).unwrap().index, 51);
        assert_eq!(Pollutant::Pm25.aqi(35.4).unwrap().index, 100);
        assert_eq!(Pollutant::Pm25.aqi(500.4).unwrap().index, 500);
    }

    #[test]
    fn test_pm25_interpolates_and_truncates() {
        // 15.07 truncates to 15.0 -> 57.1 -> 57
        let reading = Pollutant::Pm25.aqi(15.07).unwrap();
        assert_eq!(reading.index, 57);
        assert_eq!(reading.category, AqiCategory::Moderate);
        assert_eq!(reading.category.label(), "Moderate");
    }

    #[test]
    fn test_pm10_categories() {
        let reading = Pollutant::Pm10.aqi(45.0).unwrap();
        assert_eq!(reading.index, 42);
        assert_eq!(reading.category, AqiCategory::Good);

        let reading = Pollutant::Pm10.aqi(200.0).unwrap();
        assert_eq!(reading.category.label(), "Unhealthy for Sensitive Groups");
    }

    #[test]
    fn test_out_of_range_concentrations() {
        let top = Pollutant::Pm10.aqi(9_999.0).unwrap();
        assert_eq!(top.index, AQI_MAX);
        assert_eq!(top.category, AqiCategory::Hazardous);
        assert!(Pollutant::Pm25.aqi(-1.0).is_none());
        assert!(Pollutant::Pm25.aqi(f32::NAN).is_none());
    }
}
