//! Data structures for environmental sensor readings.

use serde::{Deserialize, Serialize};

/// Temperature and humidity from a DHT22-class sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateReading {
    /// Air temperature in degrees Celsius
    pub temperature_c: f32,
    /// Relative humidity in percent (0.0 to 100.0)
    pub humidity: f32,
}

/// Pressure, temperature and derived altitude from a barometric sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaroReading {
    /// Compensated pressure in hectopascals
    pub pressure_hpa: f64,
    /// Die temperature in degrees Celsius
    pub temperature_c: f64,
    /// Altitude estimated from the configured sea-level pressure, in meters
    pub altitude_m: f64,
}

impl ClimateReading {
    /// Temperature in degrees Fahrenheit.
    pub fn temperature_f(&self) -> f32 {
        self.temperature_c * 9.0 / 5.0 + 32.0
    }
}
