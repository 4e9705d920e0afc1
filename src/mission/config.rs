//! Flight configuration.

use crate::camera::CameraConfig;
use crate::error::{Result, TelemetryError};
use crate::gps::SerialGpsConfig;
use crate::sensors::DHT22_MIN_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted logging interval (one day).
pub const MAX_LOG_INTERVAL_SECS: u64 = 86_400;

/// Configuration for a logging mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// Seconds between telemetry rows
    pub log_interval_secs: u64,
    /// BCM pin the DHT22 data line is wired to
    pub dht_pin: u8,
    /// DHT22 polling interval in milliseconds
    pub dht_interval_ms: u64,
    /// I2C bus of the barometric sensor
    pub i2c_bus: u8,
    /// I2C address of the barometric sensor
    pub baro_address: u16,
    /// Reference sea-level pressure for altitude, in hPa
    pub sea_level_pressure_hpa: f64,
    /// gpsd address
    pub gpsd_address: String,
    /// Pause between gpsd updates in milliseconds
    pub gps_poll_delay_ms: u64,
    /// CSV destination; standard output when unset
    pub output_path: Option<PathBuf>,
    /// Whether to take a photo with every row
    pub capture_photos: bool,
    /// Camera settings
    pub camera: CameraConfig,
    /// Raw serial GPS settings
    pub serial_gps: SerialGpsConfig,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            log_interval_secs: crate::DEFAULT_LOG_INTERVAL_SECS,
            dht_pin: crate::DEFAULT_DHT_PIN,
            dht_interval_ms: DHT22_MIN_INTERVAL.as_millis() as u64,
            i2c_bus: 1,
            baro_address: crate::sensors::bmp3xx::BMP3XX_DEFAULT_ADDRESS,
            sea_level_pressure_hpa: crate::DEFAULT_SEA_LEVEL_PRESSURE_HPA,
            gpsd_address: crate::DEFAULT_GPSD_ADDRESS.to_string(),
            gps_poll_delay_ms: 500,
            output_path: None,
            capture_photos: true,
            camera: CameraConfig::default(),
            serial_gps: SerialGpsConfig::default(),
        }
    }
}

impl MissionConfig {
    /// Load a configuration from a JSON file; missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON form.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check values the hardware cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.log_interval_secs == 0 {
            return Err(TelemetryError::config_error("log interval must be at least 1 second"));
        }
        if self.log_interval_secs > MAX_LOG_INTERVAL_SECS {
            return Err(TelemetryError::config_error(format!(
                "log interval {}s exceeds the maximum of {}s",
                self.log_interval_secs, MAX_LOG_INTERVAL_SECS
            )));
        }
        if self.dht_interval() < DHT22_MIN_INTERVAL {
            return Err(TelemetryError::config_error(format!(
                "DHT22 interval {}ms is below the sensor minimum of {}ms",
                self.dht_interval_ms,
                DHT22_MIN_INTERVAL.as_millis()
            )));
        }
        if !(self.sea_level_pressure_hpa > 0.0) {
            return Err(TelemetryError::config_error("sea-level pressure must be positive"));
        }
        Ok(())
    }

    /// Set the interval between telemetry rows.
    pub fn with_log_interval(mut self, secs: u64) -> Self {
        self.log_interval_secs = secs;
        self
    }

    /// Set the reference sea-level pressure.
    pub fn with_sea_level_pressure(mut self, pressure_hpa: f64) -> Self {
        self.sea_level_pressure_hpa = pressure_hpa;
        self
    }

    /// Set the gpsd address.
    pub fn with_gpsd_address(mut self, address: impl Into<String>) -> Self {
        self.gpsd_address = address.into();
        self
    }

    /// Set the DHT22 data pin.
    pub fn with_dht_pin(mut self, pin: u8) -> Self {
        self.dht_pin = pin;
        self
    }

    /// Set the CSV output file.
    pub fn with_output_path(mut self, path: Option<PathBuf>) -> Self {
        self.output_path = path;
        self
    }

    /// Enable or disable photos.
    pub fn with_photos(mut self, enabled: bool) -> Self {
        self.capture_photos = enabled;
        self
    }

    /// Interval between telemetry rows.
    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }

    /// DHT22 polling interval.
    pub fn dht_interval(&self) -> Duration {
        Duration::from_millis(self.dht_interval_ms)
    }

    /// Pause between gpsd updates.
    pub fn gps_poll_delay(&self) -> Duration {
        Duration::from_millis(self.gps_poll_delay_ms)
    }
}
