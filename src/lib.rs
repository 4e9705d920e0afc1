//! # HAB Logger - High-Altitude Balloon Telemetry
//!
//! Flight software for a Raspberry Pi balloon payload. It samples a DHT22
//! temperature/humidity sensor, a BMP3xx barometer and a GPS receiver, and
//! writes one CSV row (plus an optional photo) per logging interval.
//!
//! ## Features
//!
//! - **Background sampling**: slow sensors are polled on their own thread no
//!   faster than the hardware allows; readers never block
//! - **Fault tolerance**: checksum and timing glitches keep the last good value
//! - **gpsd client**: TPV/SKY reports over the gpsd JSON protocol
//! - **Raw NMEA**: GGA/RMC parsing straight from the serial port
//! - **GPIO support**: DHT22 and I2C access through `rppal` (feature-gated)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hab_logger::{Dht22, Sampler};
//!
//! fn main() -> hab_logger::Result<()> {
//!     let sampler = Sampler::new(Dht22::new(17)?);
//!     let handle = sampler.spawn("dht22")?;
//!
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     if let Some(reading) = handle.latest() {
//!         println!("{:.1}C {:.1}%", reading.fields.temperature_c, reading.fields.humidity);
//!     }
//!     handle.stop()
//! }
//! ```

pub mod camera;
pub mod error;
pub mod gps;
pub mod mission;
pub mod sampler;
pub mod sensors;

// Re-export public API
pub use camera::{Camera, CameraConfig};
pub use error::{Result, TelemetryError};
pub use gps::{
    FixMode, GpsFix, GpsPoller, GpsdClient, NmeaFix, NmeaReader, SerialGps, SerialGpsConfig,
};
pub use mission::{Mission, MissionConfig, TelemetryRecord, CSV_HEADER};
pub use sampler::{
    stop_channel, ReadingCell, ReadingHandle, Sampler, SamplerHandle, SamplerStats, SensorDriver,
    SensorReading, StopSignal,
};
pub use sensors::{
    open_barometer, BaroReading, Barometer, ClimateReading, Dht22, DHT22_MIN_INTERVAL,
};

/// The default telemetry logging interval in seconds
pub const DEFAULT_LOG_INTERVAL_SECS: u64 = 30;

/// The default DHT22 data pin (BCM numbering)
pub const DEFAULT_DHT_PIN: u8 = 17;

/// The default gpsd address
pub const DEFAULT_GPSD_ADDRESS: &str = "127.0.0.1:2947";

/// The default sea-level reference pressure in hPa
pub const DEFAULT_SEA_LEVEL_PRESSURE_HPA: f64 = 1023.5;
