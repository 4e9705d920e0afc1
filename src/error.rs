//! Error handling for the balloon telemetry logger.

use std::time::Duration;

/// A specialized `Result` type for logger operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// The main error type for sensor, GPS and mission operations.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sensor or sentence data could not be parsed
    #[error("Failed to parse data: {0}")]
    ParseError(String),

    /// Hardware is missing or the bus is unavailable
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Recoverable fault of a timing-sensitive sensor protocol
    #[error("Transient sensor fault: {0}")]
    TransientFault(String),

    /// Poll interval shorter than the sensor's hardware minimum
    #[error("Poll interval {requested:?} is below the hardware minimum of {minimum:?}")]
    InvalidInterval {
        requested: Duration,
        minimum: Duration,
    },

    /// GPS daemon connection or protocol error
    #[error("gpsd error: {0}")]
    Gpsd(String),

    /// Camera capture failed
    #[error("Camera error: {0}")]
    Camera(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background sampler could not be started or stopped cleanly
    #[error("Sampler error: {0}")]
    Sampler(String),
}

impl TelemetryError {
    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a new hardware error
    pub fn hardware_error(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    /// Create a new transient sensor fault
    pub fn transient_fault(msg: impl Into<String>) -> Self {
        Self::TransientFault(msg.into())
    }

    /// Create a new gpsd error
    pub fn gpsd_error(msg: impl Into<String>) -> Self {
        Self::Gpsd(msg.into())
    }

    /// Create a new camera error
    pub fn camera_error(msg: impl Into<String>) -> Self {
        Self::Camera(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new sampler error
    pub fn sampler_error(msg: impl Into<String>) -> Self {
        Self::Sampler(msg.into())
    }

    /// Whether this error is a recoverable sensor fault.
    ///
    /// Samplers discard the attempt on transient faults and keep their prior
    /// reading; every other error ends the sampling loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFault(_))
    }
}
