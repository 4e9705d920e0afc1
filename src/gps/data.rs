//! Data structures for GPS fixes.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality indicator reported by gpsd.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixMode {
    /// No report received yet
    #[default]
    Unknown,
    /// Receiver is running but has no fix
    NoFix,
    /// Latitude and longitude only
    TwoD,
    /// Latitude, longitude and altitude
    ThreeD,
}

impl FixMode {
    /// Map gpsd's numeric `mode` field.
    pub fn from_gpsd(mode: u8) -> Self {
        match mode {
            1 => Self::NoFix,
            2 => Self::TwoD,
            3 => Self::ThreeD,
            _ => Self::Unknown,
        }
    }

    /// gpsd's numeric representation, as written to the telemetry log.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::NoFix => 1,
            Self::TwoD => 2,
            Self::ThreeD => 3,
        }
    }

    /// Whether the fix includes a horizontal position.
    pub fn has_position(self) -> bool {
        matches!(self, Self::TwoD | Self::ThreeD)
    }
}

impl fmt::Display for FixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Position, velocity and time estimate from the GPS daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Fix quality
    pub mode: FixMode,
    /// UTC time of the fix
    pub time: Option<DateTime<Utc>>,
    /// Latitude in decimal degrees, north positive
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees, east positive
    pub longitude: Option<f64>,
    /// Altitude above mean sea level in meters
    pub altitude_m: Option<f64>,
    /// Speed over ground in meters per second
    pub speed_mps: Option<f64>,
    /// Estimated horizontal position error in meters
    pub horizontal_error_m: Option<f64>,
    /// Estimated speed error in meters per second
    pub speed_error_mps: Option<f64>,
    /// Satellites used in the solution
    pub satellites_used: u32,
    /// Satellites in view
    pub satellites_visible: u32,
}

/// Fields merged from one GGA and one RMC sentence of a raw NMEA feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NmeaFix {
    /// UTC time of the GGA fix
    pub utc_time: Option<NaiveTime>,
    /// UTC date from the RMC sentence
    pub date: Option<NaiveDate>,
    /// Latitude in decimal degrees, north positive
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees, east positive
    pub longitude: Option<f64>,
    /// Antenna altitude above mean sea level in meters
    pub altitude_m: Option<f64>,
    /// GGA fix quality (0 = invalid, 1 = GPS, 2 = DGPS, ...)
    pub signal_quality: u8,
    /// Satellites used in the fix
    pub satellites: u32,
    /// Speed over ground in knots
    pub speed_knots: Option<f64>,
}
