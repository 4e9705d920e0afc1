//! GPS position sources.
//!
//! The payload can read its position either from gpsd ([`gpsd`]) or directly
//! from the receiver's NMEA output on a serial line ([`serial`]).

pub mod data;
pub mod gpsd;
pub mod nmea;
pub mod serial;

// Re-export commonly used items
pub use data::{FixMode, GpsFix, NmeaFix};
pub use gpsd::{GpsPoller, GpsdClient};
pub use serial::{NmeaReader, SerialGps, SerialGpsConfig};
