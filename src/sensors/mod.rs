//! Environmental sensors carried by the payload.
//!
//! This module provides the drivers for the DHT22 temperature/humidity sensor
//! and the BMP3xx barometric sensor, plus the reading types they produce.

pub mod bmp3xx;
pub mod data;
pub mod dht22;

// Re-export commonly used items
pub use bmp3xx::{open_barometer, Barometer, Bmp3xx, RegisterBus};
pub use data::{BaroReading, ClimateReading};
pub use dht22::{Dht22, DHT22_MIN_INTERVAL};
