//! One row of the telemetry log.

use crate::gps::GpsFix;
use crate::sensors::{BaroReading, ClimateReading};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column names of the telemetry log.
pub const CSV_HEADER: &str =
    "Iteration,Status,NumSats,Time,Lat,Long,Alt,Speed,Temp,Humidity,Pressure,Temp,Alt";

/// Everything logged for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Row number, also used as the photo file name
    pub iteration: u64,
    /// Latest GPS fix, if any arrived yet
    pub gps: Option<GpsFix>,
    /// Latest DHT22 reading, if any arrived yet
    pub climate: Option<ClimateReading>,
    /// Barometer reading taken for this row
    pub baro: Option<BaroReading>,
}

fn optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn two_decimals(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

impl TelemetryRecord {
    /// Format the record as a CSV row matching [`CSV_HEADER`].
    ///
    /// Values that are not available are left empty.
    pub fn to_csv_row(&self) -> String {
        let gps = self.gps.as_ref();
        let climate = self.climate.as_ref();
        let baro = self.baro.as_ref();

        let columns = [
            self.iteration.to_string(),
            optional(gps.map(|g| g.mode)),
            optional(gps.map(|g| g.satellites_used)),
            optional(
                gps.and_then(|g| g.time)
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ),
            optional(gps.and_then(|g| g.latitude)),
            optional(gps.and_then(|g| g.longitude)),
            optional(gps.and_then(|g| g.altitude_m)),
            optional(gps.and_then(|g| g.speed_mps)),
            optional(climate.map(|c| c.temperature_c)),
            optional(climate.map(|c| c.humidity)),
            two_decimals(baro.map(|b| b.pressure_hpa)),
            two_decimals(baro.map(|b| b.temperature_c)),
            two_decimals(baro.map(|b| b.altitude_m)),
        ];
        columns.join(",")
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv_row())
    }
}
