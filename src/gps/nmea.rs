//! NMEA 0183 sentence parsing for the sentences the logger needs.
//!
//! Only `GGA` (position fix) and `RMC` (recommended minimum) are decoded;
//! every other sentence type is returned as [`Sentence::Other`] so callers can
//! skip it. Talker prefixes (`GP`, `GN`, `GL`, ...) are accepted alike.
//!
//! Field decoding is done by the `nmea` crate. This module checks framing
//! first: a sentence must start with `$` and end in a two-digit checksum.

use crate::error::{Result, TelemetryError};
use ::nmea::sentences::{rmc::RmcStatusOfFix, FixType};
use ::nmea::ParseResult;
use chrono::{NaiveDate, NaiveTime};

/// A decoded NMEA sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    /// Global positioning system fix data
    Gga(GgaData),
    /// Recommended minimum navigation data
    Rmc(RmcData),
    /// Any other sentence, identified by its address field
    Other(String),
}

/// Fields of a GGA sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaData {
    pub utc_time: Option<NaiveTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fix_quality: u8,
    pub satellites: u32,
    pub hdop: Option<f64>,
    pub altitude_m: Option<f64>,
}

/// Fields of an RMC sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct RmcData {
    pub utc_time: Option<NaiveTime>,
    /// `true` for status `A` (data valid)
    pub active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_knots: Option<f64>,
    pub course_deg: Option<f64>,
    pub date: Option<NaiveDate>,
}

/// Parse one line of an NMEA stream.
pub fn parse_sentence(line: &str) -> Result<Sentence> {
    let line = line.trim();
    let address = sentence_address(line)?;
    let kind = address.get(2..).unwrap_or(address);
    if kind != "GGA" && kind != "RMC" {
        return Ok(Sentence::Other(address.to_string()));
    }

    let parsed = ::nmea::parse_str(line).map_err(|e| {
        TelemetryError::parse_error(format!("invalid NMEA sentence {:?}: {:?}", line, e))
    })?;

    let sentence = match parsed {
        ParseResult::GGA(gga) => Sentence::Gga(GgaData {
            utc_time: gga.fix_time,
            latitude: gga.latitude,
            longitude: gga.longitude,
            fix_quality: gga.fix_type.map(fix_quality).unwrap_or(0),
            satellites: gga.fix_satellites.unwrap_or(0),
            hdop: gga.hdop.map(widen),
            altitude_m: gga.altitude.map(widen),
        }),
        ParseResult::RMC(rmc) => Sentence::Rmc(RmcData {
            utc_time: rmc.fix_time,
            active: !matches!(rmc.status_of_fix, RmcStatusOfFix::Invalid),
            latitude: rmc.lat,
            longitude: rmc.lon,
            speed_knots: rmc.speed_over_ground.map(widen),
            course_deg: rmc.true_course.map(widen),
            date: rmc.fix_date,
        }),
        _ => return Ok(Sentence::Other(address.to_string())),
    };

    check_position(line, &sentence)?;
    Ok(sentence)
}

/// Address field of a well-framed sentence: `$ADDR,...*HH`.
fn sentence_address(line: &str) -> Result<&str> {
    let malformed =
        || TelemetryError::parse_error(format!("not an NMEA sentence: {:?}", line));

    let content = line.strip_prefix('$').ok_or_else(malformed)?;
    let (body, given) = content.rsplit_once('*').ok_or_else(malformed)?;
    if given.len() != 2 || !given.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TelemetryError::parse_error(format!(
            "bad checksum field in {:?}",
            line
        )));
    }

    let address = body.split(',').next().unwrap_or_default();
    if address.len() < 3 || !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(malformed());
    }
    Ok(address)
}

fn check_position(line: &str, sentence: &Sentence) -> Result<()> {
    let (latitude, longitude) = match sentence {
        Sentence::Gga(gga) => (gga.latitude, gga.longitude),
        Sentence::Rmc(rmc) => (rmc.latitude, rmc.longitude),
        Sentence::Other(_) => return Ok(()),
    };

    let in_range = |value: Option<f64>, limit: f64| value.map_or(true, |v| v.abs() <= limit);
    if !in_range(latitude, 90.0) || !in_range(longitude, 180.0) {
        return Err(TelemetryError::parse_error(format!(
            "position out of range in {:?}",
            line
        )));
    }
    Ok(())
}

/// GGA quality indicator digit.
fn fix_quality(fix: FixType) -> u8 {
    match fix {
        FixType::Invalid => 0,
        FixType::Gps => 1,
        FixType::DGps => 2,
        FixType::Pps => 3,
        FixType::Rtk => 4,
        FixType::FloatRtk => 5,
        FixType::Estimated => 6,
        FixType::Manual => 7,
        FixType::Simulation => 8,
    }
}

/// Widen through the shortest decimal form so `545.4` stays `545.4`.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(f64::from(value))
}
