//! Raw NMEA feed from a GPS receiver on a serial line.
//!
//! [`SerialGps`] owns the port for as long as it lives; dropping it closes
//! the device. The scanning logic lives in [`NmeaReader`], which works on any
//! `BufRead` so it can be exercised without hardware.

use crate::error::{Result, TelemetryError};
use crate::gps::data::NmeaFix;
use crate::gps::nmea::{parse_sentence, GgaData, RmcData, Sentence};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{BufRead, BufReader};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Serial GPS connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialGpsConfig {
    /// Device path of the UART
    pub path: String,
    /// Line speed
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,
    /// Extra attempts after a failed line read
    pub max_retries: u32,
    /// Pause between line read attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Lines to scan for a GGA/RMC pair before giving up
    pub max_lines: usize,
}

impl Default for SerialGpsConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
            timeout_ms: 500,
            max_retries: 5,
            retry_delay_ms: 100,
            max_lines: 200,
        }
    }
}

/// Scans an NMEA text stream for a complete fix.
pub struct NmeaReader<R> {
    reader: R,
    max_retries: u32,
    retry_delay: Duration,
    max_lines: usize,
}

impl<R: BufRead> NmeaReader<R> {
    /// Wrap a line-oriented stream using the default retry policy.
    pub fn new(reader: R) -> Self {
        let defaults = SerialGpsConfig::default();
        Self {
            reader,
            max_retries: defaults.max_retries,
            retry_delay: Duration::from_millis(defaults.retry_delay_ms),
            max_lines: defaults.max_lines,
        }
    }

    /// Set the number of extra attempts and the pause between them.
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set how many lines [`read_fix`](Self::read_fix) may consume.
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    /// Read one line, retrying failed reads a bounded number of times.
    ///
    /// When every attempt fails the (possibly empty) partial line is
    /// returned; callers treat it as "no sentence this time".
    pub fn read_line(&mut self) -> String {
        let mut line = String::new();

        for attempt in 0..=self.max_retries {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(_) => return line,
                Err(e) => {
                    debug!("Serial read attempt {} failed: {}", attempt + 1, e);
                    if attempt < self.max_retries {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        warn!(
            "Failed to read serial stream after {} attempts",
            self.max_retries + 1
        );
        line
    }

    /// Scan until one GGA and one RMC sentence have been decoded.
    ///
    /// Other sentences and malformed lines are skipped.
    pub fn read_fix(&mut self) -> Result<NmeaFix> {
        let mut gga: Option<GgaData> = None;
        let mut rmc: Option<RmcData> = None;

        for _ in 0..self.max_lines {
            let line = self.read_line();
            if line.trim().is_empty() {
                continue;
            }

            match parse_sentence(&line) {
                Ok(Sentence::Gga(data)) if gga.is_none() => gga = Some(data),
                Ok(Sentence::Rmc(data)) if rmc.is_none() => rmc = Some(data),
                Ok(_) => {}
                Err(e) => debug!("Skipping NMEA line: {}", e),
            }

            if let (Some(gga), Some(rmc)) = (&gga, &rmc) {
                return Ok(merge_fix(gga, rmc));
            }
        }

        Err(TelemetryError::parse_error(format!(
            "no GGA and RMC pair within {} lines",
            self.max_lines
        )))
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn merge_fix(gga: &GgaData, rmc: &RmcData) -> NmeaFix {
    NmeaFix {
        utc_time: gga.utc_time,
        date: rmc.date,
        latitude: gga.latitude,
        longitude: gga.longitude,
        altitude_m: gga.altitude_m,
        signal_quality: gga.fix_quality,
        satellites: gga.satellites,
        speed_knots: rmc.speed_knots,
    }
}

/// A GPS receiver's serial port, open for the lifetime of this value.
pub struct SerialGps {
    path: String,
    reader: NmeaReader<BufReader<Box<dyn SerialPort>>>,
}

impl SerialGps {
    /// Open the port described by `config`.
    pub fn open(config: &SerialGpsConfig) -> Result<Self> {
        let port = serialport::new(&config.path, config.baud_rate)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()?;

        info!(
            "Opened serial GPS on {} at {} baud",
            config.path, config.baud_rate
        );

        let reader = NmeaReader::new(BufReader::new(port))
            .with_retry(
                config.max_retries,
                Duration::from_millis(config.retry_delay_ms),
            )
            .with_max_lines(config.max_lines);

        Ok(Self {
            path: config.path.clone(),
            reader,
        })
    }

    /// Read the next complete GGA + RMC fix from the port.
    pub fn read_fix(&mut self) -> Result<NmeaFix> {
        self.reader.read_fix()
    }
}

impl Drop for SerialGps {
    fn drop(&mut self) {
        info!("Closed serial GPS on {}", self.path);
    }
}
