//! The flight logging loop.
//!
//! A [`Mission`] wakes on a fixed interval, takes whatever the background
//! samplers published most recently, reads the barometer, appends one CSV row
//! and optionally takes a photo named after the row.

pub mod config;
pub mod record;

pub use config::MissionConfig;
pub use record::{TelemetryRecord, CSV_HEADER};

use crate::camera::Camera;
use crate::error::{Result, TelemetryError};
use crate::gps::GpsFix;
use crate::sampler::ReadingHandle;
use crate::sensors::{BaroReading, Barometer, ClimateReading};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Periodic telemetry writer.
pub struct Mission<W: Write> {
    sink: W,
    log_interval: Duration,
    climate: Option<ReadingHandle<ClimateReading>>,
    gps: Option<ReadingHandle<GpsFix>>,
    barometer: Option<Box<dyn Barometer + Send>>,
    camera: Option<Camera>,
    header: bool,
    iteration: u64,
}

impl<W: Write> Mission<W> {
    /// Create a mission writing rows to `sink` every `log_interval`.
    pub fn new(sink: W, log_interval: Duration) -> Self {
        Self {
            sink,
            log_interval,
            climate: None,
            gps: None,
            barometer: None,
            camera: None,
            header: true,
            iteration: 0,
        }
    }

    /// Skip the column header, e.g. when appending to an existing log.
    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    /// Log temperature and humidity from a background sampler.
    pub fn with_climate(mut self, climate: ReadingHandle<ClimateReading>) -> Self {
        self.climate = Some(climate);
        self
    }

    /// Log position from a background GPS poller.
    pub fn with_gps(mut self, gps: ReadingHandle<GpsFix>) -> Self {
        self.gps = Some(gps);
        self
    }

    /// Read a barometer for every row.
    pub fn with_barometer(mut self, barometer: Box<dyn Barometer + Send>) -> Self {
        self.barometer = Some(barometer);
        self
    }

    /// Take a photo for every row.
    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Number of rows written so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Give back the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Write the column header.
    pub fn write_header(&mut self) -> Result<()> {
        writeln!(self.sink, "{}", CSV_HEADER)?;
        self.sink.flush()?;
        Ok(())
    }

    /// Read the barometer on the blocking pool; I2C transfers and the
    /// conversion wait must not stall the runtime.
    async fn read_barometer(&mut self) -> Option<BaroReading> {
        let mut barometer = self.barometer.take()?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = barometer.read();
            (barometer, result)
        })
        .await;

        match joined {
            Ok((barometer, result)) => {
                self.barometer = Some(barometer);
                result
                    .map_err(|e| warn!("Barometer read failed: {}", e))
                    .ok()
            }
            Err(e) => {
                error!("Barometer task failed, disabling barometer: {}", e);
                None
            }
        }
    }

    async fn collect(&mut self) -> TelemetryRecord {
        let gps = self
            .gps
            .as_ref()
            .and_then(|h| h.latest())
            .map(|r| r.fields.clone());
        let climate = self.climate.as_ref().and_then(|h| h.latest()).map(|r| r.fields);
        let baro = self.read_barometer().await;

        TelemetryRecord {
            iteration: self.iteration,
            gps,
            climate,
            baro,
        }
    }

    /// Write one row and take its photo.
    ///
    /// Sensor and camera failures leave gaps in the row; only a failure to
    /// write the log itself is returned. The row counts as written before the
    /// photo is taken.
    pub async fn tick(&mut self) -> Result<TelemetryRecord> {
        let record = self.collect().await;
        writeln!(self.sink, "{}", record.to_csv_row())?;
        self.sink.flush()?;
        self.iteration += 1;
        debug!("Logged row {}", record.iteration);

        if let Some(camera) = &self.camera {
            if let Err(e) = camera.capture(&format!("{}.jpg", record.iteration)).await {
                warn!("Photo {} failed: {}", record.iteration, e);
            }
        }

        Ok(record)
    }

    /// Write the header, then a row every interval until `shutdown` resolves.
    ///
    /// The first row is written one full interval after start, giving the
    /// samplers time to publish. Shutdown also interrupts a tick in progress,
    /// abandoning a pending photo. Returns the number of rows written.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        if self.log_interval.is_zero() {
            return Err(TelemetryError::config_error("log interval must be non-zero"));
        }
        let start = Instant::now()
            .checked_add(self.log_interval)
            .ok_or_else(|| {
                TelemetryError::config_error(format!(
                    "log interval {:?} is too long",
                    self.log_interval
                ))
            })?;

        if self.header {
            self.write_header()?;
        }
        info!("Logging every {:?}", self.log_interval);

        let mut ticker = interval_at(start, self.log_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        result = self.tick() => {
                            result?;
                        }
                    }
                }
            }
        }

        info!("Stopping after {} rows", self.iteration);
        Ok(self.iteration)
    }
}
