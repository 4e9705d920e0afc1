//! Client for the gpsd JSON protocol.
//!
//! [`GpsdClient`] enables watch mode on a gpsd connection and folds the
//! stream of `TPV` and `SKY` reports into a [`GpsFix`]. [`GpsPoller`] runs a
//! client on a tokio task and publishes each fix for non-blocking readers.

use crate::error::{Result, TelemetryError};
use crate::gps::data::{FixMode, GpsFix};
use crate::sampler::{ReadingCell, ReadingHandle, SensorReading};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Command that switches gpsd into JSON watch mode.
pub const WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Report {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(other)]
    Other,
}

/// Time-position-velocity report.
#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    time: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
    alt: Option<f64>,
    speed: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    eps: Option<f64>,
}

/// Satellite view report.
#[derive(Debug, Deserialize)]
struct Sky {
    #[serde(default)]
    satellites: Vec<Satellite>,
    #[serde(rename = "uSat")]
    used: Option<u32>,
    #[serde(rename = "nSat")]
    visible: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Satellite {
    #[serde(default)]
    used: bool,
}

/// A watch-mode connection to gpsd.
pub struct GpsdClient<S> {
    stream: BufReader<S>,
    fix: GpsFix,
    line: String,
}

impl GpsdClient<TcpStream> {
    /// Connect to gpsd (usually `127.0.0.1:2947`) and enable watch mode.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            TelemetryError::gpsd_error(format!("Failed to connect to {}: {}", addr, e))
        })?;
        info!("Connected to gpsd at {}", addr);
        Self::new(stream).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> GpsdClient<S> {
    /// Enable watch mode on an established connection.
    pub async fn new(stream: S) -> Result<Self> {
        let mut stream = BufReader::new(stream);
        stream.write_all(WATCH_COMMAND.as_bytes()).await?;
        stream.flush().await?;

        Ok(Self {
            stream,
            fix: GpsFix::default(),
            line: String::new(),
        })
    }

    /// The fix as of the last [`update`](Self::update).
    pub fn fix(&self) -> &GpsFix {
        &self.fix
    }

    /// Wait for the next position report and return the merged fix.
    ///
    /// Satellite reports received on the way are folded into the fix.
    pub async fn update(&mut self) -> Result<&GpsFix> {
        loop {
            self.line.clear();
            if self.stream.read_line(&mut self.line).await? == 0 {
                return Err(TelemetryError::gpsd_error("gpsd closed the connection"));
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Report>(line) {
                Ok(Report::Tpv(tpv)) => {
                    self.apply_tpv(tpv);
                    return Ok(&self.fix);
                }
                Ok(Report::Sky(sky)) => self.apply_sky(sky),
                Ok(Report::Other) => {}
                Err(e) => warn!("Ignoring malformed gpsd report: {}", e),
            }
        }
    }

    fn apply_tpv(&mut self, tpv: Tpv) {
        let horizontal_error = tpv.eph.or_else(|| match (tpv.epx, tpv.epy) {
            (Some(x), Some(y)) => Some((x * x + y * y).sqrt()),
            _ => None,
        });

        self.fix.mode = FixMode::from_gpsd(tpv.mode);
        self.fix.time = tpv.time;
        self.fix.latitude = tpv.lat;
        self.fix.longitude = tpv.lon;
        self.fix.altitude_m = tpv.alt_msl.or(tpv.alt);
        self.fix.speed_mps = tpv.speed;
        self.fix.horizontal_error_m = horizontal_error;
        self.fix.speed_error_mps = tpv.eps;
        debug!("gpsd fix: mode {}, {:?}/{:?}", self.fix.mode, tpv.lat, tpv.lon);
    }

    fn apply_sky(&mut self, sky: Sky) {
        let counted_used = sky.satellites.iter().filter(|s| s.used).count() as u32;
        self.fix.satellites_used = sky.used.unwrap_or(counted_used);
        self.fix.satellites_visible = sky.visible.unwrap_or(sky.satellites.len() as u32);
    }

    /// Turn the client into a stream of fixes that ends after the first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<GpsFix>>
    where
        S: Send + 'static,
    {
        let stream = stream::unfold(Some(self), |state| async move {
            let mut client = state?;
            let result = client.update().await.map(|fix| fix.clone());
            match result {
                Ok(fix) => Some((Ok(fix), Some(client))),
                Err(e) => Some((Err(e), None)),
            }
        });
        Box::pin(stream)
    }
}

/// Background task that keeps the latest gpsd fix available.
pub struct GpsPoller {
    reader: ReadingHandle<GpsFix>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl GpsPoller {
    /// Start polling `client`, pausing `delay` after each fix.
    ///
    /// gpsd paces its own reports, so there is no minimum interval and no
    /// fault suppression: the first error ends the task.
    pub fn spawn<S>(client: GpsdClient<S>, delay: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let cell = ReadingCell::new();
        let reader = cell.handle();
        let (shutdown, mut stop) = watch::channel(false);

        cell.set_running(true);
        let task = tokio::spawn(async move {
            let mut fixes = client.into_stream();

            let result = loop {
                tokio::select! {
                    _ = stop.changed() => break Ok(()),
                    next = fixes.next() => match next {
                        Some(Ok(fix)) => {
                            cell.record_attempt();
                            cell.publish(fix);
                        }
                        Some(Err(e)) => {
                            error!("GPS poller stopping: {}", e);
                            break Err(e);
                        }
                        None => break Ok(()),
                    },
                }

                tokio::select! {
                    _ = stop.changed() => break Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            };

            cell.set_running(false);
            result
        });

        info!("GPS poller started");
        Self {
            reader,
            shutdown,
            task,
        }
    }

    /// A reader for the published fixes.
    pub fn reader(&self) -> ReadingHandle<GpsFix> {
        self.reader.clone()
    }

    /// Most recent fix.
    pub fn latest(&self) -> Option<Arc<SensorReading<GpsFix>>> {
        self.reader.latest()
    }

    /// Whether the polling task is still active.
    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(self) -> Result<()> {
        // The task may already have exited on its own.
        let _ = self.shutdown.send(true);
        let result = self
            .task
            .await
            .map_err(|e| TelemetryError::sampler_error(format!("GPS poller task failed: {}", e)))?;
        info!("GPS poller stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const VERSION: &[u8] = concat!(
        r#"{"class":"VERSION","release":"3.22","proto_major":3,"proto_minor":14}"#,
        "\n"
    )
    .as_bytes();
    const SKY: &[u8] = concat!(
        r#"{"class":"SKY","device":"/dev/ttyAMA0","satellites":"#,
        r#"[{"PRN":5,"used":true},{"PRN":7,"used":true},{"PRN":9,"used":false}]}"#,
        "\n"
    )
    .as_bytes();
    const TPV: &[u8] = concat!(
        r#"{"class":"TPV","device":"/dev/ttyAMA0","mode":3,"time":"2021-04-27T15:04:05.000Z","#,
        r#""lat":35.2271,"lon":-80.8431,"altMSL":229.5,"alt":229.5,"speed":1.25,"#,
        r#""epx":3.0,"epy":4.0,"eps":0.5}"#,
        "\n"
    )
    .as_bytes();

    #[tokio::test]
    async fn test_update_merges_sky_into_fix() {
        let mock = Builder::new()
            .write(WATCH_COMMAND.as_bytes())
            .read(VERSION)
            .read(SKY)
            .read(TPV)
            .build();

        let mut client = GpsdClient::new(mock).await.unwrap();
        let fix = client.update().await.unwrap().clone();

        assert_eq!(fix.mode, FixMode::ThreeD);
        assert_eq!(fix.latitude, Some(35.2271));
        assert_eq!(fix.longitude, Some(-80.8431));
        assert_eq!(fix.altitude_m, Some(229.5));
        assert_eq!(fix.speed_mps, Some(1.25));
        assert_eq!(fix.horizontal_error_m, Some(5.0));
        assert_eq!(fix.satellites_used, 2);
        assert_eq!(fix.satellites_visible, 3);
        assert_eq!(fix.time.unwrap().to_rfc3339(), "2021-04-27T15:04:05+00:00");
    }

    #[tokio::test]
    async fn test_malformed_report_is_skipped() {
        let mock = Builder::new()
            .write(WATCH_COMMAND.as_bytes())
            .read(b"{\"class\":\"TPV\",\"mode\":\"three\"}\n")
            .read(TPV)
            .build();

        let mut client = GpsdClient::new(mock).await.unwrap();
        assert_eq!(client.update().await.unwrap().mode, FixMode::ThreeD);
    }

    #[tokio::test]
    async fn test_closed_connection_is_an_error() {
        let mock = Builder::new().write(WATCH_COMMAND.as_bytes()).read(VERSION).build();

        let mut client = GpsdClient::new(mock).await.unwrap();
        assert!(matches!(client.update().await, Err(TelemetryError::Gpsd(_))));
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let mock = Builder::new().write(WATCH_COMMAND.as_bytes()).read(TPV).build();

        let client = GpsdClient::new(mock).await.unwrap();
        let results: Vec<_> = client.into_stream().collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn test_poller_publishes_and_stops() {
        let mock = Builder::new()
            .write(WATCH_COMMAND.as_bytes())
            .read(TPV)
            .wait(Duration::from_secs(60))
            .build();

        let client = GpsdClient::new(mock).await.unwrap();
        let poller = GpsPoller::spawn(client, Duration::from_millis(10));
        let reader = poller.reader();

        for _ in 0..200 {
            if reader.latest().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reader.latest().unwrap().fields.mode, FixMode::ThreeD);
        assert!(poller.is_running());

        poller.stop().await.unwrap();
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn test_poller_exits_when_gpsd_disconnects() {
        let mock = Builder::new().write(WATCH_COMMAND.as_bytes()).read(TPV).build();

        let client = GpsdClient::new(mock).await.unwrap();
        let poller = GpsPoller::spawn(client, Duration::from_millis(1));

        for _ in 0..200 {
            if !poller.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!poller.is_running());
        assert!(poller.latest().is_some());
        assert!(matches!(poller.stop().await, Err(TelemetryError::Gpsd(_))));
    }
}
