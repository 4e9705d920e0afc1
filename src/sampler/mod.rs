//! Background sampling of slow, fault-prone sensors.
//!
//! A [`Sampler`] owns a [`SensorDriver`] and polls it no more often than the
//! driver's hardware minimum interval. Valid readings are published into a
//! lock-free cell: any number of [`ReadingHandle`]s can fetch the latest
//! reading at any time without blocking the sampler or each other.
//!
//! Two modes are supported:
//!
//! - **push**: [`Sampler::spawn`] runs the poll loop on its own thread and
//!   returns a [`SamplerHandle`] used to read values and stop the thread.
//! - **pull**: the caller's loop invokes [`Sampler::poll_if_due`], which reads
//!   the driver only once the interval has elapsed.
//!
//! In both modes a transient fault (see [`TelemetryError::is_transient`]) is
//! swallowed and the previous reading stays published. Any other driver error
//! is returned to the caller.

use crate::error::{Result, TelemetryError};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A physical sensor that can be read one sample at a time.
pub trait SensorDriver: Send + 'static {
    /// The complete set of values produced by one successful read.
    type Reading: Send + Sync + 'static;

    /// Shortest interval the hardware tolerates between two reads.
    fn min_interval(&self) -> Duration;

    /// Read one sample.
    ///
    /// Protocol-level glitches (checksum or timing errors) must be reported as
    /// [`TelemetryError::TransientFault`]; anything else is treated as fatal.
    fn read(&mut self) -> Result<Self::Reading>;

    /// Release the hardware. Called once when a sampling loop exits.
    fn close(&mut self) {}
}

/// The values of one successful poll together with the time they were taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading<T> {
    /// Wall-clock time of the successful read
    pub measured_at: DateTime<Utc>,
    /// All fields of the reading; never partially populated
    pub fields: T,
}

impl<T> SensorReading<T> {
    /// Wrap freshly read fields with the current time.
    pub fn new(fields: T) -> Self {
        Self {
            measured_at: Utc::now(),
            fields,
        }
    }
}

/// Poll counters kept by a sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    /// Driver reads attempted
    pub attempts: u64,
    /// Reads that produced a new published reading
    pub updates: u64,
    /// Reads discarded because of a transient fault
    pub transient_faults: u64,
}

struct Shared<T> {
    latest: ArcSwapOption<SensorReading<T>>,
    running: AtomicBool,
    attempts: AtomicU64,
    updates: AtomicU64,
    transient_faults: AtomicU64,
}

/// Single-writer side of a published reading.
///
/// Every update replaces the whole reading, so readers observe either the old
/// value or the new one, never a mix.
pub struct ReadingCell<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ReadingCell<T> {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                latest: ArcSwapOption::empty(),
                running: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
                updates: AtomicU64::new(0),
                transient_faults: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the published reading.
    pub fn publish(&self, fields: T) -> Arc<SensorReading<T>> {
        let reading = Arc::new(SensorReading::new(fields));
        self.shared.latest.store(Some(Arc::clone(&reading)));
        self.shared.updates.fetch_add(1, Ordering::Relaxed);
        reading
    }

    /// Count one read attempt.
    pub fn record_attempt(&self) {
        self.shared.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one discarded read.
    pub fn record_transient_fault(&self) {
        self.shared.transient_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the producing loop as active or finished.
    pub fn set_running(&self, running: bool) {
        self.shared.running.store(running, Ordering::SeqCst);
    }

    /// Most recent reading, if any.
    pub fn latest(&self) -> Option<Arc<SensorReading<T>>> {
        self.shared.latest.load_full()
    }

    /// Create a reader for this cell.
    pub fn handle(&self) -> ReadingHandle<T> {
        ReadingHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for ReadingCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking reader of the latest published value.
pub struct ReadingHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReadingHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ReadingHandle<T> {
    /// Most recent valid reading, or `None` before the first success.
    pub fn latest(&self) -> Option<Arc<SensorReading<T>>> {
        self.shared.latest.load_full()
    }

    /// Whether the producing loop is still active.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the poll counters.
    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            attempts: self.shared.attempts.load(Ordering::Relaxed),
            updates: self.shared.updates.load(Ordering::Relaxed),
            transient_faults: self.shared.transient_faults.load(Ordering::Relaxed),
        }
    }
}

/// Result of a single read attempt.
#[derive(Debug, Clone)]
pub enum PollOutcome<T> {
    /// The driver returned a complete reading, now published
    Updated(Arc<SensorReading<T>>),
    /// The driver reported a transient fault; the prior reading is kept
    Faulted,
}

/// Create a connected stop request / stop signal pair.
pub fn stop_channel() -> (StopRequest, StopSignal) {
    let (tx, rx) = mpsc::channel();
    (StopRequest { tx }, StopSignal { rx })
}

/// Sending half of a cooperative stop.
///
/// Dropping the request also stops the loop.
pub struct StopRequest {
    tx: mpsc::Sender<()>,
}

impl StopRequest {
    /// Ask the loop to exit at its next check.
    pub fn request(&self) {
        // The loop may already have exited and dropped its receiver.
        let _ = self.tx.send(());
    }
}

/// Receiving half of a cooperative stop.
pub struct StopSignal {
    rx: mpsc::Receiver<()>,
}

impl StopSignal {
    /// Sleep for up to `timeout`, waking early if a stop is requested.
    ///
    /// Returns `true` when the loop should stop.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

/// Minimum-interval poller for one physical sensor.
pub struct Sampler<D: SensorDriver> {
    driver: D,
    interval: Duration,
    last_poll: Instant,
    cell: ReadingCell<D::Reading>,
}

impl<D: SensorDriver> Sampler<D> {
    /// Create a sampler that polls at the driver's hardware minimum interval.
    pub fn new(driver: D) -> Self {
        let interval = driver.min_interval();
        Self {
            driver,
            interval,
            last_poll: Instant::now(),
            cell: ReadingCell::new(),
        }
    }

    /// Create a sampler with a slower push-mode cadence.
    ///
    /// Fails if `interval` is below the driver's hardware minimum.
    pub fn with_interval(driver: D, interval: Duration) -> Result<Self> {
        let mut sampler = Self::new(driver);
        sampler.check_interval(interval)?;
        sampler.interval = interval;
        Ok(sampler)
    }

    /// Hardware minimum interval of the wrapped driver.
    pub fn min_interval(&self) -> Duration {
        self.driver.min_interval()
    }

    /// Interval used by the push-mode loop.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time of the last poll attempt (construction time before the first).
    pub fn last_poll(&self) -> Instant {
        self.last_poll
    }

    /// Most recent valid reading.
    pub fn latest(&self) -> Option<Arc<SensorReading<D::Reading>>> {
        self.cell.latest()
    }

    /// A reader that stays valid after the sampler moves to its own thread.
    pub fn reader(&self) -> ReadingHandle<D::Reading> {
        self.cell.handle()
    }

    fn check_interval(&self, interval: Duration) -> Result<()> {
        let minimum = self.driver.min_interval();
        if interval < minimum {
            return Err(TelemetryError::InvalidInterval {
                requested: interval,
                minimum,
            });
        }
        Ok(())
    }

    /// Perform exactly one read attempt.
    pub fn poll_once(&mut self) -> Result<PollOutcome<D::Reading>> {
        self.cell.record_attempt();
        match self.driver.read() {
            Ok(fields) => Ok(PollOutcome::Updated(self.cell.publish(fields))),
            Err(err) if err.is_transient() => {
                self.cell.record_transient_fault();
                debug!("Discarding sensor read: {}", err);
                Ok(PollOutcome::Faulted)
            }
            Err(err) => Err(err),
        }
    }

    /// Read the driver if at least `interval` has passed since the last attempt.
    ///
    /// Returns the latest reading, whether or not a read took place. A failed
    /// attempt still restarts the interval.
    pub fn poll_if_due(
        &mut self,
        interval: Duration,
    ) -> Result<Option<Arc<SensorReading<D::Reading>>>> {
        self.poll_if_due_at(Instant::now(), interval)
    }

    /// [`poll_if_due`](Self::poll_if_due) against an explicit clock reading.
    pub fn poll_if_due_at(
        &mut self,
        now: Instant,
        interval: Duration,
    ) -> Result<Option<Arc<SensorReading<D::Reading>>>> {
        self.check_interval(interval)?;

        if now.saturating_duration_since(self.last_poll) < interval {
            return Ok(self.latest());
        }

        self.last_poll = now;
        self.poll_once()?;
        Ok(self.latest())
    }

    /// Poll continuously until `stop` fires or the driver fails fatally.
    ///
    /// Each cycle waits one interval, then reads once. The driver is closed
    /// before this returns.
    pub fn run(&mut self, stop: &StopSignal) -> Result<()> {
        self.cell.set_running(true);
        info!("Sampler started with {:?} interval", self.interval);

        let result = loop {
            if stop.wait(self.interval) {
                break Ok(());
            }

            self.last_poll = Instant::now();
            if let Err(err) = self.poll_once() {
                error!("Sampler stopping after driver failure: {}", err);
                break Err(err);
            }
        };

        self.driver.close();
        self.cell.set_running(false);
        info!("Sampler stopped");
        result
    }

    /// Run the push-mode loop on a dedicated, named thread.
    pub fn spawn(self, name: &str) -> Result<SamplerHandle<D::Reading>> {
        let reader = self.reader();
        let (request, signal) = stop_channel();

        self.cell.set_running(true);
        let mut sampler = self;
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sampler.run(&signal))
            .map_err(|e| {
                reader.shared.running.store(false, Ordering::SeqCst);
                TelemetryError::sampler_error(format!("Failed to spawn {}: {}", name, e))
            })?;

        Ok(SamplerHandle {
            name: name.to_string(),
            reader,
            stop: Some(request),
            join: Some(join),
        })
    }
}

/// Owner of a running push-mode sampler thread.
///
/// Dropping the handle stops and joins the thread.
pub struct SamplerHandle<T> {
    name: String,
    reader: ReadingHandle<T>,
    stop: Option<StopRequest>,
    join: Option<JoinHandle<Result<()>>>,
}

impl<T> SamplerHandle<T> {
    /// A reader for the published values.
    pub fn reader(&self) -> ReadingHandle<T> {
        self.reader.clone()
    }

    /// Most recent valid reading.
    pub fn latest(&self) -> Option<Arc<SensorReading<T>>> {
        self.reader.latest()
    }

    /// Whether the sampling thread is still active.
    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Request a stop and wait for the thread to exit.
    ///
    /// Returns the error that ended the loop, if any.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(request) = self.stop.take() {
            request.request();
        }

        match self.join.take() {
            Some(join) => {
                let result = join.join().map_err(|_| {
                    self.reader.shared.running.store(false, Ordering::SeqCst);
                    TelemetryError::sampler_error(format!("{} thread panicked", self.name))
                })?;
                info!("Joined {} thread", self.name);
                result
            }
            None => Ok(()),
        }
    }
}

impl<T> Drop for SamplerHandle<T> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("{} exited with error: {}", self.name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedDriver {
        script: VecDeque<Result<(f64, f64)>>,
        floor: Duration,
        reads: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedDriver {
        fn new(script: Vec<Result<(f64, f64)>>, floor: Duration) -> Self {
            Self {
                script: script.into(),
                floor,
                reads: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl SensorDriver for ScriptedDriver {
        type Reading = (f64, f64);

        fn min_interval(&self) -> Duration {
            self.floor
        }

        fn read(&mut self) -> Result<(f64, f64)> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(TelemetryError::transient_fault("script exhausted")))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn fields<T: Copy>(reading: &Option<Arc<SensorReading<T>>>) -> Option<T> {
        reading.as_ref().map(|r| r.fields)
    }

    #[test]
    fn test_fault_keeps_previous_reading() {
        let driver = ScriptedDriver::new(
            vec![
                Ok((22.5, 45.0)),
                Err(TelemetryError::transient_fault("checksum mismatch")),
                Ok((22.7, 46.0)),
            ],
            Duration::from_secs(2),
        );
        let mut sampler = Sampler::new(driver);
        assert!(sampler.latest().is_none());

        assert!(matches!(sampler.poll_once().unwrap(), PollOutcome::Updated(_)));
        assert_eq!(fields(&sampler.latest()), Some((22.5, 45.0)));

        assert!(matches!(sampler.poll_once().unwrap(), PollOutcome::Faulted));
        assert_eq!(fields(&sampler.latest()), Some((22.5, 45.0)));

        sampler.poll_once().unwrap();
        assert_eq!(fields(&sampler.latest()), Some((22.7, 46.0)));

        let stats = sampler.reader().stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.updates, 2);
        assert_eq!(stats.transient_faults, 1);
    }

    #[test]
    fn test_fault_before_first_reading_leaves_nothing_published() {
        let driver = ScriptedDriver::new(
            vec![
                Err(TelemetryError::transient_fault("timeout")),
                Err(TelemetryError::transient_fault("timeout")),
            ],
            Duration::from_secs(2),
        );
        let mut sampler = Sampler::new(driver);
        sampler.poll_once().unwrap();
        sampler.poll_once().unwrap();
        assert!(sampler.latest().is_none());
    }

    #[test]
    fn test_fatal_error_is_returned() {
        let driver = ScriptedDriver::new(
            vec![
                Ok((20.0, 30.0)),
                Err(TelemetryError::hardware_error("pin released")),
            ],
            Duration::from_secs(2),
        );
        let mut sampler = Sampler::new(driver);
        sampler.poll_once().unwrap();
        let err = sampler.poll_once().unwrap_err();
        assert!(matches!(err, TelemetryError::Hardware(_)));
        assert_eq!(fields(&sampler.latest()), Some((20.0, 30.0)));
    }

    #[test]
    fn test_poll_if_due_reads_at_most_once_per_interval() {
        let interval = Duration::from_secs(2);
        let driver = ScriptedDriver::new(vec![Ok((1.0, 2.0)), Ok((3.0, 4.0))], interval);
        let reads = Arc::clone(&driver.reads);
        let mut sampler = Sampler::new(driver);
        let t0 = sampler.last_poll();

        // Not yet due right after construction.
        let early = sampler.poll_if_due_at(t0 + Duration::from_millis(500), interval);
        assert!(early.unwrap().is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 0);

        let first = sampler.poll_if_due_at(t0 + interval, interval).unwrap();
        assert_eq!(fields(&first), Some((1.0, 2.0)));

        let second = sampler
            .poll_if_due_at(t0 + interval + Duration::from_millis(1999), interval)
            .unwrap();
        assert_eq!(fields(&second), Some((1.0, 2.0)));
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        let third = sampler.poll_if_due_at(t0 + interval * 2, interval).unwrap();
        assert_eq!(fields(&third), Some((3.0, 4.0)));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_attempt_uses_up_interval() {
        let interval = Duration::from_secs(2);
        let driver = ScriptedDriver::new(
            vec![
                Err(TelemetryError::transient_fault("checksum")),
                Ok((5.0, 6.0)),
            ],
            interval,
        );
        let reads = Arc::clone(&driver.reads);
        let mut sampler = Sampler::new(driver);
        let t0 = sampler.last_poll();

        assert!(sampler.poll_if_due_at(t0 + interval, interval).unwrap().is_none());
        assert!(sampler
            .poll_if_due_at(t0 + interval + Duration::from_secs(1), interval)
            .unwrap()
            .is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(sampler.last_poll(), t0 + interval);

        let reading = sampler.poll_if_due_at(t0 + interval * 2, interval).unwrap();
        assert_eq!(fields(&reading), Some((5.0, 6.0)));
    }

    #[test]
    fn test_interval_below_minimum_is_rejected_before_reading() {
        let driver = ScriptedDriver::new(vec![Ok((1.0, 1.0))], Duration::from_secs(2));
        let reads = Arc::clone(&driver.reads);
        let mut sampler = Sampler::new(driver);
        let far_future = sampler.last_poll() + Duration::from_secs(60);

        let err = sampler
            .poll_if_due_at(far_future, Duration::from_millis(1500))
            .unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidInterval { .. }));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_with_interval_rejects_fast_cadence() {
        let driver = ScriptedDriver::new(Vec::new(), Duration::from_secs(2));
        assert!(Sampler::with_interval(driver, Duration::from_secs(1)).is_err());

        let driver = ScriptedDriver::new(Vec::new(), Duration::from_secs(2));
        let sampler = Sampler::with_interval(driver, Duration::from_secs(5)).unwrap();
        assert_eq!(sampler.interval(), Duration::from_secs(5));
        assert_eq!(sampler.min_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_stop_during_sleep_skips_read_and_closes_driver() {
        let driver = ScriptedDriver::new(vec![Ok((1.0, 1.0))], Duration::from_millis(1));
        let reads = Arc::clone(&driver.reads);
        let closed = Arc::clone(&driver.closed);
        let sampler = Sampler::with_interval(driver, Duration::from_secs(5)).unwrap();

        let handle = sampler.spawn("test-sampler").unwrap();
        assert!(handle.is_running());
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_push_mode_publishes_readings() {
        let script = (0..1000).map(|i| Ok((i as f64, 2.0 * i as f64))).collect();
        let driver = ScriptedDriver::new(script, Duration::from_millis(5));
        let closed = Arc::clone(&driver.closed);
        let handle = Sampler::new(driver).spawn("push-sampler").unwrap();
        let reader = handle.reader();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.latest().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(reader.latest().is_some());

        drop(handle);
        assert!(!reader.is_running());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fatal_error_ends_push_loop() {
        let driver = ScriptedDriver::new(
            vec![Err(TelemetryError::hardware_error("bus gone"))],
            Duration::from_millis(1),
        );
        let closed = Arc::clone(&driver.closed);
        let handle = Sampler::new(driver).spawn("failing-sampler").unwrap();
        let reader = handle.reader();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!reader.is_running());
        assert!(matches!(handle.stop(), Err(TelemetryError::Hardware(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_fields() {
        let script = (0..200).map(|i| Ok((i as f64, 2.0 * i as f64))).collect();
        let driver = ScriptedDriver::new(script, Duration::from_millis(1));
        let handle = Sampler::new(driver).spawn("consistency-sampler").unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = handle.reader();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        if let Some(reading) = reader.latest() {
                            let (a, b) = reading.fields;
                            assert_eq!(b, 2.0 * a);
                        }
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.join().unwrap();
        }
        handle.stop().unwrap();
    }
}
