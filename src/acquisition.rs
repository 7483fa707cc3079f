//! Continuous pressure acquisition.
//!
//! [`AcquisitionLoop`] polls a [`PressureGauge`] at a fixed interval, stamps
//! each reading with local wall-clock time and appends it to a [`CsvSink`].
//! It is a two-state machine, `Running` → `Stopped`:
//!
//! - an external [`StopHandle::stop`] ends the run at the next tick boundary
//!   (an exchange in flight completes or times out first);
//! - a bad reply (timeout, partial or malformed frame, non-OK status) costs
//!   one tick and is logged;
//! - transport failures are retried on later ticks with linear backoff, and
//!   after `max_transport_failures` in a row the loop stops with the error;
//! - a store failure stops the loop immediately, since the reading could not
//!   be kept.

use crate::data::storage::{AcquisitionRecord, CsvSink, TIME_FORMAT};
use crate::error::{AppResult, SpceError};
use crate::hardware::capabilities::PressureGauge;
use crate::hardware::spce::RawPressure;
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Shortest accepted tick interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Loop parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionSettings {
    /// Time between the starts of consecutive ticks.
    pub poll_interval: Duration,
    /// Consecutive transport failures tolerated before stopping.
    pub max_transport_failures: u32,
    /// Extra delay per consecutive transport failure.
    pub retry_backoff: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_transport_failures: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Polling.
    Running,
    /// Stopped by request or by a fatal failure. Terminal.
    Stopped,
}

/// Running totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Ticks attempted.
    pub ticks: u64,
    /// Records appended to the store.
    pub records: u64,
    /// Ticks lost to timeouts or malformed frames.
    pub decode_failures: u64,
    /// Ticks lost to non-OK or mismatched replies.
    pub rejected: u64,
    /// Ticks lost to transport failures.
    pub transport_failures: u64,
}

/// One timestamped poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureReading {
    /// When the reply was received.
    pub timestamp: DateTime<Local>,
    /// Pressure field as reported.
    pub pressure: RawPressure,
}

impl PressureReading {
    /// Stamp `pressure` with the current local time.
    pub fn now(pressure: RawPressure) -> Self {
        Self {
            timestamp: Local::now(),
            pressure,
        }
    }

    /// The persisted form of this reading.
    pub fn to_record(&self) -> AcquisitionRecord {
        AcquisitionRecord {
            pressure: self.pressure.as_str().to_string(),
            time: self.timestamp.format(TIME_FORMAT).to_string(),
        }
    }
}

/// Requests a cooperative stop of an [`AcquisitionLoop`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Ask the loop to stop at its next tick boundary.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Periodic poll-and-append loop over one gauge and one store.
#[derive(Debug)]
pub struct AcquisitionLoop<G> {
    gauge: G,
    sink: CsvSink,
    settings: AcquisitionSettings,
    state: AcquisitionState,
    stats: AcquisitionStats,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl<G: PressureGauge> AcquisitionLoop<G> {
    /// Loop polling `gauge` into `sink`.
    ///
    /// A `poll_interval` below [`MIN_POLL_INTERVAL`] is raised to it.
    pub fn new(gauge: G, sink: CsvSink, mut settings: AcquisitionSettings) -> Self {
        if settings.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = settings.poll_interval.as_millis() as u64,
                "poll interval too short, using the minimum"
            );
            settings.poll_interval = MIN_POLL_INTERVAL;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            gauge,
            sink,
            settings,
            state: AcquisitionState::Running,
            stats: AcquisitionStats::default(),
            stop_tx,
            stop_rx,
        }
    }

    /// Handle for stopping the loop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Totals so far.
    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    /// Give back the gauge, e.g. to close its port.
    pub fn into_gauge(self) -> G {
        self.gauge
    }

    /// Run until stopped.
    ///
    /// # Errors
    /// Returns the last transport error once the failure budget is exhausted,
    /// or the store error that prevented a reading from being persisted. The
    /// loop is `Stopped` afterwards either way.
    pub async fn run(&mut self) -> AppResult<AcquisitionStats> {
        if self.state == AcquisitionState::Stopped {
            return Ok(self.stats);
        }

        info!(
            store = %self.sink.path().display(),
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "acquisition started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_transport_failures = 0u32;

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop_rx.wait_for(|stopped| *stopped) => break,
            }
            if *self.stop_rx.borrow() {
                break;
            }

            match self.tick().await {
                Ok(()) => consecutive_transport_failures = 0,
                Err(e) if e.is_transport() => {
                    consecutive_transport_failures += 1;
                    self.stats.transport_failures += 1;

                    if consecutive_transport_failures >= self.settings.max_transport_failures {
                        error!(
                            error = %e,
                            failures = consecutive_transport_failures,
                            "transport lost, stopping acquisition"
                        );
                        self.state = AcquisitionState::Stopped;
                        return Err(e);
                    }

                    let backoff = self.settings.retry_backoff * consecutive_transport_failures;
                    warn!(
                        error = %e,
                        failures = consecutive_transport_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "transport failure, backing off"
                    );
                    if self.sleep_or_stop(backoff).await {
                        break;
                    }
                    ticker.reset();
                }
                Err(e @ SpceError::Storage(_)) => {
                    error!(error = %e, "cannot persist reading, stopping acquisition");
                    self.state = AcquisitionState::Stopped;
                    return Err(e);
                }
                Err(e @ SpceError::Decode(_)) => {
                    self.stats.decode_failures += 1;
                    warn!(error = %e, "poll failed, skipping tick");
                }
                Err(e) => {
                    self.stats.rejected += 1;
                    warn!(error = %e, "reply rejected, skipping tick");
                }
            }
        }

        self.state = AcquisitionState::Stopped;
        info!(
            ticks = self.stats.ticks,
            records = self.stats.records,
            decode_failures = self.stats.decode_failures,
            rejected = self.stats.rejected,
            transport_failures = self.stats.transport_failures,
            "acquisition stopped"
        );
        Ok(self.stats)
    }

    /// One poll and one append.
    async fn tick(&mut self) -> AppResult<()> {
        self.stats.ticks += 1;

        let pressure = self.gauge.read_pressure().await?;
        let reading = PressureReading::now(pressure);
        let record = reading.to_record();
        self.sink.append(&record)?;
        self.stats.records += 1;

        info!(
            pressure = %record.pressure,
            time = %record.time,
            records = self.stats.records,
            "sample stored"
        );
        Ok(())
    }

    /// Sleep for `duration` unless a stop arrives first. Returns `true` on stop.
    async fn sleep_or_stop(&mut self, duration: Duration) -> bool {
        let stop_rx = &mut self.stop_rx;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop_rx.wait_for(|stopped| *stopped) => return true,
        }
        *self.stop_rx.borrow()
    }
}
