use crate::datalog_writer::{DatalogWriter, LogRecord};
use crate::error::{Error, Result};
use crate::jfy::inverter::{Session, Transport};
use crate::jfy::packet::Reading;
use crate::unixtime::UnixTime;

use log::{error, info, warn};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Consecutive failed cycles after which the inverter is assumed to have
/// dropped its bus address.
const REREGISTER_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub readings: u64,
    pub timeouts: u64,
    pub bad_frames: u64,
    pub out_of_range: u64,
    pub registrations: u64,
}

impl PollStats {
    fn record_failure(&mut self, err: &Error) {
        match err {
            Error::Timeout(_) => self.timeouts += 1,
            Error::OutOfRange { .. } => self.out_of_range += 1,
            _ => self.bad_frames += 1,
        }
    }

    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Cycles attempted: {}", self.cycles);
        info!("  Readings written: {}", self.readings);
        info!("  Timeouts: {}", self.timeouts);
        info!("  Rejected frames: {}", self.bad_frames);
        info!("  Out of range: {}", self.out_of_range);
        info!("  Registrations: {}", self.registrations);
    }
}

/// The acquisition loop: one poll per period, every outcome classified.
///
/// Owns the session and the datalog writer for as long as it runs and
/// closes the session on the way out, whichever way that is.
pub struct Coordinator<T: Transport> {
    session: Session<T>,
    writer: DatalogWriter,
    poll_period: Duration,
    read_timeout: Duration,
    stats: PollStats,
    consecutive_failures: u32,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(
        session: Session<T>,
        writer: DatalogWriter,
        poll_period: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            session,
            writer,
            poll_period,
            read_timeout,
            stats: PollStats::default(),
            consecutive_failures: 0,
        }
    }

    /// Polls until `shutdown` fires (or its sender goes away), or until a
    /// fatal error. A shutdown also abandons a cycle that is in flight.
    pub async fn start(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<PollStats> {
        let mut interval = tokio::time::interval(self.poll_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Polling every {:?}, read timeout {:?}",
            self.poll_period, self.read_timeout
        );

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutdown received, stopping poller");
                    break Ok(());
                }
                _ = interval.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutdown received, abandoning in-flight poll cycle");
                    break Ok(());
                }
                outcome = self.cycle() => outcome,
            };

            if let Err(e) = self.handle_outcome(outcome) {
                break Err(e);
            }
        };

        self.session.close().await;
        self.stats.print_summary();
        info!(
            "{} lines appended to {}",
            self.writer.lines_written(),
            self.writer.path()
        );

        result.map(|_| self.stats)
    }

    async fn cycle(&mut self) -> Result<(Reading, UnixTime)> {
        self.stats.cycles += 1;

        if !self.session.is_registered() {
            self.session.register(self.read_timeout).await?;
            self.stats.registrations += 1;
        }

        let reading = self.session.poll(self.read_timeout).await?;

        Ok((reading, UnixTime::now()))
    }

    fn handle_outcome(&mut self, outcome: Result<(Reading, UnixTime)>) -> Result<()> {
        match outcome {
            Ok((reading, captured)) => {
                self.consecutive_failures = 0;
                self.writer.append(&LogRecord::new(captured, reading))?;
                self.stats.readings += 1;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                self.stats.record_failure(&e);
                self.consecutive_failures += 1;
                warn!("Error reading from inverter (cycle {}), {}", self.stats.cycles, e);

                if self.consecutive_failures >= REREGISTER_AFTER_FAILURES
                    && self.session.is_registered()
                {
                    warn!(
                        "{} consecutive failures, registering inverter again next cycle",
                        self.consecutive_failures
                    );
                    self.session.forget_registration();
                    self.consecutive_failures = 0;
                }
                Ok(())
            }
            Err(e) => {
                error!("Error reading from inverter (cycle {}), {}", self.stats.cycles, e);
                Err(e)
            }
        }
    }
}
