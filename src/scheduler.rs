use crate::clock::Clock;
use crate::events::{Notification, Tracer};
use crate::pump::{FaultCause, PumpController};
use crate::store::{OperationTimeStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MS_PER_HOUR: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerStatus {
    Ok,
    TimerInvalid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub successful_ticks: u64,
    pub failed_ticks: u64,
    pub automatic_resets: u64,
    pub persist_failures: u32,
}

/// Drives pump cycles and keeps the cumulative operation time.
///
/// The persisted total is read once when the scheduler is built; each
/// successful tick adds the time elapsed since the previous mark and writes
/// the new total back. A failed tick moves the mark without adding time.
pub struct Scheduler {
    store: Box<dyn OperationTimeStore>,
    clock: Arc<dyn Clock>,
    tracer: Tracer,
    total_ms: u64,
    last_mark_ms: Option<u64>,
    stats: SchedulerStats,
    retry_without_body: bool,
}

impl Scheduler {
    pub fn new(
        mut store: Box<dyn OperationTimeStore>,
        clock: Arc<dyn Clock>,
        tracer: Tracer,
        retry_without_body: bool,
    ) -> Result<Self, StoreError> {
        let total_ms = store.load()?;
        let last_mark_ms = Some(clock.now_ms());
        debug!(total_ms, "Operation time counter started");
        Ok(Self {
            store,
            clock,
            tracer,
            total_ms,
            last_mark_ms,
            stats: SchedulerStats::default(),
            retry_without_body,
        })
    }

    /// Runs one pump cycle. Returns `true` when the cycle completed.
    pub fn tick(&mut self, pump: &mut PumpController) -> bool {
        self.stats.total_ticks += 1;

        let Some(mark) = self.last_mark_ms else {
            self.stats.failed_ticks += 1;
            self.tracer
                .log_critical("Scheduler timer is not running, pump cycle skipped");
            return false;
        };

        if self.retry_without_body && pump.fault() == Some(FaultCause::NoBodyDetected) && pump.reset() {
            self.stats.automatic_resets += 1;
        }

        let outcome = pump.run_cycle();
        let now = self.clock.now_ms();
        self.last_mark_ms = Some(now);

        match outcome {
            Ok(result) => {
                self.stats.successful_ticks += 1;
                debug!(?result, "Pump cycle completed");
                self.total_ms = self.total_ms.saturating_add(now.saturating_sub(mark));
                self.persist();
                self.tracer.notify(Notification::OperationTime {
                    hours: self.total_ms / MS_PER_HOUR,
                });
                true
            }
            Err(e) => {
                self.stats.failed_ticks += 1;
                warn!("Pump cycle failed: {}", e);
                false
            }
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(self.total_ms) {
            self.stats.persist_failures = self.stats.persist_failures.saturating_add(1);
            self.tracer
                .log_critical(&format!("Could not save operation time: {}", e));
        }
    }

    pub fn get_operation_time(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }

    pub fn operation_hours(&self) -> u64 {
        self.total_ms / MS_PER_HOUR
    }

    pub fn get_status(&self) -> SchedulerStatus {
        if self.last_mark_ms.is_some() {
            SchedulerStatus::Ok
        } else {
            SchedulerStatus::TimerInvalid
        }
    }

    /// Stops time accounting and flushes the total. Ticks fail until `start`.
    pub fn stop(&mut self) {
        if self.last_mark_ms.take().is_some() {
            self.persist();
            debug!(total_ms = self.total_ms, "Operation time counter stopped");
        }
    }

    pub fn start(&mut self) {
        if self.last_mark_ms.is_none() {
            self.last_mark_ms = Some(self.clock.now_ms());
        }
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("total_ms", &self.total_ms)
            .field("last_mark_ms", &self.last_mark_ms)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
