use crate::clock::Clock;
use crate::config::ControlConfig;
use crate::events::{Severity, Tracer};
use crate::pump::{PumpController, PumpPhase};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::subsystems::HormoneKind;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_HEALTH_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthCheck {
    OperationHours,
    Battery,
    Reservoir(HormoneKind),
    Scheduler,
    Pump,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEventRecord {
    pub check: HealthCheck,
    pub severity: Severity,
    pub raised_at_ms: u64,
    pub last_seen_ms: u64,
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub operation_hours: Option<Severity>,
    pub battery: Option<Severity>,
    pub insulin_reservoir: Option<Severity>,
    pub glucagon_reservoir: Option<Severity>,
    pub scheduler: Option<Severity>,
    pub pump: Option<Severity>,
}

impl HealthReport {
    pub fn worst(&self) -> Option<Severity> {
        [
            self.operation_hours,
            self.battery,
            self.insulin_reservoir,
            self.glucagon_reservoir,
            self.scheduler,
            self.pump,
        ]
        .into_iter()
        .flatten()
        .max()
    }

    pub fn is_nominal(&self) -> bool {
        self.worst().is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthState {
    pub checks_run: u64,
    pub active_events: u8,
    pub level: Option<Severity>,
}

/// Read-only watchdog over the pump and the scheduler.
///
/// Every condition becomes an event record; a record stays active while its
/// condition holds and is resolved as soon as a check passes again. Alerts
/// go out when an event is raised or escalates, not on every repeat.
pub struct HealthSupervisor {
    tracer: Tracer,
    clock: Arc<dyn Clock>,
    state: HealthState,
    event_history: Vec<HealthEventRecord, MAX_HEALTH_EVENTS>,
}

impl HealthSupervisor {
    pub fn new(tracer: Tracer, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracer,
            clock,
            state: HealthState::default(),
            event_history: Vec::new(),
        }
    }

    pub fn run_checks(&mut self, pump: &PumpController, scheduler: &Scheduler) -> HealthReport {
        let report = HealthReport {
            battery: self.check_battery(pump),
            operation_hours: self.check_operation_hours(scheduler, pump.config()),
            insulin_reservoir: self.check_reservoir(pump, HormoneKind::Insulin),
            glucagon_reservoir: self.check_reservoir(pump, HormoneKind::Glucagon),
            scheduler: self.check_scheduler(scheduler),
            pump: self.check_pump(pump),
        };

        self.state.checks_run = self.state.checks_run.saturating_add(1);
        self.update_level();
        report
    }

    pub fn check_operation_hours(&mut self, scheduler: &Scheduler, config: &ControlConfig) -> Option<Severity> {
        let elapsed_ms = scheduler.get_operation_time().as_millis() as u64;
        let max_ms = config.max_operation_ms();
        let severity = if elapsed_ms >= max_ms {
            Some(Severity::Critical)
        } else if elapsed_ms.saturating_mul(10) >= max_ms.saturating_mul(9) {
            Some(Severity::Warning)
        } else {
            None
        };
        let message = format!(
            "Operation time {}h of {}h maximum reached, pump needs inspection",
            scheduler.operation_hours(),
            config.max_operation_hours
        );
        self.evaluate(HealthCheck::OperationHours, severity, &message)
    }

    pub fn check_battery(&mut self, pump: &PumpController) -> Option<Severity> {
        let level = pump.battery_level();
        let config = pump.config();
        let severity = if level < config.batt_crit {
            Some(Severity::Critical)
        } else if level < config.batt_warn {
            Some(Severity::Warning)
        } else {
            None
        };
        let message = format!("Battery charge too low ({}%)", level);
        self.evaluate(HealthCheck::Battery, severity, &message)
    }

    pub fn check_reservoirs(&mut self, pump: &PumpController) -> [Option<Severity>; 2] {
        HormoneKind::ALL.map(|kind| self.check_reservoir(pump, kind))
    }

    fn check_reservoir(&mut self, pump: &PumpController, kind: HormoneKind) -> Option<Severity> {
        let reservoir = pump.state().reservoirs().reservoir(kind);
        let message = format!("{} reservoir at {}%, please refill", kind, reservoir.level);
        self.evaluate(HealthCheck::Reservoir(kind), reservoir.alert_level(), &message)
    }

    pub fn check_scheduler(&mut self, scheduler: &Scheduler) -> Option<Severity> {
        let severity = match scheduler.get_status() {
            SchedulerStatus::Ok => None,
            SchedulerStatus::TimerInvalid => Some(Severity::Critical),
        };
        self.evaluate(HealthCheck::Scheduler, severity, "The scheduler is in a critical state")
    }

    pub fn check_pump(&mut self, pump: &PumpController) -> Option<Severity> {
        let severity = match pump.phase() {
            PumpPhase::Faulted => Some(Severity::Critical),
            _ => None,
        };
        let message = format!("The pump is in a critical state ({:?})", pump.fault());
        self.evaluate(HealthCheck::Pump, severity, &message)
    }

    fn evaluate(&mut self, check: HealthCheck, severity: Option<Severity>, message: &str) -> Option<Severity> {
        let now = self.clock.now_ms();
        match severity {
            Some(severity) => {
                if self.record_event(check, severity, now) {
                    self.tracer.log_at(severity, message);
                }
            }
            None => self.resolve(check),
        }
        severity
    }

    /// Returns `true` when the event is new or more severe than before.
    fn record_event(&mut self, check: HealthCheck, severity: Severity, now: u64) -> bool {
        if let Some(existing) = self
            .event_history
            .iter_mut()
            .find(|e| e.check == check && !e.resolved)
        {
            let escalated = severity > existing.severity;
            existing.severity = severity;
            existing.last_seen_ms = now;
            return escalated;
        }

        if self.event_history.is_full() {
            let oldest = self
                .event_history
                .iter()
                .position(|e| e.resolved)
                .unwrap_or(0);
            self.event_history.remove(oldest);
        }
        let _ = self.event_history.push(HealthEventRecord {
            check,
            severity,
            raised_at_ms: now,
            last_seen_ms: now,
            resolved: false,
        });
        true
    }

    fn resolve(&mut self, check: HealthCheck) {
        for event in self.event_history.iter_mut().filter(|e| e.check == check && !e.resolved) {
            event.resolved = true;
        }
    }

    fn update_level(&mut self) {
        let active = self.event_history.iter().filter(|e| !e.resolved);
        self.state.active_events = active.clone().count() as u8;
        self.state.level = active.map(|e| e.severity).max();
    }

    pub fn get_state(&self) -> &HealthState {
        &self.state
    }

    pub fn get_event_history(&self) -> &[HealthEventRecord] {
        &self.event_history
    }

    pub fn active_events(&self) -> impl Iterator<Item = &HealthEventRecord> {
        self.event_history.iter().filter(|e| !e.resolved)
    }

    pub fn clear_resolved_events(&mut self) {
        self.event_history.retain(|e| !e.resolved);
    }
}

impl core::fmt::Debug for HealthSupervisor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HealthSupervisor")
            .field("state", &self.state)
            .field("events", &self.event_history.len())
            .finish_non_exhaustive()
    }
}
