//! Runtime wiring: shared ownership of the pump, the scheduler and the
//! health supervisor, the periodic tasks driving them, and the control
//! command dispatcher used by the daemon.

use crate::clock::Clock;
use crate::config::{ConfigError, ControlConfig};
use crate::events::Tracer;
use crate::health::{HealthReport, HealthSupervisor};
use crate::link::{ActuatorLink, SensorLink};
use crate::protocol::{CommandResponse, CommandType, ControlCommand, PumpStatus};
use crate::pump::PumpController;
use crate::scheduler::Scheduler;
use crate::store::{OperationTimeStore, StoreError};
use crate::subsystems::HormoneKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owner of the running pump.
///
/// Locks are always taken scheduler first, then pump, then supervisor.
#[derive(Clone)]
pub struct PumpAgent {
    scheduler: Arc<Mutex<Scheduler>>,
    pump: Arc<Mutex<PumpController>>,
    supervisor: Arc<Mutex<HealthSupervisor>>,
    running: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
    tracer: Tracer,
}

/// Handles of the spawned periodic tasks.
#[derive(Debug)]
pub struct AgentTasks {
    scheduler: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl AgentTasks {
    /// Waits for both loops to observe the shutdown flag and exit.
    pub async fn join(self) {
        if let Err(e) = self.scheduler.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
        if let Err(e) = self.supervisor.await {
            warn!("Supervisor task ended abnormally: {}", e);
        }
    }
}

impl PumpAgent {
    /// Builds and initializes every component. Fails on an invalid
    /// configuration or an unreadable operation-time store.
    pub fn build(
        config: ControlConfig,
        sensor: Box<dyn SensorLink>,
        actuator: Box<dyn ActuatorLink>,
        store: Box<dyn OperationTimeStore>,
        clock: Arc<dyn Clock>,
        tracer: Tracer,
    ) -> Result<Self, AgentError> {
        let retry_without_body = config.retry_without_body;
        let mut pump = PumpController::new(config, sensor, actuator, tracer.clone())?;
        pump.initialize();
        let scheduler = Scheduler::new(store, Arc::clone(&clock), tracer.clone(), retry_without_body)?;
        let supervisor = HealthSupervisor::new(tracer.clone(), clock);
        Ok(Self::new(pump, scheduler, supervisor, tracer))
    }

    pub fn new(
        pump: PumpController,
        scheduler: Scheduler,
        supervisor: HealthSupervisor,
        tracer: Tracer,
    ) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            pump: Arc::new(Mutex::new(pump)),
            supervisor: Arc::new(Mutex::new(supervisor)),
            running: Arc::new(AtomicBool::new(true)),
            wakeup: Arc::new(Notify::new()),
            tracer,
        }
    }

    /// Starts the scheduler and supervisor loops. Each loop sleeps for its
    /// interval first, then does its work, until shutdown.
    pub async fn spawn(&self) -> AgentTasks {
        let (scheduler_interval, supervisor_interval) = {
            let pump = self.pump.lock().await;
            (pump.config().scheduler_interval(), pump.config().controller_interval())
        };
        info!(
            scheduler_ms = scheduler_interval.as_millis() as u64,
            supervisor_ms = supervisor_interval.as_millis() as u64,
            "Pump runtime starting"
        );

        let agent = self.clone();
        let scheduler = tokio::spawn(async move {
            while agent.pace(scheduler_interval).await {
                agent.tick().await;
            }
            debug!("Scheduler loop stopped");
        });

        let agent = self.clone();
        let supervisor = tokio::spawn(async move {
            while agent.pace(supervisor_interval).await {
                agent.check_health().await;
            }
            debug!("Supervisor loop stopped");
        });

        AgentTasks { scheduler, supervisor }
    }

    /// Sleeps one period. Returns `false` once shutdown was requested.
    async fn pace(&self, period: Duration) -> bool {
        // Register for the wakeup before reading the flag so a shutdown in
        // between is not lost.
        let notified = self.wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = &mut notified => {}
        }
        self.is_running()
    }

    /// Runs one scheduled pump cycle.
    pub async fn tick(&self) -> bool {
        let mut scheduler = self.scheduler.lock().await;
        let mut pump = self.pump.lock().await;
        scheduler.tick(&mut pump)
    }

    pub async fn check_health(&self) -> HealthReport {
        let scheduler = self.scheduler.lock().await;
        let pump = self.pump.lock().await;
        let mut supervisor = self.supervisor.lock().await;
        supervisor.run_checks(&pump, &scheduler)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests both loops to stop and flushes the operation time.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.wakeup.notify_waiters();
            self.scheduler.lock().await.stop();
            self.tracer.log_status("Pump shutting down");
        }
    }

    pub async fn status(&self) -> PumpStatus {
        let scheduler = self.scheduler.lock().await;
        let pump = self.pump.lock().await;
        let state = pump.state();
        PumpStatus {
            phase: pump.phase(),
            current_glucose: state.current_glucose(),
            previous_glucose: state.previous_glucose(),
            active_hormone: state.active_hormone(),
            delay: state.delay(),
            battery_level: pump.battery_level(),
            insulin_level: pump.reservoir_level(HormoneKind::Insulin),
            glucagon_level: pump.reservoir_level(HormoneKind::Glucagon),
            cycles_completed: pump.cycles_completed(),
            operation_time_ms: scheduler.get_operation_time().as_millis() as u64,
            scheduler_status: scheduler.get_status(),
        }
    }

    /// Applies one control command and builds its reply.
    pub async fn execute_command(&self, command: ControlCommand) -> CommandResponse {
        let id = command.id;

        if !self.is_running() {
            match command.command_type {
                CommandType::Ping | CommandType::Status | CommandType::Shutdown => {}
                _ => return CommandResponse::nack(id, "Pump is shutting down"),
            }
        }

        match command.command_type {
            CommandType::Ping => CommandResponse::success(id, Some("pong")),

            CommandType::Status => {
                let mut response = CommandResponse::success(id, None);
                response.pump = Some(self.status().await);
                response
            }

            CommandType::Refill { hormone } => {
                self.pump.lock().await.refill(hormone);
                CommandResponse::success(id, Some(&format!("{} reservoir refilled", hormone)))
            }

            CommandType::RechargeBattery { level } => {
                if self.pump.lock().await.recharge_battery(level) {
                    CommandResponse::success(id, None)
                } else {
                    CommandResponse::nack(id, "Recharge level must be between the current level and 100")
                }
            }

            CommandType::SetTargets { lower, upper } => {
                self.reconfigure(id, |c| c.set_targets(lower, upper)).await
            }
            CommandType::SetLimits { lower, upper } => {
                self.reconfigure(id, |c| c.set_limits(lower, upper)).await
            }
            CommandType::SetAlarms { lower, upper } => {
                self.reconfigure(id, |c| c.set_alarms(lower, upper)).await
            }
            CommandType::SetSensitivity { hsf } => {
                self.reconfigure(id, |c| c.set_hormone_sensitivity_factor(hsf)).await
            }
            CommandType::SetBatteryThresholds { warn, crit } => {
                self.reconfigure(id, |c| c.set_battery_thresholds(warn, crit)).await
            }
            CommandType::SetMaxOperationHours { hours } => {
                self.reconfigure(id, |c| c.set_max_operation_hours(hours)).await
            }
            CommandType::SetReservoirThresholds { warn, crit } => {
                match self.pump.lock().await.set_reservoir_thresholds(warn, crit) {
                    Ok(()) => CommandResponse::success(id, None),
                    Err(e) => CommandResponse::nack(id, &e.to_string()),
                }
            }

            CommandType::ResetPump => {
                if self.pump.lock().await.reset() {
                    CommandResponse::success(id, Some("Pump reset"))
                } else {
                    CommandResponse::nack(id, "Pump is not faulted")
                }
            }

            CommandType::Shutdown => {
                self.shutdown().await;
                CommandResponse::success(id, Some("Shutdown requested"))
            }
        }
    }

    async fn reconfigure(
        &self,
        id: u32,
        change: impl FnOnce(&mut ControlConfig) -> Result<(), ConfigError>,
    ) -> CommandResponse {
        match self.pump.lock().await.update_config(change) {
            Ok(()) => CommandResponse::success(id, None),
            Err(e) => CommandResponse::nack(id, &e.to_string()),
        }
    }
}

impl core::fmt::Debug for PumpAgent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PumpAgent")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
