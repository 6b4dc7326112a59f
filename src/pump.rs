//! The pump's cycle state machine.
//!
//! One call to [`PumpController::run_cycle`] is one control step: pay the
//! battery cost, sense, decide, dose and report to the body. The controller
//! exclusively owns the reservoirs and the battery; everything outside reads
//! them through accessors.

use crate::config::{ConfigError, ControlConfig, DrainPolicy};
use crate::dosing::{self, DosingError};
use crate::events::{Notification, Tracer};
use crate::link::{ActuatorLink, LinkError, SensorLink};
use crate::protocol::{self, MAX_UNITS_PER_MESSAGE};
use crate::subsystems::{BatteryModel, DoseOrder, HormoneKind, ReservoirBank, Subsystem};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpPhase {
    Uninitialized,
    Idle,
    Cycling,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCause {
    PowerFailure,
    NoBodyDetected,
    SensorFault,
    ActuatorFault,
    Configuration,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("pump has not been initialized")]
    NotInitialized,
    #[error("pump is faulted ({0:?}) and waits for a reset")]
    Faulted(FaultCause),
    #[error("power failure: battery cannot cover the cycle")]
    PowerFailure,
    #[error("no body detected: no glucose reading available")]
    NoBodyDetected,
    #[error("sensor fault: {0}")]
    SensorFault(#[source] LinkError),
    #[error("actuator fault: {0}")]
    ActuatorFault(#[source] LinkError),
    #[error(transparent)]
    Dosing(#[from] DosingError),
}

impl CycleError {
    pub fn cause(&self) -> Option<FaultCause> {
        match self {
            CycleError::NotInitialized => None,
            CycleError::Faulted(cause) => Some(*cause),
            CycleError::PowerFailure => Some(FaultCause::PowerFailure),
            CycleError::NoBodyDetected => Some(FaultCause::NoBodyDetected),
            CycleError::SensorFault(_) => Some(FaultCause::SensorFault),
            CycleError::ActuatorFault(_) => Some(FaultCause::ActuatorFault),
            CycleError::Dosing(_) => Some(FaultCause::Configuration),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    pub glucose: u16,
    pub hormone: Option<HormoneKind>,
    /// Units the decision asked for, before the wire cap and the reservoir.
    pub requested_units: u32,
    /// Units taken from the reservoir and reported to the body.
    pub actual_units: u8,
}

#[derive(Debug)]
pub struct PumpState {
    current_glucose: Option<u16>,
    previous_glucose: Option<u16>,
    active_hormone: Option<HormoneKind>,
    delay: bool,
    reservoirs: ReservoirBank,
    battery: BatteryModel,
}

impl PumpState {
    fn fresh(config: &ControlConfig, tracer: &Tracer) -> Self {
        Self {
            current_glucose: None,
            previous_glucose: None,
            active_hormone: None,
            delay: false,
            reservoirs: ReservoirBank::new(config.reservoir_warn, config.reservoir_crit, tracer.clone()),
            battery: BatteryModel::new(tracer.clone()),
        }
    }

    pub fn current_glucose(&self) -> Option<u16> {
        self.current_glucose
    }

    pub fn previous_glucose(&self) -> Option<u16> {
        self.previous_glucose
    }

    pub fn active_hormone(&self) -> Option<HormoneKind> {
        self.active_hormone
    }

    pub fn delay(&self) -> bool {
        self.delay
    }

    pub fn reservoirs(&self) -> &ReservoirBank {
        &self.reservoirs
    }

    pub fn battery(&self) -> &BatteryModel {
        &self.battery
    }
}

pub struct PumpController {
    phase: PumpPhase,
    fault: Option<FaultCause>,
    state: PumpState,
    config: ControlConfig,
    sensor: Box<dyn SensorLink>,
    actuator: Box<dyn ActuatorLink>,
    tracer: Tracer,
    cycles_completed: u64,
}

impl PumpController {
    /// Rejects an invalid configuration before anything is built.
    pub fn new(
        config: ControlConfig,
        sensor: Box<dyn SensorLink>,
        actuator: Box<dyn ActuatorLink>,
        tracer: Tracer,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            phase: PumpPhase::Uninitialized,
            fault: None,
            state: PumpState::fresh(&config, &tracer),
            config,
            sensor,
            actuator,
            tracer,
            cycles_completed: 0,
        })
    }

    /// Full battery, full reservoirs, no glucose history.
    pub fn initialize(&mut self) {
        self.state = PumpState::fresh(&self.config, &self.tracer);
        self.phase = PumpPhase::Idle;
        self.fault = None;
        self.tracer.notify(Notification::BatteryLevel {
            level: self.state.battery.level(),
        });
        for kind in HormoneKind::ALL {
            self.tracer.notify(Notification::ReservoirLevel {
                hormone: kind,
                level: self.state.reservoirs.level(kind),
            });
        }
        self.tracer.log_status("Pump initialized");
    }

    pub fn run_cycle(&mut self) -> Result<CycleResult, CycleError> {
        match self.phase {
            PumpPhase::Uninitialized => return Err(CycleError::NotInitialized),
            PumpPhase::Faulted => {
                return Err(CycleError::Faulted(self.fault.unwrap_or(FaultCause::Configuration)))
            }
            PumpPhase::Idle | PumpPhase::Cycling => {}
        }
        self.phase = PumpPhase::Cycling;

        if !self.state.battery.drain(1) {
            return Err(self.enter_fault(CycleError::PowerFailure));
        }

        let glucose = match self.sensor.read_glucose() {
            Ok(glucose) => glucose,
            Err(nb::Error::WouldBlock) => {
                self.tracer.log_critical("No body found! No glucose reading available");
                return Err(self.enter_fault(CycleError::NoBodyDetected));
            }
            Err(nb::Error::Other(e)) => {
                self.tracer.log_critical(&format!("Glucose sensor fault: {}", e));
                return Err(self.enter_fault(CycleError::SensorFault(e)));
            }
        };

        let previous = self.state.current_glucose.unwrap_or(glucose);
        self.state.previous_glucose = Some(previous);
        self.state.current_glucose = Some(glucose);

        self.check_alarms(glucose);

        let delayed = self.state.delay;
        self.state.delay = false;
        let decision = match dosing::decide(glucose, previous, delayed, &self.config) {
            Ok(decision) => decision,
            Err(e) => return Err(self.enter_fault(CycleError::Dosing(e))),
        };
        debug!(
            glucose,
            previous,
            delayed,
            target = ?decision.target,
            units = decision.units,
            "Dosing decision"
        );

        let units = decision.units.min(u32::from(MAX_UNITS_PER_MESSAGE)) as u8;
        let deliverable = match decision.hormone {
            Some(hormone) => units.min(self.state.reservoirs.level(hormone)),
            None => 0,
        };

        // Nothing is committed until the body has the message.
        let order = decision.hormone.map(|hormone| DoseOrder {
            hormone,
            units: deliverable,
        });
        let message = protocol::encode_actuator_message(order);
        if let Err(e) = self.actuator.send(&message) {
            self.tracer
                .log_critical(&format!("Could not deliver dose message {}: {}", message, e));
            return Err(self.enter_fault(CycleError::ActuatorFault(e)));
        }

        self.state.active_hormone = decision.hormone;
        let actual_units = match decision.hormone {
            Some(hormone) if units > 0 => self.state.reservoirs.decrease(hormone, units),
            _ => 0,
        };
        debug_assert_eq!(actual_units, deliverable);
        if actual_units > 0 {
            self.state.delay = true;
        }

        if self.config.battery_drain == DrainPolicy::PerCycleAndInjection {
            // A failure here is logged by the battery; the next cycle faults
            // on its first drain.
            self.state.battery.drain(1);
        }

        self.tracer.notify(Notification::Glucose {
            glucose,
            hormone: decision.hormone,
            units: actual_units,
        });

        self.cycles_completed = self.cycles_completed.saturating_add(1);
        self.phase = PumpPhase::Idle;

        Ok(CycleResult {
            glucose,
            hormone: decision.hormone,
            requested_units: decision.units,
            actual_units,
        })
    }

    fn check_alarms(&self, glucose: u16) {
        if glucose <= self.config.lower_alarm {
            self.tracer.log_critical(&format!(
                "Low blood sugar! {} mg/dL at or below alarm level {}",
                glucose, self.config.lower_alarm
            ));
        }
        if glucose >= self.config.upper_alarm {
            self.tracer.log_critical(&format!(
                "High blood sugar! {} mg/dL at or above alarm level {}",
                glucose, self.config.upper_alarm
            ));
        }
    }

    fn enter_fault(&mut self, error: CycleError) -> CycleError {
        self.phase = PumpPhase::Faulted;
        self.fault = error.cause();
        error
    }

    /// Clears a fault so the next cycle can run. Returns `false` when there
    /// was nothing to reset.
    pub fn reset(&mut self) -> bool {
        if self.phase != PumpPhase::Faulted {
            return false;
        }
        let cause = self.fault.take();
        self.phase = PumpPhase::Idle;
        self.tracer
            .log_status(&format!("Pump reset after fault {:?}", cause));
        true
    }

    pub fn refill(&mut self, kind: HormoneKind) {
        self.state.reservoirs.refill(kind);
    }

    pub fn recharge_battery(&mut self, level: u8) -> bool {
        self.state.battery.recharge(level)
    }

    pub fn set_reservoir_thresholds(&mut self, warn: u8, crit: u8) -> Result<(), ConfigError> {
        self.update_config(|c| c.set_reservoir_thresholds(warn, crit))
    }

    /// Applies a validated change to the control configuration. The
    /// reservoir bank always follows the configured thresholds.
    pub fn update_config(
        &mut self,
        change: impl FnOnce(&mut ControlConfig) -> Result<(), ConfigError>,
    ) -> Result<(), ConfigError> {
        change(&mut self.config)?;
        self.state
            .reservoirs
            .set_thresholds(self.config.reservoir_warn, self.config.reservoir_crit)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn phase(&self) -> PumpPhase {
        self.phase
    }

    pub fn fault(&self) -> Option<FaultCause> {
        self.fault
    }

    pub fn state(&self) -> &PumpState {
        &self.state
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn battery_level(&self) -> u8 {
        self.state.battery.level()
    }

    pub fn reservoir_level(&self, kind: HormoneKind) -> u8 {
        self.state.reservoirs.level(kind)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn is_healthy(&self) -> bool {
        self.phase != PumpPhase::Faulted
            && self.state.battery.is_healthy()
            && self.state.reservoirs.is_healthy()
    }
}

impl core::fmt::Debug for PumpController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PumpController")
            .field("phase", &self.phase)
            .field("fault", &self.fault)
            .field("state", &self.state)
            .field("cycles_completed", &self.cycles_completed)
            .finish_non_exhaustive()
    }
}
