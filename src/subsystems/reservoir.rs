use super::{HormoneKind, Subsystem, FULL_LEVEL};
use crate::events::{Notification, Severity, Tracer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservoir {
    pub kind: HormoneKind,
    pub level: u8,
    pub warn_threshold: u8,
    pub crit_threshold: u8,
}

impl Reservoir {
    fn full(kind: HormoneKind, warn_threshold: u8, crit_threshold: u8) -> Self {
        Self {
            kind,
            level: FULL_LEVEL,
            warn_threshold,
            crit_threshold,
        }
    }

    /// Severity of the current fill level, `None` while above the warning threshold.
    pub fn alert_level(&self) -> Option<Severity> {
        if self.level <= self.crit_threshold {
            Some(Severity::Critical)
        } else if self.level <= self.warn_threshold {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservoirState {
    pub insulin: Reservoir,
    pub glucagon: Reservoir,
    pub units_delivered: u64,
    pub short_deliveries: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum ReservoirCommand {
    Refill(HormoneKind),
    SetThresholds { warn: u8, crit: u8 },
}

#[derive(Debug)]
pub struct ReservoirBank {
    state: ReservoirState,
    tracer: Tracer,
}

impl ReservoirBank {
    pub fn new(warn_threshold: u8, crit_threshold: u8, tracer: Tracer) -> Self {
        Self {
            state: ReservoirState {
                insulin: Reservoir::full(HormoneKind::Insulin, warn_threshold, crit_threshold),
                glucagon: Reservoir::full(HormoneKind::Glucagon, warn_threshold, crit_threshold),
                units_delivered: 0,
                short_deliveries: 0,
            },
            tracer,
        }
    }

    pub fn level(&self, kind: HormoneKind) -> u8 {
        self.reservoir(kind).level
    }

    pub fn reservoir(&self, kind: HormoneKind) -> &Reservoir {
        match kind {
            HormoneKind::Insulin => &self.state.insulin,
            HormoneKind::Glucagon => &self.state.glucagon,
        }
    }

    fn reservoir_mut(&mut self, kind: HormoneKind) -> &mut Reservoir {
        match kind {
            HormoneKind::Insulin => &mut self.state.insulin,
            HormoneKind::Glucagon => &mut self.state.glucagon,
        }
    }

    /// Takes `amount` units out of the reservoir and returns how many were
    /// actually available. A short reservoir is emptied, never overdrawn.
    pub fn decrease(&mut self, kind: HormoneKind, amount: u8) -> u8 {
        let reservoir = self.reservoir_mut(kind);
        let actual = if amount <= reservoir.level {
            reservoir.level -= amount;
            amount
        } else {
            let available = reservoir.level;
            reservoir.level = 0;
            available
        };
        let level = reservoir.level;
        let alert = reservoir.alert_level();

        self.state.units_delivered = self.state.units_delivered.saturating_add(u64::from(actual));
        if actual < amount {
            self.state.short_deliveries = self.state.short_deliveries.saturating_add(1);
            self.tracer.log_critical(&format!(
                "{} reservoir too low to inject full dose ({} of {} units)",
                kind, actual, amount
            ));
        }

        self.tracer.notify(Notification::ReservoirLevel { hormone: kind, level });

        match alert {
            Some(Severity::Critical) => self
                .tracer
                .log_critical(&format!("{} reservoir empty! Please refill! ({}%)", kind, level)),
            Some(Severity::Warning) => self
                .tracer
                .log_warning(&format!("{} reservoir nearly empty! Please refill! ({}%)", kind, level)),
            _ => {}
        }

        actual
    }

    pub fn refill(&mut self, kind: HormoneKind) {
        self.reservoir_mut(kind).level = FULL_LEVEL;
        self.tracer.notify(Notification::ReservoirLevel {
            hormone: kind,
            level: FULL_LEVEL,
        });
        self.tracer.log_status(&format!("{} reservoir refilled", kind));
    }

    pub fn set_thresholds(&mut self, warn: u8, crit: u8) -> Result<(), &'static str> {
        if crit > warn || warn > FULL_LEVEL {
            return Err("Reservoir thresholds must satisfy crit <= warn <= 100");
        }
        for kind in HormoneKind::ALL {
            let reservoir = self.reservoir_mut(kind);
            reservoir.warn_threshold = warn;
            reservoir.crit_threshold = crit;
        }
        Ok(())
    }
}

impl Subsystem for ReservoirBank {
    type State = ReservoirState;
    type Command = ReservoirCommand;

    fn execute_command(&mut self, command: Self::Command) -> Result<(), &'static str> {
        match command {
            ReservoirCommand::Refill(kind) => {
                self.refill(kind);
                Ok(())
            }
            ReservoirCommand::SetThresholds { warn, crit } => self.set_thresholds(warn, crit),
        }
    }

    fn get_state(&self) -> Self::State {
        self.state
    }

    fn is_healthy(&self) -> bool {
        HormoneKind::ALL
            .iter()
            .all(|kind| self.reservoir(*kind).alert_level() != Some(Severity::Critical))
    }
}
