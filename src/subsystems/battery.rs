use super::{Subsystem, FULL_LEVEL};
use crate::events::{Notification, Tracer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryState {
    pub level_percent: u8,
    pub rejected_requests: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum BatteryCommand {
    Drain(u8),
    Recharge(u8),
}

/// Power budget of the pump. Requests that would leave `[0, 100]` are
/// rejected and logged, never clamped.
#[derive(Debug)]
pub struct BatteryModel {
    state: BatteryState,
    tracer: Tracer,
}

impl BatteryModel {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            state: BatteryState {
                level_percent: FULL_LEVEL,
                rejected_requests: 0,
            },
            tracer,
        }
    }

    pub fn level(&self) -> u8 {
        self.state.level_percent
    }

    pub fn drain(&mut self, amount: u8) -> bool {
        if amount == 0 || amount > self.state.level_percent {
            self.reject(&format!(
                "Power drainage too high! Requested {} with {}% left",
                amount, self.state.level_percent
            ));
            return false;
        }

        self.state.level_percent -= amount;
        self.publish();
        true
    }

    /// Sets the level to `amount`; a recharge may never lower the level.
    pub fn recharge(&mut self, amount: u8) -> bool {
        if amount < self.state.level_percent || amount > FULL_LEVEL {
            self.reject(&format!(
                "Battery not charged! Recharge to {}% rejected at {}%",
                amount, self.state.level_percent
            ));
            return false;
        }

        self.state.level_percent = amount;
        self.publish();
        true
    }

    fn reject(&mut self, message: &str) {
        self.state.rejected_requests = self.state.rejected_requests.saturating_add(1);
        self.tracer.log_critical(message);
    }

    fn publish(&self) {
        debug_assert!(
            self.state.level_percent <= FULL_LEVEL,
            "Battery level {} exceeds {}%",
            self.state.level_percent,
            FULL_LEVEL
        );
        self.tracer.notify(Notification::BatteryLevel {
            level: self.state.level_percent,
        });
    }
}

impl Subsystem for BatteryModel {
    type State = BatteryState;
    type Command = BatteryCommand;

    fn execute_command(&mut self, command: Self::Command) -> Result<(), &'static str> {
        let accepted = match command {
            BatteryCommand::Drain(amount) => self.drain(amount),
            BatteryCommand::Recharge(level) => self.recharge(level),
        };
        if accepted {
            Ok(())
        } else {
            Err("Battery request out of range")
        }
    }

    fn get_state(&self) -> Self::State {
        self.state
    }

    fn is_healthy(&self) -> bool {
        self.state.level_percent > 0
    }
}
