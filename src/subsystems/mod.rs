pub mod battery;
pub mod reservoir;

pub use battery::{BatteryCommand, BatteryModel, BatteryState};
pub use reservoir::{Reservoir, ReservoirBank, ReservoirCommand, ReservoirState};

use serde::{Deserialize, Serialize};

/// Level of a full reservoir or a fully charged battery, in percent.
pub const FULL_LEVEL: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HormoneKind {
    Insulin,
    Glucagon,
}

impl HormoneKind {
    pub const ALL: [HormoneKind; 2] = [HormoneKind::Insulin, HormoneKind::Glucagon];

    pub fn name(self) -> &'static str {
        match self {
            HormoneKind::Insulin => "Insulin",
            HormoneKind::Glucagon => "Glucagon",
        }
    }
}

impl core::fmt::Display for HormoneKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseOrder {
    pub hormone: HormoneKind,
    pub units: u8,
}

/// Common surface of the pump's consumable resources.
pub trait Subsystem {
    type State: Clone + Serialize;
    type Command: Clone;

    fn execute_command(&mut self, command: Self::Command) -> Result<(), &'static str>;
    fn get_state(&self) -> Self::State;
    fn is_healthy(&self) -> bool;
}
