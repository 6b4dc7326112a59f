//! # Glucopump
//!
//! A closed-loop hormone dosing pump. Once per cycle the pump reads a blood
//! glucose value from a body sensor and decides whether to inject insulin,
//! glucagon or nothing. It then reports the injected units back to the body.
//!
//! ## Features
//!
//! - **Dosing**: threshold ladder with a one-cycle delay after every injection
//! - **Consumables**: two hormone reservoirs and a battery with warning and
//!   critical alerts
//! - **Scheduling**: periodic cycles with a persisted cumulative operation time
//! - **Supervision**: read-only health checks raising deduplicated alerts
//! - **Control surface**: JSON commands with ACK/NACK replies and a stream of
//!   notifications for UI clients
//!
//! ## Quick Start
//!
//! ```rust
//! use glucopump::config::ControlConfig;
//! use glucopump::events::Tracer;
//! use glucopump::link::{MemoryActuatorLink, MemorySensorLink};
//! use glucopump::pump::PumpController;
//!
//! let sensor = MemorySensorLink::new();
//! let actuator = MemoryActuatorLink::new();
//! let mut pump = PumpController::new(
//!     ControlConfig::default(),
//!     Box::new(sensor.clone()),
//!     Box::new(actuator.clone()),
//!     Tracer::silent(),
//! )
//! .unwrap();
//! pump.initialize();
//!
//! sensor.push_reading(120);
//! sensor.push_reading(140);
//! pump.run_cycle().unwrap();
//! let result = pump.run_cycle().unwrap();
//! assert_eq!(result.actual_units, 6);
//! assert_eq!(actuator.last().as_deref(), Some("0600"));
//! ```
//!
//! ## Architecture
//!
//! - [`pump`] - cycle state machine owning reservoirs and battery
//! - [`dosing`] - the pure dosing rule
//! - [`scheduler`] - periodic ticks and operation time accounting
//! - [`health`] - read-only supervision and alerting
//! - [`agent`] - async runtime and control command dispatch
//! - [`protocol`] - sensor, actuator and control wire formats
//! - [`link`] - sensor and actuator transports

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod agent;
pub mod clock;
pub mod config;
pub mod dosing;
pub mod events;
pub mod health;
pub mod link;
pub mod protocol;
pub mod pump;
pub mod scheduler;
pub mod store;
pub mod subsystems;

// Re-export main public types for convenience
pub use agent::PumpAgent;
pub use config::ControlConfig;
pub use events::{Notification, Severity, Tracer};
pub use pump::PumpController;
pub use subsystems::HormoneKind;
