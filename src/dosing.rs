//! Dose-size arithmetic and the insulin/glucagon branch decision.
//!
//! Everything here is pure: the pump controller feeds in the current and
//! previous readings and gets back which hormone to give and how much.

use crate::config::{ComparisonMode, ControlConfig};
use crate::subsystems::HormoneKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DosingError {
    #[error("invalid configuration: hormone sensitivity factor must be positive, got {0}")]
    InvalidConfiguration(i32),
}

/// `ceil(|current - target| / sensitivity)` fictional units.
pub fn needed_units(current: u16, target: u16, sensitivity: i32) -> Result<u32, DosingError> {
    if sensitivity <= 0 {
        return Err(DosingError::InvalidConfiguration(sensitivity));
    }
    let difference = u32::from(current.abs_diff(target));
    let sensitivity = sensitivity.unsigned_abs();
    Ok(difference.div_ceil(sensitivity))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosingDecision {
    pub hormone: Option<HormoneKind>,
    pub target: Option<u16>,
    pub units: u32,
}

impl DosingDecision {
    pub const NONE: DosingDecision = DosingDecision {
        hormone: None,
        target: None,
        units: 0,
    };

    pub fn injects(&self) -> bool {
        self.hormone.is_some() && self.units > 0
    }
}

/// Picks the dosing branch for this cycle.
///
/// Insulin is given while glucose sits above `upper_limit` and is not falling,
/// glucagon while it sits below `lower_limit` and is not rising. With
/// `delayed` set the previous dose has not shown up in the reading yet, so the
/// correction only aims back at the previous reading instead of the target.
pub fn decide(
    current: u16,
    previous: u16,
    delayed: bool,
    config: &ControlConfig,
) -> Result<DosingDecision, DosingError> {
    let not_falling = match config.comparison {
        ComparisonMode::Inclusive => current >= previous,
        ComparisonMode::Strict => current > previous,
    };
    let not_rising = match config.comparison {
        ComparisonMode::Inclusive => current <= previous,
        ComparisonMode::Strict => current < previous,
    };

    let (hormone, static_target) = if current > config.upper_limit && not_falling {
        (HormoneKind::Insulin, config.upper_target)
    } else if current < config.lower_limit && not_rising {
        (HormoneKind::Glucagon, config.lower_target)
    } else {
        return Ok(DosingDecision::NONE);
    };

    let target = if delayed { previous } else { static_target };
    let units = needed_units(current, target, config.hormone_sensitivity_factor)?;

    Ok(DosingDecision {
        hormone: Some(hormone),
        target: Some(target),
        units,
    })
}
