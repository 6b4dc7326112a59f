use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::MAX_GLUCOSE_READING;
use crate::subsystems::FULL_LEVEL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the dosing branches compare the current reading with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Dose while the trend is flat or moving away from range.
    #[default]
    Inclusive,
    /// Dose only while the trend is strictly moving away from range.
    Strict,
}

/// Battery cost charged per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// One unit for sensing, one for the injection mechanism.
    #[default]
    PerCycleAndInjection,
    /// One unit per cycle only.
    PerCycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub hormone_sensitivity_factor: i32,
    pub upper_target: u16,
    pub lower_target: u16,
    pub upper_limit: u16,
    pub lower_limit: u16,
    pub upper_alarm: u16,
    pub lower_alarm: u16,
    /// Highest plausible blood glucose; bounded by the 3-digit sensor message.
    pub abs_max_glucose: u16,
    pub reservoir_warn: u8,
    pub reservoir_crit: u8,
    pub batt_warn: u8,
    pub batt_crit: u8,
    pub max_operation_hours: u32,
    pub scheduler_interval_sec: u64,
    pub controller_interval_sec: u64,

    pub comparison: ComparisonMode,
    pub battery_drain: DrainPolicy,
    pub retry_without_body: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            hormone_sensitivity_factor: 5,
            upper_target: 110,
            lower_target: 90,
            upper_limit: 130,
            lower_limit: 70,
            upper_alarm: 250,
            lower_alarm: 50,
            abs_max_glucose: MAX_GLUCOSE_READING,
            reservoir_warn: 20,
            reservoir_crit: 5,
            batt_warn: 15,
            batt_crit: 10,
            max_operation_hours: 500,
            scheduler_interval_sec: 5,
            controller_interval_sec: 5,
            comparison: ComparisonMode::Inclusive,
            battery_drain: DrainPolicy::PerCycleAndInjection,
            retry_without_body: true,
        }
    }
}

impl ControlConfig {
    /// Reads and validates a JSON configuration file. Missing fields take
    /// their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ControlConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hormone_sensitivity_factor <= 0 {
            return invalid(format!(
                "hormone_sensitivity_factor must be positive, got {}",
                self.hormone_sensitivity_factor
            ));
        }

        let ladder = [
            ("lower_alarm", self.lower_alarm),
            ("lower_limit", self.lower_limit),
            ("lower_target", self.lower_target),
            ("upper_target", self.upper_target),
            ("upper_limit", self.upper_limit),
            ("upper_alarm", self.upper_alarm),
            ("abs_max_glucose", self.abs_max_glucose),
        ];
        for pair in ladder.windows(2) {
            let ((low_name, low), (high_name, high)) = (pair[0], pair[1]);
            if low > high {
                return invalid(format!("{} ({}) exceeds {} ({})", low_name, low, high_name, high));
            }
        }
        if self.lower_target >= self.upper_target {
            return invalid(format!(
                "lower_target ({}) must be below upper_target ({})",
                self.lower_target, self.upper_target
            ));
        }
        if self.abs_max_glucose > MAX_GLUCOSE_READING {
            return invalid(format!(
                "abs_max_glucose ({}) is beyond the sensor range ({})",
                self.abs_max_glucose, MAX_GLUCOSE_READING
            ));
        }

        check_threshold_pair("reservoir", self.reservoir_warn, self.reservoir_crit)?;
        check_threshold_pair("battery", self.batt_warn, self.batt_crit)?;

        if self.max_operation_hours == 0 {
            return invalid("max_operation_hours must be positive".to_string());
        }
        if self.scheduler_interval_sec == 0 || self.controller_interval_sec == 0 {
            return invalid("scheduler and controller intervals must be positive".to_string());
        }

        Ok(())
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_sec)
    }

    pub fn controller_interval(&self) -> Duration {
        Duration::from_secs(self.controller_interval_sec)
    }

    pub fn max_operation_ms(&self) -> u64 {
        u64::from(self.max_operation_hours) * 60 * 60 * 1000
    }

    pub fn set_targets(&mut self, lower: u16, upper: u16) -> Result<(), ConfigError> {
        self.update(|c| {
            c.lower_target = lower;
            c.upper_target = upper;
        })
    }

    pub fn set_limits(&mut self, lower: u16, upper: u16) -> Result<(), ConfigError> {
        self.update(|c| {
            c.lower_limit = lower;
            c.upper_limit = upper;
        })
    }

    pub fn set_alarms(&mut self, lower: u16, upper: u16) -> Result<(), ConfigError> {
        self.update(|c| {
            c.lower_alarm = lower;
            c.upper_alarm = upper;
        })
    }

    pub fn set_hormone_sensitivity_factor(&mut self, hsf: i32) -> Result<(), ConfigError> {
        self.update(|c| c.hormone_sensitivity_factor = hsf)
    }

    pub fn set_reservoir_thresholds(&mut self, warn: u8, crit: u8) -> Result<(), ConfigError> {
        self.update(|c| {
            c.reservoir_warn = warn;
            c.reservoir_crit = crit;
        })
    }

    pub fn set_battery_thresholds(&mut self, warn: u8, crit: u8) -> Result<(), ConfigError> {
        self.update(|c| {
            c.batt_warn = warn;
            c.batt_crit = crit;
        })
    }

    pub fn set_max_operation_hours(&mut self, hours: u32) -> Result<(), ConfigError> {
        self.update(|c| c.max_operation_hours = hours)
    }

    /// Applies `change` to a copy and commits it only if the copy validates.
    fn update(&mut self, change: impl FnOnce(&mut ControlConfig)) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        change(&mut candidate);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }
}

fn check_threshold_pair(name: &str, warn: u8, crit: u8) -> Result<(), ConfigError> {
    if warn > FULL_LEVEL {
        return invalid(format!("{} warning threshold {} exceeds 100", name, warn));
    }
    if crit > warn {
        return invalid(format!(
            "{} critical threshold ({}) exceeds warning threshold ({})",
            name, crit, warn
        ));
    }
    Ok(())
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message))
}
