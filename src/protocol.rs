use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

use crate::pump::PumpPhase;
use crate::scheduler::SchedulerStatus;
use crate::subsystems::{DoseOrder, HormoneKind};

// Body -> pump: up to three ASCII digits of mg/dL.
pub const GLUCOSE_MESSAGE_MAX_LEN: usize = 3;
pub const MAX_GLUCOSE_READING: u16 = 999;

// Pump -> body: two zero-padded digits of insulin, then two of glucagon.
pub const ACTUATOR_MESSAGE_LEN: usize = 4;
pub const MAX_UNITS_PER_MESSAGE: u8 = 99;

pub const MAX_COMMAND_SIZE: usize = 512;
pub const MAX_RESPONSE_SIZE: usize = 1024;

const_assert!(ACTUATOR_MESSAGE_LEN == 2 * 2);
const_assert!(MAX_GLUCOSE_READING as usize + 1 == 1000);

pub type GlucoseMessage = ArrayString<GLUCOSE_MESSAGE_MAX_LEN>;
pub type ActuatorMessage = ArrayString<ACTUATOR_MESSAGE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("non-digit byte 0x{0:02x} in message")]
    InvalidDigit(u8),
    #[error("message of {len} bytes exceeds {max} bytes")]
    MessageTooLarge { len: usize, max: usize },
    #[error("actuator message must be exactly 4 digits, got {0} bytes")]
    BadActuatorLength(usize),
    #[error("glucose value {0} does not fit the wire format")]
    ReadingOutOfRange(u16),
    #[error("invalid JSON format")]
    InvalidJson,
    #[error("serialization failed")]
    SerializationError,
}

fn strip_terminators(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r' | b'\0' | b' '))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn parse_digits(bytes: &[u8]) -> Result<u16, ProtocolError> {
    bytes.iter().try_fold(0u16, |acc, &b| {
        if b.is_ascii_digit() {
            Ok(acc * 10 + u16::from(b - b'0'))
        } else {
            Err(ProtocolError::InvalidDigit(b))
        }
    })
}

/// Decodes a body-to-pump message. Anything but 1-3 digits (optionally
/// followed by a line terminator) is rejected rather than read as zero.
pub fn parse_glucose_message(bytes: &[u8]) -> Result<u16, ProtocolError> {
    let digits = strip_terminators(bytes);
    if digits.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if digits.len() > GLUCOSE_MESSAGE_MAX_LEN {
        return Err(ProtocolError::MessageTooLarge {
            len: digits.len(),
            max: GLUCOSE_MESSAGE_MAX_LEN,
        });
    }
    parse_digits(digits)
}

pub fn encode_glucose_message(glucose: u16) -> Result<GlucoseMessage, ProtocolError> {
    if glucose > MAX_GLUCOSE_READING {
        return Err(ProtocolError::ReadingOutOfRange(glucose));
    }
    let mut message = GlucoseMessage::new();
    message.push_str(&glucose.to_string());
    Ok(message)
}

/// Encodes the per-cycle actuator message. `None` or zero units encode as
/// `0000`; doses above 99 units are capped.
pub fn encode_actuator_message(order: Option<DoseOrder>) -> ActuatorMessage {
    let (insulin, glucagon) = match order {
        Some(DoseOrder { hormone: HormoneKind::Insulin, units }) => (units, 0),
        Some(DoseOrder { hormone: HormoneKind::Glucagon, units }) => (0, units),
        None => (0, 0),
    };
    let mut message = ActuatorMessage::new();
    message.push_str(&format!(
        "{:02}{:02}",
        insulin.min(MAX_UNITS_PER_MESSAGE),
        glucagon.min(MAX_UNITS_PER_MESSAGE)
    ));
    message
}

/// Units delivered to the body in one actuator message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Injection {
    pub insulin: u8,
    pub glucagon: u8,
}

pub fn parse_actuator_message(bytes: &[u8]) -> Result<Injection, ProtocolError> {
    let digits = strip_terminators(bytes);
    if digits.len() != ACTUATOR_MESSAGE_LEN {
        return Err(ProtocolError::BadActuatorLength(digits.len()));
    }
    // Two digits never exceed 99
    Ok(Injection {
        insulin: parse_digits(&digits[..2])? as u8,
        glucagon: parse_digits(&digits[2..])? as u8,
    })
}

// Control surface: line-delimited JSON between a UI client and the daemon.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub id: u32,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    Status,
    Refill { hormone: HormoneKind },
    RechargeBattery { level: u8 },
    SetTargets { lower: u16, upper: u16 },
    SetLimits { lower: u16, upper: u16 },
    SetAlarms { lower: u16, upper: u16 },
    SetSensitivity { hsf: i32 },
    SetBatteryThresholds { warn: u8, crit: u8 },
    SetReservoirThresholds { warn: u8, crit: u8 },
    SetMaxOperationHours { hours: u32 },
    ResetPump,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    NegativeAck,
    Error,
}

/// Point-in-time view of the pump for `Status` replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpStatus {
    pub phase: PumpPhase,
    pub current_glucose: Option<u16>,
    pub previous_glucose: Option<u16>,
    pub active_hormone: Option<HormoneKind>,
    pub delay: bool,
    pub battery_level: u8,
    pub insulin_level: u8,
    pub glucagon_level: u8,
    pub cycles_completed: u64,
    pub operation_time_ms: u64,
    pub scheduler_status: SchedulerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump: Option<PumpStatus>,
}

impl CommandResponse {
    pub fn success(id: u32, message: Option<&str>) -> Self {
        Self {
            id,
            status: ResponseStatus::Success,
            message: message.map(ToString::to_string),
            pump: None,
        }
    }

    pub fn nack(id: u32, reason: &str) -> Self {
        Self {
            id,
            status: ResponseStatus::NegativeAck,
            message: Some(reason.to_string()),
            pump: None,
        }
    }

    pub fn error(id: u32, reason: &str) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            message: Some(reason.to_string()),
            pump: None,
        }
    }
}

pub fn parse_command(json_str: &str) -> Result<ControlCommand, ProtocolError> {
    if json_str.len() > MAX_COMMAND_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            len: json_str.len(),
            max: MAX_COMMAND_SIZE,
        });
    }
    serde_json::from_str::<ControlCommand>(json_str).map_err(|_| ProtocolError::InvalidJson)
}

pub fn serialize_response(response: &CommandResponse) -> Result<String, ProtocolError> {
    let json_str = serde_json::to_string(response).map_err(|_| ProtocolError::SerializationError)?;
    if json_str.len() > MAX_RESPONSE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            len: json_str.len(),
            max: MAX_RESPONSE_SIZE,
        });
    }
    Ok(json_str)
}
