use glucopump::config::{ControlConfig, DrainPolicy};
use glucopump::events::{Notification, RecordingSink, Severity, Tracer};
use glucopump::link::{ActuatorLink, LinkError, MemoryActuatorLink, MemorySensorLink};
use glucopump::protocol::ActuatorMessage;
use glucopump::pump::*;
use glucopump::HormoneKind;
use std::sync::Arc;

struct Rig {
    pump: PumpController,
    sensor: MemorySensorLink,
    actuator: MemoryActuatorLink,
    sink: RecordingSink,
}

fn rig_with(config: ControlConfig) -> Rig {
    let sensor = MemorySensorLink::new();
    let actuator = MemoryActuatorLink::new();
    let sink = RecordingSink::new();
    let mut pump = PumpController::new(
        config,
        Box::new(sensor.clone()),
        Box::new(actuator.clone()),
        Tracer::new(Arc::new(sink.clone())),
    )
    .unwrap();
    pump.initialize();
    sink.clear();
    Rig { pump, sensor, actuator, sink }
}

fn rig() -> Rig {
    rig_with(ControlConfig::default())
}

#[test]
fn test_cycle_requires_initialization() {
    let mut pump = PumpController::new(
        ControlConfig::default(),
        Box::new(MemorySensorLink::new()),
        Box::new(MemoryActuatorLink::new()),
        Tracer::silent(),
    )
    .unwrap();
    assert_eq!(pump.phase(), PumpPhase::Uninitialized);
    assert!(matches!(pump.run_cycle(), Err(CycleError::NotInitialized)));
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let mut config = ControlConfig::default();
    config.upper_target = 200;
    let result = PumpController::new(
        config,
        Box::new(MemorySensorLink::new()),
        Box::new(MemoryActuatorLink::new()),
        Tracer::silent(),
    );
    assert!(result.is_err());
}

#[test]
fn test_first_cycle_without_body() {
    let mut rig = rig();

    let result = rig.pump.run_cycle();
    assert!(matches!(result, Err(CycleError::NoBodyDetected)));
    assert_eq!(rig.pump.phase(), PumpPhase::Faulted);
    assert_eq!(rig.pump.fault(), Some(FaultCause::NoBodyDetected));

    let state = rig.pump.state();
    assert_eq!(state.current_glucose(), None);
    assert_eq!(state.previous_glucose(), None);
    assert!(!state.delay());
    assert_eq!(rig.pump.reservoir_level(HormoneKind::Insulin), 100);
    assert_eq!(rig.pump.reservoir_level(HormoneKind::Glucagon), 100);
    // The cycle's power cost is paid before sensing
    assert_eq!(rig.pump.battery_level(), 99);

    assert!(rig.actuator.sent().is_empty());
    let critical = rig.sink.log_messages(Severity::Critical);
    assert!(critical.iter().any(|m| m.contains("No body found")));
}

#[test]
fn test_faulted_pump_waits_for_reset() {
    let mut rig = rig();
    assert!(rig.pump.run_cycle().is_err());

    rig.sensor.push_reading(100);
    assert!(matches!(
        rig.pump.run_cycle(),
        Err(CycleError::Faulted(FaultCause::NoBodyDetected))
    ));
    assert_eq!(rig.sensor.pending(), 1);

    assert!(rig.pump.reset());
    assert!(!rig.pump.reset());
    assert!(rig.pump.run_cycle().is_ok());
    assert_eq!(rig.pump.phase(), PumpPhase::Idle);
}

#[test]
fn test_first_reading_serves_as_previous() {
    let mut rig = rig();
    rig.sensor.push_reading(150);

    let result = rig.pump.run_cycle().unwrap();
    assert_eq!(result.glucose, 150);
    assert_eq!(rig.pump.state().previous_glucose(), Some(150));
    // 150 is above the limit and not falling against itself
    assert_eq!(result.hormone, Some(HormoneKind::Insulin));
    assert_eq!(result.actual_units, 8);
}

#[test]
fn test_high_rising_glucose_injects_insulin() {
    let mut rig = rig();
    rig.sensor.push_reading(110);
    rig.sensor.push_reading(230);

    let first = rig.pump.run_cycle().unwrap();
    assert_eq!(first.hormone, None);
    assert_eq!(first.actual_units, 0);

    let second = rig.pump.run_cycle().unwrap();
    assert_eq!(second.hormone, Some(HormoneKind::Insulin));
    assert_eq!(second.requested_units, 24);
    assert_eq!(second.actual_units, 24);

    assert_eq!(rig.pump.reservoir_level(HormoneKind::Insulin), 76);
    assert_eq!(rig.pump.reservoir_level(HormoneKind::Glucagon), 100);
    assert_eq!(rig.actuator.sent(), vec!["0000".to_string(), "2400".to_string()]);
    assert!(rig.pump.state().delay());
    assert_eq!(rig.pump.state().active_hormone(), Some(HormoneKind::Insulin));

    assert!(rig.sink.snapshot().contains(&Notification::Glucose {
        glucose: 230,
        hormone: Some(HormoneKind::Insulin),
        units: 24,
    }));
}

#[test]
fn test_delay_flag_lasts_one_cycle() {
    let mut rig = rig();
    for reading in [110, 230, 240, 245] {
        rig.sensor.push_reading(reading);
    }

    rig.pump.run_cycle().unwrap();
    rig.pump.run_cycle().unwrap();
    assert!(rig.pump.state().delay());

    // Delayed: aim at the previous reading (230), not the target
    let third = rig.pump.run_cycle().unwrap();
    assert_eq!(third.actual_units, 2);
    assert!(rig.pump.state().delay());

    let fourth = rig.pump.run_cycle().unwrap();
    assert_eq!(fourth.actual_units, 1);
}

#[test]
fn test_delay_clears_after_a_cycle_without_dose() {
    let mut rig = rig();
    for reading in [110, 230, 120, 125] {
        rig.sensor.push_reading(reading);
    }
    rig.pump.run_cycle().unwrap();
    rig.pump.run_cycle().unwrap();
    assert!(rig.pump.state().delay());

    let third = rig.pump.run_cycle().unwrap();
    assert_eq!(third.hormone, None);
    assert!(!rig.pump.state().delay());
    assert_eq!(rig.actuator.last().as_deref(), Some("0000"));
}

#[test]
fn test_low_glucose_injects_glucagon() {
    let mut rig = rig();
    rig.sensor.push_reading(75);
    rig.sensor.push_reading(60);
    rig.pump.run_cycle().unwrap();
    let result = rig.pump.run_cycle().unwrap();
    assert_eq!(result.hormone, Some(HormoneKind::Glucagon));
    assert_eq!(result.actual_units, 6);
    assert_eq!(rig.actuator.last().as_deref(), Some("0006"));
    assert_eq!(rig.pump.reservoir_level(HormoneKind::Glucagon), 94);
}

#[test]
fn test_large_dose_is_capped_per_message() {
    let mut config = ControlConfig::default();
    config.hormone_sensitivity_factor = 1;
    let mut rig = rig_with(config);
    rig.sensor.push_reading(900);

    let result = rig.pump.run_cycle().unwrap();
    assert_eq!(result.requested_units, 790);
    assert_eq!(result.actual_units, 99);
    assert_eq!(rig.actuator.last().as_deref(), Some("9900"));
    assert_eq!(rig.pump.reservoir_level(HormoneKind::Insulin), 1);
}

#[test]
fn test_alarm_levels_raise_critical() {
    let mut rig = rig();
    rig.sensor.push_reading(260);
    rig.pump.run_cycle().unwrap();
    let critical = rig.sink.log_messages(Severity::Critical);
    assert!(critical.iter().any(|m| m.contains("High blood sugar")));

    rig.sink.clear();
    rig.sensor.push_reading(45);
    rig.pump.run_cycle().unwrap();
    let critical = rig.sink.log_messages(Severity::Critical);
    assert!(critical.iter().any(|m| m.contains("Low blood sugar")));
}

#[test]
fn test_double_drain_policy_costs_two_per_cycle() {
    let mut rig = rig();
    for _ in 0..3 {
        rig.sensor.push_reading(100);
    }
    for _ in 0..3 {
        rig.pump.run_cycle().unwrap();
    }
    assert_eq!(rig.pump.battery_level(), 94);
}

#[test]
fn test_single_drain_policy_costs_one_per_cycle() {
    let mut config = ControlConfig::default();
    config.battery_drain = DrainPolicy::PerCycle;
    let mut rig = rig_with(config);
    for _ in 0..3 {
        rig.sensor.push_reading(100);
    }
    for _ in 0..3 {
        rig.pump.run_cycle().unwrap();
    }
    assert_eq!(rig.pump.battery_level(), 97);
}

#[test]
fn test_empty_battery_ends_in_power_failure() {
    let mut rig = rig();
    for _ in 0..50 {
        rig.sensor.push_reading(100);
    }
    for _ in 0..50 {
        rig.pump.run_cycle().unwrap();
    }
    assert_eq!(rig.pump.battery_level(), 0);
    rig.sink.clear();

    rig.sensor.push_reading(100);
    assert!(matches!(rig.pump.run_cycle(), Err(CycleError::PowerFailure)));
    assert_eq!(rig.pump.battery_level(), 0);
    assert_eq!(rig.pump.fault(), Some(FaultCause::PowerFailure));
    assert_eq!(rig.sink.log_messages(Severity::Critical).len(), 1);
    // The reading is left for the next cycle
    assert_eq!(rig.sensor.pending(), 1);
}

#[test]
fn test_malformed_reading_is_a_sensor_fault() {
    let mut rig = rig();
    rig.sensor.push_raw(b"1x0");
    assert!(matches!(rig.pump.run_cycle(), Err(CycleError::SensorFault(_))));
    assert_eq!(rig.pump.fault(), Some(FaultCause::SensorFault));
    assert_eq!(rig.pump.state().current_glucose(), None);
}

#[test]
fn test_reservoir_threshold_update_reaches_bank() {
    let mut rig = rig();
    rig.pump.set_reservoir_thresholds(40, 15).unwrap();
    assert_eq!(rig.pump.config().reservoir_warn, 40);
    assert_eq!(
        rig.pump.state().reservoirs().reservoir(HormoneKind::Insulin).warn_threshold,
        40
    );
    assert!(rig.pump.set_reservoir_thresholds(10, 15).is_err());
    assert_eq!(rig.pump.config().reservoir_warn, 40);
}

#[test]
fn test_config_update_applies_to_next_cycle() {
    let mut rig = rig();
    rig.pump
        .update_config(|c| c.set_hormone_sensitivity_factor(10))
        .unwrap();
    rig.sensor.push_reading(230);
    let result = rig.pump.run_cycle().unwrap();
    assert_eq!(result.actual_units, 12);

    assert!(rig.pump.update_config(|c| c.set_targets(120, 100)).is_err());
    assert_eq!(rig.pump.config().upper_target, 110);
}

struct UnpluggedActuator;

impl ActuatorLink for UnpluggedActuator {
    fn send(&mut self, _message: &ActuatorMessage) -> Result<(), LinkError> {
        Err(LinkError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe gone",
        )))
    }
}

#[test]
fn test_undelivered_dose_is_not_committed() {
    let sensor = MemorySensorLink::new();
    let sink = RecordingSink::new();
    let mut pump = PumpController::new(
        ControlConfig::default(),
        Box::new(sensor.clone()),
        Box::new(UnpluggedActuator),
        Tracer::new(Arc::new(sink.clone())),
    )
    .unwrap();
    pump.initialize();
    sensor.push_reading(230);

    assert!(matches!(pump.run_cycle(), Err(CycleError::ActuatorFault(_))));
    assert_eq!(pump.phase(), PumpPhase::Faulted);
    assert_eq!(pump.fault(), Some(FaultCause::ActuatorFault));

    // Only the sensing cost is paid; no hormone leaves the pump
    assert_eq!(pump.reservoir_level(HormoneKind::Insulin), 100);
    assert_eq!(pump.battery_level(), 99);
    assert!(!pump.state().delay());
    assert_eq!(pump.cycles_completed(), 0);
    assert!(!sink.snapshot().iter().any(|n| matches!(n, Notification::Glucose { .. })));
    let critical = sink.log_messages(Severity::Critical);
    assert!(critical.iter().any(|m| m.contains("Could not deliver dose message 2400")));
}

#[test]
fn test_config_closure_keeps_bank_thresholds_in_step() {
    let mut rig = rig();
    rig.pump
        .update_config(|c| c.set_reservoir_thresholds(95, 30))
        .unwrap();
    let insulin = rig.pump.state().reservoirs().reservoir(HormoneKind::Insulin);
    assert_eq!(insulin.warn_threshold, 95);
    assert_eq!(insulin.crit_threshold, 30);

    rig.sensor.push_reading(150);
    rig.pump.run_cycle().unwrap();
    assert_eq!(rig.pump.reservoir_level(HormoneKind::Insulin), 92);
    let warnings = rig.sink.log_messages(Severity::Warning);
    assert!(warnings.iter().any(|m| m.contains("Insulin reservoir nearly empty")));
}
