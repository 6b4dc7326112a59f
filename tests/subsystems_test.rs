use glucopump::events::{Notification, RecordingSink, Severity, Tracer};
use glucopump::subsystems::*;
use std::sync::Arc;

fn recording() -> (RecordingSink, Tracer) {
    let sink = RecordingSink::new();
    let tracer = Tracer::new(Arc::new(sink.clone()));
    (sink, tracer)
}

#[test]
fn test_battery_starts_full() {
    let battery = BatteryModel::new(Tracer::silent());
    assert_eq!(battery.level(), FULL_LEVEL);
    assert!(battery.is_healthy());
}

#[test]
fn test_battery_drain_reduces_by_exact_amount() {
    let mut battery = BatteryModel::new(Tracer::silent());
    for amount in [1u8, 7, 30, 62] {
        let before = battery.level();
        assert!(battery.drain(amount));
        assert_eq!(battery.level(), before - amount);
    }
    assert_eq!(battery.level(), 0);
    assert!(!battery.is_healthy());
}

#[test]
fn test_battery_overdrain_is_refused() {
    let (sink, tracer) = recording();
    let mut battery = BatteryModel::new(tracer);
    assert!(battery.drain(95));
    sink.clear();

    assert!(!battery.drain(6));
    assert_eq!(battery.level(), 5);
    assert_eq!(sink.log_messages(Severity::Critical).len(), 1);
}

#[test]
fn test_empty_battery_refuses_drain() {
    let (sink, tracer) = recording();
    let mut battery = BatteryModel::new(tracer);
    assert!(battery.drain(100));
    sink.clear();

    assert!(!battery.drain(1));
    assert_eq!(battery.level(), 0);
    let critical = sink.log_messages(Severity::Critical);
    assert_eq!(critical.len(), 1);
    assert!(critical[0].contains("Power drainage too high"));
}

#[test]
fn test_battery_commands() {
    let mut battery = BatteryModel::new(Tracer::silent());
    assert!(battery.execute_command(BatteryCommand::Drain(40)).is_ok());
    assert!(battery.execute_command(BatteryCommand::Recharge(20)).is_err());
    assert!(battery.execute_command(BatteryCommand::Recharge(100)).is_ok());
    assert_eq!(battery.get_state().level_percent, 100);
    assert_eq!(battery.get_state().rejected_requests, 1);
}

#[test]
fn test_short_reservoir_delivers_what_is_left() {
    let (sink, tracer) = recording();
    let mut bank = ReservoirBank::new(20, 5, tracer);
    assert_eq!(bank.decrease(HormoneKind::Insulin, 90), 90);
    assert_eq!(bank.level(HormoneKind::Insulin), 10);
    sink.clear();

    assert_eq!(bank.decrease(HormoneKind::Insulin, 24), 10);
    assert_eq!(bank.level(HormoneKind::Insulin), 0);
    assert_eq!(bank.level(HormoneKind::Glucagon), FULL_LEVEL);

    let critical = sink.log_messages(Severity::Critical);
    assert!(critical.iter().any(|m| m.contains("too low to inject full dose")));
    assert!(sink
        .snapshot()
        .contains(&Notification::ReservoirLevel { hormone: HormoneKind::Insulin, level: 0 }));
    assert_eq!(bank.get_state().short_deliveries, 1);
    assert_eq!(bank.get_state().units_delivered, 100);
}

#[test]
fn test_reservoir_never_goes_below_zero() {
    let mut bank = ReservoirBank::new(20, 5, Tracer::silent());
    for _ in 0..5 {
        bank.decrease(HormoneKind::Glucagon, 99);
    }
    assert_eq!(bank.level(HormoneKind::Glucagon), 0);
    assert_eq!(bank.decrease(HormoneKind::Glucagon, 1), 0);
}

#[test]
fn test_reservoir_threshold_alerts() {
    let (sink, tracer) = recording();
    let mut bank = ReservoirBank::new(20, 5, tracer);

    bank.decrease(HormoneKind::Insulin, 79);
    assert!(sink.log_messages(Severity::Warning).is_empty());

    bank.decrease(HormoneKind::Insulin, 1);
    assert_eq!(bank.reservoir(HormoneKind::Insulin).alert_level(), Some(Severity::Warning));
    assert_eq!(sink.log_messages(Severity::Warning).len(), 1);

    bank.decrease(HormoneKind::Insulin, 15);
    assert_eq!(bank.reservoir(HormoneKind::Insulin).alert_level(), Some(Severity::Critical));
    assert_eq!(sink.log_messages(Severity::Critical).len(), 1);
    assert!(!bank.is_healthy());
}

#[test]
fn test_double_refill_is_harmless() {
    let (sink, tracer) = recording();
    let mut bank = ReservoirBank::new(20, 5, tracer);
    bank.decrease(HormoneKind::Glucagon, 50);

    bank.refill(HormoneKind::Glucagon);
    assert_eq!(bank.level(HormoneKind::Glucagon), FULL_LEVEL);
    bank.refill(HormoneKind::Glucagon);
    assert_eq!(bank.level(HormoneKind::Glucagon), FULL_LEVEL);

    assert_eq!(sink.log_messages(Severity::Status).len(), 2);
    assert!(sink.log_messages(Severity::Critical).is_empty());
}

#[test]
fn test_reservoir_threshold_command_validation() {
    let mut bank = ReservoirBank::new(20, 5, Tracer::silent());
    assert!(bank
        .execute_command(ReservoirCommand::SetThresholds { warn: 5, crit: 20 })
        .is_err());
    assert!(bank
        .execute_command(ReservoirCommand::SetThresholds { warn: 30, crit: 10 })
        .is_ok());
    assert_eq!(bank.reservoir(HormoneKind::Insulin).warn_threshold, 30);
    assert_eq!(bank.reservoir(HormoneKind::Glucagon).crit_threshold, 10);

    bank.execute_command(ReservoirCommand::Refill(HormoneKind::Insulin)).unwrap();
    assert_eq!(bank.get_state().insulin.level, FULL_LEVEL);
}
