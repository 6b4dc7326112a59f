use glucopump::clock::ManualClock;
use glucopump::config::ControlConfig;
use glucopump::events::{Notification, RecordingSink, Tracer};
use glucopump::link::{MemoryActuatorLink, MemorySensorLink};
use glucopump::pump::{PumpController, PumpPhase};
use glucopump::scheduler::*;
use glucopump::store::{JsonFileStore, MemoryStore, OperationTimeStore};
use std::sync::Arc;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(5);

fn pump(sensor: &MemorySensorLink) -> PumpController {
    let mut pump = PumpController::new(
        ControlConfig::default(),
        Box::new(sensor.clone()),
        Box::new(MemoryActuatorLink::new()),
        Tracer::silent(),
    )
    .unwrap();
    pump.initialize();
    pump
}

fn run_ticks(scheduler: &mut Scheduler, pump: &mut PumpController, sensor: &MemorySensorLink, clock: &ManualClock, n: u32) {
    for _ in 0..n {
        sensor.push_reading(100);
        clock.advance(INTERVAL);
        assert!(scheduler.tick(pump));
    }
}

#[test]
fn test_operation_time_grows_by_interval_per_tick() {
    let clock = ManualClock::new();
    let store = MemoryStore::with_total(42_000);
    let mut scheduler =
        Scheduler::new(Box::new(store.clone()), Arc::new(clock.clone()), Tracer::silent(), true).unwrap();
    let sensor = MemorySensorLink::new();
    let mut pump = pump(&sensor);

    run_ticks(&mut scheduler, &mut pump, &sensor, &clock, 12);

    let expected = Duration::from_millis(42_000) + INTERVAL * 12;
    assert_eq!(scheduler.get_operation_time(), expected);
    assert_eq!(store.total_ms(), expected.as_millis() as u64);
    assert_eq!(scheduler.get_stats().successful_ticks, 12);
    assert_eq!(pump.cycles_completed(), 12);
}

#[test]
fn test_operation_time_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("InsulinPump.json");
    let sensor = MemorySensorLink::new();

    {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(
            Box::new(JsonFileStore::new(&path)),
            Arc::new(clock.clone()),
            Tracer::silent(),
            true,
        )
        .unwrap();
        let mut pump = pump(&sensor);
        run_ticks(&mut scheduler, &mut pump, &sensor, &clock, 4);
        scheduler.stop();
    }

    let clock = ManualClock::new();
    clock.set_ms(1_000_000);
    let mut scheduler = Scheduler::new(
        Box::new(JsonFileStore::new(&path)),
        Arc::new(clock.clone()),
        Tracer::silent(),
        true,
    )
    .unwrap();
    assert_eq!(scheduler.get_operation_time(), INTERVAL * 4);

    let mut pump = pump(&sensor);
    run_ticks(&mut scheduler, &mut pump, &sensor, &clock, 2);
    assert_eq!(scheduler.get_operation_time(), INTERVAL * 6);
    assert_eq!(JsonFileStore::new(&path).load().unwrap(), (INTERVAL * 6).as_millis() as u64);
}

#[test]
fn test_tick_publishes_operation_hours() {
    let sink = RecordingSink::new();
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::new(
        Box::new(MemoryStore::with_total(2 * 3_600_000 - 1_000)),
        Arc::new(clock.clone()),
        Tracer::new(Arc::new(sink.clone())),
        true,
    )
    .unwrap();
    let sensor = MemorySensorLink::new();
    let mut pump = pump(&sensor);

    run_ticks(&mut scheduler, &mut pump, &sensor, &clock, 1);
    assert_eq!(scheduler.operation_hours(), 2);
    assert!(sink.snapshot().contains(&Notification::OperationTime { hours: 2 }));
}

#[test]
fn test_missing_body_is_reset_and_retried() {
    let clock = ManualClock::new();
    let mut scheduler =
        Scheduler::new(Box::new(MemoryStore::new()), Arc::new(clock.clone()), Tracer::silent(), true).unwrap();
    let sensor = MemorySensorLink::new();
    let mut pump = pump(&sensor);

    clock.advance(INTERVAL);
    assert!(!scheduler.tick(&mut pump));
    assert_eq!(pump.phase(), PumpPhase::Faulted);
    assert_eq!(scheduler.get_operation_time(), Duration::ZERO);

    run_ticks(&mut scheduler, &mut pump, &sensor, &clock, 1);
    assert_eq!(scheduler.get_stats().automatic_resets, 1);
    assert_eq!(scheduler.get_operation_time(), INTERVAL);
}

#[test]
fn test_missing_body_stays_faulted_without_retry() {
    let clock = ManualClock::new();
    let mut scheduler =
        Scheduler::new(Box::new(MemoryStore::new()), Arc::new(clock.clone()), Tracer::silent(), false).unwrap();
    let sensor = MemorySensorLink::new();
    let mut pump = pump(&sensor);

    clock.advance(INTERVAL);
    assert!(!scheduler.tick(&mut pump));
    sensor.push_reading(100);
    clock.advance(INTERVAL);
    assert!(!scheduler.tick(&mut pump));
    assert_eq!(pump.phase(), PumpPhase::Faulted);
    assert_eq!(scheduler.get_stats().failed_ticks, 2);
    assert_eq!(scheduler.get_stats().automatic_resets, 0);
}

#[test]
fn test_power_failure_is_not_auto_reset() {
    let clock = ManualClock::new();
    let mut scheduler =
        Scheduler::new(Box::new(MemoryStore::new()), Arc::new(clock.clone()), Tracer::silent(), true).unwrap();
    let sensor = MemorySensorLink::new();
    let mut pump = pump(&sensor);

    run_ticks(&mut scheduler, &mut pump, &sensor, &clock, 50);
    sensor.push_reading(100);
    clock.advance(INTERVAL);
    assert!(!scheduler.tick(&mut pump));
    clock.advance(INTERVAL);
    assert!(!scheduler.tick(&mut pump));
    assert_eq!(scheduler.get_stats().automatic_resets, 0);
    assert_eq!(scheduler.get_operation_time(), INTERVAL * 50);
}

#[test]
fn test_corrupt_store_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("InsulinPump.json");
    std::fs::write(&path, "not json").unwrap();
    let result = Scheduler::new(
        Box::new(JsonFileStore::new(&path)),
        Arc::new(ManualClock::new()),
        Tracer::silent(),
        true,
    );
    assert!(result.is_err());
}
