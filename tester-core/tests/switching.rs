mod common;

use core::cell::RefCell;

use common::ScriptedBench;
use tester_core::capture::{AttemptFailure, TimeCaptureRecorder};
use tester_core::config::{TestTuning, TesterSettings};
use tester_core::kinds::{TestKind, TestPolicy};
use tester_core::load::LoadPercentage;
use tester_core::monitor::SenseInput;
use tester_core::orchestrator::{FailureCause, TestOrchestrator, TestVerdict};
use tester_core::telemetry::{TelemetryEventKind, TelemetryRecorder};

fn switching_settings() -> TesterSettings {
    TesterSettings {
        tuning: TestTuning {
            min_valid_switch_time_ms: 1,
            max_valid_switch_time_ms: 3_000,
            ..TestTuning::default()
        },
        ..TesterSettings::default()
    }
}

#[test]
fn switching_time_within_window_passes_on_first_attempt() {
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, switching_settings());
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(1_000, SenseInput::Mains)
        .edge(1_025, SenseInput::Ups);

    let report = orchestrator
        .run(4_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.verdict, TestVerdict::Passed);
    assert_eq!(report.measured_ms, Some(25));
    assert_eq!(report.attempts, 1);
    assert_eq!(report.retries, 0);
    assert_eq!(report.cause, None);
    assert_eq!(report.load.bank_count, 4);

    let recorder = capture.borrow();
    let log = recorder.attempts();
    assert_eq!(log.len(), 1, "exactly one attempt should be recorded");
    let record = log.latest().expect("attempt record missing");
    assert_eq!(record.started_at_ms, Some(1_000));
    assert_eq!(record.ended_at_ms, Some(1_025));
    assert_eq!(record.switch_time_ms(), Some(25));
    assert!(record.is_valid);
    assert_eq!(record.sequence_number, Some(1));
    assert_eq!(record.load, LoadPercentage::P100);
}

#[test]
fn out_of_range_capture_takes_retry_path() {
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, switching_settings());
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(0, SenseInput::Mains)
        .edge(5_000, SenseInput::Ups)
        .edge(6_000, SenseInput::Mains)
        .edge(6_020, SenseInput::Ups);

    let report = orchestrator
        .run(2_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.verdict, TestVerdict::Passed);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.retries, 1);
    assert_eq!(report.measured_ms, Some(20));

    let recorder = capture.borrow();
    let log = recorder.attempts();
    let first = log.get(0).expect("first attempt missing");
    assert_eq!(first.switch_time_ms(), Some(5_000));
    assert!(!first.is_valid);
    assert_eq!(first.failure, Some(AttemptFailure::OutOfRangeSwitchTime));

    let second = log.get(1).expect("second attempt missing");
    assert!(second.is_valid);
    assert_eq!(second.sequence_number, Some(2));

    let rejected = telemetry
        .oldest_first()
        .filter(|record| {
            record.event
                == TelemetryEventKind::AttemptRejected(AttemptFailure::OutOfRangeSwitchTime)
        })
        .count();
    assert_eq!(rejected, 1);
}

#[test]
fn recovery_edge_before_loss_is_ignored() {
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, switching_settings());
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(5, SenseInput::Ups)
        .edge(400, SenseInput::Mains)
        .edge(450, SenseInput::Ups);

    let report = orchestrator
        .run(1_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.verdict, TestVerdict::Passed);
    assert_eq!(report.measured_ms, Some(50));

    let recorder = capture.borrow();
    assert_eq!(recorder.spurious().power_restore, 1);
    let record = recorder.attempts().latest().copied().expect("record missing");
    assert_eq!(record.started_at_ms, Some(400));
    assert_eq!(record.ended_at_ms, Some(450));
}

#[test]
fn bouncing_edges_produce_single_boundaries() {
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, switching_settings());
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(100, SenseInput::Mains)
        .edge(130, SenseInput::Mains)
        .edge(160, SenseInput::Mains)
        .edge(180, SenseInput::Ups)
        .edge(190, SenseInput::Ups);

    let report = orchestrator
        .run(3_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.measured_ms, Some(80));
    assert_eq!(bench.mains.stats().accepted, 1);
    assert_eq!(bench.mains.stats().suppressed, 2);
    assert_eq!(bench.ups.stats().accepted, 1);
    assert_eq!(bench.ups.stats().suppressed, 1);
    assert_eq!(capture.borrow().spurious().power_loss, 0);
}

#[test]
fn backup_time_measures_loss_to_shutdown() {
    let mut settings = switching_settings();
    settings.tuning.min_valid_backup_time_ms = 60_000;
    settings.tuning.max_valid_backup_time_ms = 600_000;

    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::BackupTime, settings);
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(50, SenseInput::Mains)
        .edge(90_050, SenseInput::Ups);

    let report = orchestrator
        .run(2_500, 120_000, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.kind, TestKind::BackupTime);
    assert_eq!(report.verdict, TestVerdict::Passed);
    assert_eq!(report.measured_ms, Some(90_000));
    assert_eq!(report.load.bank_count, 3);
    assert!(
        TestKind::BackupTime
            .acceptance_window(&settings.tuning)
            .contains(90_000)
    );
}

#[test]
fn orchestrator_is_reusable_after_failure() {
    let mut settings = switching_settings();
    settings.tuning.max_retries = 1;

    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, settings);

    let mut silent = ScriptedBench::new(&capture, 0);
    let failed = orchestrator
        .run(500, 300, &capture, &mut telemetry, &mut silent)
        .expect("first run should start");
    assert_eq!(failed.verdict, TestVerdict::Failed);
    assert_eq!(failed.cause, Some(FailureCause::RetriesExhausted));

    let start = failed.finished_at_ms;
    let mut bench = ScriptedBench::new(&capture, start)
        .edge(start + 20, SenseInput::Mains)
        .edge(start + 32, SenseInput::Ups);
    let passed = orchestrator
        .run(500, 300, &capture, &mut telemetry, &mut bench)
        .expect("second run should start");

    assert_eq!(passed.verdict, TestVerdict::Passed);
    assert_eq!(passed.measured_ms, Some(12));
    assert_eq!(capture.borrow().attempts().len(), 2);
}
