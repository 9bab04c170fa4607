mod common;

use core::cell::RefCell;

use common::ScriptedBench;
use tester_core::capture::{AttemptFailure, TimeCaptureRecorder};
use tester_core::config::{TestTuning, TesterSettings};
use tester_core::kinds::{TestKind, TestPolicy};
use tester_core::monitor::SenseInput;
use tester_core::orchestrator::{Directive, FailureCause, TestOrchestrator, TestVerdict};
use tester_core::telemetry::{TelemetryEventKind, TelemetryRecorder};

fn settings(max_retries: u8, duration_ms: u32) -> TesterSettings {
    TesterSettings {
        tuning: TestTuning {
            min_valid_switch_time_ms: 1,
            max_valid_switch_time_ms: 3_000,
            test_duration_ms: duration_ms,
            max_retries,
            ..TestTuning::default()
        },
        ..TesterSettings::default()
    }
}

#[test]
fn missing_recovery_edge_exhausts_retries() {
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, settings(3, 200));
    // Mains drops on every attempt but the UPS output never comes back.
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(10, SenseInput::Mains)
        .edge(310, SenseInput::Mains)
        .edge(610, SenseInput::Mains);

    let report = orchestrator
        .run(4_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.verdict, TestVerdict::Failed);
    assert_eq!(report.retries, 3, "retry counter should equal max_retries");
    assert_eq!(report.attempts, 3);
    assert_eq!(report.cause, Some(FailureCause::RetriesExhausted));
    assert_eq!(report.last_failure, Some(AttemptFailure::NoCaptureDetected));

    let recorder = capture.borrow();
    let log = recorder.attempts();
    assert_eq!(log.len(), 3);
    for record in log.iter() {
        assert!(!record.is_valid);
        assert_eq!(record.ended_at_ms, None);
        assert_eq!(record.failure, Some(AttemptFailure::NoCaptureDetected));
    }
    assert_eq!(log.get(0).and_then(|record| record.started_at_ms), Some(10));
    assert!(!recorder.state().capture_running);

    assert_eq!(cut_windows(&telemetry).as_slice(), &[(0, 200), (300, 500), (600, 800)]);
}

/// Power-cut (asserted, released) timestamp pairs, in order.
fn cut_windows(telemetry: &TelemetryRecorder) -> heapless::Vec<(u64, u64), 16> {
    let mut asserted = None;
    let mut windows = heapless::Vec::new();
    for record in telemetry.oldest_first() {
        match record.event {
            TelemetryEventKind::PowerCutAsserted => asserted = Some(record.timestamp_ms),
            TelemetryEventKind::PowerCutReleased => {
                let start = asserted.take().expect("release without assert");
                windows
                    .push((start, record.timestamp_ms))
                    .expect("too many attempts");
            }
            _ => {}
        }
    }
    assert_eq!(asserted, None, "power cut left asserted");
    windows
}

#[test]
fn attempts_never_exceed_retry_bound() {
    for max_retries in 0..=6u8 {
        let capture = RefCell::new(TimeCaptureRecorder::new());
        let mut telemetry = TelemetryRecorder::new();
        let mut orchestrator =
            TestOrchestrator::new(TestKind::SwitchingTime, settings(max_retries, 200));
        let mut bench = ScriptedBench::new(&capture, 0);

        let report = orchestrator
            .run(1_000, 0, &capture, &mut telemetry, &mut bench)
            .expect("run should start");

        assert_eq!(report.verdict, TestVerdict::Failed);
        assert!(
            report.attempts <= max_retries + 1,
            "max_retries={max_retries} produced {} attempts",
            report.attempts
        );
        assert!(report.retries <= max_retries.max(1));
        for (asserted, released) in cut_windows(&telemetry) {
            assert_eq!(
                released - asserted,
                200,
                "max_retries={max_retries} ran a short capture window"
            );
        }
    }
}

#[test]
fn overrunning_windows_exhaust_budget_without_extra_cut() {
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, settings(3, 200));

    orchestrator
        .begin(1_000, 0, &capture, 0)
        .expect("run should start");
    assert_eq!(
        orchestrator.advance(&capture, &mut telemetry, 0),
        Directive::AwaitCapture { until: 200 }
    );

    // Woken 250 ms late: 450 of the 600 ms window budget is gone.
    assert_eq!(
        orchestrator.advance(&capture, &mut telemetry, 450),
        Directive::Delay { until: 550 }
    );
    assert_eq!(
        orchestrator.advance(&capture, &mut telemetry, 550),
        Directive::AwaitCapture { until: 700 }
    );
    assert_eq!(
        orchestrator.advance(&capture, &mut telemetry, 700),
        Directive::Delay { until: 800 }
    );

    let report = match orchestrator.advance(&capture, &mut telemetry, 800) {
        Directive::Finished(report) => report,
        other => panic!("unexpected directive: {other:?}"),
    };
    assert_eq!(report.verdict, TestVerdict::Failed);
    assert_eq!(report.cause, Some(FailureCause::BudgetElapsed));
    assert_eq!(report.attempts, 2);
    assert_eq!(report.retries, 2);
    assert_eq!(cut_windows(&telemetry).as_slice(), &[(0, 450), (550, 700)]);
}

#[test]
fn out_of_range_capture_on_spent_budget_fails_without_cut() {
    let mut config = settings(3, 200);
    config.tuning.max_valid_switch_time_ms = 500;

    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, config);

    orchestrator
        .begin(1_000, 0, &capture, 0)
        .expect("run should start");
    orchestrator.advance(&capture, &mut telemetry, 0);

    // Capture lands exactly as a very late wake spends the whole budget.
    capture.borrow_mut().on_power_loss(0);
    capture.borrow_mut().on_power_restore(600);
    assert_eq!(
        orchestrator.advance(&capture, &mut telemetry, 600),
        Directive::Delay { until: 700 }
    );

    let report = match orchestrator.advance(&capture, &mut telemetry, 700) {
        Directive::Finished(report) => report,
        other => panic!("unexpected directive: {other:?}"),
    };
    assert_eq!(report.cause, Some(FailureCause::BudgetElapsed));
    assert_eq!(report.last_failure, Some(AttemptFailure::OutOfRangeSwitchTime));
    assert_eq!(report.attempts, 1);
    assert_eq!(cut_windows(&telemetry).as_slice(), &[(0, 600)]);
}

#[test]
fn loss_without_recovery_is_not_a_zero_switch_time() {
    let mut config = settings(1, 300);
    config.tuning.min_valid_switch_time_ms = 0;

    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, config);
    let mut bench = ScriptedBench::new(&capture, 0).edge(20, SenseInput::Mains);

    let report = orchestrator
        .run(1_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");

    assert_eq!(report.verdict, TestVerdict::Failed);
    assert_eq!(report.last_failure, Some(AttemptFailure::NoCaptureDetected));
    let record = capture.borrow().attempts().latest().copied().expect("record missing");
    assert_eq!(record.switch_time_ms(), None);
    assert!(!record.is_valid);
}

#[test]
fn recorded_attempts_respect_ordering_and_window() {
    let mut config = settings(4, 2_000);
    config.tuning.max_valid_switch_time_ms = 1_000;
    let window = TestKind::SwitchingTime.acceptance_window(&config.tuning);

    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();
    let mut orchestrator = TestOrchestrator::new(TestKind::SwitchingTime, config);
    // Out of range, then a same-tick restore (0 ms, below minimum), then valid.
    let mut bench = ScriptedBench::new(&capture, 0)
        .edge(100, SenseInput::Mains)
        .edge(1_900, SenseInput::Ups)
        .edge(2_500, SenseInput::Mains)
        .edge(2_500, SenseInput::Ups)
        .edge(3_000, SenseInput::Mains)
        .edge(3_070, SenseInput::Ups);

    let report = orchestrator
        .run(3_000, 0, &capture, &mut telemetry, &mut bench)
        .expect("run should start");
    assert_eq!(report.verdict, TestVerdict::Passed);
    assert_eq!(report.measured_ms, Some(70));
    assert_eq!(report.attempts, 3);

    let recorder = capture.borrow();
    for record in recorder.attempts().iter() {
        if let (Some(start), Some(end)) = (record.started_at_ms, record.ended_at_ms) {
            assert!(end >= start, "end {end} precedes start {start}");
        }
        if record.is_valid {
            let elapsed = record.switch_time_ms().expect("valid record without timestamps");
            assert!(window.contains(elapsed));
        }
    }
}
