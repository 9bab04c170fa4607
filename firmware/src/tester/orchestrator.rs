//! Async driver for [`TestOrchestrator`].
//!
//! Each [`Directive`] becomes a wait: capture windows race the completion
//! signal against the attempt deadline, settle and pulse delays are plain
//! timers. Both edge lines are re-armed for the requested kind before a run
//! begins.

use embassy_futures::select::select;
use embassy_time::{Instant, Timer};
use tester_core::kinds::{TestKind, TestPolicy};
use tester_core::load::LoadBankDriver;
use tester_core::orchestrator::{
    Directive, RunError, TestOrchestrator, TestReport, TestSignalDriver,
};
use tester_core::telemetry::TelemetryRecorder;

use super::{CaptureBus, RequestReceiver, TestRequest};
use crate::monitor::EdgeLine;
use crate::telemetry::{TelemetryMirror, log_report};

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// Owns the orchestrator and serves queued test requests one at a time.
pub struct OrchestratorTask<'a, L: LoadBankDriver, S: TestSignalDriver> {
    orchestrator: TestOrchestrator<L, S>,
    bus: &'a CaptureBus,
    lines: [&'a EdgeLine; 2],
    requests: RequestReceiver<'a>,
    telemetry: &'a mut TelemetryRecorder,
    mirror: TelemetryMirror,
}

impl<'a, L: LoadBankDriver, S: TestSignalDriver> OrchestratorTask<'a, L, S> {
    pub fn new(
        orchestrator: TestOrchestrator<L, S>,
        bus: &'a CaptureBus,
        lines: [&'a EdgeLine; 2],
        requests: RequestReceiver<'a>,
        telemetry: &'a mut TelemetryRecorder,
    ) -> Self {
        Self {
            orchestrator,
            bus,
            lines,
            requests,
            telemetry,
            mirror: TelemetryMirror::new(),
        }
    }

    pub fn orchestrator(&self) -> &TestOrchestrator<L, S> {
        &self.orchestrator
    }

    /// Task body.
    pub async fn serve(mut self) -> ! {
        loop {
            let request = self.requests.receive().await;
            match self.execute(request).await {
                Ok(report) => log_report(&report),
                Err(error) => log_request_rejected(request, error),
            }
        }
    }

    /// Runs one request to completion.
    pub async fn execute(&mut self, request: TestRequest) -> Result<TestReport, RunError> {
        self.orchestrator.set_kind(request.kind)?;
        self.arm_lines(request.kind);
        self.bus.clear_completed();
        self.orchestrator
            .begin(request.target_va, request.duration_ms, self.bus, now_ms())?;
        log_run_started(request);

        loop {
            let directive = self.orchestrator.advance(self.bus, self.telemetry, now_ms());
            self.mirror.flush(self.telemetry);

            match directive {
                Directive::AwaitCapture { until } => {
                    select(
                        self.bus.wait_completed(),
                        Timer::at(Instant::from_millis(until)),
                    )
                    .await;
                }
                Directive::Delay { until } => Timer::at(Instant::from_millis(until)).await,
                Directive::Finished(report) => return Ok(report),
                Directive::Idle => return Err(RunError::Busy),
            }
        }
    }

    /// Applies the kind's edge polarity and the configured debounce window.
    fn arm_lines(&self, kind: TestKind) {
        let profile = kind.interrupt_profile();
        let window = self.orchestrator.settings().hardware.debounce_window_ms;
        for line in self.lines {
            line.configure(window, profile.edge_for(line.input()));
        }
    }
}

#[cfg(target_os = "none")]
fn log_run_started(request: TestRequest) {
    defmt::info!(
        "orchestrator: {} run at {} VA",
        request.kind.label(),
        request.target_va
    );
}

#[cfg(not(target_os = "none"))]
fn log_run_started(request: TestRequest) {
    println!(
        "orchestrator: {} run at {} VA",
        request.kind, request.target_va
    );
}

#[cfg(target_os = "none")]
fn log_request_rejected(request: TestRequest, error: RunError) {
    defmt::warn!(
        "orchestrator: {} request rejected: {}",
        request.kind.label(),
        defmt::Display2Format(&error)
    );
}

#[cfg(not(target_os = "none"))]
fn log_request_rejected(request: TestRequest, error: RunError) {
    println!("orchestrator: {} request rejected: {error}", request.kind);
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::Duration;
    use tester_core::config::{TestTuning, TesterSettings};
    use tester_core::kinds::TestKind;
    use tester_core::monitor::{EdgeKind, SenseInput};
    use tester_core::orchestrator::TestVerdict;

    use super::*;
    use crate::monitor::{EdgeLine, deliver};
    use crate::tester::RequestQueue;

    fn settings() -> TesterSettings {
        TesterSettings {
            tuning: TestTuning {
                min_valid_switch_time_ms: 1,
                max_valid_switch_time_ms: 3_000,
                test_duration_ms: 1_000,
                max_retries: 2,
                ..TestTuning::default()
            },
            ..TesterSettings::default()
        }
    }

    #[test]
    fn edges_during_window_complete_the_run() {
        let bus = CaptureBus::new();
        let queue = RequestQueue::new();
        let mut telemetry = TelemetryRecorder::new();
        let mains = EdgeLine::new(SenseInput::Mains);
        let ups = EdgeLine::new(SenseInput::Ups);
        let mut task = OrchestratorTask::new(
            TestOrchestrator::new(TestKind::SwitchingTime, settings()),
            &bus,
            [&mains, &ups],
            queue.receiver(),
            &mut telemetry,
        );

        let bench = async {
            Timer::after(Duration::from_millis(20)).await;
            mains.on_level_change(false, now_ms());
            deliver(&mains, &bus, now_ms());

            Timer::after(Duration::from_millis(15)).await;
            ups.on_level_change(true, now_ms());
            deliver(&ups, &bus, now_ms());
        };

        let request = TestRequest::new(TestKind::SwitchingTime, 4_000);
        let (result, ()) = block_on(join(task.execute(request), bench));
        let report = result.expect("run should start");

        assert_eq!(report.verdict, TestVerdict::Passed);
        assert_eq!(report.attempts, 1);
        assert!(report.measured_ms.is_some_and(|measured| measured >= 15));
        assert!(!task.orchestrator().is_active());
    }

    #[test]
    fn silent_bench_fails_after_retries() {
        let bus = CaptureBus::new();
        let queue = RequestQueue::new();
        let mut telemetry = TelemetryRecorder::new();
        let mains = EdgeLine::new(SenseInput::Mains);
        let ups = EdgeLine::new(SenseInput::Ups);
        let mut task = OrchestratorTask::new(
            TestOrchestrator::new(TestKind::SwitchingTime, settings()),
            &bus,
            [&mains, &ups],
            queue.receiver(),
            &mut telemetry,
        );

        let request = TestRequest {
            duration_ms: 30,
            ..TestRequest::new(TestKind::BackupTime, 1_000)
        };
        let report = block_on(task.execute(request)).expect("run should start");

        assert_eq!(report.kind, TestKind::BackupTime);
        assert_eq!(report.verdict, TestVerdict::Failed);
        assert!(report.attempts <= 3);
    }

    #[test]
    fn backup_request_rearms_ups_line_for_shutdown() {
        let bus = CaptureBus::new();
        let queue = RequestQueue::new();
        let mut telemetry = TelemetryRecorder::new();
        let mains = EdgeLine::new(SenseInput::Mains);
        let ups = EdgeLine::new(SenseInput::Ups);
        // Armed for switching time at bring-up.
        let boot = TestKind::SwitchingTime.interrupt_profile();
        mains.configure(20, boot.mains);
        ups.configure(20, boot.ups);

        let mut task = OrchestratorTask::new(
            TestOrchestrator::new(TestKind::SwitchingTime, settings()),
            &bus,
            [&mains, &ups],
            queue.receiver(),
            &mut telemetry,
        );

        let bench = async {
            Timer::after(Duration::from_millis(20)).await;
            mains.on_level_change(false, now_ms());
            deliver(&mains, &bus, now_ms());

            // The UPS output drops when its battery runs out.
            Timer::after(Duration::from_millis(40)).await;
            ups.on_level_change(false, now_ms());
            deliver(&ups, &bus, now_ms());
        };

        let request = TestRequest::new(TestKind::BackupTime, 1_000);
        let (result, ()) = block_on(join(task.execute(request), bench));
        let report = result.expect("run should start");

        assert_eq!(ups.gate().polarity(), EdgeKind::Falling);
        assert_eq!(report.kind, TestKind::BackupTime);
        assert_eq!(report.verdict, TestVerdict::Passed);
        assert_eq!(report.attempts, 1);
        assert!(report.measured_ms.is_some_and(|measured| measured >= 40));
    }
}
