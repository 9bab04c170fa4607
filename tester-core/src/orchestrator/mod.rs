//! Retrying test-run state machine.
//!
//! [`TestOrchestrator`] owns the load banks and the power-cut / test-end
//! signal lines. It never waits on its own: [`TestOrchestrator::advance`]
//! runs every transition that is ready at `now` and returns a [`Directive`]
//! naming the next suspension point. Async runtimes turn that directive into
//! a timer raced against the capture-complete notification; host tooling and
//! tests use [`TestOrchestrator::run`] with a [`RunClock`].

use core::fmt;

use crate::capture::{AttemptFailure, CaptureAccess, TimestampMillis};
use crate::config::{ConfigProvider, TesterSettings};
use crate::kinds::{TestKind, TestPolicy};
use crate::load::{LoadBankController, LoadBankDriver, LoadConfiguration, NoopLoadBankDriver};
use crate::telemetry::{AttemptTelemetry, TelemetryEventKind, TelemetryPayload, TelemetryRecorder};

/// Orchestrator state for the active run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TestState {
    #[default]
    Idle,
    LoadSet,
    PowerCutAsserted,
    AwaitingCapture,
    Validating,
    Retrying,
    Completed,
    Failed,
}

impl TestState {
    /// Returns `true` once the run has produced a verdict.
    pub const fn is_terminal(self) -> bool {
        matches!(self, TestState::Completed | TestState::Failed)
    }
}

/// Caller-visible result of a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestVerdict {
    Passed,
    Failed,
}

/// Terminal reason for a failed run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureCause {
    /// Every permitted attempt was rejected.
    RetriesExhausted,
    /// The overall time budget elapsed before a valid attempt.
    BudgetElapsed,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::RetriesExhausted => f.write_str("retries exhausted"),
            FailureCause::BudgetElapsed => f.write_str("time budget elapsed"),
        }
    }
}

/// Errors returned by the orchestrator control surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunError {
    /// A run is already in progress.
    Busy,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Busy => f.write_str("a test run is already active"),
        }
    }
}

/// Summary produced when a run reaches a terminal state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TestReport {
    pub kind: TestKind,
    pub verdict: TestVerdict,
    /// Attempts started, including the final one.
    pub attempts: u8,
    /// Rejected attempts.
    pub retries: u8,
    pub cause: Option<FailureCause>,
    pub last_failure: Option<AttemptFailure>,
    /// Measurement of the accepted attempt.
    pub measured_ms: Option<u64>,
    pub load: LoadConfiguration,
    pub started_at_ms: TimestampMillis,
    pub finished_at_ms: TimestampMillis,
}

impl TestReport {
    pub const fn passed(&self) -> bool {
        matches!(self.verdict, TestVerdict::Passed)
    }
}

/// Next suspension point requested by [`TestOrchestrator::advance`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Directive {
    /// No run is active.
    Idle,
    /// Wait until the capture completes or `until` is reached.
    AwaitCapture { until: TimestampMillis },
    /// Sleep until `until`.
    Delay { until: TimestampMillis },
    /// The run finished.
    Finished(TestReport),
}

/// Hardware seam for the simulated power cut and the "test end" line.
pub trait TestSignalDriver {
    fn set_power_cut(&mut self, asserted: bool);

    fn set_test_end(&mut self, asserted: bool);
}

/// Signal driver that discards all writes.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTestSignalDriver;

impl NoopTestSignalDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl TestSignalDriver for NoopTestSignalDriver {
    fn set_power_cut(&mut self, _asserted: bool) {}

    fn set_test_end(&mut self, _asserted: bool) {}
}

/// Blocking clock used by [`TestOrchestrator::run`].
pub trait RunClock {
    /// Current monotonic time.
    fn now(&mut self) -> TimestampMillis;

    /// Returns once the capture completes or `until` passes, whichever is
    /// first, and reports the time on return.
    fn wait_for_capture(&mut self, until: TimestampMillis) -> TimestampMillis;

    /// Returns at or after `until`.
    fn delay_until(&mut self, until: TimestampMillis) -> TimestampMillis;
}

#[derive(Copy, Clone, Debug)]
struct ActiveRun {
    state: TestState,
    target_va: u32,
    duration_ms: u64,
    started_at: TimestampMillis,
    /// Capture-window time left in the run budget.
    window_budget_ms: u64,
    attempt_started_at: TimestampMillis,
    attempt_deadline: TimestampMillis,
    validate_at: TimestampMillis,
    pulse_until: Option<TimestampMillis>,
    attempts: u8,
    retries: u8,
    budget_elapsed: bool,
    load: LoadConfiguration,
    measured_ms: Option<u64>,
    last_failure: Option<AttemptFailure>,
    cause: Option<FailureCause>,
}

impl ActiveRun {
    fn attempt_telemetry(&self) -> AttemptTelemetry {
        AttemptTelemetry {
            attempt: self.attempts,
            retries: self.retries,
            measured_ms: self.measured_ms,
        }
    }
}

enum Step {
    Continue,
    Yield(Directive),
}

/// Drives qualification runs against the bench outputs.
pub struct TestOrchestrator<
    L: LoadBankDriver = NoopLoadBankDriver,
    S: TestSignalDriver = NoopTestSignalDriver,
> {
    kind: TestKind,
    settings: TesterSettings,
    loads: LoadBankController<L>,
    signals: S,
    run: Option<ActiveRun>,
    last_report: Option<TestReport>,
}

impl TestOrchestrator {
    /// Creates an orchestrator with no-op hardware drivers.
    pub fn new(kind: TestKind, settings: TesterSettings) -> Self {
        TestOrchestrator::with_drivers(
            kind,
            settings,
            NoopLoadBankDriver::new(),
            NoopTestSignalDriver::new(),
        )
    }
}

impl<L: LoadBankDriver, S: TestSignalDriver> TestOrchestrator<L, S> {
    /// Creates an orchestrator that owns the supplied drivers.
    ///
    /// Both signal lines are released and the load is shed before returning.
    pub fn with_drivers(
        kind: TestKind,
        settings: TesterSettings,
        loads: L,
        mut signals: S,
    ) -> Self {
        signals.set_power_cut(false);
        signals.set_test_end(false);
        Self {
            kind,
            settings,
            loads: LoadBankController::new(loads, settings.hardware.pwm_calibration),
            signals,
            run: None,
            last_report: None,
        }
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn settings(&self) -> &TesterSettings {
        &self.settings
    }

    /// Returns the state of the active run, or `Idle`.
    pub fn state(&self) -> TestState {
        self.run.map_or(TestState::Idle, |run| run.state)
    }

    pub fn is_active(&self) -> bool {
        self.run.is_some()
    }

    /// Number of rejected attempts in the active run.
    pub fn retries(&self) -> u8 {
        self.run.map_or(0, |run| run.retries)
    }

    pub fn last_report(&self) -> Option<&TestReport> {
        self.last_report.as_ref()
    }

    pub fn loads(&self) -> &LoadBankController<L> {
        &self.loads
    }

    pub fn signals(&self) -> &S {
        &self.signals
    }

    /// Reloads settings from `provider`. Rejected while a run is active.
    pub fn apply_settings<P>(&mut self, provider: &P) -> Result<(), RunError>
    where
        P: ConfigProvider + ?Sized,
    {
        if self.run.is_some() {
            return Err(RunError::Busy);
        }
        self.settings = provider.settings();
        self.loads.set_calibration(self.settings.hardware.pwm_calibration);
        Ok(())
    }

    /// Switches the test kind. Rejected while a run is active.
    pub fn set_kind(&mut self, kind: TestKind) -> Result<(), RunError> {
        if self.run.is_some() {
            return Err(RunError::Busy);
        }
        self.kind = kind;
        Ok(())
    }

    /// Starts a run at `target_va`.
    ///
    /// A zero `duration_ms` selects the configured per-attempt duration. The
    /// overall budget is `max(max_retries, 1)` attempt durations of capture
    /// window time; settle and pulse delays are not charged against it.
    pub fn begin<C>(
        &mut self,
        target_va: u32,
        duration_ms: u32,
        capture: &C,
        now: TimestampMillis,
    ) -> Result<(), RunError>
    where
        C: CaptureAccess + ?Sized,
    {
        if self.run.is_some() {
            return Err(RunError::Busy);
        }

        let tuning = self.settings.tuning;
        let duration = if duration_ms == 0 {
            tuning.test_duration_ms
        } else {
            duration_ms
        };
        let duration_ms = u64::from(duration);
        let budget = duration_ms.saturating_mul(u64::from(tuning.max_retries.max(1)));

        capture.with_recorder(|recorder| recorder.reset_capture());

        self.run = Some(ActiveRun {
            state: TestState::Idle,
            target_va,
            duration_ms,
            started_at: now,
            window_budget_ms: budget,
            attempt_started_at: now,
            attempt_deadline: now,
            validate_at: now,
            pulse_until: None,
            attempts: 0,
            retries: 0,
            budget_elapsed: false,
            load: LoadConfiguration::default(),
            measured_ms: None,
            last_failure: None,
            cause: None,
        });
        Ok(())
    }

    /// Runs every transition ready at `now` and names the next wait.
    pub fn advance<C>(
        &mut self,
        capture: &C,
        telemetry: &mut TelemetryRecorder,
        now: TimestampMillis,
    ) -> Directive
    where
        C: CaptureAccess + ?Sized,
    {
        loop {
            match self.step(capture, telemetry, now) {
                Step::Continue => {}
                Step::Yield(directive) => return directive,
            }
        }
    }

    /// Runs a complete test, blocking on `clock` at every suspension point.
    pub fn run<C, K>(
        &mut self,
        target_va: u32,
        duration_ms: u32,
        capture: &C,
        telemetry: &mut TelemetryRecorder,
        clock: &mut K,
    ) -> Result<TestReport, RunError>
    where
        C: CaptureAccess + ?Sized,
        K: RunClock + ?Sized,
    {
        let mut now = clock.now();
        self.begin(target_va, duration_ms, capture, now)?;

        loop {
            match self.advance(capture, telemetry, now) {
                Directive::AwaitCapture { until } => now = clock.wait_for_capture(until),
                Directive::Delay { until } => now = clock.delay_until(until),
                Directive::Finished(report) => return Ok(report),
                // begin() guarantees an active run until Finished.
                Directive::Idle => return Err(RunError::Busy),
            }
        }
    }

    fn step<C>(
        &mut self,
        capture: &C,
        telemetry: &mut TelemetryRecorder,
        now: TimestampMillis,
    ) -> Step
    where
        C: CaptureAccess + ?Sized,
    {
        let Some(run) = self.run else {
            return Step::Yield(Directive::Idle);
        };

        match run.state {
            TestState::Idle => {
                let load = self.loads.set_load(run.target_va, self.settings.spec.rated_va);
                telemetry.record_load(load, now);
                self.update(|run| {
                    run.load = load;
                    run.state = TestState::LoadSet;
                });
                Step::Continue
            }
            TestState::LoadSet | TestState::Retrying if run.window_budget_ms == 0 => {
                self.update(|run| {
                    run.cause = Some(FailureCause::BudgetElapsed);
                    run.state = TestState::Failed;
                });
                Step::Continue
            }
            TestState::LoadSet | TestState::Retrying => {
                self.start_attempt(run, capture, telemetry, now);
                Step::Continue
            }
            TestState::PowerCutAsserted => {
                self.update(|run| run.state = TestState::AwaitingCapture);
                Step::Continue
            }
            TestState::AwaitingCapture => {
                let captured = capture.with_recorder(|recorder| recorder.state().capture_ok);
                if !captured && now < run.attempt_deadline {
                    return Step::Yield(Directive::AwaitCapture {
                        until: run.attempt_deadline,
                    });
                }

                capture.with_recorder(|recorder| recorder.close_window());
                self.signals.set_power_cut(false);
                telemetry.record_attempt(
                    TelemetryEventKind::PowerCutReleased,
                    run.attempt_telemetry(),
                    now,
                );

                let settle = u64::from(self.settings.hardware.settle_delay_ms);
                let used = now.saturating_sub(run.attempt_started_at);
                self.update(|run| {
                    run.window_budget_ms = run.window_budget_ms.saturating_sub(used);
                    run.budget_elapsed = run.window_budget_ms == 0;
                    run.validate_at = now.saturating_add(settle);
                    run.state = TestState::Validating;
                });
                Step::Continue
            }
            TestState::Validating => {
                if now < run.validate_at {
                    return Step::Yield(Directive::Delay {
                        until: run.validate_at,
                    });
                }
                self.validate_attempt(run, capture, telemetry, now);
                Step::Continue
            }
            TestState::Completed => {
                if let Some(until) = run.pulse_until {
                    if now < until {
                        return Step::Yield(Directive::Delay { until });
                    }
                    self.signals.set_test_end(false);
                    self.update(|run| run.pulse_until = None);
                }
                self.finish(TestVerdict::Passed, telemetry, now)
            }
            TestState::Failed => self.finish(TestVerdict::Failed, telemetry, now),
        }
    }

    fn start_attempt<C>(
        &mut self,
        run: ActiveRun,
        capture: &C,
        telemetry: &mut TelemetryRecorder,
        now: TimestampMillis,
    ) where
        C: CaptureAccess + ?Sized,
    {
        let tag = run.load.load;
        capture.with_recorder(|recorder| {
            recorder.begin_attempt(tag);
        });
        self.signals.set_power_cut(true);

        let window = run.duration_ms.min(run.window_budget_ms);
        let attempt_deadline = now.saturating_add(window);
        self.update(|run| {
            run.attempts = run.attempts.saturating_add(1);
            run.attempt_started_at = now;
            run.attempt_deadline = attempt_deadline;
            run.measured_ms = None;
            run.state = TestState::PowerCutAsserted;
        });

        if let Some(run) = self.run {
            telemetry.record(TelemetryEventKind::PowerCutAsserted, TelemetryPayload::None, now);
            telemetry.record_attempt(
                TelemetryEventKind::AttemptStarted,
                run.attempt_telemetry(),
                now,
            );
        }
    }

    fn validate_attempt<C>(
        &mut self,
        run: ActiveRun,
        capture: &C,
        telemetry: &mut TelemetryRecorder,
        now: TimestampMillis,
    ) where
        C: CaptureAccess + ?Sized,
    {
        let kind = self.kind;
        let tuning = self.settings.tuning;
        let outcome = capture.with_recorder(|recorder| {
            recorder.finalize(run.attempts, |record| kind.validate(record, &tuning), now)
        });

        match outcome {
            Ok(measured) => {
                self.signals.set_test_end(true);
                let pulse = u64::from(self.settings.hardware.end_pulse_ms);
                let pulse_until = now.saturating_add(pulse);
                self.update(|run| {
                    run.measured_ms = Some(measured);
                    run.last_failure = None;
                    run.pulse_until = Some(pulse_until);
                    run.state = TestState::Completed;
                });
                if let Some(run) = self.run {
                    telemetry.record_attempt(
                        TelemetryEventKind::CaptureCompleted,
                        run.attempt_telemetry(),
                        now,
                    );
                }
                telemetry.record(TelemetryEventKind::TestEndSignalled, TelemetryPayload::None, now);
            }
            Err(failure) => {
                let max_retries = self.settings.tuning.max_retries;
                self.update(|run| {
                    run.retries = run.retries.saturating_add(1);
                    run.last_failure = Some(failure);
                    if run.retries >= max_retries {
                        run.cause = Some(FailureCause::RetriesExhausted);
                        run.state = TestState::Failed;
                    } else if run.budget_elapsed {
                        run.cause = Some(FailureCause::BudgetElapsed);
                        run.state = TestState::Failed;
                    } else {
                        run.state = TestState::Retrying;
                    }
                });
                if let Some(run) = self.run {
                    telemetry.record_attempt(
                        TelemetryEventKind::AttemptRejected(failure),
                        run.attempt_telemetry(),
                        now,
                    );
                }
            }
        }
    }

    fn finish(
        &mut self,
        verdict: TestVerdict,
        telemetry: &mut TelemetryRecorder,
        now: TimestampMillis,
    ) -> Step {
        let Some(run) = self.run.take() else {
            return Step::Yield(Directive::Idle);
        };

        self.signals.set_power_cut(false);
        self.signals.set_test_end(false);
        self.loads.shed();

        telemetry.record_test_complete(
            self.kind,
            verdict,
            run.attempts,
            run.cause,
            run.started_at,
            now,
        );

        let report = TestReport {
            kind: self.kind,
            verdict,
            attempts: run.attempts,
            retries: run.retries,
            cause: run.cause,
            last_failure: run.last_failure,
            measured_ms: run.measured_ms,
            load: run.load,
            started_at_ms: run.started_at,
            finished_at_ms: now,
        };
        self.last_report = Some(report);
        Step::Yield(Directive::Finished(report))
    }

    fn update(&mut self, f: impl FnOnce(&mut ActiveRun)) {
        if let Some(run) = self.run.as_mut() {
            f(run);
        }
    }
}
