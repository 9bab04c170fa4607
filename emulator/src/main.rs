mod bench;

use std::cell::RefCell;
use std::env;
use std::io::{self, Write};
use std::process;

use bench::{Bench, BenchClock, BenchLoads, BenchSignals, UpsProfile};
use tester_core::capture::{AttemptFailure, TestAttemptRecord, TimeCaptureRecorder};
use tester_core::config::{ConfigProvider, TestTuning, TesterSettings};
use tester_core::kinds::TestKind;
use tester_core::orchestrator::{RunError, TestOrchestrator, TestReport};
use tester_core::telemetry::TelemetryRecorder;

/// Everything a simulated run produced.
pub struct RunOutput {
    pub report: TestReport,
    pub transcript: Vec<String>,
    pub telemetry: Vec<String>,
    pub attempts: Vec<TestAttemptRecord>,
}

fn main() -> io::Result<()> {
    let profile = parse_profile().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: tester-emulator [--profile <pass|timeout|out-of-range|bounce|backup>]"
        );
        process::exit(2);
    });

    let output = match simulate(profile, &bench_settings()) {
        Ok(output) => output,
        Err(error) => {
            eprintln!("run rejected: {error}");
            process::exit(1);
        }
    };

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "UPS tester emulator: {} profile ({})",
        profile_tag(profile),
        profile.kind()
    )?;
    for line in &output.transcript {
        writeln!(writer, "{line}")?;
    }

    writeln!(writer)?;
    writeln!(writer, "Telemetry:")?;
    for line in &output.telemetry {
        writeln!(writer, "  {line}")?;
    }

    writeln!(writer)?;
    writeln!(writer, "Attempt log:")?;
    for (slot, record) in output.attempts.iter().enumerate() {
        writeln!(writer, "  {}", describe_attempt(slot, record))?;
    }

    writeln!(writer)?;
    let report = output.report;
    match report.measured_ms {
        Some(measured) if report.passed() => writeln!(
            writer,
            "PASSED: {measured} ms after {} attempt(s)",
            report.attempts
        )?,
        _ => writeln!(
            writer,
            "FAILED: {} after {} attempt(s)",
            report
                .cause
                .map_or_else(|| "unknown".to_string(), |cause| cause.to_string()),
            report.attempts
        )?,
    }

    Ok(())
}

/// Bench tuning: a 3 s switching window so slow transfers are rejected
/// before the attempt times out.
pub fn bench_settings() -> TesterSettings {
    TesterSettings {
        tuning: TestTuning {
            min_valid_switch_time_ms: 1,
            max_valid_switch_time_ms: 3_000,
            ..TestTuning::default()
        },
        ..TesterSettings::default()
    }
}

/// Runs one test against the simulated UPS.
pub fn simulate<P>(profile: UpsProfile, provider: &P) -> Result<RunOutput, RunError>
where
    P: ConfigProvider + ?Sized,
{
    let settings = provider.settings();
    let kind = profile.kind();
    let bench = Bench::new(profile);
    let capture = RefCell::new(TimeCaptureRecorder::new());
    let mut telemetry = TelemetryRecorder::new();

    let mut orchestrator = TestOrchestrator::with_drivers(
        kind,
        settings,
        BenchLoads::new(bench.clone()),
        BenchSignals::new(bench.clone()),
    );
    let mut clock = BenchClock::new(bench.clone(), &capture, kind, &settings.hardware);

    let duration_ms = if kind == TestKind::BackupTime {
        120_000
    } else {
        0
    };
    let report = orchestrator.run(
        settings.spec.rated_va * 3 / 4,
        duration_ms,
        &capture,
        &mut telemetry,
        &mut clock,
    )?;

    let attempts = capture.borrow().attempts().to_vec();
    Ok(RunOutput {
        report,
        transcript: bench.transcript(),
        telemetry: telemetry.oldest_first().map(ToString::to_string).collect(),
        attempts,
    })
}

fn describe_attempt(slot: usize, record: &TestAttemptRecord) -> String {
    let measured = record
        .switch_time_ms()
        .map_or_else(|| "-".to_string(), |ms| format!("{ms} ms"));
    let verdict = match (record.is_valid, record.failure) {
        (true, _) => "valid".to_string(),
        (false, Some(AttemptFailure::NoCaptureDetected)) => "no capture".to_string(),
        (false, Some(failure)) => failure.to_string(),
        (false, None) => "pending".to_string(),
    };
    format!(
        "#{} load={} measured={measured} {verdict}",
        slot + 1,
        record.load
    )
}

fn profile_tag(profile: UpsProfile) -> &'static str {
    match profile {
        UpsProfile::Pass => "pass",
        UpsProfile::Timeout => "timeout",
        UpsProfile::OutOfRange => "out-of-range",
        UpsProfile::Bounce => "bounce",
        UpsProfile::Backup => "backup",
    }
}

fn parse_profile() -> Result<UpsProfile, String> {
    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            UpsProfile::from_tag(value)
        } else if arg == "--profile" {
            if let Some(value) = args.next() {
                UpsProfile::from_tag(&value)
            } else {
                Err("Expected value after --profile".to_string())
            }
        } else {
            UpsProfile::from_tag(&arg)
        }
    } else {
        Ok(UpsProfile::Pass)
    }
}
