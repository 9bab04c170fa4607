//! Console mirror for the orchestrator's telemetry ring.
//!
//! The ring itself lives in `tester-core`; this module forwards each new
//! record to defmt on the MCU and to stdout on the host exactly once.

use tester_core::orchestrator::TestReport;
use tester_core::telemetry::{EventId, TelemetryPayload, TelemetryRecord, TelemetryRecorder};

/// Tracks which telemetry records have already been logged.
#[derive(Copy, Clone, Debug, Default)]
pub struct TelemetryMirror {
    next_id: EventId,
}

impl TelemetryMirror {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Logs every record newer than the last flush and returns how many
    /// were emitted.
    pub fn flush(&mut self, telemetry: &TelemetryRecorder) -> usize {
        let mut emitted = 0;
        for record in telemetry.oldest_first() {
            if record.id < self.next_id {
                continue;
            }
            emit_record(record);
            self.next_id = record.id.wrapping_add(1);
            emitted += 1;
        }
        emitted
    }
}

#[cfg(target_os = "none")]
fn record_fields(record: &TelemetryRecord) -> (Option<u8>, Option<u64>) {
    match record.details {
        TelemetryPayload::Attempt(attempt) => (Some(attempt.attempt), attempt.measured_ms),
        TelemetryPayload::Load(load) => (Some(load.bank_count), None),
        TelemetryPayload::Test(test) => (Some(test.attempts), Some(test.duration_ms)),
        TelemetryPayload::None => (None, None),
    }
}

#[cfg(target_os = "none")]
fn emit_record(record: &TelemetryRecord) {
    let (count, millis) = record_fields(record);
    let event = defmt::Display2Format(&record.event);
    match (count, millis) {
        (Some(count), Some(millis)) => defmt::info!(
            "telemetry:#{} {} n={} ms={} t={}ms",
            record.id,
            event,
            count,
            millis,
            record.timestamp_ms
        ),
        (Some(count), None) => defmt::info!(
            "telemetry:#{} {} n={} t={}ms",
            record.id,
            event,
            count,
            record.timestamp_ms
        ),
        _ => defmt::info!(
            "telemetry:#{} {} t={}ms",
            record.id,
            event,
            record.timestamp_ms
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &TelemetryRecord) {
    println!("telemetry:{record}");
}

#[cfg(target_os = "none")]
pub fn log_report(report: &TestReport) {
    match (report.passed(), report.measured_ms) {
        (true, Some(measured)) => defmt::info!(
            "tester: {} passed in {} attempt(s), measured {} ms",
            report.kind.label(),
            report.attempts,
            measured
        ),
        _ => defmt::error!(
            "tester: {} failed after {} attempt(s) ({} rejected)",
            report.kind.label(),
            report.attempts,
            report.retries
        ),
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_report(report: &TestReport) {
    match (report.passed(), report.measured_ms) {
        (true, Some(measured)) => println!(
            "tester: {} passed in {} attempt(s), measured {} ms",
            report.kind, report.attempts, measured
        ),
        _ => println!(
            "tester: {} failed after {} attempt(s) ({} rejected)",
            report.kind, report.attempts, report.retries
        ),
    }
}
