//! Test-run telemetry ring shared by firmware and host targets.
//!
//! The orchestrator records every externally visible step of a run (load
//! applied, power cut asserted and released, each attempt's outcome, the end
//! pulse and the final verdict) into a fixed-capacity history so the
//! reporting layer can reconstruct a run after the fact.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::capture::{AttemptFailure, TimestampMillis};
use crate::kinds::TestKind;
use crate::load::LoadConfiguration;
use crate::orchestrator::{FailureCause, TestVerdict};

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Telemetry events emitted during a test run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryEventKind {
    LoadApplied,
    PowerCutAsserted,
    AttemptStarted,
    PowerCutReleased,
    CaptureCompleted,
    AttemptRejected(AttemptFailure),
    TestEndSignalled,
    TestComplete(TestKind),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::LoadApplied => f.write_str("load-applied"),
            TelemetryEventKind::PowerCutAsserted => f.write_str("power-cut-asserted"),
            TelemetryEventKind::AttemptStarted => f.write_str("attempt-started"),
            TelemetryEventKind::PowerCutReleased => f.write_str("power-cut-released"),
            TelemetryEventKind::CaptureCompleted => f.write_str("capture-completed"),
            TelemetryEventKind::AttemptRejected(reason) => write!(f, "attempt-rejected ({reason})"),
            TelemetryEventKind::TestEndSignalled => f.write_str("test-end-signalled"),
            TelemetryEventKind::TestComplete(kind) => write!(f, "test-complete {kind}"),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Load(LoadConfiguration),
    Attempt(AttemptTelemetry),
    Test(TestTelemetry),
}

/// Per-attempt payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AttemptTelemetry {
    /// 1-based attempt number within the run.
    pub attempt: u8,
    pub retries: u8,
    pub measured_ms: Option<u64>,
}

/// End-of-run summary payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TestTelemetry {
    pub verdict: TestVerdict,
    pub attempts: u8,
    pub cause: Option<FailureCause>,
    pub duration_ms: u64,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp_ms: TimestampMillis,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} t={}ms {}", self.id, self.timestamp_ms, self.event)?;
        match self.details {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Load(load) => write!(
                f,
                " banks={} duty={}% pwm={} ({})",
                load.bank_count, load.duty_percent, load.pwm_value, load.load
            ),
            TelemetryPayload::Attempt(attempt) => {
                write!(f, " attempt={} retries={}", attempt.attempt, attempt.retries)?;
                match attempt.measured_ms {
                    Some(measured) => write!(f, " measured={measured}ms"),
                    None => Ok(()),
                }
            }
            TelemetryPayload::Test(test) => {
                write!(
                    f,
                    " verdict={:?} attempts={} elapsed={}ms",
                    test.verdict, test.attempts, test.duration_ms
                )?;
                match test.cause {
                    Some(cause) => write!(f, " cause={cause}"),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing = HistoryBuf<TelemetryRecord, TELEMETRY_RING_CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder {
    ring: TelemetryRing,
    next_event_id: EventId,
}

impl TelemetryRecorder {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp_ms: TimestampMillis,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp_ms,
            event,
            details: payload,
        });

        id
    }

    pub fn record_load(&mut self, load: LoadConfiguration, timestamp_ms: TimestampMillis) -> EventId {
        self.record(
            TelemetryEventKind::LoadApplied,
            TelemetryPayload::Load(load),
            timestamp_ms,
        )
    }

    pub fn record_attempt(
        &mut self,
        event: TelemetryEventKind,
        attempt: AttemptTelemetry,
        timestamp_ms: TimestampMillis,
    ) -> EventId {
        self.record(event, TelemetryPayload::Attempt(attempt), timestamp_ms)
    }

    /// Records the end of a run, deriving its duration from `started_at_ms`.
    pub fn record_test_complete(
        &mut self,
        kind: TestKind,
        verdict: TestVerdict,
        attempts: u8,
        cause: Option<FailureCause>,
        started_at_ms: TimestampMillis,
        timestamp_ms: TimestampMillis,
    ) -> EventId {
        let payload = TelemetryPayload::Test(TestTelemetry {
            verdict,
            attempts,
            cause,
            duration_ms: timestamp_ms.saturating_sub(started_at_ms),
        });
        self.record(TelemetryEventKind::TestComplete(kind), payload, timestamp_ms)
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}
