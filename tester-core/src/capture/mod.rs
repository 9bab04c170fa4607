//! Attempt ring and capture-boundary bookkeeping.
//!
//! [`TimeCaptureRecorder`] is shared between the orchestrator and the two
//! monitor tasks. Monitor callbacks only stamp timestamps and flip flags; the
//! orchestrator arms, closes and finalizes attempts. Every access goes through
//! a [`CaptureAccess`] guard so a read-and-reset never interleaves with a
//! boundary callback.

use core::cell::RefCell;
use core::fmt;

use crate::load::LoadPercentage;

/// Number of attempt records retained for reporting.
pub const ATTEMPT_RING_CAPACITY: usize = 5;

/// Monotonic millisecond clock reading.
pub type TimestampMillis = u64;

/// Reasons a single attempt did not produce a valid measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttemptFailure {
    /// The capture window closed without a complete start/end pair.
    NoCaptureDetected,
    /// A capture completed but fell outside the acceptance window.
    OutOfRangeSwitchTime,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::NoCaptureDetected => f.write_str("no capture detected"),
            AttemptFailure::OutOfRangeSwitchTime => f.write_str("measured time out of range"),
        }
    }
}

/// Inclusive range of accepted measurements, in milliseconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AcceptanceWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl AcceptanceWindow {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn contains(&self, value_ms: u64) -> bool {
        value_ms >= self.min_ms && value_ms <= self.max_ms
    }

    /// Classifies a record against the window.
    pub fn check(&self, record: &TestAttemptRecord) -> Result<u64, AttemptFailure> {
        let elapsed = record
            .switch_time_ms()
            .ok_or(AttemptFailure::NoCaptureDetected)?;

        if self.contains(elapsed) {
            Ok(elapsed)
        } else {
            Err(AttemptFailure::OutOfRangeSwitchTime)
        }
    }
}

/// One slot of the attempt ring.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TestAttemptRecord {
    /// 1-based attempt number within its run, set only for valid attempts.
    pub sequence_number: Option<u8>,
    pub started_at_ms: Option<TimestampMillis>,
    pub ended_at_ms: Option<TimestampMillis>,
    pub is_valid: bool,
    pub validated_at_ms: Option<TimestampMillis>,
    pub load: LoadPercentage,
    pub failure: Option<AttemptFailure>,
}

impl TestAttemptRecord {
    pub const EMPTY: Self = Self {
        sequence_number: None,
        started_at_ms: None,
        ended_at_ms: None,
        is_valid: false,
        validated_at_ms: None,
        load: LoadPercentage::P0,
        failure: None,
    };

    /// Elapsed time between the captured boundaries, once both exist.
    pub fn switch_time_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.ended_at_ms) {
            (Some(start), Some(end)) => end.checked_sub(start),
            _ => None,
        }
    }
}

/// Flags shared between the orchestrator and the monitor callbacks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CaptureState {
    pub capture_running: bool,
    pub capture_ok: bool,
    pub current_attempt_index: usize,
    /// Set while an attempt window is open.
    pub armed: bool,
}

/// Result of delivering a boundary edge to the recorder.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CaptureEdge {
    Started,
    Completed,
    Ignored,
}

/// Counts of boundary callbacks that arrived in a state where they meant nothing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SpuriousEdgeCounters {
    pub power_loss: u32,
    pub power_restore: u32,
}

/// Ring of attempt records plus the live capture flags.
#[derive(Clone, Debug)]
pub struct TimeCaptureRecorder {
    records: [TestAttemptRecord; ATTEMPT_RING_CAPACITY],
    state: CaptureState,
    next_index: usize,
    written: usize,
    spurious: SpuriousEdgeCounters,
}

impl TimeCaptureRecorder {
    pub const fn new() -> Self {
        Self {
            records: [TestAttemptRecord::EMPTY; ATTEMPT_RING_CAPACITY],
            state: CaptureState {
                capture_running: false,
                capture_ok: false,
                current_attempt_index: 0,
                armed: false,
            },
            next_index: 0,
            written: 0,
            spurious: SpuriousEdgeCounters {
                power_loss: 0,
                power_restore: 0,
            },
        }
    }

    /// Empties the ring and clears every flag and counter.
    pub fn reset_all(&mut self) {
        *self = Self::new();
    }

    /// Clears the live capture flags without touching the ring.
    pub fn reset_capture(&mut self) {
        self.state.capture_running = false;
        self.state.capture_ok = false;
        self.state.armed = false;
    }

    /// Claims the next ring slot for a new attempt and opens its window.
    pub fn begin_attempt(&mut self, load: LoadPercentage) -> usize {
        let index = self.next_index;
        self.next_index = (index + 1) % ATTEMPT_RING_CAPACITY;
        self.written = self.written.saturating_add(1);

        self.records[index] = TestAttemptRecord {
            load,
            ..TestAttemptRecord::EMPTY
        };
        self.state = CaptureState {
            capture_running: false,
            capture_ok: false,
            current_attempt_index: index,
            armed: true,
        };
        index
    }

    /// Stops accepting boundary edges for the current attempt.
    pub fn close_window(&mut self) {
        self.state.armed = false;
    }

    /// Mains-loss boundary: starts the capture unless one is already running.
    pub fn on_power_loss(&mut self, now: TimestampMillis) -> CaptureEdge {
        if !self.state.armed || self.state.capture_running || self.state.capture_ok {
            self.spurious.power_loss = self.spurious.power_loss.saturating_add(1);
            return CaptureEdge::Ignored;
        }

        let record = &mut self.records[self.state.current_attempt_index];
        record.started_at_ms = Some(now);
        record.ended_at_ms = None;
        self.state.capture_running = true;
        CaptureEdge::Started
    }

    /// UPS boundary: completes a running capture.
    pub fn on_power_restore(&mut self, now: TimestampMillis) -> CaptureEdge {
        if !self.state.armed || !self.state.capture_running {
            self.spurious.power_restore = self.spurious.power_restore.saturating_add(1);
            return CaptureEdge::Ignored;
        }

        let record = &mut self.records[self.state.current_attempt_index];
        let start = record.started_at_ms.unwrap_or(now);
        record.ended_at_ms = Some(now.max(start));
        self.state.capture_running = false;
        self.state.capture_ok = true;
        CaptureEdge::Completed
    }

    /// Validates the current attempt with `classify` and resets the live flags.
    ///
    /// A record without both boundaries is reported as
    /// [`AttemptFailure::NoCaptureDetected`] without consulting `classify`.
    pub fn finalize(
        &mut self,
        sequence_number: u8,
        classify: impl FnOnce(&TestAttemptRecord) -> Result<u64, AttemptFailure>,
        now: TimestampMillis,
    ) -> Result<u64, AttemptFailure> {
        let capture_ok = self.state.capture_ok;
        let record = &mut self.records[self.state.current_attempt_index];

        let outcome = if capture_ok {
            classify(record)
        } else {
            Err(AttemptFailure::NoCaptureDetected)
        };

        record.validated_at_ms = Some(now);
        match outcome {
            Ok(_) => {
                record.is_valid = true;
                record.sequence_number = Some(sequence_number);
                record.failure = None;
            }
            Err(failure) => {
                record.is_valid = false;
                record.sequence_number = None;
                record.failure = Some(failure);
            }
        }

        self.reset_capture();
        outcome
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn spurious(&self) -> SpuriousEdgeCounters {
        self.spurious
    }

    /// Read-only view of the retained attempts.
    pub fn attempts(&self) -> AttemptLog<'_> {
        let len = self.written.min(ATTEMPT_RING_CAPACITY);
        let oldest = if self.written < ATTEMPT_RING_CAPACITY {
            0
        } else {
            self.next_index
        };

        AttemptLog {
            records: &self.records,
            oldest,
            len,
        }
    }
}

impl Default for TimeCaptureRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed view over the attempt ring in chronological order.
#[derive(Copy, Clone, Debug)]
pub struct AttemptLog<'a> {
    records: &'a [TestAttemptRecord; ATTEMPT_RING_CAPACITY],
    oldest: usize,
    len: usize,
}

impl<'a> AttemptLog<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the `position`-th retained record, oldest first.
    pub fn get(&self, position: usize) -> Option<&'a TestAttemptRecord> {
        if position >= self.len {
            return None;
        }
        Some(&self.records[(self.oldest + position) % ATTEMPT_RING_CAPACITY])
    }

    pub fn latest(&self) -> Option<&'a TestAttemptRecord> {
        self.len.checked_sub(1).and_then(|last| self.get(last))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a TestAttemptRecord> + 'a {
        let log = *self;
        (0..log.len).filter_map(move |position| log.get(position))
    }

    /// Copies the retained records out, oldest first.
    #[cfg(feature = "alloc")]
    pub fn to_vec(&self) -> alloc::vec::Vec<TestAttemptRecord> {
        self.iter().copied().collect()
    }
}

/// Guarded access to the shared recorder.
pub trait CaptureAccess {
    fn with_recorder<R>(&self, f: impl FnOnce(&mut TimeCaptureRecorder) -> R) -> R;
}

impl CaptureAccess for RefCell<TimeCaptureRecorder> {
    fn with_recorder<R>(&self, f: impl FnOnce(&mut TimeCaptureRecorder) -> R) -> R {
        f(&mut self.borrow_mut())
    }
}
