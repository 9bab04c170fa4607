//! Sense-input edge gating and monitor-side dispatch.
//!
//! [`EdgeGate`] is the only state touched from interrupt context. It keeps
//! the debounce bookkeeping in atomics, raises a pending flag and invokes a
//! non-blocking wake hook. The monitor task that owns the matching input then
//! reads the clock and calls [`service_wake`], which delivers the boundary to
//! the shared [`TimeCaptureRecorder`](crate::capture::TimeCaptureRecorder).

use core::fmt;

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::capture::{CaptureAccess, CaptureEdge, TimestampMillis};
use crate::config::DEFAULT_DEBOUNCE_WINDOW_MS;

/// The two digital sense inputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SenseInput {
    /// Mains presence at the UPS input.
    Mains,
    /// UPS output presence.
    Ups,
}

impl SenseInput {
    pub const fn label(self) -> &'static str {
        match self {
            SenseInput::Mains => "mains",
            SenseInput::Ups => "ups",
        }
    }
}

impl fmt::Display for SenseInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Edge polarity an input is armed for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeKind {
    Rising,
    Falling,
}

impl EdgeKind {
    const fn encode(self) -> u8 {
        match self {
            EdgeKind::Rising => 1,
            EdgeKind::Falling => 2,
        }
    }

    const fn decode(raw: u8) -> Self {
        match raw {
            1 => EdgeKind::Rising,
            _ => EdgeKind::Falling,
        }
    }

    /// Returns `true` when a line sitting at `level_high` is consistent with
    /// this edge having just occurred.
    pub const fn matches_level(self, level_high: bool) -> bool {
        match self {
            EdgeKind::Rising => level_high,
            EdgeKind::Falling => !level_high,
        }
    }
}

/// Edge polarity for both inputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InterruptProfile {
    pub mains: EdgeKind,
    pub ups: EdgeKind,
}

impl InterruptProfile {
    pub const fn edge_for(&self, input: SenseInput) -> EdgeKind {
        match input {
            SenseInput::Mains => self.mains,
            SenseInput::Ups => self.ups,
        }
    }
}

/// Snapshot of an edge gate's counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EdgeStats {
    pub accepted: u32,
    pub suppressed: u32,
}

/// Interrupt-safe debounce gate for one sense input.
pub struct EdgeGate {
    window_ms: AtomicU32,
    /// Millisecond tick (+1) of the last accepted edge; 0 == none yet.
    last_accepted: AtomicU32,
    pending: AtomicBool,
    polarity: AtomicU8,
    accepted: AtomicU32,
    suppressed: AtomicU32,
}

impl EdgeGate {
    pub const fn new() -> Self {
        Self {
            window_ms: AtomicU32::new(DEFAULT_DEBOUNCE_WINDOW_MS),
            last_accepted: AtomicU32::new(0),
            pending: AtomicBool::new(false),
            polarity: AtomicU8::new(2),
            accepted: AtomicU32::new(0),
            suppressed: AtomicU32::new(0),
        }
    }

    pub fn set_window(&self, window_ms: u32) {
        self.window_ms.store(window_ms, Ordering::Relaxed);
    }

    pub fn window(&self) -> u32 {
        self.window_ms.load(Ordering::Relaxed)
    }

    pub fn set_polarity(&self, edge: EdgeKind) {
        self.polarity.store(edge.encode(), Ordering::Relaxed);
    }

    pub fn polarity(&self) -> EdgeKind {
        EdgeKind::decode(self.polarity.load(Ordering::Relaxed))
    }

    /// Interrupt-context entry point.
    ///
    /// Accepts the edge only when strictly more than the debounce window has
    /// passed since the previously accepted edge. On acceptance the pending
    /// flag is raised before `wake` runs. Never blocks.
    pub fn on_edge(&self, now_ms: u32, wake: impl FnOnce()) -> bool {
        if let Some(previous) = decode_tick(self.last_accepted.load(Ordering::Acquire)) {
            if now_ms.wrapping_sub(previous) <= self.window() {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        self.last_accepted
            .store(encode_tick(now_ms), Ordering::Release);
        self.pending.store(true, Ordering::Release);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        wake();
        true
    }

    /// Consumes the pending flag.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Forgets the debounce history and clears the pending flag.
    pub fn reset(&self) {
        self.last_accepted.store(0, Ordering::Release);
        self.pending.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> EdgeStats {
        EdgeStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

impl Default for EdgeGate {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_tick(tick: u32) -> u32 {
    tick.wrapping_add(1).max(1)
}

fn decode_tick(raw: u32) -> Option<u32> {
    if raw == 0 {
        None
    } else {
        Some(raw.wrapping_sub(1))
    }
}

/// Truncates a millisecond timestamp onto the gate's wrapping tick.
#[allow(clippy::cast_possible_truncation)]
pub fn gate_tick(now: TimestampMillis) -> u32 {
    now as u32
}

/// Delivers a boundary edge for `input` to the recorder.
pub fn dispatch_edge<C>(input: SenseInput, capture: &C, now: TimestampMillis) -> CaptureEdge
where
    C: CaptureAccess + ?Sized,
{
    capture.with_recorder(|recorder| match input {
        SenseInput::Mains => recorder.on_power_loss(now),
        SenseInput::Ups => recorder.on_power_restore(now),
    })
}

/// Monitor-task body for one wake.
///
/// Returns `None` when the wake carried no pending edge.
pub fn service_wake<C>(
    gate: &EdgeGate,
    input: SenseInput,
    capture: &C,
    now: TimestampMillis,
) -> Option<CaptureEdge>
where
    C: CaptureAccess + ?Sized,
{
    if !gate.take_pending() {
        return None;
    }
    Some(dispatch_edge(input, capture, now))
}
