//! Edge-to-capture plumbing for the two sense inputs.
//!
//! The EXTI task for each input calls [`EdgeLine::on_edge`], which runs the
//! debounce gate and wakes the input's monitor task. The monitor task reads
//! the clock and hands the boundary to the shared [`CaptureBus`].

use embassy_sync::signal::Signal;
use embassy_time::Instant;
use tester_core::capture::CaptureEdge;
use tester_core::monitor::{EdgeGate, EdgeKind, SenseInput, gate_tick, service_wake};

use crate::tester::{CaptureBus, CaptureMutex};

/// Debounce gate plus wake signal for one sense input.
pub struct EdgeLine {
    input: SenseInput,
    gate: EdgeGate,
    wake: Signal<CaptureMutex, ()>,
}

impl EdgeLine {
    pub const fn new(input: SenseInput) -> Self {
        Self {
            input,
            gate: EdgeGate::new(),
            wake: Signal::new(),
        }
    }

    pub fn input(&self) -> SenseInput {
        self.input
    }

    pub fn gate(&self) -> &EdgeGate {
        &self.gate
    }

    /// Applies the debounce window and the edge polarity for a test kind.
    pub fn configure(&self, debounce_window_ms: u32, edge: EdgeKind) {
        self.gate.set_window(debounce_window_ms);
        self.gate.set_polarity(edge);
        self.gate.reset();
    }

    /// Edge-task entry point. Never blocks.
    pub fn on_edge(&self, now_ms: u64) -> bool {
        self.gate.on_edge(gate_tick(now_ms), || self.wake.signal(()))
    }

    /// Runs the gate only when the sampled level matches the armed polarity.
    pub fn on_level_change(&self, level_high: bool, now_ms: u64) -> bool {
        self.gate.polarity().matches_level(level_high) && self.on_edge(now_ms)
    }
}

/// Delivers a pending edge to the recorder and wakes the orchestrator when
/// the capture completed.
pub fn deliver(line: &EdgeLine, bus: &CaptureBus, now_ms: u64) -> Option<CaptureEdge> {
    let edge = service_wake(&line.gate, line.input, bus, now_ms)?;
    match edge {
        CaptureEdge::Completed => bus.notify_completed(),
        CaptureEdge::Started => {}
        CaptureEdge::Ignored => log_spurious(line.input, now_ms),
    }
    Some(edge)
}

/// Monitor-task body.
pub async fn watch(line: &EdgeLine, bus: &CaptureBus) -> ! {
    loop {
        line.wake.wait().await;
        deliver(line, bus, Instant::now().as_millis());
    }
}

#[cfg(target_os = "none")]
fn log_spurious(input: SenseInput, now_ms: u64) {
    defmt::warn!("monitor:{} edge ignored t={}ms", input.label(), now_ms);
}

#[cfg(not(target_os = "none"))]
fn log_spurious(_: SenseInput, _: u64) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tester_core::capture::CaptureAccess;
    use tester_core::load::LoadPercentage;

    #[test]
    fn completed_capture_reaches_recorder() {
        let bus = CaptureBus::new();
        let mains = EdgeLine::new(SenseInput::Mains);
        let ups = EdgeLine::new(SenseInput::Ups);
        mains.configure(100, EdgeKind::Falling);
        ups.configure(100, EdgeKind::Rising);

        bus.with_recorder(|recorder| {
            recorder.begin_attempt(LoadPercentage::P75);
        });

        assert!(mains.on_level_change(false, 1_000));
        assert_eq!(deliver(&mains, &bus, 1_000), Some(CaptureEdge::Started));

        // Wrong polarity for the UPS line: the gate never sees it.
        assert!(!ups.on_level_change(false, 1_010));
        assert_eq!(deliver(&ups, &bus, 1_010), None);

        assert!(ups.on_level_change(true, 1_030));
        assert_eq!(deliver(&ups, &bus, 1_030), Some(CaptureEdge::Completed));
        assert!(bus.with_recorder(|recorder| recorder.state().capture_ok));
    }

    #[test]
    fn configure_clears_debounce_history() {
        let line = EdgeLine::new(SenseInput::Mains);
        line.configure(50, EdgeKind::Falling);
        assert!(line.on_edge(10));
        assert!(!line.on_edge(40));

        line.configure(50, EdgeKind::Falling);
        assert!(line.on_edge(41));
        assert_eq!(line.gate().window(), 50);
    }
}
