#![allow(dead_code)]

use core::cell::RefCell;

use heapless::Vec as HeaplessVec;
use tester_core::capture::TimeCaptureRecorder;
use tester_core::monitor::{EdgeGate, SenseInput, gate_tick, service_wake};
use tester_core::orchestrator::RunClock;

/// Simulated bench that delivers scripted sense edges while the orchestrator waits.
pub struct ScriptedBench<'a> {
    capture: &'a RefCell<TimeCaptureRecorder>,
    pub mains: EdgeGate,
    pub ups: EdgeGate,
    now: u64,
    edges: HeaplessVec<(u64, SenseInput), 32>,
    cursor: usize,
}

impl<'a> ScriptedBench<'a> {
    pub fn new(capture: &'a RefCell<TimeCaptureRecorder>, start: u64) -> Self {
        Self {
            capture,
            mains: EdgeGate::new(),
            ups: EdgeGate::new(),
            now: start,
            edges: HeaplessVec::new(),
            cursor: 0,
        }
    }

    /// Schedules an edge; edges must be pushed in time order.
    pub fn edge(mut self, at: u64, input: SenseInput) -> Self {
        self.edges
            .push((at, input))
            .expect("edge script capacity exceeded");
        self
    }

    fn gate(&self, input: SenseInput) -> &EdgeGate {
        match input {
            SenseInput::Mains => &self.mains,
            SenseInput::Ups => &self.ups,
        }
    }

    /// Delivers edges up to `until`; returns early on capture completion when asked.
    fn play(&mut self, until: u64, stop_on_capture: bool) -> u64 {
        while let Some(&(at, input)) = self.edges.get(self.cursor) {
            if at > until {
                break;
            }
            self.cursor += 1;
            self.now = self.now.max(at);

            let gate = self.gate(input);
            if gate.on_edge(gate_tick(self.now), || {}) {
                service_wake(gate, input, self.capture, self.now);
            }

            if stop_on_capture && self.capture.borrow().state().capture_ok {
                return self.now;
            }
        }

        self.now = self.now.max(until);
        self.now
    }
}

impl RunClock for ScriptedBench<'_> {
    fn now(&mut self) -> u64 {
        self.now
    }

    fn wait_for_capture(&mut self, until: u64) -> u64 {
        if self.capture.borrow().state().capture_ok {
            return self.now;
        }
        self.play(until, true)
    }

    fn delay_until(&mut self, until: u64) -> u64 {
        self.play(until, false)
    }
}
