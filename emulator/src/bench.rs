//! Simulated UPS bench for host runs.
//!
//! The power-cut driver schedules sense edges relative to the moment the
//! cut is asserted, following the selected [`UpsProfile`]. [`BenchClock`]
//! advances a virtual millisecond clock and delivers those edges through
//! the same debounce gates and monitor dispatch the firmware uses.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tester_core::capture::TimeCaptureRecorder;
use tester_core::config::HardwareSettings;
use tester_core::kinds::{TestKind, TestPolicy};
use tester_core::load::{BANK_COUNT, LoadBankDriver};
use tester_core::monitor::{EdgeGate, SenseInput, gate_tick, service_wake};
use tester_core::orchestrator::{RunClock, TestSignalDriver};

/// Mains relay drop-out after the cut is asserted.
const RELAY_DELAY_MS: u64 = 8;

/// Behaviour of the simulated UPS for each attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpsProfile {
    /// Clean transfer well inside the acceptance window.
    Pass,
    /// The UPS output never comes back.
    Timeout,
    /// First transfer is far too slow, the retry is clean.
    OutOfRange,
    /// Contact bounce on both sense inputs.
    Bounce,
    /// Battery runs down; the UPS output drops after a long hold-up.
    Backup,
}

impl UpsProfile {
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        match tag.to_ascii_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "timeout" => Ok(Self::Timeout),
            "out-of-range" => Ok(Self::OutOfRange),
            "bounce" => Ok(Self::Bounce),
            "backup" => Ok(Self::Backup),
            other => Err(format!("Unknown profile '{other}'")),
        }
    }

    pub fn kind(self) -> TestKind {
        match self {
            UpsProfile::Backup => TestKind::BackupTime,
            _ => TestKind::SwitchingTime,
        }
    }

    /// UPS edge delay after the mains edge for the 1-based `attempt`.
    fn transfer_ms(self, attempt: usize) -> Option<u64> {
        match self {
            UpsProfile::Pass => Some(12),
            UpsProfile::Timeout => None,
            UpsProfile::OutOfRange if attempt == 1 => Some(4_500),
            UpsProfile::OutOfRange => Some(14),
            UpsProfile::Bounce => Some(18),
            UpsProfile::Backup => Some(95_000),
        }
    }

    const fn bounce_count(self) -> u64 {
        match self {
            UpsProfile::Bounce => 3,
            _ => 0,
        }
    }
}

/// Virtual clock, scheduled edges and the transcript, shared by the drivers.
pub struct Bench {
    profile: UpsProfile,
    now: Cell<u64>,
    attempt: Cell<usize>,
    pending: RefCell<Vec<(u64, SenseInput)>>,
    transcript: RefCell<Vec<String>>,
}

impl Bench {
    pub fn new(profile: UpsProfile) -> Rc<Self> {
        Rc::new(Self {
            profile,
            now: Cell::new(0),
            attempt: Cell::new(0),
            pending: RefCell::new(Vec::new()),
            transcript: RefCell::new(Vec::new()),
        })
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn log(&self, line: impl Into<String>) {
        self.transcript
            .borrow_mut()
            .push(format!("[{:>7} ms] {}", self.now(), line.into()));
    }

    pub fn transcript(&self) -> Vec<String> {
        self.transcript.borrow().clone()
    }

    fn schedule(&self, at: u64, input: SenseInput) {
        let mut pending = self.pending.borrow_mut();
        let position = pending.partition_point(|(time, _)| *time <= at);
        pending.insert(position, (at, input));
    }

    fn schedule_burst(&self, first: u64, input: SenseInput, spacing: u64) {
        self.schedule(first, input);
        for bounce in 1..=self.profile.bounce_count() {
            self.schedule(first + bounce * spacing, input);
        }
    }

    fn on_power_cut(&self) {
        let attempt = self.attempt.get() + 1;
        self.attempt.set(attempt);

        let mains_at = self.now() + RELAY_DELAY_MS;
        self.schedule_burst(mains_at, SenseInput::Mains, 20);
        if let Some(transfer) = self.profile.transfer_ms(attempt) {
            self.schedule_burst(mains_at + transfer, SenseInput::Ups, 7);
        }
    }

    fn next_edge(&self, until: u64) -> Option<(u64, SenseInput)> {
        let mut pending = self.pending.borrow_mut();
        match pending.first() {
            Some(&(at, _)) if at <= until => Some(pending.remove(0)),
            _ => None,
        }
    }
}

/// Load bank outputs that log every change.
pub struct BenchLoads {
    bench: Rc<Bench>,
    banks: [bool; BANK_COUNT],
    pwm: u8,
}

impl BenchLoads {
    pub fn new(bench: Rc<Bench>) -> Self {
        Self {
            bench,
            banks: [false; BANK_COUNT],
            pwm: 0,
        }
    }
}

impl LoadBankDriver for BenchLoads {
    fn write_pwm(&mut self, value: u8) {
        if value != self.pwm {
            self.pwm = value;
            self.bench.log(format!("pwm duty {value}/255"));
        }
    }

    fn set_bank(&mut self, index: usize, enabled: bool) {
        if self.banks[index] != enabled {
            self.banks[index] = enabled;
            let state = if enabled { "on" } else { "off" };
            self.bench.log(format!("load bank {} {state}", index + 1));
        }
    }
}

/// Power-cut relay and test-end line; asserting the cut drives the UPS model.
pub struct BenchSignals {
    bench: Rc<Bench>,
    power_cut: bool,
    test_end: bool,
}

impl BenchSignals {
    pub fn new(bench: Rc<Bench>) -> Self {
        Self {
            bench,
            power_cut: false,
            test_end: false,
        }
    }
}

impl TestSignalDriver for BenchSignals {
    fn set_power_cut(&mut self, asserted: bool) {
        if asserted == self.power_cut {
            return;
        }
        self.power_cut = asserted;
        if asserted {
            self.bench.log("power cut asserted");
            self.bench.on_power_cut();
        } else {
            self.bench.log("power cut released");
        }
    }

    fn set_test_end(&mut self, asserted: bool) {
        if asserted == self.test_end {
            return;
        }
        self.test_end = asserted;
        let level = if asserted { "high" } else { "low" };
        self.bench.log(format!("test end {level}"));
    }
}

/// Virtual clock that feeds scheduled edges to the monitor path.
pub struct BenchClock<'a> {
    bench: Rc<Bench>,
    capture: &'a RefCell<TimeCaptureRecorder>,
    mains: EdgeGate,
    ups: EdgeGate,
}

impl<'a> BenchClock<'a> {
    pub fn new(
        bench: Rc<Bench>,
        capture: &'a RefCell<TimeCaptureRecorder>,
        kind: TestKind,
        hardware: &HardwareSettings,
    ) -> Self {
        let profile = kind.interrupt_profile();
        let clock = Self {
            bench,
            capture,
            mains: EdgeGate::new(),
            ups: EdgeGate::new(),
        };
        for (gate, input) in [(&clock.mains, SenseInput::Mains), (&clock.ups, SenseInput::Ups)] {
            gate.set_window(hardware.debounce_window_ms);
            gate.set_polarity(profile.edge_for(input));
        }
        clock
    }

    pub fn gate(&self, input: SenseInput) -> &EdgeGate {
        match input {
            SenseInput::Mains => &self.mains,
            SenseInput::Ups => &self.ups,
        }
    }

    fn capture_ok(&self) -> bool {
        self.capture.borrow().state().capture_ok
    }

    fn play(&mut self, until: u64, stop_on_capture: bool) -> u64 {
        while let Some((at, input)) = self.bench.next_edge(until) {
            self.bench.now.set(self.bench.now().max(at));
            let now = self.bench.now();

            let gate = self.gate(input);
            if !gate.on_edge(gate_tick(now), || {}) {
                self.bench.log(format!("{input} edge debounced"));
                continue;
            }
            if let Some(edge) = service_wake(gate, input, self.capture, now) {
                self.bench.log(format!("{input} edge -> {edge:?}"));
            }

            if stop_on_capture && self.capture_ok() {
                return now;
            }
        }

        self.bench.now.set(self.bench.now().max(until));
        self.bench.now()
    }
}

impl RunClock for BenchClock<'_> {
    fn now(&mut self) -> u64 {
        self.bench.now()
    }

    fn wait_for_capture(&mut self, until: u64) -> u64 {
        if self.capture_ok() {
            return self.bench.now();
        }
        self.play(until, true)
    }

    fn delay_until(&mut self, until: u64) -> u64 {
        self.play(until, false)
    }
}
