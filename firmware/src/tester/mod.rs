//! Shared state between the edge tasks, the monitor tasks and the orchestrator.

pub mod orchestrator;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, ThreadModeRawMutex};
use embassy_sync::channel::{Channel, Receiver};
use embassy_sync::signal::Signal;
use tester_core::capture::{CaptureAccess, TimeCaptureRecorder};
use tester_core::kinds::TestKind;

/// Depth of the test request queue.
pub const REQUEST_QUEUE_DEPTH: usize = 2;

/// Guards state touched from more than one executor priority.
#[cfg(target_os = "none")]
pub type CaptureMutex = CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
pub type CaptureMutex = NoopRawMutex;

#[cfg(target_os = "none")]
type RequestMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type RequestMutex = NoopRawMutex;

/// A queued test run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TestRequest {
    pub kind: TestKind,
    pub target_va: u32,
    /// Per-attempt window; 0 selects the configured duration.
    pub duration_ms: u32,
}

impl TestRequest {
    pub const fn new(kind: TestKind, target_va: u32) -> Self {
        Self {
            kind,
            target_va,
            duration_ms: 0,
        }
    }
}

pub type RequestQueue = Channel<RequestMutex, TestRequest, REQUEST_QUEUE_DEPTH>;
pub type RequestReceiver<'a> = Receiver<'a, RequestMutex, TestRequest, REQUEST_QUEUE_DEPTH>;

/// Attempt recorder plus the capture-complete notification.
pub struct CaptureBus {
    recorder: Mutex<CaptureMutex, RefCell<TimeCaptureRecorder>>,
    completed: Signal<CaptureMutex, ()>,
}

impl CaptureBus {
    pub const fn new() -> Self {
        Self {
            recorder: Mutex::new(RefCell::new(TimeCaptureRecorder::new())),
            completed: Signal::new(),
        }
    }

    /// Wakes the orchestrator after a capture completed.
    pub fn notify_completed(&self) {
        self.completed.signal(());
    }

    /// Waits for the next completion notification.
    pub async fn wait_completed(&self) {
        self.completed.wait().await;
    }

    /// Drops a notification left over from an earlier attempt.
    pub fn clear_completed(&self) {
        self.completed.reset();
    }
}

impl Default for CaptureBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureAccess for CaptureBus {
    fn with_recorder<R>(&self, f: impl FnOnce(&mut TimeCaptureRecorder) -> R) -> R {
        self.recorder.lock(|cell| f(&mut cell.borrow_mut()))
    }
}
