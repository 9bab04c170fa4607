//! One-shot bring-up of the tester: settings check, hardware setup, task launch.
//!
//! [`Lifecycle::init`] is idempotent once it has succeeded and fails closed:
//! a configuration or hardware fault stops bring-up before any task exists,
//! and the fault is latched so later calls report it instead of retrying on
//! half-configured hardware.

use core::fmt;

use crate::capture::{CaptureAccess, TimeCaptureRecorder};
use crate::config::{ConfigError, ConfigProvider, HardwareSettings, TaskParams, TesterSettings};
use crate::kinds::{TestKind, TestPolicy};
use crate::monitor::InterruptProfile;

/// Tasks started during bring-up, in launch order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskRole {
    MainsMonitor,
    UpsMonitor,
    Orchestrator,
}

impl TaskRole {
    pub const LAUNCH_ORDER: [TaskRole; 3] = [
        TaskRole::MainsMonitor,
        TaskRole::UpsMonitor,
        TaskRole::Orchestrator,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            TaskRole::MainsMonitor => "mains-monitor",
            TaskRole::UpsMonitor => "ups-monitor",
            TaskRole::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A task launch request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskSpec {
    pub role: TaskRole,
    pub params: TaskParams,
}

impl TaskSpec {
    fn for_role(role: TaskRole, settings: &TesterSettings) -> Self {
        let params = match role {
            TaskRole::MainsMonitor => settings.tasks.mains_monitor,
            TaskRole::UpsMonitor => settings.tasks.ups_monitor,
            TaskRole::Orchestrator => settings.tasks.orchestrator,
        };
        Self { role, params }
    }
}

/// Pin, PWM or interrupt setup that could not be completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HardwareFault {
    Pwm,
    SenseInput,
    SignalOutput,
    LoadOutput,
}

impl fmt::Display for HardwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareFault::Pwm => f.write_str("PWM setup failed"),
            HardwareFault::SenseInput => f.write_str("sense input setup failed"),
            HardwareFault::SignalOutput => f.write_str("signal output setup failed"),
            HardwareFault::LoadOutput => f.write_str("load output setup failed"),
        }
    }
}

/// Bring-up failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InitError {
    Config(ConfigError),
    Hardware(HardwareFault),
    Launch(TaskRole),
}

impl From<ConfigError> for InitError {
    fn from(error: ConfigError) -> Self {
        InitError::Config(error)
    }
}

impl From<HardwareFault> for InitError {
    fn from(fault: HardwareFault) -> Self {
        InitError::Hardware(fault)
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Config(error) => write!(f, "configuration rejected: {error}"),
            InitError::Hardware(fault) => write!(f, "hardware configuration failed: {fault}"),
            InitError::Launch(role) => write!(f, "failed to launch {role} task"),
        }
    }
}

/// Configures pins, PWM and edge interrupts.
pub trait HardwareSetup {
    fn configure(
        &mut self,
        hardware: &HardwareSettings,
        profile: InterruptProfile,
    ) -> Result<(), HardwareFault>;
}

/// Starts a task described by a [`TaskSpec`].
pub trait TaskLauncher {
    fn launch(&mut self, spec: TaskSpec) -> Result<(), TaskRole>;
}

/// Bring-up progress.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Ready,
    Faulted(InitError),
}

/// Tracks bring-up so it happens at most once.
#[derive(Copy, Clone, Debug, Default)]
pub struct Lifecycle {
    state: LifecycleState,
    launched: u8,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            launched: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Number of tasks successfully launched.
    pub fn launched(&self) -> u8 {
        self.launched
    }

    /// Validates settings, empties the attempt records, configures hardware
    /// and launches the monitor tasks ahead of the orchestrator.
    pub fn init<P, C, H, T>(
        &mut self,
        provider: &P,
        kind: TestKind,
        capture: &C,
        hardware: &mut H,
        launcher: &mut T,
    ) -> Result<(), InitError>
    where
        P: ConfigProvider + ?Sized,
        C: CaptureAccess + ?Sized,
        H: HardwareSetup + ?Sized,
        T: TaskLauncher + ?Sized,
    {
        match self.state {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Faulted(error) => return Err(error),
            LifecycleState::Uninitialized => {}
        }

        let result = self.bring_up(&provider.settings(), kind, capture, hardware, launcher);
        self.state = match result {
            Ok(()) => LifecycleState::Ready,
            Err(error) => LifecycleState::Faulted(error),
        };
        result
    }

    fn bring_up<C, H, T>(
        &mut self,
        settings: &TesterSettings,
        kind: TestKind,
        capture: &C,
        hardware: &mut H,
        launcher: &mut T,
    ) -> Result<(), InitError>
    where
        C: CaptureAccess + ?Sized,
        H: HardwareSetup + ?Sized,
        T: TaskLauncher + ?Sized,
    {
        settings.validate()?;
        capture.with_recorder(TimeCaptureRecorder::reset_all);
        hardware.configure(&settings.hardware, kind.interrupt_profile())?;

        for role in TaskRole::LAUNCH_ORDER {
            launcher
                .launch(TaskSpec::for_role(role, settings))
                .map_err(InitError::Launch)?;
            self.launched = self.launched.saturating_add(1);
        }
        Ok(())
    }
}
