//! Tester settings consumed at test start.
//!
//! The persisted settings document is owned by an external store; this module
//! only describes the fully populated values the engine reads, their factory
//! defaults, and the consistency checks applied before any hardware is touched.

use core::fmt;

use crate::load::{BANK_COUNT, MIN_RATED_VA};

/// Default UPS nameplate rating (VA).
pub const DEFAULT_RATED_VA: u32 = 4_000;
/// Default per-attempt capture window (ms).
pub const DEFAULT_TEST_DURATION_MS: u32 = 10_000;
/// Default retry bound for a single test run.
pub const DEFAULT_MAX_RETRIES: u8 = 3;
/// Default upper bound of the accepted switching time (ms).
pub const DEFAULT_MAX_VALID_SWITCH_TIME_MS: u32 = 10_000;
/// Default upper bound of the accepted backup time (ms).
pub const DEFAULT_MAX_VALID_BACKUP_TIME_MS: u32 = 3_600_000;
/// Default debounce window applied to both sense inputs (ms).
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u32 = 100;
/// Default delay between releasing the power cut and validating (ms).
pub const DEFAULT_SETTLE_DELAY_MS: u32 = 100;
/// Default width of the "test end" pulse (ms).
pub const DEFAULT_END_PULSE_MS: u32 = 10;
/// Default load PWM carrier frequency.
pub const DEFAULT_PWM_FREQUENCY_HZ: u32 = 3_000;
/// Default load PWM resolution.
pub const DEFAULT_PWM_RESOLUTION_BITS: u8 = 8;

/// UPS nameplate data.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SpecSettings {
    pub rated_va: u32,
}

impl Default for SpecSettings {
    fn default() -> Self {
        Self {
            rated_va: DEFAULT_RATED_VA,
        }
    }
}

/// Acceptance windows and retry policy for a test run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TestTuning {
    pub min_valid_switch_time_ms: u32,
    pub max_valid_switch_time_ms: u32,
    pub min_valid_backup_time_ms: u32,
    pub max_valid_backup_time_ms: u32,
    pub test_duration_ms: u32,
    pub max_retries: u8,
}

impl Default for TestTuning {
    fn default() -> Self {
        Self {
            min_valid_switch_time_ms: 0,
            max_valid_switch_time_ms: DEFAULT_MAX_VALID_SWITCH_TIME_MS,
            min_valid_backup_time_ms: 0,
            max_valid_backup_time_ms: DEFAULT_MAX_VALID_BACKUP_TIME_MS,
            test_duration_ms: DEFAULT_TEST_DURATION_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Per-tier PWM trim added to the scaled duty value.
///
/// Index 0 applies to the 25 % tier, index 3 to the 100 % tier.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PwmCalibration(pub [i16; BANK_COUNT]);

impl PwmCalibration {
    /// Returns the trim for a 1-based bank count.
    pub fn trim_for(&self, bank_count: u8) -> i16 {
        let index = usize::from(bank_count).clamp(1, BANK_COUNT) - 1;
        self.0[index]
    }
}

/// Electrical and timing parameters of the bench hardware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HardwareSettings {
    pub pwm_calibration: PwmCalibration,
    pub pwm_frequency_hz: u32,
    pub pwm_resolution_bits: u8,
    pub debounce_window_ms: u32,
    pub settle_delay_ms: u32,
    pub end_pulse_ms: u32,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            pwm_calibration: PwmCalibration::default(),
            pwm_frequency_hz: DEFAULT_PWM_FREQUENCY_HZ,
            pwm_resolution_bits: DEFAULT_PWM_RESOLUTION_BITS,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            end_pulse_ms: DEFAULT_END_PULSE_MS,
        }
    }
}

/// Scheduling parameters for one task. Higher `priority` preempts lower.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskParams {
    pub priority: u8,
    pub stack_size: u32,
    pub core: u8,
}

impl TaskParams {
    pub const fn new(priority: u8, stack_size: u32, core: u8) -> Self {
        Self {
            priority,
            stack_size,
            core,
        }
    }
}

/// Scheduling parameters for the orchestrator and both monitor tasks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskSettings {
    pub orchestrator: TaskParams,
    pub mains_monitor: TaskParams,
    pub ups_monitor: TaskParams,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            orchestrator: TaskParams::new(1, 12_000, 0),
            mains_monitor: TaskParams::new(2, 4_096, 0),
            ups_monitor: TaskParams::new(2, 4_096, 0),
        }
    }
}

/// Complete set of values the engine reads from the settings store.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TesterSettings {
    pub spec: SpecSettings,
    pub tuning: TestTuning,
    pub hardware: HardwareSettings,
    pub tasks: TaskSettings,
}

impl TesterSettings {
    /// Checks that the values are internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spec.rated_va < MIN_RATED_VA {
            return Err(ConfigError::RatedVaTooSmall);
        }

        let tuning = &self.tuning;
        if tuning.min_valid_switch_time_ms > tuning.max_valid_switch_time_ms
            || tuning.min_valid_backup_time_ms > tuning.max_valid_backup_time_ms
        {
            return Err(ConfigError::InvertedAcceptanceWindow);
        }

        if tuning.test_duration_ms == 0 {
            return Err(ConfigError::ZeroTestDuration);
        }

        if !(1..=16).contains(&self.hardware.pwm_resolution_bits)
            || self.hardware.pwm_frequency_hz == 0
        {
            return Err(ConfigError::UnsupportedPwm);
        }

        let tasks = &self.tasks;
        if tasks.mains_monitor.priority <= tasks.orchestrator.priority
            || tasks.ups_monitor.priority <= tasks.orchestrator.priority
        {
            return Err(ConfigError::MonitorPriorityTooLow);
        }

        Ok(())
    }
}

/// Reasons a settings snapshot is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    RatedVaTooSmall,
    InvertedAcceptanceWindow,
    ZeroTestDuration,
    UnsupportedPwm,
    MonitorPriorityTooLow,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RatedVaTooSmall => f.write_str("rated VA must cover four load banks"),
            ConfigError::InvertedAcceptanceWindow => {
                f.write_str("acceptance window minimum exceeds maximum")
            }
            ConfigError::ZeroTestDuration => f.write_str("test duration must be non-zero"),
            ConfigError::UnsupportedPwm => f.write_str("unsupported PWM frequency or resolution"),
            ConfigError::MonitorPriorityTooLow => {
                f.write_str("monitor tasks must outrank the orchestrator")
            }
        }
    }
}

/// Source of tester settings, read once per test start.
pub trait ConfigProvider {
    fn settings(&self) -> TesterSettings;
}

impl ConfigProvider for TesterSettings {
    fn settings(&self) -> TesterSettings {
        *self
    }
}
