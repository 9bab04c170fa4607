//! Test kinds and the per-kind policy consulted by the orchestrator.
//!
//! Every kind shares the same attempt state machine; only the sense-input
//! polarity and the acceptance window differ.

use core::fmt;

use crate::capture::{AcceptanceWindow, AttemptFailure, TestAttemptRecord};
use crate::config::TestTuning;
use crate::monitor::{EdgeKind, InterruptProfile};

/// Qualification tests the bench can run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TestKind {
    /// Mains loss to UPS output transfer.
    #[default]
    SwitchingTime,
    /// Mains loss to UPS output shutdown on battery.
    BackupTime,
}

impl TestKind {
    pub const fn label(self) -> &'static str {
        match self {
            TestKind::SwitchingTime => "switching-time",
            TestKind::BackupTime => "backup-time",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Strategy hooks that vary by test kind.
pub trait TestPolicy {
    /// Edge polarity each sense input must be armed for.
    fn interrupt_profile(&self) -> InterruptProfile;

    /// Inclusive acceptance window for a measurement.
    fn acceptance_window(&self, tuning: &TestTuning) -> AcceptanceWindow;

    /// Classifies a finished attempt record.
    fn validate(
        &self,
        record: &TestAttemptRecord,
        tuning: &TestTuning,
    ) -> Result<u64, AttemptFailure> {
        self.acceptance_window(tuning).check(record)
    }
}

impl TestPolicy for TestKind {
    fn interrupt_profile(&self) -> InterruptProfile {
        match self {
            TestKind::SwitchingTime => InterruptProfile {
                mains: EdgeKind::Falling,
                ups: EdgeKind::Rising,
            },
            TestKind::BackupTime => InterruptProfile {
                mains: EdgeKind::Falling,
                ups: EdgeKind::Falling,
            },
        }
    }

    fn acceptance_window(&self, tuning: &TestTuning) -> AcceptanceWindow {
        match self {
            TestKind::SwitchingTime => AcceptanceWindow::new(
                u64::from(tuning.min_valid_switch_time_ms),
                u64::from(tuning.max_valid_switch_time_ms),
            ),
            TestKind::BackupTime => AcceptanceWindow::new(
                u64::from(tuning.min_valid_backup_time_ms),
                u64::from(tuning.max_valid_backup_time_ms),
            ),
        }
    }
}
