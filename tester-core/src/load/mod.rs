//! Load-bank planning and the controller that drives the bank outputs.
//!
//! The bench presents a load to the UPS under test through four additive
//! resistive banks, each sized to a quarter of the UPS rating, plus a PWM
//! stage that trims the effective load inside the selected tier.

use core::fmt;

use crate::config::PwmCalibration;

/// Number of discrete load banks on the bench.
pub const BANK_COUNT: usize = 4;

const BANKS: u32 = 4;

/// Smallest rating that still gives every bank a non-zero share.
pub const MIN_RATED_VA: u32 = BANKS;

/// Full-scale PWM value for the 8-bit load stage.
pub const PWM_FULL_SCALE: u8 = u8::MAX;

/// Load tier tag recorded alongside each attempt.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LoadPercentage {
    #[default]
    P0,
    P25,
    P50,
    P75,
    P100,
}

impl LoadPercentage {
    /// Maps an enabled bank count onto its tier tag.
    pub const fn from_bank_count(bank_count: u8) -> Self {
        match bank_count {
            0 => LoadPercentage::P0,
            1 => LoadPercentage::P25,
            2 => LoadPercentage::P50,
            3 => LoadPercentage::P75,
            _ => LoadPercentage::P100,
        }
    }

    /// Returns the nominal percentage of rated load.
    pub const fn percent(self) -> u8 {
        match self {
            LoadPercentage::P0 => 0,
            LoadPercentage::P25 => 25,
            LoadPercentage::P50 => 50,
            LoadPercentage::P75 => 75,
            LoadPercentage::P100 => 100,
        }
    }
}

impl fmt::Display for LoadPercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Resolved bank combination for a requested load.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadConfiguration {
    /// Requested load after clamping to the rating.
    pub requested_va: u32,
    /// Number of banks enabled, counted from bank 0.
    pub bank_count: u8,
    /// Duty within the selected tier, 0..=100.
    pub duty_percent: u8,
    /// PWM compare value including the tier trim.
    pub pwm_value: u8,
    pub load: LoadPercentage,
}

/// Computes the bank combination and PWM value for `requested_va`.
pub fn plan_load(
    requested_va: u32,
    rated_va: u32,
    calibration: &PwmCalibration,
) -> LoadConfiguration {
    let rated_va = rated_va.max(MIN_RATED_VA);
    let requested_va = requested_va.min(rated_va);
    let bank_va = rated_va / BANKS;

    let needed = requested_va.div_ceil(bank_va).clamp(1, BANKS);
    let bank_count = u8::try_from(needed).unwrap_or(u8::MAX);
    let tier_va = u64::from(bank_va) * u64::from(needed);

    let duty_percent = scale(requested_va, tier_va, 100);
    let raw_pwm = scale(requested_va, tier_va, u64::from(PWM_FULL_SCALE));
    let trimmed = i32::from(raw_pwm) + i32::from(calibration.trim_for(bank_count));
    let pwm_value = u8::try_from(trimmed.clamp(0, i32::from(PWM_FULL_SCALE))).unwrap_or(0);

    let load = if requested_va == 0 {
        LoadPercentage::P0
    } else {
        LoadPercentage::from_bank_count(bank_count)
    };

    LoadConfiguration {
        requested_va,
        bank_count,
        duty_percent,
        pwm_value,
        load,
    }
}

fn scale(value: u32, tier_va: u64, full_scale: u64) -> u8 {
    let scaled = (u64::from(value) * full_scale) / tier_va.max(1);
    u8::try_from(scaled.min(full_scale)).unwrap_or(u8::MAX)
}

/// Hardware seam for the PWM stage and the bank enable outputs.
pub trait LoadBankDriver {
    /// Writes the PWM compare value for the load stage.
    fn write_pwm(&mut self, value: u8);

    /// Drives the enable output for bank `index` (0-based).
    fn set_bank(&mut self, index: usize, enabled: bool);
}

/// Driver that discards all output writes.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopLoadBankDriver;

impl NoopLoadBankDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl LoadBankDriver for NoopLoadBankDriver {
    fn write_pwm(&mut self, _value: u8) {}

    fn set_bank(&mut self, _index: usize, _enabled: bool) {}
}

/// Owns the load outputs and applies planned configurations to them.
pub struct LoadBankController<D: LoadBankDriver = NoopLoadBankDriver> {
    driver: D,
    calibration: PwmCalibration,
    active: Option<LoadConfiguration>,
}

impl<D: LoadBankDriver> LoadBankController<D> {
    /// Wraps `driver`, shedding any load left over from a previous owner.
    pub fn new(driver: D, calibration: PwmCalibration) -> Self {
        let mut controller = Self {
            driver,
            calibration,
            active: None,
        };
        controller.shed();
        controller
    }

    /// Replaces the per-tier calibration used by later `set_load` calls.
    pub fn set_calibration(&mut self, calibration: PwmCalibration) {
        self.calibration = calibration;
    }

    /// Plans and applies the load for `requested_va`.
    ///
    /// Banks are driven highest first when shedding and lowest first when
    /// adding, so the enabled set is always a prefix of the bank order.
    pub fn set_load(&mut self, requested_va: u32, rated_va: u32) -> LoadConfiguration {
        let config = plan_load(requested_va, rated_va, &self.calibration);
        let enabled = usize::from(config.bank_count);

        for index in (enabled..BANK_COUNT).rev() {
            self.driver.set_bank(index, false);
        }
        for index in 0..enabled {
            self.driver.set_bank(index, true);
        }
        self.driver.write_pwm(config.pwm_value);

        self.active = Some(config);
        config
    }

    /// Drops the PWM stage to zero and releases every bank.
    pub fn shed(&mut self) {
        self.driver.write_pwm(0);
        for index in (0..BANK_COUNT).rev() {
            self.driver.set_bank(index, false);
        }
        self.active = None;
    }

    /// Returns the configuration currently applied, if any.
    pub fn active(&self) -> Option<LoadConfiguration> {
        self.active
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
