//! STM32G0 bench wiring.
//!
//! | Signal        | Pin  | Peripheral |
//! |---------------|------|------------|
//! | Mains sense   | PA0  | EXTI0      |
//! | UPS sense     | PA1  | EXTI1      |
//! | Load PWM      | PA6  | TIM3_CH1   |
//! | Bank 1..4     | PA8, PA9, PA10, PA15 | GPIO |
//! | Power cut     | PB3  | GPIO       |
//! | Test end      | PB4  | GPIO       |

#![cfg(target_os = "none")]

use core::cell::RefCell;

use embassy_stm32::gpio::Output;
use embassy_stm32::peripherals::TIM3;
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use tester_core::config::HardwareSettings;
use tester_core::lifecycle::{HardwareFault, HardwareSetup};
use tester_core::load::{BANK_COUNT, LoadBankDriver, PWM_FULL_SCALE};
use tester_core::monitor::InterruptProfile;
use tester_core::orchestrator::TestSignalDriver;

use crate::monitor::EdgeLine;

/// Duty resolution the TIM3 channel is driven at.
pub const PWM_RESOLUTION_BITS: u8 = 8;

/// TIM3 PWM stage plus the bank enable outputs.
pub struct HardwareLoadBanks<'d> {
    pwm: SimplePwm<'d, TIM3>,
    banks: [Output<'d>; BANK_COUNT],
}

impl<'d> HardwareLoadBanks<'d> {
    pub fn new(pwm: SimplePwm<'d, TIM3>, banks: [Output<'d>; BANK_COUNT]) -> Self {
        Self { pwm, banks }
    }

    pub fn pwm_mut(&mut self) -> &mut SimplePwm<'d, TIM3> {
        &mut self.pwm
    }
}

impl LoadBankDriver for HardwareLoadBanks<'_> {
    fn write_pwm(&mut self, value: u8) {
        self.pwm
            .ch1()
            .set_duty_cycle_fraction(u16::from(value), u16::from(PWM_FULL_SCALE));
    }

    fn set_bank(&mut self, index: usize, enabled: bool) {
        if let Some(output) = self.banks.get_mut(index) {
            if enabled {
                output.set_high();
            } else {
                output.set_low();
            }
        }
    }
}

/// Active-high power-cut relay and test-end outputs.
pub struct HardwareTestSignals<'d> {
    power_cut: Output<'d>,
    test_end: Output<'d>,
}

impl<'d> HardwareTestSignals<'d> {
    pub fn new(power_cut: Output<'d>, test_end: Output<'d>) -> Self {
        Self {
            power_cut,
            test_end,
        }
    }
}

impl TestSignalDriver for HardwareTestSignals<'_> {
    fn set_power_cut(&mut self, asserted: bool) {
        if asserted {
            self.power_cut.set_high();
        } else {
            self.power_cut.set_low();
        }
    }

    fn set_test_end(&mut self, asserted: bool) {
        if asserted {
            self.test_end.set_high();
        } else {
            self.test_end.set_low();
        }
    }
}

/// Load banks parked here between bring-up and the orchestrator launch.
pub type StagedLoadBanks<'d> = RefCell<Option<HardwareLoadBanks<'d>>>;

/// Applies bench settings to the PWM stage and both edge lines.
pub struct BenchSetup<'a, 'd> {
    loads: &'a StagedLoadBanks<'d>,
    mains: &'a EdgeLine,
    ups: &'a EdgeLine,
}

impl<'a, 'd> BenchSetup<'a, 'd> {
    pub fn new(loads: &'a StagedLoadBanks<'d>, mains: &'a EdgeLine, ups: &'a EdgeLine) -> Self {
        Self { loads, mains, ups }
    }
}

impl HardwareSetup for BenchSetup<'_, '_> {
    fn configure(
        &mut self,
        hardware: &HardwareSettings,
        profile: InterruptProfile,
    ) -> Result<(), HardwareFault> {
        if hardware.pwm_resolution_bits != PWM_RESOLUTION_BITS || hardware.pwm_frequency_hz == 0 {
            return Err(HardwareFault::Pwm);
        }

        let mut staged = self.loads.borrow_mut();
        let loads = staged.as_mut().ok_or(HardwareFault::LoadOutput)?;
        let pwm = loads.pwm_mut();
        pwm.set_frequency(Hertz(hardware.pwm_frequency_hz));
        pwm.ch1().set_duty_cycle_fully_off();
        pwm.ch1().enable();

        for line in [self.mains, self.ups] {
            line.configure(hardware.debounce_window_ms, profile.edge_for(line.input()));
        }
        Ok(())
    }
}
