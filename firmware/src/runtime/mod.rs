use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, SendSpawner, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, OutputType, Pull, Speed};
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_sync::channel::Channel;
use static_cell::StaticCell;
use tester_core::config::{ConfigProvider, TesterSettings};
use tester_core::kinds::TestKind;
use tester_core::lifecycle::{Lifecycle, TaskLauncher, TaskRole, TaskSpec};
use tester_core::monitor::SenseInput;
use tester_core::orchestrator::TestOrchestrator;
use tester_core::telemetry::TelemetryRecorder;

use crate::hw::{BenchSetup, HardwareLoadBanks, HardwareTestSignals, StagedLoadBanks};
use crate::monitor::EdgeLine;
use crate::tester::orchestrator::OrchestratorTask;
use crate::tester::{CaptureBus, RequestQueue, TestRequest};

mod edge_task;
mod monitor_task;
mod orchestrator_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static CAPTURE_BUS: CaptureBus = CaptureBus::new();
pub(super) static MAINS_LINE: EdgeLine = EdgeLine::new(SenseInput::Mains);
pub(super) static UPS_LINE: EdgeLine = EdgeLine::new(SenseInput::Ups);
pub(super) static REQUEST_QUEUE: RequestQueue = Channel::new();

static TELEMETRY: StaticCell<TelemetryRecorder> = StaticCell::new();

/// EXTI edge tasks: highest priority, preempt everything else.
static EDGE_EXECUTOR: InterruptExecutor = InterruptExecutor::new();
/// Monitor tasks: preempt the orchestrator on the thread executor.
static MONITOR_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[hal::interrupt]
unsafe fn USART3_4_5_6_LPUART1() {
    unsafe { EDGE_EXECUTOR.on_interrupt() }
}

#[hal::interrupt]
unsafe fn SPI2_SPI3() {
    unsafe { MONITOR_EXECUTOR.on_interrupt() }
}

/// Test kind armed at boot.
const KIND: TestKind = TestKind::SwitchingTime;

/// Spawns each task role on the executor matching its priority.
struct ExecutorLauncher<'a> {
    thread: Spawner,
    edges: SendSpawner,
    monitors: SendSpawner,
    settings: TesterSettings,
    mains_pin: Option<ExtiInput<'static>>,
    ups_pin: Option<ExtiInput<'static>>,
    loads: &'a StagedLoadBanks<'static>,
    signals: Option<HardwareTestSignals<'static>>,
    telemetry: Option<&'static mut TelemetryRecorder>,
}

impl ExecutorLauncher<'_> {
    fn launch_monitor(
        &mut self,
        role: TaskRole,
        pin: Option<ExtiInput<'static>>,
        line: &'static EdgeLine,
    ) -> Result<(), TaskRole> {
        let pin = pin.ok_or(role)?;
        self.edges
            .spawn(edge_task::run(pin, line))
            .map_err(|_| role)?;
        self.monitors
            .spawn(monitor_task::run(line, &CAPTURE_BUS))
            .map_err(|_| role)
    }

    fn launch_orchestrator(&mut self, role: TaskRole) -> Result<(), TaskRole> {
        let loads = self.loads.borrow_mut().take().ok_or(role)?;
        let signals = self.signals.take().ok_or(role)?;
        let telemetry = self.telemetry.take().ok_or(role)?;

        let orchestrator = TestOrchestrator::with_drivers(KIND, self.settings, loads, signals);
        let task = OrchestratorTask::new(
            orchestrator,
            &CAPTURE_BUS,
            [&MAINS_LINE, &UPS_LINE],
            REQUEST_QUEUE.receiver(),
            telemetry,
        );
        self.thread
            .spawn(orchestrator_task::run(task))
            .map_err(|_| role)
    }
}

impl TaskLauncher for ExecutorLauncher<'_> {
    fn launch(&mut self, spec: TaskSpec) -> Result<(), TaskRole> {
        defmt::info!(
            "runtime: launching {} (priority {})",
            spec.role.label(),
            spec.params.priority
        );
        match spec.role {
            TaskRole::MainsMonitor => {
                let pin = self.mains_pin.take();
                self.launch_monitor(spec.role, pin, &MAINS_LINE)
            }
            TaskRole::UpsMonitor => {
                let pin = self.ups_pin.take();
                self.launch_monitor(spec.role, pin, &UPS_LINE)
            }
            TaskRole::Orchestrator => self.launch_orchestrator(spec.role),
        }
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA6,
        PA8,
        PA9,
        PA10,
        PA15,
        PB3,
        PB4,
        EXTI0,
        EXTI1,
        TIM3,
        ..
    } = hal::init(config);

    let provider = TesterSettings::default();
    let settings = provider.settings();

    let pwm = SimplePwm::new(
        TIM3,
        Some(PwmPin::new(PA6, OutputType::PushPull)),
        None,
        None,
        None,
        Hertz(settings.hardware.pwm_frequency_hz),
        CountingMode::EdgeAlignedUp,
    );
    let loads: StagedLoadBanks<'static> = RefCell::new(Some(HardwareLoadBanks::new(
        pwm,
        [
            Output::new(PA8, Level::Low, Speed::Low),
            Output::new(PA9, Level::Low, Speed::Low),
            Output::new(PA10, Level::Low, Speed::Low),
            Output::new(PA15, Level::Low, Speed::Low),
        ],
    )));
    let signals = HardwareTestSignals::new(
        Output::new(PB3, Level::Low, Speed::Low),
        Output::new(PB4, Level::Low, Speed::Low),
    );

    hal::interrupt::USART3_4_5_6_LPUART1.set_priority(Priority::P1);
    let edges = EDGE_EXECUTOR.start(hal::interrupt::USART3_4_5_6_LPUART1);
    hal::interrupt::SPI2_SPI3.set_priority(Priority::P2);
    let monitors = MONITOR_EXECUTOR.start(hal::interrupt::SPI2_SPI3);

    let mut setup = BenchSetup::new(&loads, &MAINS_LINE, &UPS_LINE);
    let mut launcher = ExecutorLauncher {
        thread: spawner,
        edges,
        monitors,
        settings,
        mains_pin: Some(ExtiInput::new(PA0, EXTI0, Pull::Up)),
        ups_pin: Some(ExtiInput::new(PA1, EXTI1, Pull::Up)),
        loads: &loads,
        signals: Some(signals),
        telemetry: Some(TELEMETRY.init(TelemetryRecorder::new())),
    };

    let mut lifecycle = Lifecycle::new();
    if let Err(error) = lifecycle.init(&provider, KIND, &CAPTURE_BUS, &mut setup, &mut launcher) {
        defmt::error!(
            "runtime: bring-up failed after {} task(s): {}",
            lifecycle.launched(),
            defmt::Display2Format(&error)
        );
        core::future::pending::<()>().await;
    }

    REQUEST_QUEUE
        .send(TestRequest::new(KIND, settings.spec.rated_va))
        .await;

    core::future::pending::<()>().await;
}
