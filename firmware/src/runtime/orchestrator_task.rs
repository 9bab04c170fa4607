use crate::hw::{HardwareLoadBanks, HardwareTestSignals};
use crate::tester::orchestrator::OrchestratorTask;

pub type FirmwareOrchestratorTask =
    OrchestratorTask<'static, HardwareLoadBanks<'static>, HardwareTestSignals<'static>>;

#[embassy_executor::task]
pub async fn run(task: FirmwareOrchestratorTask) -> ! {
    task.serve().await
}
