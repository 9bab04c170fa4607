use crate::monitor::{self, EdgeLine};
use crate::tester::CaptureBus;

#[embassy_executor::task(pool_size = 2)]
pub async fn run(line: &'static EdgeLine, bus: &'static CaptureBus) -> ! {
    monitor::watch(line, bus).await
}
