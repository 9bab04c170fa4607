use embassy_stm32::exti::ExtiInput;
use embassy_time::Instant;

use crate::monitor::EdgeLine;

#[embassy_executor::task(pool_size = 2)]
pub async fn run(mut pin: ExtiInput<'static>, line: &'static EdgeLine) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        line.on_level_change(pin.is_high(), Instant::now().as_millis());
    }
}
