use core::sync::atomic::Ordering;

use embassy_executor::task;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::AnyPin;
use embassy_time::Instant;
use kestrel_core::rc;

use crate::RC_PULSE_US;

/// RC pulse capture, one task instance per channel.
///
/// Timestamps the rising edge, measures the width on the falling edge and
/// publishes the clamped value into the channel's shared cell. Nothing
/// else touches the cell from this side.
#[task(pool_size = 4)]
pub async fn rc_capture_task(mut pin: ExtiInput<'static, AnyPin>, channel: usize) {
    loop {
        pin.wait_for_rising_edge().await;
        let rise = Instant::now();
        pin.wait_for_falling_edge().await;
        let width_us = (Instant::now() - rise).as_micros();

        RC_PULSE_US[channel].store(rc::clamp_pulse(width_us), Ordering::Relaxed);
    }
}
