use core::sync::atomic::Ordering;

use embassy_executor::task;
use embassy_time::{Duration, Instant, Ticker};
use kestrel_core::motor::THRUST_TIMEOUT_MS;

use crate::drivers::motors::MOTOR_PWM;
use crate::{DISABLE_MOTORS, LAST_THRUST_UPDATE_MS};

/// Motor deadman.
///
/// Fires on the thrust-timeout period and, whenever the supervisor has not
/// refreshed the setpoints within the window, latches the cut-off flag and
/// forces all four PWM outputs to idle. This task touches the motor-idle
/// path and nothing else; recovery is the supervisor re-enabling once its
/// own gates pass again.
#[task]
pub async fn motor_guard_task() {
    let mut ticker = Ticker::every(Duration::from_millis(THRUST_TIMEOUT_MS as u64));
    loop {
        ticker.next().await;

        let now_ms = Instant::now().as_millis() as u32;
        let last_ms = LAST_THRUST_UPDATE_MS.load(Ordering::Relaxed);
        if now_ms.wrapping_sub(last_ms) > THRUST_TIMEOUT_MS {
            let was_disabled = DISABLE_MOTORS.swap(true, Ordering::Relaxed);
            if !was_disabled {
                defmt::warn!("deadman: no thrust refresh in {} ms, idling motors", THRUST_TIMEOUT_MS);
            }
            MOTOR_PWM.lock(|cell| {
                if let Some(pwm) = cell.borrow_mut().as_mut() {
                    pwm.write_idle_all();
                }
            });
        }
    }
}
