use core::cell::RefCell;
use core::sync::atomic::Ordering;

use embassy_stm32::peripherals::TIM3;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_stm32::timer::Channel as PwmChannel;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;
use kestrel_core::motor::{self, MotorBank};
use kestrel_core::state::MotorCommand;

use crate::drivers::receiver::RcInput;
use crate::{DISABLE_MOTORS, LAST_THRUST_UPDATE_MS};

const MOTOR_CHANNELS: [PwmChannel; 4] = [
    PwmChannel::Ch1, // front right
    PwmChannel::Ch2, // back right
    PwmChannel::Ch3, // back left
    PwmChannel::Ch4, // front left
];

/// The four ESC outputs behind one timer.
pub struct MotorPwm {
    pwm: SimplePwm<'static, TIM3>,
}

impl MotorPwm {
    fn new(mut pwm: SimplePwm<'static, TIM3>) -> Self {
        for channel in MOTOR_CHANNELS {
            pwm.enable(channel);
        }
        Self { pwm }
    }

    fn write(&mut self, channel: PwmChannel, us: u16) {
        // Setpoint → 8-bit analog duty, scaled onto the timer resolution
        let level = motor::duty_for(us) as u32;
        let max = self.pwm.get_max_duty() as u32;
        let duty = (level * max / 255) as u16;
        self.pwm.set_duty(channel, duty.into());
    }

    pub fn write_all(&mut self, cmd: MotorCommand) {
        for (channel, us) in MOTOR_CHANNELS.into_iter().zip(cmd.as_array()) {
            self.write(channel, us);
        }
    }

    pub fn write_idle_all(&mut self) {
        self.write_all(MotorCommand::idle(motor::MIN_THROTTLE));
    }
}

/// Shared with the deadman guard, which forces idle from its own task.
/// The worst interleaving with the control loop is one overwritten PWM
/// update, rewritten on the next tick.
pub static MOTOR_PWM: Mutex<CriticalSectionRawMutex, RefCell<Option<MotorPwm>>> =
    Mutex::new(RefCell::new(None));

/// Supervisor-side handle: the [`MotorBank`] state machine plus the glue
/// that mirrors its state into the shared cells and the PWM peripheral.
pub struct Motors {
    bank: MotorBank,
}

impl Motors {
    /// Park the outputs at idle and hand the timer to the shared cell.
    /// The bank starts Disabled.
    pub fn init(pwm: SimplePwm<'static, TIM3>) -> Self {
        let mut pwm = MotorPwm::new(pwm);
        pwm.write_idle_all();
        MOTOR_PWM.lock(|cell| *cell.borrow_mut() = Some(pwm));
        DISABLE_MOTORS.store(true, Ordering::Relaxed);
        Self {
            bank: MotorBank::new(),
        }
    }

    fn apply_outputs(&self) {
        let outputs = self.bank.outputs();
        MOTOR_PWM.lock(|cell| {
            if let Some(pwm) = cell.borrow_mut().as_mut() {
                pwm.write_all(outputs);
            }
        });
    }

    /// Push a full setpoint command to the ESCs. Returns false when the
    /// command was rejected and the bank tripped to Disabled.
    pub fn set_all(&mut self, cmd: MotorCommand) -> bool {
        // The guard may have tripped the cut-off between ticks
        if DISABLE_MOTORS.load(Ordering::Relaxed) {
            self.bank.disable();
        }

        let now_ms = Instant::now().as_millis() as u32;
        let accepted = self.bank.set_all(cmd, now_ms).is_ok();
        if accepted {
            LAST_THRUST_UPDATE_MS.store(now_ms, Ordering::Relaxed);
        } else {
            DISABLE_MOTORS.store(true, Ordering::Relaxed);
        }
        self.apply_outputs();
        accepted
    }

    /// Last accepted setpoints, for telemetry.
    pub fn get_all(&self) -> MotorCommand {
        self.bank.thrust()
    }

    pub fn disable(&mut self) {
        self.bank.disable();
        DISABLE_MOTORS.store(true, Ordering::Relaxed);
        self.apply_outputs();
    }

    /// Arm, gated on the throttle stick being observed at idle right now.
    pub fn enable(&mut self, rc: &RcInput) {
        if rc.is_throttle_low() {
            self.bank.enable(true);
            DISABLE_MOTORS.store(false, Ordering::Relaxed);
        }
    }
}
