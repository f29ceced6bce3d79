//! Dual-axis attitude regulator: two independent PID loops for roll and
//! pitch. Yaw is pilot pass-through and never regulated.
//!
//! The anti-windup is deliberately blunt: the integrator zeroes whenever the
//! error changes sign or sits inside a 5° band around the setpoint. Keep it
//! that way; the handling feel of the airframe is tuned around it.

use crate::state::{Attitude, PidGains};

/// Integrator clamp, per axis.
const MAX_INTEGRAL: f32 = 100.0;
/// Error band inside which the integrator is zeroed, degrees.
const INTEGRAL_RESET_THRESHOLD: f32 = 5.0;
/// Output clamp, per axis.
const MAX_OUTPUT: f32 = 350.0;

/// Stick dead-band around center, µs.
const STICK_DEADBAND_US: i32 = 1;
/// Full stick deflection maps to this angle, degrees.
const MAX_ANGLE_DEG: f32 = 20.0;

struct Axis {
    integral: f32,
    prev_error: f32,
}

impl Axis {
    const fn new() -> Self {
        Self {
            integral: 0.0,
            prev_error: 0.0,
        }
    }

    fn step(&mut self, error: f32, dt: f32, kp: f32, ki: f32, kd: f32) -> f32 {
        let p = kp * error;

        self.integral = (self.integral + error * dt).clamp(-MAX_INTEGRAL, MAX_INTEGRAL);
        if error * self.prev_error < 0.0 || error.abs() < INTEGRAL_RESET_THRESHOLD {
            self.integral = 0.0;
        }
        let i = ki * self.integral;

        let d = kd * (error - self.prev_error) / dt;
        self.prev_error = error;

        (p + i + d).clamp(-MAX_OUTPUT, MAX_OUTPUT)
    }
}

pub struct AttitudeRegulator {
    gains: PidGains,
    desired_roll: f32,
    desired_pitch: f32,
    roll: Axis,
    pitch: Axis,
}

impl AttitudeRegulator {
    pub const fn new(gains: PidGains) -> Self {
        Self {
            gains,
            desired_roll: 0.0,
            desired_pitch: 0.0,
            roll: Axis::new(),
            pitch: Axis::new(),
        }
    }

    /// Map the pilot sticks to desired angles: dead-band around 1500 µs,
    /// the remainder linear onto ±20°.
    pub fn update_desired(&mut self, rc_roll_us: u16, rc_pitch_us: u16) {
        self.desired_roll = stick_to_angle(rc_roll_us);
        self.desired_pitch = stick_to_angle(rc_pitch_us);
    }

    /// One regulation step against the measured attitude. Returns
    /// (roll_cmd, pitch_cmd), each clamped to ±350.
    pub fn compute(&mut self, attitude: &Attitude, dt: f32) -> (f32, f32) {
        let roll_error = self.desired_roll - attitude.roll;
        let pitch_error = self.desired_pitch - attitude.pitch;

        let roll_cmd = self.roll.step(
            roll_error,
            dt,
            self.gains.kp_r,
            self.gains.ki_r,
            self.gains.kd_r,
        );
        let pitch_cmd = self.pitch.step(
            pitch_error,
            dt,
            self.gains.kp_p,
            self.gains.ki_p,
            self.gains.kd_p,
        );

        (roll_cmd, pitch_cmd)
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn desired(&self) -> (f32, f32) {
        (self.desired_roll, self.desired_pitch)
    }

    #[cfg(test)]
    fn integrals(&self) -> (f32, f32) {
        (self.roll.integral, self.pitch.integral)
    }
}

fn stick_to_angle(us: u16) -> f32 {
    let centered = us as i32 - 1500;
    if centered.abs() <= STICK_DEADBAND_US {
        0.0
    } else {
        centered as f32 * (MAX_ANGLE_DEG / 500.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.0142;

    fn gains(kp: f32, ki: f32, kd: f32) -> PidGains {
        PidGains {
            kp_r: kp,
            ki_r: ki,
            kd_r: kd,
            kp_p: kp,
            ki_p: ki,
            kd_p: kd,
        }
    }

    fn level() -> Attitude {
        Attitude::default()
    }

    fn value_close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    /// Desired equals measured with clean state: output must be exactly zero.
    #[test]
    fn zero_at_setpoint() {
        let mut pid = AttitudeRegulator::new(gains(3.0, 1.0, 4.0));
        pid.update_desired(1500, 1500);
        let (roll_cmd, pitch_cmd) = pid.compute(&level(), DT);
        assert!(value_close(roll_cmd, 0.0));
        assert!(value_close(pitch_cmd, 0.0));
    }

    /// Stick inputs inside the ±1 µs dead-band command zero angle.
    #[test]
    fn deadband_zeroes_desired() {
        let mut pid = AttitudeRegulator::new(gains(3.0, 0.0, 0.0));
        for us in [1499, 1500, 1501] {
            pid.update_desired(us, us);
            let (r, p) = pid.desired();
            assert!(value_close(r, 0.0) && value_close(p, 0.0), "{us}");
        }
        // Just outside the band the mapping is live
        pid.update_desired(1502, 1498);
        let (r, p) = pid.desired();
        assert!(r > 0.0 && p < 0.0);
    }

    /// Full roll stick on a level airframe, first tick, P-only gains:
    /// desired +20°, output Kp·20 = 60, mix-ready.
    #[test]
    fn full_roll_stick_first_tick() {
        let mut pid = AttitudeRegulator::new(gains(3.0, 0.0, 0.0));
        pid.update_desired(2000, 1500);
        let (r, p) = pid.desired();
        assert!(value_close(r, 20.0) && value_close(p, 0.0));

        let (roll_cmd, pitch_cmd) = pid.compute(&level(), DT);
        assert!(value_close(roll_cmd, 60.0), "roll_cmd {roll_cmd}");
        assert!(value_close(pitch_cmd, 0.0));
    }

    /// Tilted −10° with a neutral stick: error +10°, outside the reset
    /// band, so P dominates on the first tick.
    #[test]
    fn tilt_with_neutral_stick() {
        let mut pid = AttitudeRegulator::new(gains(3.0, 0.0, 0.0));
        pid.update_desired(1500, 1500);
        let tilted = Attitude {
            roll: -10.0,
            ..Attitude::default()
        };
        let (roll_cmd, _) = pid.compute(&tilted, DT);
        assert!(value_close(roll_cmd, 30.0), "roll_cmd {roll_cmd}");
    }

    /// The integrator never exceeds ±100 no matter how long error persists.
    #[test]
    fn integral_clamps() {
        let mut pid = AttitudeRegulator::new(gains(0.0, 1.0, 0.0));
        pid.update_desired(2000, 2000); // +20° desired
        let tilted = Attitude {
            roll: -20.0,
            pitch: -20.0,
            ..Attitude::default()
        };
        // 40° of error for a long time
        for _ in 0..1000 {
            pid.compute(&tilted, 1.0);
            let (ir, ip) = pid.integrals();
            assert!(ir.abs() <= MAX_INTEGRAL && ip.abs() <= MAX_INTEGRAL);
        }
    }

    /// A sign change in the error zeroes the integrator for the next tick.
    #[test]
    fn integral_resets_on_zero_crossing() {
        let mut pid = AttitudeRegulator::new(gains(0.0, 1.0, 0.0));
        pid.update_desired(2000, 1500); // +20° roll desired
        let low = Attitude {
            roll: 10.0,
            ..Attitude::default()
        };
        pid.compute(&low, DT); // error +10, integral accumulates
        let (ir, _) = pid.integrals();
        assert!(ir > 0.0);

        let high = Attitude {
            roll: 30.0,
            ..Attitude::default()
        };
        pid.compute(&high, DT); // error −10: crossing, reset
        let (ir, _) = pid.integrals();
        assert!(value_close(ir, 0.0));
    }

    /// Inside the 5° band the integrator is held at exactly zero.
    #[test]
    fn integral_resets_inside_band() {
        let mut pid = AttitudeRegulator::new(gains(0.0, 1.0, 0.0));
        pid.update_desired(1500, 1500);
        let near = Attitude {
            roll: 4.0,
            ..Attitude::default()
        };
        for _ in 0..50 {
            pid.compute(&near, DT);
            let (ir, _) = pid.integrals();
            assert!(value_close(ir, 0.0));
        }
    }

    /// Output saturates at ±350 under absurd gains.
    #[test]
    fn output_clamps() {
        let mut pid = AttitudeRegulator::new(gains(1000.0, 0.0, 1000.0));
        pid.update_desired(2000, 1000);
        let (roll_cmd, pitch_cmd) = pid.compute(&level(), DT);
        assert!(value_close(roll_cmd, MAX_OUTPUT));
        assert!(value_close(pitch_cmd, -MAX_OUTPUT));
    }

    /// Runtime retune is visible through the getter and the next compute.
    #[test]
    fn retune_applies() {
        let mut pid = AttitudeRegulator::new(gains(3.0, 0.0, 0.0));
        let new = PidGains {
            kp_r: 1.2,
            ki_r: 1.0,
            kd_r: 4.0,
            kp_p: 1.2,
            ki_p: 1.0,
            kd_p: 4.0,
        };
        pid.set_gains(new);
        assert!(pid.gains() == new);
    }
}
