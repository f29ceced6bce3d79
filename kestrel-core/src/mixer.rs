//! X-configuration motor mixer.
//!
//! Combines collective throttle with the two attitude commands into four
//! ESC setpoints. Outputs are clamped to the servo pulse domain; the lower
//! flight ceiling (MAX_THROTTLE) is enforced downstream by the motor
//! driver's acceptance gate, not here.

use crate::state::MotorCommand;

const PULSE_MIN: f32 = 1000.0;
const PULSE_MAX: f32 = 2000.0;

/// Mix throttle (µs) and roll/pitch commands into the four motor setpoints.
pub fn mix(throttle_us: u16, roll_cmd: f32, pitch_cmd: f32) -> MotorCommand {
    let throttle = throttle_us as f32;

    let front_right = throttle - roll_cmd + pitch_cmd;
    let back_right = throttle - roll_cmd - pitch_cmd;
    let back_left = throttle + roll_cmd - pitch_cmd;
    let front_left = throttle + roll_cmd + pitch_cmd;

    MotorCommand {
        front_right: clamp_pulse(front_right),
        back_right: clamp_pulse(back_right),
        back_left: clamp_pulse(back_left),
        front_left: clamp_pulse(front_left),
    }
}

fn clamp_pulse(value: f32) -> u16 {
    value.clamp(PULSE_MIN, PULSE_MAX) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every output stays inside [1000, 2000] across the whole command
    /// envelope, including throttle values far outside the pulse domain.
    #[test]
    fn outputs_always_clamped() {
        for throttle in (0..4000u16).step_by(37) {
            for roll in (-350..=350).step_by(25) {
                for pitch in (-350..=350).step_by(25) {
                    let out = mix(throttle, roll as f32, pitch as f32);
                    for v in out.as_array() {
                        assert!((1000..=2000).contains(&v), "t={throttle} r={roll} p={pitch} -> {v}");
                    }
                }
            }
        }
    }

    /// Without clamping active the mix is symmetric: diagonal pairs sum to
    /// 2·throttle, and the axis differentials recover 4× each command.
    #[test]
    fn unclamped_mix_is_symmetric() {
        for (throttle, roll, pitch) in [
            (1500u16, 0.0f32, 0.0f32),
            (1500, 100.0, -80.0),
            (1400, -200.0, 150.0),
            (1500, 300.0, -150.0),
        ] {
            let out = mix(throttle, roll, pitch);
            let [fr, br, bl, fl] = out.as_array().map(i32::from);
            let t2 = 2 * throttle as i32;
            assert_eq!(fr + bl, t2);
            assert_eq!(br + fl, t2);
            assert_eq!((fr + fl) - (br + bl), 4 * pitch as i32);
            assert_eq!((bl + fl) - (fr + br), 4 * roll as i32);
        }
    }

    /// Hover case: neutral commands pass throttle straight through.
    #[test]
    fn neutral_commands_pass_throttle() {
        let out = mix(1500, 0.0, 0.0);
        assert_eq!(out, MotorCommand::idle(1500));
    }

    /// A +60 roll command on a 1500 µs hover splits the X pairs by 60 µs.
    #[test]
    fn roll_command_splits_pairs() {
        let out = mix(1500, 60.0, 0.0);
        assert_eq!(out.front_right, 1440);
        assert_eq!(out.back_right, 1440);
        assert_eq!(out.back_left, 1560);
        assert_eq!(out.front_left, 1560);
    }
}
