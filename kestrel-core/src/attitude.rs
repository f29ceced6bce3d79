//! Attitude filter: sensor fusion plus an outer complementary blend.
//!
//! The fusion quaternion tracks orientation; on top of it, each Euler axis
//! is blended with direct gyro integration so short-term motion follows the
//! gyro while the fusion output pins the long-term reference:
//!
//! `filtered = α · (filtered + rate · dt) + (1 − α) · fused`
//!
//! The IMU is mounted rotated 90° in the airframe, so the published roll is
//! the filter's pitch and vice-versa. The quaternion is published as-is.

use crate::ahrs::SensorFusion;
use crate::state::{Attitude, Sample};

/// Complementary blend weight on the gyro-integrated branch.
const BLEND_ALPHA: f32 = 0.98;

pub struct AttitudeFilter {
    fusion: SensorFusion,
    dt: f32,
    // Blended roll/pitch/yaw in fusion axes, degrees
    filtered: [f32; 3],
}

impl AttitudeFilter {
    pub fn new(update_rate_hz: f32) -> Self {
        Self {
            fusion: SensorFusion::new(update_rate_hz),
            dt: 1.0 / update_rate_hz,
            filtered: [0.0; 3],
        }
    }

    /// Run one filter step over a sample. The caller paces invocations at
    /// the configured update rate.
    pub fn process(&mut self, sample: &Sample) -> Attitude {
        // The fusion step takes deg/s; the IMU reports rad/s.
        let gyro_dps = [
            sample.gyro[0].to_degrees(),
            sample.gyro[1].to_degrees(),
            sample.gyro[2].to_degrees(),
        ];

        self.fusion.update(gyro_dps, sample.accel, sample.mag);
        let (roll_f, pitch_f, heading_f) = self.fusion.euler_deg();

        self.filtered[0] =
            BLEND_ALPHA * (self.filtered[0] + gyro_dps[0] * self.dt) + (1.0 - BLEND_ALPHA) * roll_f;
        self.filtered[1] = BLEND_ALPHA * (self.filtered[1] + gyro_dps[1] * self.dt)
            + (1.0 - BLEND_ALPHA) * pitch_f;
        self.filtered[2] = BLEND_ALPHA * (self.filtered[2] + gyro_dps[2] * self.dt)
            + (1.0 - BLEND_ALPHA) * heading_f;

        let q = self.fusion.quaternion();
        Attitude {
            // Mount swap: airframe roll is the filter's pitch axis
            roll: self.filtered[1],
            pitch: self.filtered[0],
            yaw: self.filtered[2],
            quaternion: [q.w, q.x, q.y, q.z],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE_HZ: f32 = 142.0;

    fn level_sample() -> Sample {
        Sample {
            accel: [0.0, 0.0, 9.81],
            gyro: [0.0; 3],
            mag: [0.22, 0.0, 0.41],
            temp_c: 25.0,
        }
    }

    /// A static, level airframe settles near zero on both published axes.
    #[test]
    fn level_sample_settles_level() {
        let mut filter = AttitudeFilter::new(RATE_HZ);
        let sample = level_sample();
        let mut attitude = Attitude::default();
        for _ in 0..3000 {
            attitude = filter.process(&sample);
        }
        assert!(attitude.roll.abs() < 1.5, "roll {}", attitude.roll);
        assert!(attitude.pitch.abs() < 1.5, "pitch {}", attitude.pitch);
    }

    /// A bank about the sensor's X axis must surface on the published
    /// *pitch* output (mount swap), not on roll.
    #[test]
    fn mount_swap_routes_sensor_roll_to_pitch() {
        let mut filter = AttitudeFilter::new(RATE_HZ);
        let tilted = Sample {
            accel: [0.0, 9.81 * 0.342, 9.81 * 0.94], // ~20° about X
            ..level_sample()
        };
        let mut attitude = Attitude::default();
        for _ in 0..6000 {
            attitude = filter.process(&tilted);
        }
        assert!(
            attitude.pitch > 10.0,
            "sensor-roll tilt should publish as pitch, got pitch {} roll {}",
            attitude.pitch,
            attitude.roll
        );
        assert!(attitude.roll.abs() < 5.0, "roll {}", attitude.roll);
    }

    /// The published quaternion stays unit-length after stabilization.
    #[test]
    fn published_quaternion_is_unit() {
        let mut filter = AttitudeFilter::new(RATE_HZ);
        let sample = level_sample();
        let mut attitude = Attitude::default();
        for _ in 0..500 {
            attitude = filter.process(&sample);
        }
        let [w, x, y, z] = attitude.quaternion;
        let norm = (w * w + x * x + y * y + z * z).sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
