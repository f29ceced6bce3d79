//! Mahony-class complementary sensor fusion over the 9-DoF sample.
//!
//! Accelerometer and magnetometer measurements correct the gyro-integrated
//! quaternion through a proportional-integral feedback on the estimated
//! gravity and field directions. The filter steps at a fixed configured
//! rate; gyro rates are presented in deg/s and converted internally.

use micromath::F32Ext;

#[derive(Clone, Copy, Debug)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

impl Quaternion {
    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Feedback gain on the direction error.
const FUSION_KP: f32 = 2.0;
/// Integral gain; soaks up gyro bias.
const FUSION_KI: f32 = 0.005;

pub struct SensorFusion {
    kp: f32,
    ki: f32,
    // Integral of the direction error, per axis
    fb_i: [f32; 3],
    // Fixed step, seconds
    dt: f32,
    q: Quaternion,
}

impl SensorFusion {
    /// `update_rate_hz` fixes the internal integration step; the caller is
    /// expected to invoke [`Self::update`] at that rate.
    pub fn new(update_rate_hz: f32) -> Self {
        Self {
            kp: FUSION_KP,
            ki: FUSION_KI,
            fb_i: [0.0; 3],
            dt: 1.0 / update_rate_hz,
            q: Quaternion::default(),
        }
    }

    pub fn quaternion(&self) -> &Quaternion {
        &self.q
    }

    /// Advance the filter by one step.
    ///
    /// `gyro_dps` in deg/s; `accel` and `mag` in any consistent unit (both
    /// are normalized). A zero-norm magnetometer degrades to 6-DoF for this
    /// step; a zero-norm accelerometer degrades to plain gyro integration.
    pub fn update(&mut self, gyro_dps: [f32; 3], accel: [f32; 3], mag: [f32; 3]) {
        let q0 = self.q.w;
        let q1 = self.q.x;
        let q2 = self.q.y;
        let q3 = self.q.z;

        let mut gx = gyro_dps[0].to_radians();
        let mut gy = gyro_dps[1].to_radians();
        let mut gz = gyro_dps[2].to_radians();

        let accel_norm_sq = accel[0] * accel[0] + accel[1] * accel[1] + accel[2] * accel[2];
        if accel_norm_sq > 0.0 {
            let recip = accel_norm_sq.sqrt().recip();
            let ax = accel[0] * recip;
            let ay = accel[1] * recip;
            let az = accel[2] * recip;

            // Estimated gravity direction from the current orientation
            let vx = 2.0 * (q1 * q3 - q0 * q2);
            let vy = 2.0 * (q0 * q1 + q2 * q3);
            let vz = q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3;

            let mut ex = ay * vz - az * vy;
            let mut ey = az * vx - ax * vz;
            let mut ez = ax * vy - ay * vx;

            let mag_norm_sq = mag[0] * mag[0] + mag[1] * mag[1] + mag[2] * mag[2];
            if mag_norm_sq > 0.0 {
                let recip = mag_norm_sq.sqrt().recip();
                let mx = mag[0] * recip;
                let my = mag[1] * recip;
                let mz = mag[2] * recip;

                // Reference direction of the Earth field in the body frame
                let hx = mx * (q0 * q0 + q1 * q1 - q2 * q2 - q3 * q3)
                    + my * (2.0 * (q1 * q2 - q0 * q3))
                    + mz * (2.0 * (q1 * q3 + q0 * q2));
                let hy = mx * (2.0 * (q1 * q2 + q0 * q3))
                    + my * (q0 * q0 - q1 * q1 + q2 * q2 - q3 * q3)
                    + mz * (2.0 * (q2 * q3 - q0 * q1));
                let bx = (hx * hx + hy * hy).sqrt();
                let bz = mx * (2.0 * (q1 * q3 - q0 * q2))
                    + my * (2.0 * (q2 * q3 + q0 * q1))
                    + mz * (q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3);

                let wx = 2.0 * bx * (0.5 - q2 * q2 - q3 * q3) + 2.0 * bz * (q1 * q3 - q0 * q2);
                let wy = 2.0 * bx * (q1 * q2 - q0 * q3) + 2.0 * bz * (q0 * q1 + q2 * q3);
                let wz = 2.0 * bx * (q0 * q2 + q1 * q3) + 2.0 * bz * (0.5 - q1 * q1 - q2 * q2);

                ex += my * wz - mz * wy;
                ey += mz * wx - mx * wz;
                ez += mx * wy - my * wx;
            }

            if self.ki > 0.0 {
                self.fb_i[0] += self.ki * ex * self.dt;
                self.fb_i[1] += self.ki * ey * self.dt;
                self.fb_i[2] += self.ki * ez * self.dt;
            }

            gx += self.kp * ex + self.fb_i[0];
            gy += self.kp * ey + self.fb_i[1];
            gz += self.kp * ez + self.fb_i[2];
        }

        // Integrate the quaternion rate of change
        let half_dt = 0.5 * self.dt;
        let (qa, qb, qc) = (q0, q1, q2);
        let mut q0 = q0 + (-qb * gx - qc * gy - q3 * gz) * half_dt;
        let mut q1 = q1 + (qa * gx + qc * gz - q3 * gy) * half_dt;
        let mut q2 = q2 + (qa * gy - qb * gz + q3 * gx) * half_dt;
        let mut q3 = q3 + (qa * gz + qb * gy - qc * gx) * half_dt;

        let recip = (q0 * q0 + q1 * q1 + q2 * q2 + q3 * q3).sqrt().recip();
        q0 *= recip;
        q1 *= recip;
        q2 *= recip;
        q3 *= recip;

        self.q = Quaternion {
            w: q0,
            x: q1,
            y: q2,
            z: q3,
        };
    }

    /// Euler angles (roll, pitch, heading) in degrees.
    pub fn euler_deg(&self) -> (f32, f32, f32) {
        let q0 = self.q.w;
        let q1 = self.q.x;
        let q2 = self.q.y;
        let q3 = self.q.z;

        let sinr_cosp = 2.0 * (q0 * q1 + q2 * q3);
        let cosr_cosp = 1.0 - 2.0 * (q1 * q1 + q2 * q2);
        let roll = sinr_cosp.atan2(cosr_cosp);

        let sinp = 2.0 * (q0 * q2 - q3 * q1);
        let pitch = if sinp.abs() >= 1.0 {
            core::f32::consts::FRAC_PI_2.copysign(sinp)
        } else {
            sinp.asin()
        };

        let siny_cosp = 2.0 * (q0 * q3 + q1 * q2);
        let cosy_cosp = 1.0 - 2.0 * (q2 * q2 + q3 * q3);
        let heading = siny_cosp.atan2(cosy_cosp);

        (roll.to_degrees(), pitch.to_degrees(), heading.to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE_HZ: f32 = 142.0;
    const GRAVITY: [f32; 3] = [0.0, 0.0, 9.81];
    // Roughly a mid-latitude field vector, gauss
    const FIELD: [f32; 3] = [0.22, 0.0, 0.41];

    fn settle(fusion: &mut SensorFusion, accel: [f32; 3], steps: usize) {
        for _ in 0..steps {
            fusion.update([0.0; 3], accel, FIELD);
        }
    }

    /// The quaternion stays unit-norm through extended operation.
    #[test]
    fn quaternion_stays_normalized() {
        let mut fusion = SensorFusion::new(RATE_HZ);
        for i in 0..2000 {
            let wobble = if i % 2 == 0 { 5.0 } else { -5.0 };
            fusion.update([wobble, -wobble, 1.0], GRAVITY, FIELD);
            let norm = fusion.quaternion().norm();
            assert!((norm - 1.0).abs() < 1e-3, "norm drifted to {norm}");
        }
    }

    /// A level, static airframe converges to zero roll and pitch.
    #[test]
    fn level_airframe_converges_level() {
        let mut fusion = SensorFusion::new(RATE_HZ);
        settle(&mut fusion, GRAVITY, 2000);
        let (roll, pitch, _) = fusion.euler_deg();
        assert!(roll.abs() < 1.0, "roll {roll}");
        assert!(pitch.abs() < 1.0, "pitch {pitch}");
    }

    /// Gravity splitting onto +Y reads as a positive bank about X.
    #[test]
    fn tilt_shows_up_on_the_roll_axis() {
        let mut fusion = SensorFusion::new(RATE_HZ);
        // 30° bank: gravity splits between Y and Z
        let tilted = [0.0, 9.81 * 0.5, 9.81 * 0.866];
        settle(&mut fusion, tilted, 4000);
        let (roll, pitch, _) = fusion.euler_deg();
        assert!((roll - 30.0).abs() < 3.0, "roll {roll}");
        assert!(pitch.abs() < 3.0, "pitch {pitch}");
    }

    /// With no usable accelerometer the filter still integrates gyro rate.
    #[test]
    fn gyro_only_integration_when_accel_dead() {
        let mut fusion = SensorFusion::new(100.0);
        // 10 deg/s about X for one second
        for _ in 0..100 {
            fusion.update([10.0, 0.0, 0.0], [0.0; 3], [0.0; 3]);
        }
        let (roll, _, _) = fusion.euler_deg();
        assert!((roll - 10.0).abs() < 0.5, "roll {roll}");
    }
}
