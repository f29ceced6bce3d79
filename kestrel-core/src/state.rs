//! Shared data types flowing between the sensing, control and telemetry
//! stages of the loop.
//!
//! All types are `Copy` so a tick's snapshot can be handed around freely.

use serde::{Deserialize, Serialize};

// ── Sensor side ───────────────────────────────────────────────────────────────

/// One coherent 9-DoF sample plus the IMU die temperature.
///
/// Units: accel m/s², gyro rad/s, mag gauss. `Default` is the all-zero
/// sample a dead IMU degrades to.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub mag: [f32; 3],
    pub temp_c: f32,
}

#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaroReading {
    pub temp_c: f32,
    pub pressure_pa: f32,
    pub altitude_m: f32,
}

/// Filtered orientation, published per tick.
///
/// Euler angles are in degrees and already account for the sideways IMU
/// mount (the filter's pitch is the airframe's roll and vice-versa); the
/// quaternion is the raw fusion output, unswapped.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    /// Unit quaternion as [w, x, y, z].
    pub quaternion: [f32; 4],
}

// ── Control side ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp_r: f32,
    pub ki_r: f32,
    pub kd_r: f32,
    pub kp_p: f32,
    pub ki_p: f32,
    pub kd_p: f32,
}

/// Four ESC setpoints in µs, X layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorCommand {
    pub front_right: u16,
    pub back_right: u16,
    pub back_left: u16,
    pub front_left: u16,
}

impl MotorCommand {
    pub const fn idle(us: u16) -> Self {
        Self {
            front_right: us,
            back_right: us,
            back_left: us,
            front_left: us,
        }
    }

    pub fn as_array(&self) -> [u16; 4] {
        [
            self.front_right,
            self.back_right,
            self.back_left,
            self.front_left,
        ]
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// One outbound ground-station frame. Serialized as a single JSON object
/// per line; field order here is the wire order.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub elapsed_time: u32,
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    pub mag_x: f32,
    pub mag_y: f32,
    pub mag_z: f32,
    pub altitude: f32,
    pub temp: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub rc_throttle: u16,
    pub rc_yaw: u16,
    pub rc_pitch: u16,
    pub rc_roll: u16,
    pub front_right: u16,
    pub back_right: u16,
    pub back_left: u16,
    pub front_left: u16,
    pub kp_r: f32,
    pub ki_r: f32,
    pub kd_r: f32,
    pub kp_p: f32,
    pub ki_p: f32,
    pub kd_p: f32,
}
