use embassy_stm32::i2c::{I2c, Instance, RxDma, TxDma};
use embassy_time::{Duration, Timer};

use super::SensorError;

pub const LSM6DS_ADDR: u8 = 0x6A;

const REG_WHO_AM_I: u8 = 0x0F;
const REG_CTRL1_XL: u8 = 0x10;
const REG_CTRL2_G: u8 = 0x11;
const REG_CTRL3_C: u8 = 0x12;
const REG_OUT_TEMP_L: u8 = 0x20;

const CHIP_ID: u8 = 0x6C;

// Accel: ODR 416 Hz, FS ±2 g
const CTRL1_XL_CFG: u8 = 0x60;
// Gyro: ODR 416 Hz, FS ±250 dps
const CTRL2_G_CFG: u8 = 0x60;
// Block data update + register auto-increment
const CTRL3_C_CFG: u8 = 0x44;

// Sensitivities at the configured full scales (datasheet table 3)
const ACCEL_G_PER_LSB: f32 = 0.000_061;
const GYRO_DPS_PER_LSB: f32 = 0.008_75;
const TEMP_LSB_PER_DEG_C: f32 = 256.0;
const TEMP_OFFSET_DEG_C: f32 = 25.0;
const STANDARD_GRAVITY: f32 = 9.806_65;

/// Accel + gyro half of the IMU.
pub struct Lsm6ds;

impl Lsm6ds {
    pub fn new() -> Self {
        Self
    }

    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), SensorError> {
        let mut id = [0u8; 1];
        i2c.blocking_write_read(LSM6DS_ADDR, &[REG_WHO_AM_I], &mut id)?;
        if id[0] != CHIP_ID {
            return Err(SensorError::BadChipId(id[0]));
        }

        i2c.blocking_write(LSM6DS_ADDR, &[REG_CTRL3_C, CTRL3_C_CFG])?;
        i2c.blocking_write(LSM6DS_ADDR, &[REG_CTRL1_XL, CTRL1_XL_CFG])?;
        i2c.blocking_write(LSM6DS_ADDR, &[REG_CTRL2_G, CTRL2_G_CFG])?;

        // First conversions settle within a couple of ODR periods
        Timer::after(Duration::from_millis(10)).await;
        Ok(())
    }

    /// Burst-read die temperature, gyro and accel in one transaction.
    /// Returns (accel m/s², gyro rad/s, temp °C).
    pub fn read<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<([f32; 3], [f32; 3], f32), SensorError> {
        let mut buf = [0u8; 14];
        i2c.blocking_write_read(LSM6DS_ADDR, &[REG_OUT_TEMP_L], &mut buf)?;

        let word = |i: usize| i16::from_le_bytes([buf[i], buf[i + 1]]);

        let temp_c = word(0) as f32 / TEMP_LSB_PER_DEG_C + TEMP_OFFSET_DEG_C;

        let gyro = [
            (word(2) as f32 * GYRO_DPS_PER_LSB).to_radians(),
            (word(4) as f32 * GYRO_DPS_PER_LSB).to_radians(),
            (word(6) as f32 * GYRO_DPS_PER_LSB).to_radians(),
        ];

        let accel = [
            word(8) as f32 * ACCEL_G_PER_LSB * STANDARD_GRAVITY,
            word(10) as f32 * ACCEL_G_PER_LSB * STANDARD_GRAVITY,
            word(12) as f32 * ACCEL_G_PER_LSB * STANDARD_GRAVITY,
        ];

        Ok((accel, gyro, temp_c))
    }
}
