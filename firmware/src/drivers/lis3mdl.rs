use embassy_stm32::i2c::{I2c, Instance, RxDma, TxDma};
use embassy_time::Timer;

use super::SensorError;

pub const LIS3MDL_ADDR: u8 = 0x1C;

const REG_WHO_AM_I: u8 = 0x0F;
const REG_CTRL_REG1: u8 = 0x20;
const REG_CTRL_REG2: u8 = 0x21;
const REG_CTRL_REG3: u8 = 0x22;
const REG_CTRL_REG4: u8 = 0x23;
const REG_OUT_X_L: u8 = 0x28;
// MSB of the register address enables auto-increment on this part
const AUTO_INCREMENT: u8 = 0x80;

const CHIP_ID: u8 = 0x3D;

// XY in high-performance mode with FAST_ODR: 300 Hz
const CTRL_REG1_CFG: u8 = 0x42;
// FS ±4 gauss
const CTRL_REG2_CFG: u8 = 0x00;
// Continuous-conversion mode
const CTRL_REG3_CFG: u8 = 0x00;
// Z axis matched to the XY performance mode
const CTRL_REG4_CFG: u8 = 0x08;

// ±4 gauss full scale
const LSB_PER_GAUSS: f32 = 6842.0;

/// Magnetometer half of the IMU.
pub struct Lis3mdl;

impl Lis3mdl {
    pub fn new() -> Self {
        Self
    }

    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), SensorError> {
        let mut id = [0u8; 1];
        i2c.blocking_write_read(LIS3MDL_ADDR, &[REG_WHO_AM_I], &mut id)?;
        if id[0] != CHIP_ID {
            return Err(SensorError::BadChipId(id[0]));
        }

        i2c.blocking_write(LIS3MDL_ADDR, &[REG_CTRL_REG1, CTRL_REG1_CFG])?;
        i2c.blocking_write(LIS3MDL_ADDR, &[REG_CTRL_REG2, CTRL_REG2_CFG])?;
        i2c.blocking_write(LIS3MDL_ADDR, &[REG_CTRL_REG4, CTRL_REG4_CFG])?;
        i2c.blocking_write(LIS3MDL_ADDR, &[REG_CTRL_REG3, CTRL_REG3_CFG])?;

        Timer::after_millis(10).await;
        Ok(())
    }

    /// Field strength in gauss on each axis.
    pub fn read<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<[f32; 3], SensorError> {
        let mut buf = [0u8; 6];
        i2c.blocking_write_read(LIS3MDL_ADDR, &[REG_OUT_X_L | AUTO_INCREMENT], &mut buf)?;

        let word = |i: usize| i16::from_le_bytes([buf[i], buf[i + 1]]);

        Ok([
            word(0) as f32 / LSB_PER_GAUSS,
            word(2) as f32 / LSB_PER_GAUSS,
            word(4) as f32 / LSB_PER_GAUSS,
        ])
    }
}
