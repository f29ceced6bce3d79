pub mod bmp390;
pub mod lis3mdl;
pub mod lsm6ds;
pub mod motors;
pub mod receiver;

use embassy_stm32::i2c;

/// Failure modes shared by the I²C sensor drivers.
#[derive(Debug)]
pub enum SensorError {
    Bus(i2c::Error),
    /// The device answered with an unexpected identification register.
    BadChipId(u8),
}

impl From<i2c::Error> for SensorError {
    fn from(err: i2c::Error) -> Self {
        Self::Bus(err)
    }
}
