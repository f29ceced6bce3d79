use embassy_stm32::i2c::{I2c, Instance, RxDma, TxDma};
use embassy_time::{Duration, Timer};
use kestrel_core::state::BaroReading;
use micromath::F32Ext;

use super::SensorError;

pub const BMP390_ADDR: u8 = 0x77;

const REG_CHIP_ID: u8 = 0x00;
const REG_DATA: u8 = 0x04;
const REG_PWR_CTRL: u8 = 0x1B;
const REG_OSR: u8 = 0x1C;
const REG_ODR: u8 = 0x1D;
const REG_CONFIG: u8 = 0x1F;
const REG_CAL: u8 = 0x31;
const REG_CMD: u8 = 0x7E;

const CHIP_ID: u8 = 0x60;
const CMD_SOFT_RESET: u8 = 0xB6;

// Pressure + temperature enabled, normal mode
const PWR_CTRL_CFG: u8 = 0x33;
// Pressure x8 oversampling, temperature x1
const OSR_CFG: u8 = 0x03;
// 50 Hz output data rate
const ODR_CFG: u8 = 0x02;
// IIR filter coefficient 3
const CONFIG_CFG: u8 = 0x04;

/// Retry spacing while the sensor refuses to come up.
const RETRY_DELAY_MS: u64 = 3000;

const SEA_LEVEL_PA: f32 = 101_325.0;

/// Trimming coefficients from NVM, already scaled to their float form
/// (datasheet section 8.4).
#[derive(Default, Clone, Copy)]
struct Bmp390Coeffs {
    par_t1: f32,
    par_t2: f32,
    par_t3: f32,
    par_p1: f32,
    par_p2: f32,
    par_p3: f32,
    par_p4: f32,
    par_p5: f32,
    par_p6: f32,
    par_p7: f32,
    par_p8: f32,
    par_p9: f32,
    par_p10: f32,
    par_p11: f32,
}

pub struct Bmp390 {
    coeffs: Bmp390Coeffs,
    // Added to the hypsometric altitude so reports are absolute
    altitude_offset_m: f32,
}

impl Bmp390 {
    pub fn new() -> Self {
        Self {
            coeffs: Bmp390Coeffs::default(),
            altitude_offset_m: 0.0,
        }
    }

    /// Bring the sensor up, blocking until it acknowledges; bus errors and
    /// chip-id mismatches are logged and retried every 3 s. Once configured,
    /// the first reading is compared against the surveyed field altitude to
    /// anchor the altitude output.
    pub async fn begin<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
        reference_altitude_m: f32,
    ) {
        loop {
            match self.probe(i2c).await {
                Ok(()) => break,
                Err(e) => {
                    defmt::warn!("baro init retry: {}", defmt::Debug2Format(&e));
                    Timer::after(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
            }
        }

        loop {
            match self.read(i2c) {
                Ok(reading) => {
                    self.altitude_offset_m = reference_altitude_m - reading.altitude_m;
                    break;
                }
                Err(e) => {
                    defmt::warn!("baro calibration retry: {}", defmt::Debug2Format(&e));
                    Timer::after(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
            }
        }
    }

    async fn probe<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), SensorError> {
        i2c.blocking_write(BMP390_ADDR, &[REG_CMD, CMD_SOFT_RESET])?;
        Timer::after(Duration::from_millis(10)).await;

        let mut id = [0u8; 1];
        i2c.blocking_write_read(BMP390_ADDR, &[REG_CHIP_ID], &mut id)?;
        if id[0] != CHIP_ID {
            return Err(SensorError::BadChipId(id[0]));
        }

        self.read_coeffs(i2c)?;

        i2c.blocking_write(BMP390_ADDR, &[REG_OSR, OSR_CFG])?;
        i2c.blocking_write(BMP390_ADDR, &[REG_ODR, ODR_CFG])?;
        i2c.blocking_write(BMP390_ADDR, &[REG_CONFIG, CONFIG_CFG])?;
        i2c.blocking_write(BMP390_ADDR, &[REG_PWR_CTRL, PWR_CTRL_CFG])?;

        // First conversion at this ODR
        Timer::after(Duration::from_millis(50)).await;
        Ok(())
    }

    fn read_coeffs<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), SensorError> {
        let mut buf = [0u8; 21];
        i2c.blocking_write_read(BMP390_ADDR, &[REG_CAL], &mut buf)?;

        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]) as f32;
        let i16_at = |i: usize| i16::from_le_bytes([buf[i], buf[i + 1]]) as f32;
        let i8_at = |i: usize| buf[i] as i8 as f32;

        // Scale factors from the datasheet's floating-point compensation
        self.coeffs = Bmp390Coeffs {
            par_t1: u16_at(0) * 256.0,                        // / 2^-8
            par_t2: u16_at(2) / 1_073_741_824.0,              // / 2^30
            par_t3: i8_at(4) / 281_474_976_710_656.0,         // / 2^48
            par_p1: (i16_at(5) - 16_384.0) / 1_048_576.0,     // / 2^20
            par_p2: (i16_at(7) - 16_384.0) / 536_870_912.0,   // / 2^29
            par_p3: i8_at(9) / 4_294_967_296.0,               // / 2^32
            par_p4: i8_at(10) / 137_438_953_472.0,            // / 2^37
            par_p5: u16_at(11) * 8.0,                         // / 2^-3
            par_p6: u16_at(13) / 64.0,                        // / 2^6
            par_p7: i8_at(15) / 256.0,                        // / 2^8
            par_p8: i8_at(16) / 32_768.0,                     // / 2^15
            par_p9: i16_at(17) / 281_474_976_710_656.0,       // / 2^48
            par_p10: i8_at(19) / 281_474_976_710_656.0,       // / 2^48
            par_p11: i8_at(20) / 36_893_488_147_419_103_232.0, // / 2^65
        };

        Ok(())
    }

    fn compensate_temperature(&self, raw: u32) -> f32 {
        let c = &self.coeffs;
        let partial1 = raw as f32 - c.par_t1;
        let partial2 = partial1 * c.par_t2;
        partial2 + partial1 * partial1 * c.par_t3
    }

    fn compensate_pressure(&self, raw: u32, t_lin: f32) -> f32 {
        let c = &self.coeffs;
        let p_raw = raw as f32;

        let partial1 = c.par_p6 * t_lin;
        let partial2 = c.par_p7 * t_lin * t_lin;
        let partial3 = c.par_p8 * t_lin * t_lin * t_lin;
        let out1 = c.par_p5 + partial1 + partial2 + partial3;

        let partial1 = c.par_p2 * t_lin;
        let partial2 = c.par_p3 * t_lin * t_lin;
        let partial3 = c.par_p4 * t_lin * t_lin * t_lin;
        let out2 = p_raw * (c.par_p1 + partial1 + partial2 + partial3);

        let partial1 = p_raw * p_raw;
        let partial2 = c.par_p9 + c.par_p10 * t_lin;
        let partial3 = partial1 * partial2;
        let out3 = partial3 + p_raw * p_raw * p_raw * c.par_p11;

        out1 + out2 + out3
    }

    /// Compensated temperature, pressure and calibrated altitude.
    pub fn read<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<BaroReading, SensorError> {
        let mut buf = [0u8; 6];
        i2c.blocking_write_read(BMP390_ADDR, &[REG_DATA], &mut buf)?;

        let raw_p = u32::from(buf[0]) | u32::from(buf[1]) << 8 | u32::from(buf[2]) << 16;
        let raw_t = u32::from(buf[3]) | u32::from(buf[4]) << 8 | u32::from(buf[5]) << 16;

        let temp_c = self.compensate_temperature(raw_t);
        let pressure_pa = self.compensate_pressure(raw_p, temp_c);

        // Hypsometric formula against standard sea level
        let altitude_m =
            44_330.0 * (1.0 - (pressure_pa / SEA_LEVEL_PA).powf(1.0 / 5.255)) + self.altitude_offset_m;

        Ok(BaroReading {
            temp_c,
            pressure_pa,
            altitude_m,
        })
    }
}
