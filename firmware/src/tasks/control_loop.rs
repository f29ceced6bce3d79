use core::fmt::Write;
use core::sync::atomic::Ordering;

use embassy_executor::task;
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH6, DMA1_CH7, DMA2_CH7, I2C1, USART1, USART2};
use embassy_stm32::usart::UartTx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Instant, Ticker, Timer};

use kestrel_core::attitude::AttitudeFilter;
use kestrel_core::link::{self, Command};
use kestrel_core::pid::AttitudeRegulator;
use kestrel_core::state::{BaroReading, PidGains, Sample, TelemetryRecord};
use kestrel_core::mixer;

use crate::drivers::bmp390::Bmp390;
use crate::drivers::lis3mdl::Lis3mdl;
use crate::drivers::lsm6ds::Lsm6ds;
use crate::drivers::motors::Motors;
use crate::drivers::receiver::RcInput;
use crate::tasks::link_task::LinkLine;
use crate::LAST_ENABLE_PING_MS;

// ── Loop constants ────────────────────────────────────────────────────────────

/// Fusion update rate; its ticker is the rate governor for the whole loop.
const FILTER_UPDATE_HERTZ: u64 = 142;
/// Nominal regulator step, seconds; the tuning assumes this value, not the
/// measured tick period.
const LOOP_DT_S: f32 = 0.0142;
/// A `command->enable_motors` heartbeat must arrive this often.
const ENABLE_PING_TIMEOUT_MS: u32 = 200;
/// Telemetry frames are spaced at least this far apart.
const TELEMETRY_MIN_INTERVAL_MS: u64 = 5;
/// Pre-flight publish cadence while waiting for `command->arm`.
const ARMING_PUBLISH_INTERVAL_MS: u64 = 400;
/// Debug-UART loop report every this many ticks.
const LOOP_REPORT_TICKS: u32 = 142;
/// Surveyed field altitude for barometer anchoring, meters.
const REFERENCE_ALTITUDE_M: f32 = 540.0;

/// Initial regulator gains; retunable at runtime over the link.
const INITIAL_GAINS: PidGains = PidGains {
    kp_r: 1.2,
    ki_r: 1.0,
    kd_r: 4.0,
    kp_p: 1.2,
    ki_p: 1.0,
    kd_p: 4.0,
};

type Bus = I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>;
type LinkTx = UartTx<'static, USART1, DMA2_CH7>;
type DebugTx = UartTx<'static, USART2, DMA1_CH6>;

// ── Task ─────────────────────────────────────────────────────────────────────

/// The supervisor: sensor bring-up, arming handshake, then the strict
/// per-tick sequence sense → filter → regulate → mix → actuate → telemeter.
#[task]
pub async fn control_loop_task(
    mut i2c: Bus,
    mut link_tx: LinkTx,
    mut debug_tx: DebugTx,
    lines: Receiver<'static, CriticalSectionRawMutex, LinkLine, 4>,
    mut motors: Motors,
) {
    // ── Sensor bring-up; a dead IMU degrades to zero samples ─────────────────
    let mut imu = Lsm6ds::new();
    if let Err(e) = imu.init(&mut i2c).await {
        defmt::warn!("lsm6ds init failed: {}", defmt::Debug2Format(&e));
        debug_line(&mut debug_tx, "fault", "lsm6ds_init").await;
    }

    let mut mag = Lis3mdl::new();
    if let Err(e) = mag.init(&mut i2c).await {
        defmt::warn!("lis3mdl init failed: {}", defmt::Debug2Format(&e));
        debug_line(&mut debug_tx, "fault", "lis3mdl_init").await;
    }

    // Blocks until the barometer answers, then anchors altitude
    let mut baro = Bmp390::new();
    baro.begin(&mut i2c, REFERENCE_ALTITUDE_M).await;

    let mut rc_input = RcInput::new();
    let mut filter = AttitudeFilter::new(FILTER_UPDATE_HERTZ as f32);
    let mut pid = AttitudeRegulator::new(INITIAL_GAINS);

    // ── Arming handshake: publish empty frames until `command->arm` ──────────
    defmt::info!("pre-flight hold, waiting for arm");
    debug_line(&mut debug_tx, "state", "waiting_for_arm").await;
    let mut publish = Ticker::every(Duration::from_millis(ARMING_PUBLISH_INTERVAL_MS));
    'armed: loop {
        while let Ok(line) = lines.try_receive() {
            if link::parse_line(&line) == Some(Command::Arm) {
                break 'armed;
            }
        }
        send_telemetry(&mut link_tx, &TelemetryRecord::default()).await;
        publish.next().await;
    }

    // Wired pilot frames from here on, starting from the safe sticks
    rc_input.enable_wired();
    defmt::info!("armed, entering control loop");
    debug_line(&mut debug_tx, "state", "armed").await;

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut gate = Ticker::every(Duration::from_hz(FILTER_UPDATE_HERTZ));
    let mut baro_reading = BaroReading::default();
    let mut last_telemetry = Instant::now();
    let mut tick: u32 = 0;

    loop {
        let tick_start = Instant::now();
        let now_ms = tick_start.as_millis() as u32;

        // 1. At most one inbound line per tick
        if let Ok(line) = lines.try_receive() {
            match link::parse_line(&line) {
                Some(Command::Abort) => {
                    defmt::warn!("abort commanded, idling forever");
                    debug_line(&mut debug_tx, "state", "abort").await;
                    motors.disable();
                    loop {
                        Timer::after(Duration::from_secs(1)).await;
                    }
                }
                Some(Command::Reboot) => {
                    defmt::warn!("reboot commanded");
                    motors.disable();
                    cortex_m::peripheral::SCB::sys_reset();
                }
                Some(Command::EnableMotors) => {
                    LAST_ENABLE_PING_MS.store(now_ms, Ordering::Relaxed);
                }
                Some(Command::Pid(gains)) => {
                    defmt::info!("pid retune");
                    pid.set_gains(gains);
                }
                Some(Command::Rc {
                    throttle,
                    yaw,
                    pitch,
                    roll,
                }) => {
                    rc_input.apply_wired_frame(throttle, yaw, pitch, roll);
                }
                Some(Command::Arm) => {}
                None => {
                    defmt::warn!("unparseable line: {}", line.as_str());
                }
            }
        }

        // 2. Liveness and arming gates
        let link_ok = rc_input.update(now_ms);
        let ping_age_ms = now_ms.wrapping_sub(LAST_ENABLE_PING_MS.load(Ordering::Relaxed));
        if !link_ok || ping_age_ms > ENABLE_PING_TIMEOUT_MS {
            motors.disable();
        } else {
            motors.enable(&rc_input);
        }

        // 3. Sense, then let the gate pace the fusion step
        let sample = read_imu(&mut imu, &mut mag, &mut i2c);
        if let Ok(reading) = baro.read(&mut i2c) {
            baro_reading = reading;
        }
        gate.next().await;
        let attitude = filter.process(&sample);

        // 4. Regulate and mix against the pilot setpoints
        pid.update_desired(rc_input.roll(), rc_input.pitch());
        let (roll_cmd, pitch_cmd) = pid.compute(&attitude, LOOP_DT_S);
        let command = mixer::mix(rc_input.throttle(), roll_cmd, pitch_cmd);

        // 5. Actuate; this refreshes the deadman
        if !motors.set_all(command) {
            defmt::warn!("motor setpoint rejected");
        }

        // 6. Telemetry for this tick
        if Instant::now() - last_telemetry
            >= Duration::from_millis(TELEMETRY_MIN_INTERVAL_MS)
        {
            let record = build_record(
                now_ms,
                &sample,
                &baro_reading,
                &attitude,
                &rc_input,
                &motors,
                &pid,
            );
            send_telemetry(&mut link_tx, &record).await;
            last_telemetry = Instant::now();
        }

        tick = tick.wrapping_add(1);
        if tick % LOOP_REPORT_TICKS == 0 {
            let loop_ms = (Instant::now() - tick_start).as_millis() as u32;
            debug_value(&mut debug_tx, "loop_ms", loop_ms).await;
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// One coherent 9-DoF sample; either chip failing degrades its half to
/// zeros rather than failing the tick.
fn read_imu(imu: &mut Lsm6ds, mag: &mut Lis3mdl, i2c: &mut Bus) -> Sample {
    let (accel, gyro, temp_c) = imu.read(i2c).unwrap_or_default();
    let mag_field = mag.read(i2c).unwrap_or_default();
    Sample {
        accel,
        gyro,
        mag: mag_field,
        temp_c,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    now_ms: u32,
    sample: &Sample,
    baro: &BaroReading,
    attitude: &kestrel_core::state::Attitude,
    rc_input: &RcInput,
    motors: &Motors,
    pid: &AttitudeRegulator,
) -> TelemetryRecord {
    let thrust = motors.get_all();
    let gains = pid.gains();

    TelemetryRecord {
        elapsed_time: now_ms,
        acc_x: sample.accel[0],
        acc_y: sample.accel[1],
        acc_z: sample.accel[2],
        // Gyro axes go out in deg/s
        gyro_x: sample.gyro[0].to_degrees(),
        gyro_y: sample.gyro[1].to_degrees(),
        gyro_z: sample.gyro[2].to_degrees(),
        mag_x: sample.mag[0],
        mag_y: sample.mag[1],
        mag_z: sample.mag[2],
        altitude: baro.altitude_m,
        temp: baro.temp_c,
        yaw: attitude.yaw,
        pitch: attitude.pitch,
        roll: attitude.roll,
        rc_throttle: rc_input.throttle(),
        rc_yaw: rc_input.yaw(),
        rc_pitch: rc_input.pitch(),
        rc_roll: rc_input.roll(),
        front_right: thrust.front_right,
        back_right: thrust.back_right,
        back_left: thrust.back_left,
        front_left: thrust.front_left,
        kp_r: gains.kp_r,
        ki_r: gains.ki_r,
        kd_r: gains.kd_r,
        kp_p: gains.kp_p,
        ki_p: gains.ki_p,
        kd_p: gains.kd_p,
    }
}

async fn send_telemetry(tx: &mut LinkTx, record: &TelemetryRecord) {
    let mut buf = [0u8; 512];
    if let Some(len) = link::encode_telemetry(record, &mut buf) {
        let _ = tx.write(&buf[..len]).await;
    }
}

/// `key: value` line on the operator debug UART.
async fn debug_line(tx: &mut DebugTx, key: &str, value: &str) {
    let mut msg = heapless::String::<64>::new();
    let _ = write!(msg, "{}: {}\r\n", key, value);
    let _ = tx.write(msg.as_bytes()).await;
}

async fn debug_value(tx: &mut DebugTx, key: &str, value: u32) {
    let mut msg = heapless::String::<64>::new();
    let _ = write!(msg, "{}: {}\r\n", key, value);
    let _ = tx.write(msg.as_bytes()).await;
}
