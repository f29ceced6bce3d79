#![no_std]
#![no_main]

mod board;
mod drivers;
mod tasks;

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32};

use embassy_executor::Spawner;
use embassy_stm32::exti::{Channel as ExtiChannel, ExtiInput};
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pin, Pull, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::timer::CountingMode;
use embassy_stm32::usart::{Config as UsartConfig, Uart, UartTx};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use kestrel_core::rc;
use {defmt_rtt as _, panic_probe as _};

use crate::board::Board;
use crate::drivers::motors::Motors;
use crate::tasks::control_loop::control_loop_task;
use crate::tasks::guard_task::motor_guard_task;
use crate::tasks::link_task::{link_task, LinkLine};
use crate::tasks::rc_task::rc_capture_task;

// ── Cells shared across execution contexts ────────────────────────────────────
//  Word-sized and lock-free; each cell has a single writer context.

/// Raw RC pulse widths in µs, one cell per channel. Written by the capture
/// tasks, read by the supervisor.
pub static RC_PULSE_US: [AtomicU16; rc::CHANNEL_COUNT] =
    [const { AtomicU16::new(rc::PULSE_MIN) }; rc::CHANNEL_COUNT];

/// Master motor cut-off. The deadman guard may set this concurrently with
/// the control loop; thrust is produced only while it is false.
pub static DISABLE_MOTORS: AtomicBool = AtomicBool::new(true);

/// ms since boot of the last accepted motor setpoint.
pub static LAST_THRUST_UPDATE_MS: AtomicU32 = AtomicU32::new(0);

/// ms since boot of the last `command->enable_motors` heartbeat.
pub static LAST_ENABLE_PING_MS: AtomicU32 = AtomicU32::new(0);

// Inbound ground-station lines; the supervisor drains at most one per tick.
static LINK_LINES: Channel<CriticalSectionRawMutex, LinkLine, 4> = Channel::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
    USART1  => embassy_stm32::usart::InterruptHandler<peripherals::USART1>;
});

/// I²C clock shared by the IMU, magnetometer and barometer.
const I2C_CLOCK_HZ: u32 = 1_000_000;
/// Ground-station link baud rate.
const TELEMETRY_BAUD: u32 = 2_000_000;
/// Operator debug baud rate.
const DEBUG_BAUD: u32 = 230_400;
/// Servo-style PWM carrier for the ESCs.
const MOTOR_PWM_HZ: u32 = 490;

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;
    defmt::info!("kestrel boot");

    // 2. Motor PWM — TIM3 CH1-4 (PA6/PA7/PB0/PB1). Comes up Disabled with
    //    all four outputs at idle; the deadman guard keeps it that way
    //    whenever setpoint refreshes stop.
    let pwm = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new_ch1(p.PA6, OutputType::PushPull)),
        Some(PwmPin::new_ch2(p.PA7, OutputType::PushPull)),
        Some(PwmPin::new_ch3(p.PB0, OutputType::PushPull)),
        Some(PwmPin::new_ch4(p.PB1, OutputType::PushPull)),
        TimeHertz(MOTOR_PWM_HZ),
        CountingMode::EdgeAlignedUp,
    );
    let motors = Motors::init(pwm);
    spawner.spawn(motor_guard_task()).unwrap();

    // 3. Telemetry link — USART1 @ 2 Mbaud (TX=PA9, RX=PA10), split so the
    //    line-assembly task owns RX while the supervisor owns TX
    let mut link_config = UsartConfig::default();
    link_config.baudrate = TELEMETRY_BAUD;
    let link_uart = Uart::new(
        p.USART1, p.PA10, p.PA9,
        Irqs,
        p.DMA2_CH7, p.DMA2_CH2,
        link_config,
    ).unwrap();
    let (link_tx, link_rx) = link_uart.split();

    // 4. Operator debug — USART2 TX @ 230k4 (PA2), `key: value` lines
    let mut debug_config = UsartConfig::default();
    debug_config.baudrate = DEBUG_BAUD;
    let debug_tx = UartTx::new(p.USART2, p.PA2, p.DMA1_CH6, debug_config).unwrap();

    // 5. I2C1 @ 1 MHz — LSM6DS + LIS3MDL + BMP390 (SCL=PB8, SDA=PB9)
    let i2c = I2c::new(
        p.I2C1,
        p.PB8, p.PB9,
        Irqs,
        p.DMA1_CH7,
        p.DMA1_CH0,
        TimeHertz(I2C_CLOCK_HZ),
        Default::default(),
    );

    // 6. RC input — change interrupts on PC0..PC3, one capture task per
    //    channel (throttle, roll, pitch, yaw)
    let rc_pins = [
        (
            ExtiInput::new(Input::new(p.PC0.degrade(), Pull::Down), p.EXTI0.degrade()),
            rc::THROTTLE,
        ),
        (
            ExtiInput::new(Input::new(p.PC1.degrade(), Pull::Down), p.EXTI1.degrade()),
            rc::ROLL,
        ),
        (
            ExtiInput::new(Input::new(p.PC2.degrade(), Pull::Down), p.EXTI2.degrade()),
            rc::PITCH,
        ),
        (
            ExtiInput::new(Input::new(p.PC3.degrade(), Pull::Down), p.EXTI3.degrade()),
            rc::YAW,
        ),
    ];
    for (pin, channel) in rc_pins {
        spawner.spawn(rc_capture_task(pin, channel)).unwrap();
    }

    // 7. Ground-station line assembly + the supervisor loop
    spawner.spawn(link_task(link_rx, LINK_LINES.sender())).unwrap();
    spawner.spawn(control_loop_task(
        i2c,
        link_tx,
        debug_tx,
        LINK_LINES.receiver(),
        motors,
    )).unwrap();

    // 8. Main task: LED heartbeat
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
