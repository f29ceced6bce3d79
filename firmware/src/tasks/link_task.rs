use embassy_executor::task;
use embassy_stm32::peripherals::{DMA2_CH2, USART1};
use embassy_stm32::usart::UartRx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;

/// Longest accepted command line; a full `pid->` retune fits comfortably.
pub const LINE_CAPACITY: usize = 96;

pub type LinkLine = heapless::String<LINE_CAPACITY>;

/// Ground-station RX task — assembles newline-terminated lines from the
/// telemetry UART and queues them for the supervisor. Overlong lines are
/// dropped wholesale; parsing stays with the supervisor.
#[task]
pub async fn link_task(
    mut rx: UartRx<'static, USART1, DMA2_CH2>,
    lines: Sender<'static, CriticalSectionRawMutex, LinkLine, 4>,
) {
    let mut buf = [0u8; 64];
    let mut line = LinkLine::new();

    loop {
        match rx.read_until_idle(&mut buf).await {
            Ok(n) => {
                for &byte in &buf[..n] {
                    match byte {
                        b'\n' => {
                            if !line.is_empty() {
                                // Queue full means the supervisor is behind;
                                // newest line loses
                                let _ = lines.try_send(core::mem::take(&mut line));
                            }
                        }
                        b'\r' => {}
                        _ => {
                            if line.push(byte as char).is_err() {
                                line.clear();
                            }
                        }
                    }
                }
            }
            Err(_) => {
                // RX error mid-line: whatever was accumulated is suspect
                line.clear();
            }
        }
    }
}
