use core::sync::atomic::Ordering;

use kestrel_core::rc::{self, ThrottleWindow};

use crate::RC_PULSE_US;

/// Where pilot commands come from: the physical PWM capture cells, or the
/// wired frames a ground station pushes over the telemetry link.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Source {
    Pwm,
    Wired,
}

/// Pilot command state, owned by the supervisor.
///
/// Getters return canonical µs in [1000, 2000]. Until the throttle has
/// been observed at idle at least once, every getter reports the
/// calibrated minimum — the controller refuses pilot command until the
/// stick has been seen down.
pub struct RcInput {
    source: Source,
    // Canonical values for the wired path, indexed like the capture cells
    wired: [u16; rc::CHANNEL_COUNT],
    window: ThrottleWindow,
    last_window_push_ms: u32,
    seen_throttle_low: bool,
}

impl RcInput {
    pub fn new() -> Self {
        Self {
            source: Source::Pwm,
            wired: [rc::PULSE_MIN; rc::CHANNEL_COUNT],
            window: ThrottleWindow::new(),
            last_window_push_ms: 0,
            seen_throttle_low: false,
        }
    }

    /// Switch to ground-station frames, starting from the safe stick
    /// positions (throttle down, everything else centered). Physical
    /// capture is ignored from here on.
    pub fn enable_wired(&mut self) {
        self.source = Source::Wired;
        self.wired[rc::THROTTLE] = rc::PULSE_MIN;
        self.wired[rc::ROLL] = 1500;
        self.wired[rc::PITCH] = 1500;
        self.wired[rc::YAW] = 1500;
    }

    /// Store one wired frame (values already clamped by the parser).
    pub fn apply_wired_frame(&mut self, throttle: u16, yaw: u16, pitch: u16, roll: u16) {
        self.wired[rc::THROTTLE] = throttle;
        self.wired[rc::YAW] = yaw;
        self.wired[rc::PITCH] = pitch;
        self.wired[rc::ROLL] = roll;
    }

    fn raw(&self, channel: usize) -> u16 {
        RC_PULSE_US[channel].load(Ordering::Relaxed)
    }

    fn canonical(&self, channel: usize) -> u16 {
        match self.source {
            Source::Wired => self.wired[channel],
            Source::Pwm => rc::calibrate(channel, self.raw(channel)),
        }
    }

    fn gated(&self, channel: usize) -> u16 {
        if self.seen_throttle_low {
            self.canonical(channel)
        } else {
            rc::calibrate(channel, rc::PULSE_MIN)
        }
    }

    pub fn throttle(&self) -> u16 {
        self.gated(rc::THROTTLE)
    }

    pub fn roll(&self) -> u16 {
        self.gated(rc::ROLL)
    }

    pub fn pitch(&self) -> u16 {
        self.gated(rc::PITCH)
    }

    pub fn yaw(&self) -> u16 {
        self.gated(rc::YAW)
    }

    pub fn is_throttle_low(&self) -> bool {
        self.canonical(rc::THROTTLE) <= rc::THROTTLE_IDLE_CEILING
    }

    /// Per-tick link liveness. False when the capture path shows a frozen
    /// window (500 ms of bit-identical throttle) or the transmitter switch
    /// is off; the wired path is instead gated by the enable heartbeat.
    pub fn update(&mut self, now_ms: u32) -> bool {
        if !self.seen_throttle_low && self.is_throttle_low() {
            self.seen_throttle_low = true;
        }

        match self.source {
            Source::Wired => true,
            Source::Pwm => {
                let raw_throttle = self.raw(rc::THROTTLE);

                if now_ms.wrapping_sub(self.last_window_push_ms) >= rc::WINDOW_SAMPLE_INTERVAL_MS {
                    self.window.push(raw_throttle);
                    self.last_window_push_ms = now_ms;
                }

                if self.window.is_frozen() {
                    return false;
                }
                if raw_throttle > rc::SWITCH_OFF_RAW_LO && raw_throttle < rc::SWITCH_OFF_RAW_HI {
                    return false;
                }
                true
            }
        }
    }
}
