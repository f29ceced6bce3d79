//! Ground-station line protocol.
//!
//! Outbound: one JSON object per newline-terminated line. Inbound: ASCII
//! command lines in three families — `command-><verb>`, `pid-><six floats>`
//! and `rc-><four pulse widths>`. Anything that does not parse cleanly is
//! rejected as a whole; there are no partial applies.

use crate::rc;
use crate::state::{PidGains, TelemetryRecord};

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Command {
    /// Leave the pre-flight hold.
    Arm,
    /// Motor-enable heartbeat; must repeat at 200 ms cadence or faster.
    EnableMotors,
    /// Terminal: park the supervisor in infinite idle.
    Abort,
    /// Software reset.
    Reboot,
    /// Live PID retune.
    Pid(PidGains),
    /// Wired RC frame, canonical µs, already clamped.
    Rc {
        throttle: u16,
        yaw: u16,
        pitch: u16,
        roll: u16,
    },
}

/// Parse one inbound line. Returns `None` for anything malformed.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();

    if let Some(verb) = line.strip_prefix("command->") {
        return match verb {
            "arm" => Some(Command::Arm),
            "enable_motors" => Some(Command::EnableMotors),
            "abort" => Some(Command::Abort),
            "reboot" => Some(Command::Reboot),
            _ => None,
        };
    }

    if let Some(args) = line.strip_prefix("pid->") {
        let mut values = [0.0f32; 6];
        let mut fields = args.split(',');
        for slot in values.iter_mut() {
            *slot = fields.next()?.trim().parse().ok()?;
        }
        if fields.next().is_some() {
            return None;
        }
        let [kp_r, ki_r, kd_r, kp_p, ki_p, kd_p] = values;
        return Some(Command::Pid(PidGains {
            kp_r,
            ki_r,
            kd_r,
            kp_p,
            ki_p,
            kd_p,
        }));
    }

    if let Some(args) = line.strip_prefix("rc->") {
        let mut values = [0u16; 4];
        let mut fields = args.split(',');
        for slot in values.iter_mut() {
            let us: i32 = fields.next()?.trim().parse().ok()?;
            *slot = us.clamp(rc::PULSE_MIN as i32, rc::PULSE_MAX as i32) as u16;
        }
        if fields.next().is_some() {
            return None;
        }
        let [throttle, yaw, pitch, roll] = values;
        return Some(Command::Rc {
            throttle,
            yaw,
            pitch,
            roll,
        });
    }

    None
}

/// Serialize a telemetry record as a newline-terminated JSON line.
///
/// Returns the number of bytes written, or `None` when `buf` cannot hold
/// the frame.
pub fn encode_telemetry(record: &TelemetryRecord, buf: &mut [u8]) -> Option<usize> {
    let len = serde_json_core::to_slice(record, buf).ok()?;
    if len >= buf.len() {
        return None;
    }
    buf[len] = b'\n';
    Some(len + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The four bare command verbs parse; unknown verbs do not.
    #[test]
    fn command_verbs() {
        assert_eq!(parse_line("command->arm"), Some(Command::Arm));
        assert_eq!(parse_line("command->enable_motors"), Some(Command::EnableMotors));
        assert_eq!(parse_line("command->abort"), Some(Command::Abort));
        assert_eq!(parse_line("command->reboot"), Some(Command::Reboot));
        assert_eq!(parse_line("command->dance"), None);
        assert_eq!(parse_line("command->"), None);
    }

    /// Trailing CR/LF and surrounding whitespace are tolerated.
    #[test]
    fn line_endings_tolerated() {
        assert_eq!(parse_line("command->arm\r"), Some(Command::Arm));
        assert_eq!(parse_line("  command->arm  "), Some(Command::Arm));
    }

    /// A well-formed pid line yields exactly the six gains sent.
    #[test]
    fn pid_line_round_trip() {
        let cmd = parse_line("pid->1.2,1.0,4.0,1.2,1.0,4.0").unwrap();
        let Command::Pid(gains) = cmd else {
            panic!("expected pid command")
        };
        assert_eq!(gains.kp_r, 1.2);
        assert_eq!(gains.ki_r, 1.0);
        assert_eq!(gains.kd_r, 4.0);
        assert_eq!(gains.kp_p, 1.2);
        assert_eq!(gains.ki_p, 1.0);
        assert_eq!(gains.kd_p, 4.0);

        // And the gains survive into the outbound frame unchanged
        let record = TelemetryRecord {
            kp_r: gains.kp_r,
            ki_r: gains.ki_r,
            kd_r: gains.kd_r,
            kp_p: gains.kp_p,
            ki_p: gains.ki_p,
            kd_p: gains.kd_p,
            ..TelemetryRecord::default()
        };
        let mut buf = [0u8; 512];
        let len = encode_telemetry(&record, &mut buf).unwrap();
        let line = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(line.contains("\"kp_r\":1.2"));
        assert!(line.contains("\"kd_p\":4.0"));
    }

    /// Wrong arity or junk fields reject the whole pid line.
    #[test]
    fn pid_line_malformed() {
        assert_eq!(parse_line("pid->1,2,3"), None);
        assert_eq!(parse_line("pid->1,2,3,4,5,6,7"), None);
        assert_eq!(parse_line("pid->a,b,c,d,e,f"), None);
    }

    /// rc lines clamp each channel into the canonical pulse domain.
    #[test]
    fn rc_line_clamps() {
        let cmd = parse_line("rc->500,2500,1500,1600").unwrap();
        assert_eq!(
            cmd,
            Command::Rc {
                throttle: 1000,
                yaw: 2000,
                pitch: 1500,
                roll: 1600,
            }
        );
        assert_eq!(parse_line("rc->1500,1500,1500"), None);
        assert_eq!(parse_line("rc->x,1500,1500,1500"), None);
    }

    /// Anything without a known prefix is noise.
    #[test]
    fn unknown_lines_rejected() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("hello"), None);
        assert_eq!(parse_line("pid>1,2,3,4,5,6"), None);
    }

    /// Every transmitted frame carries exactly the published field set and
    /// parses back into a record.
    #[test]
    fn telemetry_schema() {
        const FIELDS: [&str; 29] = [
            "elapsed_time",
            "acc_x",
            "acc_y",
            "acc_z",
            "gyro_x",
            "gyro_y",
            "gyro_z",
            "mag_x",
            "mag_y",
            "mag_z",
            "altitude",
            "temp",
            "yaw",
            "pitch",
            "roll",
            "rc_throttle",
            "rc_yaw",
            "rc_pitch",
            "rc_roll",
            "front_right",
            "back_right",
            "back_left",
            "front_left",
            "kp_r",
            "ki_r",
            "kd_r",
            "kp_p",
            "ki_p",
            "kd_p",
        ];

        let mut buf = [0u8; 512];
        let len = encode_telemetry(&TelemetryRecord::default(), &mut buf).unwrap();
        assert_eq!(buf[len - 1], b'\n');

        let line = core::str::from_utf8(&buf[..len - 1]).unwrap();
        for field in FIELDS {
            assert!(line.contains(&format!("\"{field}\":")), "missing {field}");
        }
        // Exactly the published set: 29 keys, no extras
        assert_eq!(line.matches("\":").count(), FIELDS.len());

        let (parsed, _) = serde_json_core::from_str::<TelemetryRecord>(line).unwrap();
        assert_eq!(parsed.rc_throttle, 0);
    }
}
