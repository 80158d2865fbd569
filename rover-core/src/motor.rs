//! Motor/UART wire protocol (part of C9): pure formatting and parsing
//! functions for the line-oriented ESP32 command set. The adapter binary
//! owns the actual serial port; this module only knows the text protocol.

use std::collections::HashMap;

use crate::bus::payload::{Direction, EspPayload};

/// Default direction → token mapping, overridable per-direction via
/// `nav.commands` in configuration.
fn default_token(direction: Direction) -> Option<&'static str> {
    match direction {
        Direction::Forward => Some("FORWARD"),
        Direction::Backward => Some("BACKWARD"),
        Direction::Left => Some("LEFT"),
        Direction::Right => Some("RIGHT"),
        Direction::Stop => Some("STOP"),
        // The ESP32 sketch has no scan primitive; adapters that extend the
        // direction enum with `scan` fall back to STOP on the wire, same as
        // any other token the firmware doesn't recognize.
        Direction::Scan => None,
    }
}

fn direction_key(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "forward",
        Direction::Backward => "backward",
        Direction::Left => "left",
        Direction::Right => "right",
        Direction::Stop => "stop",
        Direction::Scan => "scan",
    }
}

/// Format a `nav.command` direction as a newline-terminated wire command,
/// applying any configured token override first.
pub fn format_command(direction: Direction, overrides: &HashMap<String, String>) -> String {
    let token = overrides
        .get(direction_key(direction))
        .map(String::as_str)
        .or_else(|| default_token(direction))
        .unwrap_or("STOP");
    format!("{token}\n")
}

/// Format a `SERVO:<angle>` command. A missing or unparseable angle falls
/// back to 90 (center), matching the original bridge's behavior.
pub fn format_servo(angle: Option<&str>) -> String {
    let parsed: i32 = angle.and_then(|a| a.parse().ok()).unwrap_or(90);
    let clamped = parsed.clamp(0, 180);
    format!("SERVO:{clamped}\n")
}

/// Parse one line of ESP32 feedback into the tagged telemetry payload.
/// Recognized forms: `ACK:<cmd>:<status>`, `STATUS:<k>:<v>,...`,
/// `DATA:<k>:<v>,...`; anything else is carried through as `raw`.
pub fn parse_telemetry(line: &str) -> EspPayload {
    let line = line.trim();
    let mut parts = line.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("ACK"), Some(cmd), Some(status)) => EspPayload::Ack {
            ack: cmd.to_string(),
            status: status.to_string(),
        },
        (Some("STATUS"), Some(rest), tail) => EspPayload::Status {
            status_raw: join_rest(rest, tail),
        },
        (Some("DATA"), Some(rest), tail) => EspPayload::Data {
            data_raw: join_rest(rest, tail),
        },
        _ => EspPayload::Raw { raw: line.to_string() },
    }
}

fn join_rest(rest: &str, tail: Option<&str>) -> String {
    match tail {
        Some(t) => format!("{rest}:{t}"),
        None => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_tokens_match_esp32_sketch() {
        let overrides = HashMap::new();
        assert_eq!(format_command(Direction::Forward, &overrides), "FORWARD\n");
        assert_eq!(format_command(Direction::Stop, &overrides), "STOP\n");
    }

    #[test]
    fn scan_direction_falls_back_to_stop() {
        let overrides = HashMap::new();
        assert_eq!(format_command(Direction::Scan, &overrides), "STOP\n");
    }

    #[test]
    fn config_override_takes_priority() {
        let mut overrides = HashMap::new();
        overrides.insert("forward".to_string(), "FWD".to_string());
        assert_eq!(format_command(Direction::Forward, &overrides), "FWD\n");
    }

    #[test]
    fn servo_angle_is_clamped_and_defaults_on_garbage() {
        assert_eq!(format_servo(Some("45")), "SERVO:45\n");
        assert_eq!(format_servo(Some("900")), "SERVO:180\n");
        assert_eq!(format_servo(Some("not a number")), "SERVO:90\n");
        assert_eq!(format_servo(None), "SERVO:90\n");
    }

    #[test]
    fn parses_ack_status_data_and_raw_lines() {
        assert_eq!(
            parse_telemetry("ACK:FORWARD:OK"),
            EspPayload::Ack { ack: "FORWARD".into(), status: "OK".into() }
        );
        assert_eq!(
            parse_telemetry("STATUS:SERVO:90,LMOTOR:0,RMOTOR:0"),
            EspPayload::Status { status_raw: "SERVO:90,LMOTOR:0,RMOTOR:0".into() }
        );
        assert_eq!(
            parse_telemetry("DATA:S1:30,S2:40,MQ2:12"),
            EspPayload::Data { data_raw: "S1:30,S2:40,MQ2:12".into() }
        );
        assert_eq!(
            parse_telemetry("garbage line"),
            EspPayload::Raw { raw: "garbage line".into() }
        );
    }
}
