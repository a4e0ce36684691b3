// src/gcode.rs

//! G-code line parsing.
//!
//! One line in, one [`ParsedCommand`] out. The parser strips `;` comments,
//! trims, uppercases, reads the `G`/`M` + digits token and extracts the
//! parameters the command family cares about. Anything unrecognizable is
//! [`ParsedCommand::Unknown`]; the dispatcher turns that into error 1.
//! Parsing never executes anything; the producer side only classifies.

use heapless::String;

use crate::config::GCODE_MAX_LENGTH;
use crate::kinematics::{Axis, AxisSet};

/// A classified command with its argument bundle. Payloads are disjoint per
/// variant, so a handler can only ever see arguments that match its tag.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedCommand {
    /// G0/G1. Absent coordinates leave that axis alone (absolute mode) or
    /// contribute no offset (relative mode).
    Move {
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
        f: Option<f32>,
        rapid: bool,
    },
    /// G28. An empty set means "home everything".
    Home { axes: AxisSet },
    /// G92.
    SetPosition {
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
    },
    /// G90.
    ModeAbsolute,
    /// G91.
    ModeRelative,
    /// M84. `S0` means "disabled now, never auto-disable".
    DisableSteppers { timeout_s: Option<f32> },
    /// M220.
    SetSpeedFactor { percent: Option<f32> },
    /// M114.
    QueryPosition,
    /// M115.
    QueryFirmware,
    /// M119.
    QueryEndstops,
    /// M503.
    ReportSettings,
    /// M25.
    Pause,
    /// M24.
    Resume,
    /// M0.
    Stop,
    /// M410.
    QuickStop,
    /// M999.
    DiagnosticMotor { axis: Axis },
    Unknown,
}

/// Parses one raw input line.
pub fn parse(raw_line: &str) -> ParsedCommand {
    // Strip the comment, trim, uppercase into a bounded scratch buffer.
    let code = raw_line.split(';').next().unwrap_or("").trim();
    if code.is_empty() {
        return ParsedCommand::Unknown;
    }
    let mut line: String<{ GCODE_MAX_LENGTH + 1 }> = String::new();
    for c in code.chars() {
        if line.push(c.to_ascii_uppercase()).is_err() {
            return ParsedCommand::Unknown;
        }
    }
    let line = line.as_str();

    let mut chars = line.chars();
    let family = match chars.next() {
        Some(c) => c,
        None => return ParsedCommand::Unknown,
    };
    let number = match leading_number(chars.as_str()) {
        Some(n) => n,
        None => return ParsedCommand::Unknown,
    };

    match (family, number) {
        ('G', 0) | ('G', 1) => ParsedCommand::Move {
            x: float_param(line, 'X'),
            y: float_param(line, 'Y'),
            z: float_param(line, 'Z'),
            f: float_param(line, 'F'),
            rapid: number == 0,
        },
        ('G', 28) => {
            let mut axes = AxisSet::empty();
            for axis in Axis::ALL {
                if axis_flag(line, axis.letter()) {
                    axes |= AxisSet::of(axis);
                }
            }
            ParsedCommand::Home { axes }
        }
        ('G', 90) => ParsedCommand::ModeAbsolute,
        ('G', 91) => ParsedCommand::ModeRelative,
        ('G', 92) => ParsedCommand::SetPosition {
            x: float_param(line, 'X'),
            y: float_param(line, 'Y'),
            z: float_param(line, 'Z'),
        },
        ('M', 0) => ParsedCommand::Stop,
        ('M', 24) => ParsedCommand::Resume,
        ('M', 25) => ParsedCommand::Pause,
        ('M', 84) => ParsedCommand::DisableSteppers {
            timeout_s: float_param(line, 'S'),
        },
        ('M', 114) => ParsedCommand::QueryPosition,
        ('M', 115) => ParsedCommand::QueryFirmware,
        ('M', 119) => ParsedCommand::QueryEndstops,
        ('M', 220) => ParsedCommand::SetSpeedFactor {
            percent: float_param(line, 'S'),
        },
        ('M', 410) => ParsedCommand::QuickStop,
        ('M', 503) => ParsedCommand::ReportSettings,
        ('M', 999) => {
            // Axis to exercise; Z kept as the default for bare M999.
            let mut axis = Axis::Z;
            for candidate in Axis::ALL {
                if axis_flag(line, candidate.letter()) {
                    axis = candidate;
                    break;
                }
            }
            ParsedCommand::DiagnosticMotor { axis }
        }
        _ => ParsedCommand::Unknown,
    }
}

/// Digits immediately following the command letter ("28" in "G28X").
fn leading_number(rest: &str) -> Option<u16> {
    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Extracts `<letter><value>` anywhere after the command token. Tolerates
/// whitespace and a leading `=` between letter and value (Marlin style).
fn float_param(line: &str, letter: char) -> Option<f32> {
    let at = line.find(letter)?;
    let bytes = line.as_bytes();
    let mut i = at + 1;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t' || bytes[i] == b'=') {
        i += 1;
    }
    let start = i;
    if i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
        i += 1;
    }
    let digits_start = i;
    let mut seen_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }
    if i == digits_start {
        return None;
    }
    line[start..i].parse().ok()
}

/// True when the axis letter appears anywhere after the command token
/// (G28-style presence flags).
fn axis_flag(line: &str, letter: char) -> bool {
    // Skip the command token itself; its G/M cannot collide with X/Y/Z.
    line.find(letter).is_some()
}
