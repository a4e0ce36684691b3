// src/protocol.rs

//! Host-facing response formatting.
//!
//! Three kinds of device-to-host lines exist: the terminator `ok` (exactly
//! one per accepted input line, after any data), `error:<code> - <text>`,
//! and `// <text>` informational lines. Everything is newline-terminated
//! ASCII. The responder owns the serial port; the line assembler reads
//! incoming bytes through it.

use core::fmt::Write as _;

use heapless::String;

use crate::config;
use crate::hal::SerialPort;
use crate::kinematics::Point3D;

/// Protocol error taxonomy. The numeric value is what goes on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownCommand = 1,
    InvalidSyntax = 2,
    OutOfRange = 3,
    EndstopHit = 4,
    HomingFailed = 5,
    NotHomed = 6,
    BufferOverflow = 7,
    Timeout = 8,
    /// Reserved for empty input after stripping; not currently emitted.
    EmptyCommand = 9,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Formats and sends protocol lines. Cheap enough to call from anywhere the
/// port reference reaches.
pub struct Responder<S: SerialPort> {
    port: S,
}

impl<S: SerialPort> Responder<S> {
    pub fn new(port: S) -> Self {
        Self { port }
    }

    /// Pass-through for the line assembler.
    pub fn read_byte(&mut self) -> Option<u8> {
        self.port.read_byte()
    }

    /// Direct port access for embeddings that need it (flushing, stats).
    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    fn send_line(&mut self, line: &str) {
        self.port.write(line.as_bytes());
        self.port.write(b"\n");
    }

    /// The terminator: tells the host the device is ready for the next
    /// command.
    pub fn send_ok(&mut self) {
        self.send_line("ok");
    }

    pub fn send_error(&mut self, code: ErrorCode, text: &str) {
        let mut line: String<96> = String::new();
        let _ = write!(line, "error:{} - {}", code.code(), text);
        self.send_line(&line);
    }

    pub fn send_info(&mut self, text: &str) {
        let mut line: String<96> = String::new();
        let _ = write!(line, "// {}", text);
        self.send_line(&line);
    }

    /// M114 payload.
    pub fn send_position(&mut self, p: &Point3D) {
        let mut line: String<64> = String::new();
        let _ = write!(line, "X:{:.2} Y:{:.2} Z:{:.2}", p.x, p.y, p.z);
        self.send_line(&line);
    }

    /// M115 payload; also emitted unprompted at boot.
    pub fn send_firmware_info(&mut self) {
        let mut line: String<160> = String::new();
        let _ = write!(
            line,
            "FIRMWARE_NAME:{} FIRMWARE_VERSION:{} PROTOCOL_VERSION:1.0 \
             MACHINE_TYPE:PenPlotter BOARD_TYPE:{} EXTRUDER_COUNT:0",
            config::FIRMWARE_NAME,
            config::FIRMWARE_VERSION,
            config::BOARD_TYPE,
        );
        self.send_line(&line);
    }

    /// M119 payload, one line per axis.
    pub fn send_endstop_status(&mut self, x: bool, y: bool, z: bool) {
        for (name, triggered) in [("x_min", x), ("y_min", y), ("z_min", z)] {
            let mut line: String<32> = String::new();
            let _ = write!(line, "{}: {}", name, if triggered { "TRIGGERED" } else { "open" });
            self.send_line(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct LoopbackPort {
        out: Vec<u8>,
    }

    impl SerialPort for LoopbackPort {
        fn read_byte(&mut self) -> Option<u8> {
            None
        }

        fn write(&mut self, bytes: &[u8]) {
            self.out.extend_from_slice(bytes);
        }
    }

    fn output(rsp: &Responder<LoopbackPort>) -> std::string::String {
        std::string::String::from_utf8(rsp.port.out.clone()).unwrap()
    }

    #[test]
    fn ok_line() {
        let mut rsp = Responder::new(LoopbackPort::default());
        rsp.send_ok();
        assert_eq!(output(&rsp), "ok\n");
    }

    #[test]
    fn error_line_format() {
        let mut rsp = Responder::new(LoopbackPort::default());
        rsp.send_error(ErrorCode::NotHomed, "Required axis not homed");
        assert_eq!(output(&rsp), "error:6 - Required axis not homed\n");
    }

    #[test]
    fn info_line_format() {
        let mut rsp = Responder::new(LoopbackPort::default());
        rsp.send_info("Absolute positioning mode (G90)");
        assert_eq!(output(&rsp), "// Absolute positioning mode (G90)\n");
    }

    #[test]
    fn position_uses_two_decimals() {
        let mut rsp = Responder::new(LoopbackPort::default());
        rsp.send_position(&Point3D::new(5.0, 0.006, 2.0));
        assert_eq!(output(&rsp), "X:5.00 Y:0.01 Z:2.00\n");
    }

    #[test]
    fn firmware_banner_fields() {
        let mut rsp = Responder::new(LoopbackPort::default());
        rsp.send_firmware_info();
        let out = output(&rsp);
        assert!(out.starts_with("FIRMWARE_NAME:"));
        assert!(out.contains("PROTOCOL_VERSION:1.0"));
        assert!(out.contains("MACHINE_TYPE:PenPlotter"));
        assert!(out.contains("EXTRUDER_COUNT:0"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn endstop_report_is_three_lines() {
        let mut rsp = Responder::new(LoopbackPort::default());
        rsp.send_endstop_status(true, false, false);
        assert_eq!(output(&rsp), "x_min: TRIGGERED\ny_min: open\nz_min: open\n");
    }

    #[test]
    fn error_codes_match_the_taxonomy() {
        assert_eq!(ErrorCode::UnknownCommand.code(), 1);
        assert_eq!(ErrorCode::InvalidSyntax.code(), 2);
        assert_eq!(ErrorCode::OutOfRange.code(), 3);
        assert_eq!(ErrorCode::EndstopHit.code(), 4);
        assert_eq!(ErrorCode::HomingFailed.code(), 5);
        assert_eq!(ErrorCode::NotHomed.code(), 6);
        assert_eq!(ErrorCode::BufferOverflow.code(), 7);
        assert_eq!(ErrorCode::Timeout.code(), 8);
        assert_eq!(ErrorCode::EmptyCommand.code(), 9);
    }
}
