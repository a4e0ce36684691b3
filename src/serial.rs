// src/serial.rs

//! Serial line assembly: bytes in, queued commands out.
//!
//! The assembler accumulates bytes into a bounded line buffer. A CR or LF
//! terminates the line; empty lines are silently ignored. A line longer
//! than the buffer is rejected with error 7 and the remainder up to the
//! next terminator is discarded. Accepted lines are parsed and enqueued,
//! never executed here, and crucially never acknowledged here: the
//! dispatcher sends the `ok` after execution, which is what gives the host
//! strict one-outstanding-command flow control.

use crate::command_queue::CommandQueue;
use crate::config::GCODE_MAX_LENGTH;
use crate::gcode::{self, ParsedCommand};
use crate::hal::SerialPort;
use crate::protocol::{ErrorCode, Responder};

/// Accumulates one incoming line at a time.
pub struct LineAssembler {
    buf: [u8; GCODE_MAX_LENGTH],
    len: usize,
    /// Set after an overflow: swallow bytes until the next terminator.
    discarding: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            buf: [0; GCODE_MAX_LENGTH],
            len: 0,
            discarding: false,
        }
    }

    /// Drains the transport. Call once per dispatcher pass.
    pub fn poll<S: SerialPort>(&mut self, responder: &mut Responder<S>, queue: &mut CommandQueue) {
        while let Some(byte) = responder.read_byte() {
            self.feed(byte, responder, queue);
        }
    }

    fn feed<S: SerialPort>(
        &mut self,
        byte: u8,
        responder: &mut Responder<S>,
        queue: &mut CommandQueue,
    ) {
        if byte == b'\n' || byte == b'\r' {
            if self.discarding {
                self.discarding = false;
            } else if self.len > 0 {
                if let Ok(line) = core::str::from_utf8(&self.buf[..self.len]) {
                    Self::submit(line, responder, queue);
                }
            }
            self.len = 0;
            return;
        }
        if self.discarding {
            return;
        }
        if self.len < GCODE_MAX_LENGTH {
            self.buf[self.len] = byte;
            self.len += 1;
        } else {
            responder.send_error(ErrorCode::BufferOverflow, "Incoming line too long");
            responder.send_ok();
            self.len = 0;
            self.discarding = true;
        }
    }

    /// Parses a complete line and queues it. Rejections are answered
    /// immediately; a successful push is answered only after execution.
    fn submit<S: SerialPort>(line: &str, responder: &mut Responder<S>, queue: &mut CommandQueue) {
        let command = gcode::parse(line);

        if command == ParsedCommand::Unknown {
            responder.send_error(ErrorCode::UnknownCommand, line);
            responder.send_ok();
            return;
        }
        if queue.is_full() {
            responder.send_error(ErrorCode::BufferOverflow, "Command buffer full");
            responder.send_ok();
            return;
        }
        queue.push(command);
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakePort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl SerialPort for FakePort {
        fn read_byte(&mut self) -> Option<u8> {
            self.rx.pop_front()
        }

        fn write(&mut self, bytes: &[u8]) {
            self.tx.extend_from_slice(bytes);
        }
    }

    struct Rig {
        assembler: LineAssembler,
        responder: Responder<FakePort>,
        queue: CommandQueue,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                assembler: LineAssembler::new(),
                responder: Responder::new(FakePort::default()),
                queue: CommandQueue::new(),
            }
        }

        fn inject(&mut self, text: &str) {
            self.responder.port_mut().rx.extend(text.bytes());
            self.assembler.poll(&mut self.responder, &mut self.queue);
        }

        fn output(&mut self) -> std::string::String {
            let out = std::mem::take(&mut self.responder.port_mut().tx);
            std::string::String::from_utf8(out).unwrap()
        }
    }

    #[test]
    fn queues_a_good_line_without_acknowledging() {
        let mut rig = Rig::new();
        rig.inject("G90\n");
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.output(), "");
    }

    #[test]
    fn cr_and_lf_both_terminate() {
        let mut rig = Rig::new();
        rig.inject("G90\rG91\n");
        assert_eq!(rig.queue.len(), 2);
    }

    #[test]
    fn empty_lines_are_ignored() {
        let mut rig = Rig::new();
        rig.inject("\n\r\n\n");
        assert!(rig.queue.is_empty());
        assert_eq!(rig.output(), "");
    }

    #[test]
    fn unknown_line_answers_error_and_ok() {
        let mut rig = Rig::new();
        rig.inject("G42 X1\n");
        assert!(rig.queue.is_empty());
        assert_eq!(rig.output(), "error:1 - G42 X1\nok\n");
    }

    #[test]
    fn full_queue_answers_error_7() {
        let mut rig = Rig::new();
        for _ in 0..8 {
            rig.inject("G90\n");
        }
        assert!(rig.queue.is_full());
        assert_eq!(rig.output(), "");

        rig.inject("G90\n");
        assert_eq!(rig.queue.len(), 8);
        assert_eq!(rig.output(), "error:7 - Command buffer full\nok\n");
    }

    #[test]
    fn over_long_line_is_rejected_and_tail_discarded() {
        let mut rig = Rig::new();
        let long = "G1 X".repeat(40); // way past 64 chars, no terminator yet
        rig.inject(&long);
        let out = rig.output();
        assert!(out.starts_with("error:7 - Incoming line too long\nok\n"));
        // Exactly one rejection for the whole runaway line.
        assert_eq!(out.matches("error:7").count(), 1);

        // The tail is swallowed; the next real line still works.
        rig.inject("tail tail tail\nG90\n");
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.output(), "");
    }
}
