// src/lib.rs

//! Motion controller core for a three-axis pen plotter.
//!
//! A line-oriented G-code stream comes in over a serial transport; three
//! step/direction stepper channels go out, via a homing-aware, limit-checked
//! trapezoidal motion pipeline. The crate is `no_std` and hardware-agnostic:
//! the embedding provides pins, clock, watchdog and transport through the
//! traits in [`hal`], then drives [`dispatch::Dispatcher::poll`] from its
//! outermost loop.
//!
//! Scheduling is single-threaded and cooperative. One command executes at a
//! time; motion blocks the loop (feeding the watchdog and ticking the UI)
//! and serial input is not drained during a move; the consumer-owned `ok`
//! terminator gives the host strict one-outstanding-command flow control.

#![cfg_attr(not(test), no_std)]

pub mod command_queue;
pub mod config;
pub mod dispatch;
pub mod endstop;
mod fmath;
pub mod gcode;
pub mod hal;
pub mod homing;
pub mod kinematics;
pub mod motion;
pub mod protocol;
pub mod serial;
pub mod state;
pub mod stepper;

pub use config::MachineConfig;
pub use dispatch::Dispatcher;
pub use gcode::ParsedCommand;
pub use hal::Platform;
pub use kinematics::{Axis, AxisSet, Point3D};
pub use protocol::ErrorCode;
