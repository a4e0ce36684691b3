// src/dispatch.rs

//! The cooperative main loop and the command handlers.
//!
//! One `poll` pass services serial input, the speed dial, the UI, the
//! idle-disable timer and the file feeder, then pops at most one command
//! and executes it to completion. Motion blocks the loop, and serial input is
//! intentionally not drained during a move, which together with the
//! consumer-owned `ok` gives the host strict one-outstanding-command flow
//! control. Every executed command ends with exactly one terminator.

use core::fmt::Write as _;

use heapless::String;

use crate::command_queue::CommandQueue;
use crate::config::{self, MachineConfig};
use crate::endstop::Endstops;
use crate::gcode::{self, ParsedCommand};
use crate::hal::{Clock, JobSource, Platform, SpeedDial, StatusUi, Watchdog};
use crate::homing::Homing;
use crate::kinematics::{Axis, AxisSet, Kinematics, Point3D};
use crate::motion::{self, RunOutcome};
use crate::protocol::{ErrorCode, Responder};
use crate::serial::LineAssembler;
use crate::state::{JobState, MachineState};
use crate::stepper::Steppers;

/// Owns every singleton of the firmware core. The embedding constructs the
/// peripherals, hands them over, then calls [`Dispatcher::poll`] forever.
pub struct Dispatcher<P: Platform> {
    cfg: MachineConfig,
    kin: Kinematics,
    state: MachineState,
    homing: Homing,
    steppers: Steppers<P::Out>,
    endstops: Endstops<P::In>,
    queue: CommandQueue,
    assembler: LineAssembler,
    responder: Responder<P::Serial>,
    clock: P::Clock,
    watchdog: P::Watchdog,
    dial: P::Dial,
    ui: P::Ui,
    job: P::Job,
}

impl<P: Platform> Dispatcher<P> {
    /// Builds the dispatcher and emits the unprompted boot banner.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: MachineConfig,
        mut steppers: Steppers<P::Out>,
        endstops: Endstops<P::In>,
        serial: P::Serial,
        clock: P::Clock,
        watchdog: P::Watchdog,
        dial: P::Dial,
        ui: P::Ui,
        job: P::Job,
    ) -> Self {
        let kin = Kinematics::new(&cfg);
        let mut responder = Responder::new(serial);
        responder.send_firmware_info();
        responder.send_info("Plotter firmware starting...");

        // Seat the configured ceilings on the channels; moves re-seat their
        // own speeds, homing its own reduced ones.
        for axis in Axis::ALL {
            let i = axis.index();
            let chan = steppers.channel_mut(axis);
            chan.set_max_speed(cfg.max_velocity[i] * cfg.steps_per_mm[i]);
            chan.set_acceleration(cfg.max_accel[i] * cfg.steps_per_mm[i]);
        }
        steppers.disable_all();
        steppers.set_current_positions([0, 0, 0]);

        let state = MachineState::new(&cfg, clock.millis());
        log::info!("dispatcher up, queue depth {}", config::COMMAND_QUEUE_DEPTH);

        Self {
            cfg,
            kin,
            state,
            homing: Homing::new(),
            steppers,
            endstops,
            queue: CommandQueue::new(),
            assembler: LineAssembler::new(),
            responder,
            clock,
            watchdog,
            dial,
            ui,
            job,
        }
    }

    /// One cooperative pass. Call from the outermost firmware loop.
    pub fn poll(&mut self) {
        self.watchdog.feed();

        self.assembler.poll(&mut self.responder, &mut self.queue);

        let now = self.clock.millis();
        if let Some(percent) = self.dial.poll(now) {
            // Hardware override wins until the next M220 arrives.
            let clamped = percent.clamp(self.cfg.dial_min_percent, self.cfg.dial_max_percent);
            self.state.speed_factor = clamped as f32;
        }

        self.ui.tick(now);
        self.check_idle_disable(now);
        self.feed_job();

        if let Some(command) = self.queue.pop() {
            self.execute(command);
        }
    }

    // --- accessors for the embedding / UI ---------------------------------

    pub fn position(&self) -> Point3D {
        self.state.position
    }

    pub fn is_homed(&self, axis: Axis) -> bool {
        self.homing.is_homed(axis)
    }

    pub fn job_state(&self) -> JobState {
        self.state.job
    }

    /// External start trigger for file playback (LCD menu "print" action).
    pub fn start_job(&mut self) {
        self.state.job = JobState::Running;
    }

    // --- per-pass services -------------------------------------------------

    fn check_idle_disable(&mut self, now: u32) {
        if self.state.idle_timeout_ms == 0 || self.steppers.is_disabled() {
            return;
        }
        if now.wrapping_sub(self.state.last_activity_ms) > self.state.idle_timeout_ms {
            self.steppers.disable_all();
            self.responder
                .send_info("Steppers auto-disabled due to idle timeout.");
        }
    }

    /// Drains one line from the job reader into the queue between commands.
    fn feed_job(&mut self) {
        if self.state.job != JobState::Running || self.queue.is_full() {
            return;
        }
        let mut buf = [0u8; config::GCODE_MAX_LENGTH];
        match self.job.next_line(&mut buf) {
            Some(len) => {
                let Ok(raw) = core::str::from_utf8(&buf[..len]) else {
                    return;
                };
                let code = raw.split(';').next().unwrap_or("").trim();
                if code.is_empty() {
                    return;
                }
                let command = gcode::parse(code);
                if command != ParsedCommand::Unknown {
                    self.queue.push(command);
                }
            }
            None => {
                self.job.close();
                self.state.job = JobState::Idle;
                self.responder.send_info("Job complete.");
            }
        }
    }

    // --- command dispatch --------------------------------------------------

    fn execute(&mut self, command: ParsedCommand) {
        match command {
            ParsedCommand::Move { x, y, z, f, .. } => self.handle_move(x, y, z, f),
            ParsedCommand::Home { axes } => self.handle_home(axes),
            ParsedCommand::SetPosition { x, y, z } => self.handle_set_position(x, y, z),
            ParsedCommand::ModeAbsolute => {
                self.state.absolute_mode = true;
                self.responder.send_info("Absolute positioning mode (G90)");
            }
            ParsedCommand::ModeRelative => {
                self.state.absolute_mode = false;
                self.responder.send_info("Relative positioning mode (G91)");
            }
            ParsedCommand::DisableSteppers { timeout_s } => self.handle_disable(timeout_s),
            ParsedCommand::SetSpeedFactor { percent } => self.handle_speed_factor(percent),
            ParsedCommand::QueryPosition => {
                self.responder.send_position(&self.state.position);
            }
            ParsedCommand::QueryFirmware => {
                self.responder.send_firmware_info();
            }
            ParsedCommand::QueryEndstops => {
                let endstops = &mut self.endstops;
                let clock = &self.clock;
                let x = endstops.is_triggered(Axis::X, clock);
                let y = endstops.is_triggered(Axis::Y, clock);
                let z = endstops.is_triggered(Axis::Z, clock);
                self.responder.send_endstop_status(x, y, z);
            }
            ParsedCommand::ReportSettings => self.handle_report_settings(),
            ParsedCommand::Pause => {
                if self.state.job == JobState::Running {
                    self.state.job = JobState::Paused;
                    self.responder.send_info("Execution paused.");
                } else {
                    self.responder.send_info("Not running.");
                }
            }
            ParsedCommand::Resume => {
                if self.state.job == JobState::Paused {
                    self.state.job = JobState::Running;
                    self.responder.send_info("Execution resumed.");
                } else {
                    self.responder.send_info("Nothing to resume.");
                }
            }
            ParsedCommand::Stop => {
                self.responder.send_info("M0: Stop.");
                self.queue.clear();
                if self.state.job != JobState::Idle {
                    self.job.close();
                    self.state.job = JobState::Idle;
                }
                self.steppers.disable_all();
            }
            ParsedCommand::QuickStop => {
                self.queue.clear();
                self.steppers.disable_all();
                self.responder
                    .send_info("M410: Quickstop initiated. Command buffer cleared.");
            }
            ParsedCommand::DiagnosticMotor { axis } => self.handle_diagnostic(axis),
            ParsedCommand::Unknown => {
                // The producer normally rejects these before queueing.
                self.responder
                    .send_error(ErrorCode::UnknownCommand, "Unknown command");
            }
        }

        // Exactly one terminator per executed command, after any data.
        self.responder.send_ok();
    }

    // --- handlers ----------------------------------------------------------

    fn handle_move(&mut self, x: Option<f32>, y: Option<f32>, z: Option<f32>, f: Option<f32>) {
        let absolute = self.state.absolute_mode;

        // Compose the target from the named words.
        let mut target = self.state.position;
        if absolute {
            if let Some(v) = x {
                target.x = v;
            }
            if let Some(v) = y {
                target.y = v;
            }
            if let Some(v) = z {
                target.z = v;
            }
        } else {
            target.x += x.unwrap_or(0.0);
            target.y += y.unwrap_or(0.0);
            target.z += z.unwrap_or(0.0);
        }

        let requested_feed = f.unwrap_or(self.state.feed_mm_min);
        if self.state.speed_factor != 100.0 {
            let mut msg: String<64> = String::new();
            let _ = write!(
                msg,
                "Feed={} (base={} * {}%)",
                (requested_feed * self.state.speed_factor / 100.0) as i32,
                requested_feed as i32,
                self.state.speed_factor as i32,
            );
            self.responder.send_info(&msg);
        }
        let feed_mm_s = self.state.effective_feed_mm_s(requested_feed);

        let dx = target.x - self.state.position.x;
        let dy = target.y - self.state.position.y;
        let dz = target.z - self.state.position.z;
        let dist_sq = dx * dx + dy * dy + dz * dz;

        // A host bug or corrupted stream can ask for an absurd single
        // segment; refuse before anything moves.
        if dist_sq > self.cfg.max_jump_mm * self.cfg.max_jump_mm {
            self.responder
                .send_error(ErrorCode::OutOfRange, "Impossible position jump detected");
            return;
        }

        // Soft limits bind in absolute mode only; relative jogging must
        // stay usable before homing.
        if absolute {
            let needs_homing = (x.is_some() && !self.homing.is_homed(Axis::X))
                || (y.is_some() && !self.homing.is_homed(Axis::Y))
                || (z.is_some() && !self.homing.is_homed(Axis::Z));
            if needs_homing {
                self.responder
                    .send_error(ErrorCode::NotHomed, "Required axis not homed");
                return;
            }
            if !self.kin.is_valid_position(&target) {
                self.responder
                    .send_error(ErrorCode::OutOfRange, "Target position out of bounds");
                return;
            }
        }

        // Decompose the feed across the moving axes so all arrive together,
        // each capped by its own ceiling.
        let total = crate::fmath::sqrtf(dist_sq);
        let (vx, vy, vz) = if total > 0.001 {
            (
                (feed_mm_s * crate::fmath::absf(dx) / total).min(self.cfg.max_velocity[0]),
                (feed_mm_s * crate::fmath::absf(dy) / total).min(self.cfg.max_velocity[1]),
                (feed_mm_s * crate::fmath::absf(dz) / total).min(self.cfg.max_velocity[2]),
            )
        } else {
            (
                feed_mm_s.min(self.cfg.max_velocity[0]),
                feed_mm_s.min(self.cfg.max_velocity[1]),
                self.cfg.max_velocity[2],
            )
        };

        let target_steps = self.kin.point_to_steps(&target);
        for (axis, speed) in [(Axis::X, vx), (Axis::Y, vy), (Axis::Z, vz)] {
            let i = axis.index();
            let chan = self.steppers.channel_mut(axis);
            chan.set_max_speed(speed * self.cfg.steps_per_mm[i]);
            chan.set_acceleration(self.cfg.max_accel[i] * self.cfg.steps_per_mm[i]);
            chan.move_to(target_steps[i]);
        }
        self.steppers.enable_all();

        // In relative mode, axes jogging toward their endstop get the
        // guarded executor: a collision becomes an auto-home instead of a
        // crash with lost steps.
        let mut guard = AxisSet::empty();
        if !absolute {
            for (axis, delta, named) in [
                (Axis::X, dx, x.is_some()),
                (Axis::Y, dy, y.is_some()),
                (Axis::Z, dz, z.is_some()),
            ] {
                let toward_home = if self.cfg.home_dir[axis.index()] < 0 {
                    delta < -0.001
                } else {
                    delta > 0.001
                };
                if named && toward_home {
                    guard |= AxisSet::of(axis);
                }
            }
        }

        let hit = self.run_guarded(guard);

        if let Some(axis) = hit {
            // The move stopped early; read back where the hardware actually
            // is before doing anything else.
            self.state.position = self.kin.steps_to_point(self.steppers.positions());
            let mut msg: String<64> = String::new();
            let _ = write!(msg, "Endstop hit on {} during jog, auto-homing", axis.letter());
            self.responder.send_info(&msg);

            let homed = {
                let clock = &self.clock;
                self.homing
                    .home_axis(
                        axis,
                        &self.cfg,
                        &self.kin,
                        &mut self.steppers,
                        &mut self.endstops,
                        &mut self.responder,
                        clock,
                        &mut self.watchdog,
                        &mut self.ui,
                    )
                    .is_ok()
            };

            if homed {
                // The jog path reseats the home-direction zero/max and
                // stops there; the Z park move belongs to G28 alone.
                self.state
                    .position
                    .set_axis(axis, self.homed_endpoint(axis));
            } else {
                self.responder
                    .send_error(ErrorCode::HomingFailed, "Homing failed for axis");
                self.state.position.set_axis(axis, 0.0);
            }
            // Counters were reseated by the homing code; mirror the logical
            // coordinate of the untouched axes from the hardware.
            let positions = self.steppers.positions();
            for other in Axis::ALL {
                if other != axis {
                    self.state
                        .position
                        .set_axis(other, self.kin.steps_to_mm(other, positions[other.index()]));
                }
            }
        } else {
            self.state.position = target;
        }

        if let Some(v) = f {
            self.state.feed_mm_min = v;
        }
        self.state.last_activity_ms = self.clock.millis();
    }

    /// Runs the seated move, guarding the given axes against endstop
    /// collision. Returns the axis that tripped, if any.
    fn run_guarded(&mut self, guard: AxisSet) -> Option<Axis> {
        let steppers = &mut self.steppers;
        let endstops = &mut self.endstops;
        let watchdog = &mut self.watchdog;
        let ui = &mut self.ui;
        let clock = &self.clock;

        if guard.is_empty() {
            motion::run_to_targets(steppers, clock, watchdog, ui);
            return None;
        }

        let mut hit: Option<Axis> = None;
        let outcome = motion::run_with_abort(steppers, clock, watchdog, ui, || {
            for axis in Axis::ALL {
                if guard.has(axis) && endstops.is_triggered(axis, clock) {
                    hit = Some(axis);
                    return true;
                }
            }
            false
        });
        match outcome {
            RunOutcome::Aborted => hit,
            RunOutcome::Completed => None,
        }
    }

    /// Where a homed axis's logical coordinate lands: axis max for a
    /// max-side switch, zero otherwise. The Z park height is deliberately
    /// not folded in here; parking is a G28 behavior, not a property of
    /// being homed.
    fn homed_endpoint(&self, axis: Axis) -> f32 {
        let i = axis.index();
        if self.cfg.home_dir[i] > 0 {
            self.cfg.max_pos[i]
        } else {
            0.0
        }
    }

    /// Post-home Z move to the pen start height. Called from the G28
    /// handler only; a jog-triggered auto-home never parks.
    fn park_z(&mut self) {
        let i = Axis::Z.index();
        let target = self.kin.mm_to_steps(Axis::Z, self.cfg.z_home_position);
        let chan = self.steppers.channel_mut(Axis::Z);
        chan.set_max_speed(self.cfg.max_velocity[i] * self.cfg.steps_per_mm[i]);
        chan.set_acceleration(self.cfg.max_accel[i] * self.cfg.steps_per_mm[i]);
        chan.move_to(target);

        let steppers = &mut self.steppers;
        let watchdog = &mut self.watchdog;
        let ui = &mut self.ui;
        let clock = &self.clock;
        motion::run_to_targets(steppers, clock, watchdog, ui);
        self.responder.send_info("Z moved to park position");
    }

    fn handle_home(&mut self, axes: AxisSet) {
        self.steppers.enable_all();

        let all = axes.is_empty();
        let success;
        {
            let homing = &mut self.homing;
            let cfg = &self.cfg;
            let kin = &self.kin;
            let steppers = &mut self.steppers;
            let endstops = &mut self.endstops;
            let responder = &mut self.responder;
            let watchdog = &mut self.watchdog;
            let ui = &mut self.ui;
            let clock = &self.clock;
            if all {
                let report =
                    homing.home_all(cfg, kin, steppers, endstops, responder, clock, watchdog, ui);
                success = report.all_ok();
            } else {
                let mut ok = true;
                for axis in Axis::ALL {
                    if axes.has(axis) {
                        ok &= homing
                            .home_axis(
                                axis, cfg, kin, steppers, endstops, responder, clock, watchdog, ui,
                            )
                            .is_ok();
                    }
                }
                success = ok;
            }
        }

        // Z parks at the pen start height after a successful home. Only
        // this handler does that; the homing primitive seats the zero and
        // nothing more.
        let z_attempted = all || axes.has(Axis::Z);
        if z_attempted && self.homing.is_homed(Axis::Z) {
            self.park_z();
        }

        // Seat the logical coordinates of every axis that was attempted:
        // homed axes at their endpoint (Z at the park height), failed axes
        // at zero (their counters were already zeroed so the next attempt
        // budgets full travel).
        for axis in Axis::ALL {
            if all || axes.has(axis) {
                if self.homing.is_homed(axis) {
                    let endpoint = if axis == Axis::Z {
                        self.cfg.z_home_position
                    } else {
                        self.homed_endpoint(axis)
                    };
                    self.state.position.set_axis(axis, endpoint);
                } else {
                    self.state.position.set_axis(axis, 0.0);
                }
            }
        }

        if success {
            self.responder.send_info("Homing complete.");
        } else {
            self.responder.send_error(
                ErrorCode::HomingFailed,
                "Partial homing - check serial log for details.",
            );
        }
        self.state.last_activity_ms = self.clock.millis();
    }

    fn handle_set_position(&mut self, x: Option<f32>, y: Option<f32>, z: Option<f32>) {
        if let Some(v) = x {
            self.state.position.x = v;
        }
        if let Some(v) = y {
            self.state.position.y = v;
        }
        if let Some(v) = z {
            self.state.position.z = v;
        }
        // Keep the hardware counters in lockstep with the new origin.
        let steps = self.kin.point_to_steps(&self.state.position);
        self.steppers.set_current_positions(steps);
        self.responder.send_info("Current position set.");
        self.state.last_activity_ms = self.clock.millis();
    }

    fn handle_disable(&mut self, timeout_s: Option<f32>) {
        match timeout_s {
            Some(v) if v == 0.0 => {
                // Disabled now AND never auto-disable: two distinct effects.
                self.state.idle_timeout_ms = 0;
                self.steppers.disable_all();
                self.responder
                    .send_info("Steppers permanently disabled (timeout 0).");
            }
            Some(v) => {
                self.state.idle_timeout_ms = (v * 1000.0) as u32;
                self.steppers.disable_all();
                self.state.last_activity_ms = self.clock.millis();
                let mut msg: String<64> = String::new();
                let _ = write!(msg, "Stepper timeout set to {}s. Steppers disabled.", v as u32);
                self.responder.send_info(&msg);
            }
            None => {
                self.steppers.disable_all();
                self.state.idle_timeout_ms = self.cfg.idle_timeout_ms;
                self.state.last_activity_ms = self.clock.millis();
                self.responder
                    .send_info("Steppers disabled. Default timeout applied.");
            }
        }
    }

    fn handle_speed_factor(&mut self, percent: Option<f32>) {
        if let Some(p) = percent {
            self.state.speed_factor = p.clamp(1.0, 999.0);
            let mut msg: String<48> = String::new();
            let _ = write!(msg, "Speed factor set to {}%", self.state.speed_factor as i32);
            self.responder.send_info(&msg);
        }
    }

    fn handle_report_settings(&mut self) {
        let st = &self.state;
        let mut line: String<96> = String::new();

        let _ = write!(
            line,
            "Current position (mm): X:{:.2} Y:{:.2} Z:{:.2}",
            st.position.x, st.position.y, st.position.z
        );
        self.responder.send_info(&line);

        line.clear();
        let _ = write!(
            line,
            "Positioning mode: {}",
            if st.absolute_mode { "Absolute" } else { "Relative" }
        );
        self.responder.send_info(&line);

        line.clear();
        let _ = write!(line, "Speed factor: {}%", st.speed_factor as i32);
        self.responder.send_info(&line);

        line.clear();
        let _ = write!(line, "Stepper timeout (ms): {}", st.idle_timeout_ms);
        self.responder.send_info(&line);

        line.clear();
        let _ = write!(
            line,
            "Homed: X:{} Y:{} Z:{}",
            self.homing.is_homed(Axis::X),
            self.homing.is_homed(Axis::Y),
            self.homing.is_homed(Axis::Z)
        );
        self.responder.send_info(&line);

        line.clear();
        let _ = write!(line, "Max XY Speed (mm/s): {:.1}", self.cfg.max_velocity[0]);
        self.responder.send_info(&line);

        line.clear();
        let _ = write!(line, "Max Z Speed (mm/s): {:.1}", self.cfg.max_velocity[2]);
        self.responder.send_info(&line);
    }

    fn handle_diagnostic(&mut self, axis: Axis) {
        let mut msg: String<80> = String::new();
        let _ = write!(msg, "M999: Testing {} motor with raw pin toggles...", axis.letter());
        self.responder.send_info(&msg);

        msg.clear();
        let _ = write!(msg, "Sending 800 steps at 1kHz on {}...", axis.letter());
        self.responder.send_info(&msg);

        {
            let clock = &self.clock;
            self.steppers
                .channel_mut(axis)
                .pulse_raw(800, 500, clock, &mut self.watchdog);
        }

        msg.clear();
        let _ = write!(msg, "M999: {} raw test complete. Did the motor move?", axis.letter());
        self.responder.send_info(&msg);
        self.responder.send_info(
            "If YES: motion config issue. If NO: hardware issue (wiring/driver/current).",
        );
    }
}
