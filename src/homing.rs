// src/homing.rs

//! Endstop homing, four phases per axis.
//!
//! 1. Pre-clear: if the switch already reads triggered, back away twice the
//!    backoff distance and require it to release.
//! 2. Fast approach: drive toward the switch with a travel budget of twice
//!    the axis length, instant-stop on trigger.
//! 3. Backoff: retreat the configured distance; the switch must release.
//! 4. Slow approach: precision pass at the slow rate.
//!
//! Approaches run with acceleration scaled down by the homing factor, and
//! both homing rates are capped by the axis max velocity: the leadscrew Z
//! would otherwise be commanded well past what its motor can step.
//!
//! A failed axis ends un-homed with its step counter reset to zero, so the
//! next attempt budgets the full travel from anywhere.

use core::fmt::Write as _;

use heapless::String;

use crate::config::MachineConfig;
use crate::endstop::Endstops;
use crate::hal::{delay_ms, Clock, GpioIn, GpioOut, SerialPort, StatusUi, Watchdog};
use crate::kinematics::{Axis, AxisSet, Kinematics};
use crate::motion::{self, RunOutcome};
use crate::protocol::Responder;
use crate::stepper::Steppers;

/// Why a homing attempt failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HomingError {
    /// Pre-triggered endstop did not release after the clearing move.
    PreTriggered,
    /// Full travel budget consumed without a trigger.
    Stall,
    /// Switch still triggered after the backoff move.
    StillTriggered,
    /// Phase exceeded the per-axis timeout.
    Timeout,
}

/// Per-axis homing results for a home-all run.
#[derive(Copy, Clone, Debug, Default)]
pub struct HomeAllReport {
    pub results: [Option<Result<(), HomingError>>; 3],
}

impl HomeAllReport {
    pub fn all_ok(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r, Some(Ok(()))))
    }
}

/// Tracks which axes currently have a trusted zero.
pub struct Homing {
    homed: AxisSet,
}

impl Homing {
    pub fn new() -> Self {
        Self {
            homed: AxisSet::empty(),
        }
    }

    pub fn is_homed(&self, axis: Axis) -> bool {
        self.homed.has(axis)
    }

    pub fn is_fully_homed(&self) -> bool {
        self.homed == AxisSet::all()
    }

    /// Homes one axis through the four-phase sequence. On success the axis
    /// step counter is seated at its homed endpoint (axis max for a max-side
    /// switch, zero otherwise). On failure the homed flag is cleared and the
    /// counter zeroed. The post-home Z park move is not part of this
    /// primitive; only the G28 handler performs it.
    #[allow(clippy::too_many_arguments)]
    pub fn home_axis<O, I, S, C, W, U>(
        &mut self,
        axis: Axis,
        cfg: &MachineConfig,
        kin: &Kinematics,
        steppers: &mut Steppers<O>,
        endstops: &mut Endstops<I>,
        responder: &mut Responder<S>,
        clock: &C,
        watchdog: &mut W,
        ui: &mut U,
    ) -> Result<(), HomingError>
    where
        O: GpioOut,
        I: GpioIn,
        S: SerialPort,
        C: Clock,
        W: Watchdog,
        U: StatusUi,
    {
        let result = self.run_sequence(
            axis, cfg, kin, steppers, endstops, responder, clock, watchdog, ui,
        );

        let i = axis.index();
        match result {
            Ok(()) => {
                // Seat the counter at the known physical endpoint.
                let seat = if cfg.home_dir[i] > 0 {
                    kin.mm_to_steps(axis, cfg.max_pos[i])
                } else {
                    0
                };
                steppers.channel_mut(axis).set_current_position(seat);
                self.homed |= AxisSet::of(axis);
                Ok(())
            }
            Err(e) => {
                self.homed &= !AxisSet::of(axis);
                // Zero the counter so the next attempt's travel budget is
                // measured from scratch.
                steppers.channel_mut(axis).set_current_position(0);
                let mut msg: String<64> = String::new();
                let _ = write!(msg, "Homing failed on {}: {:?}", axis.letter(), e);
                responder.send_info(&msg);
                Err(e)
            }
        }
    }

    /// Home-all order is Z, X, Y (pen lift first for safety). Every axis is
    /// attempted even when an earlier one fails.
    #[allow(clippy::too_many_arguments)]
    pub fn home_all<O, I, S, C, W, U>(
        &mut self,
        cfg: &MachineConfig,
        kin: &Kinematics,
        steppers: &mut Steppers<O>,
        endstops: &mut Endstops<I>,
        responder: &mut Responder<S>,
        clock: &C,
        watchdog: &mut W,
        ui: &mut U,
    ) -> HomeAllReport
    where
        O: GpioOut,
        I: GpioIn,
        S: SerialPort,
        C: Clock,
        W: Watchdog,
        U: StatusUi,
    {
        let mut report = HomeAllReport::default();
        for axis in [Axis::Z, Axis::X, Axis::Y] {
            let mut msg: String<32> = String::new();
            let _ = write!(msg, "Homing {} axis...", axis.letter());
            responder.send_info(&msg);
            report.results[axis.index()] = Some(self.home_axis(
                axis, cfg, kin, steppers, endstops, responder, clock, watchdog, ui,
            ));
        }

        let mut summary: String<64> = String::new();
        let _ = write!(
            summary,
            "Homing result: X={} Y={} Z={}",
            status(report.results[0]),
            status(report.results[1]),
            status(report.results[2]),
        );
        responder.send_info(&summary);
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn run_sequence<O, I, S, C, W, U>(
        &mut self,
        axis: Axis,
        cfg: &MachineConfig,
        kin: &Kinematics,
        steppers: &mut Steppers<O>,
        endstops: &mut Endstops<I>,
        responder: &mut Responder<S>,
        clock: &C,
        watchdog: &mut W,
        ui: &mut U,
    ) -> Result<(), HomingError>
    where
        O: GpioOut,
        I: GpioIn,
        S: SerialPort,
        C: Clock,
        W: Watchdog,
        U: StatusUi,
    {
        let i = axis.index();
        // Rate caps: nominal homing speeds can exceed a slow axis's ceiling.
        let fast = cfg.homing_feedrate_fast.min(cfg.max_velocity[i]);
        let slow = cfg.homing_feedrate_slow.min(cfg.max_velocity[i]);

        steppers.enable_all();

        // Pre-clear.
        if endstops.is_triggered(axis, clock) {
            responder.send_info("Endstop pre-triggered, clearing...");
            back_off(
                axis,
                cfg.homing_backoff_mm * 2.0,
                fast,
                cfg,
                kin,
                steppers,
                clock,
                watchdog,
                ui,
            )?;
            // Let the debounce window settle before re-reading.
            delay_ms(clock, watchdog, 50);
            if endstops.is_triggered(axis, clock) {
                return Err(HomingError::PreTriggered);
            }
        }

        // Phase 1: fast approach. Budget twice the axis span so the switch
        // is reachable from any starting position, including beyond the
        // soft-limit boundary.
        let budget = kin.mm_to_steps(axis, cfg.max_pos[i] * 2.0);
        approach(
            axis, fast, budget, cfg, kin, steppers, endstops, clock, watchdog, ui,
        )?;

        // Phase 2: backoff, then the switch must have released.
        back_off(
            axis,
            cfg.homing_backoff_mm,
            fast,
            cfg,
            kin,
            steppers,
            clock,
            watchdog,
            ui,
        )?;
        if endstops.is_triggered(axis, clock) {
            return Err(HomingError::StillTriggered);
        }

        // Phase 3: slow approach, generous margin over the backoff distance.
        let slow_budget = kin.mm_to_steps(axis, cfg.homing_backoff_mm * 4.0);
        approach(
            axis, slow, slow_budget, cfg, kin, steppers, endstops, clock, watchdog, ui,
        )?;

        // Phase 4 (seating the zero) happens in the caller.
        Ok(())
    }
}

impl Default for Homing {
    fn default() -> Self {
        Self::new()
    }
}

fn status(r: Option<Result<(), HomingError>>) -> &'static str {
    match r {
        Some(Ok(())) => "OK",
        Some(Err(_)) => "FAIL",
        None => "SKIP",
    }
}

/// Drives toward the endstop until it triggers (instant stop, success), the
/// budget runs out (stall) or the phase times out.
#[allow(clippy::too_many_arguments)]
fn approach<O, I, C, W, U>(
    axis: Axis,
    rate_mm_s: f32,
    budget_steps: i32,
    cfg: &MachineConfig,
    kin: &Kinematics,
    steppers: &mut Steppers<O>,
    endstops: &mut Endstops<I>,
    clock: &C,
    watchdog: &mut W,
    ui: &mut U,
) -> Result<(), HomingError>
where
    O: GpioOut,
    I: GpioIn,
    C: Clock,
    W: Watchdog,
    U: StatusUi,
{
    let i = axis.index();
    let spm = kin.steps_per_mm(axis);
    let dir = cfg.home_dir[i] as i32;

    let chan = steppers.channel_mut(axis);
    chan.set_max_speed(rate_mm_s * spm);
    chan.set_acceleration(cfg.max_accel[i] * spm * cfg.homing_accel_factor);
    chan.move_by(dir * budget_steps);

    let started = clock.millis();
    let mut cause: Option<HomingError> = None;
    let outcome = motion::run_with_abort(steppers, clock, watchdog, ui, || {
        if endstops.is_triggered(axis, clock) {
            return true;
        }
        if clock.millis().wrapping_sub(started) > cfg.homing_timeout_ms {
            cause = Some(HomingError::Timeout);
            return true;
        }
        false
    });

    match outcome {
        RunOutcome::Aborted => match cause {
            None => Ok(()), // endstop fired
            Some(e) => Err(e),
        },
        RunOutcome::Completed => Err(HomingError::Stall),
    }
}

/// Retreats in the anti-home direction by `distance_mm`.
#[allow(clippy::too_many_arguments)]
fn back_off<O, C, W, U>(
    axis: Axis,
    distance_mm: f32,
    rate_mm_s: f32,
    cfg: &MachineConfig,
    kin: &Kinematics,
    steppers: &mut Steppers<O>,
    clock: &C,
    watchdog: &mut W,
    ui: &mut U,
) -> Result<(), HomingError>
where
    O: GpioOut,
    C: Clock,
    W: Watchdog,
    U: StatusUi,
{
    let i = axis.index();
    let spm = kin.steps_per_mm(axis);
    let dir = cfg.home_dir[i] as i32;

    let chan = steppers.channel_mut(axis);
    chan.set_max_speed(rate_mm_s * spm);
    chan.set_acceleration(cfg.max_accel[i] * spm * cfg.homing_accel_factor);
    chan.move_by(-dir * kin.mm_to_steps(axis, distance_mm));

    // 1.5x the expected travel time plus margin; a retreat that takes
    // longer than that has lost steps or stalled.
    let budget_ms = (distance_mm / rate_mm_s * 1500.0) as u32 + 500;
    let started = clock.millis();
    let outcome = motion::run_with_abort(steppers, clock, watchdog, ui, || {
        clock.millis().wrapping_sub(started) > budget_ms
    });

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Aborted => Err(HomingError::Timeout),
    }
}
