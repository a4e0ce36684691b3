// src/motion.rs

//! Blocking multi-axis motion under one shared trapezoidal profile.
//!
//! The profile is computed for the dominant axis (largest step count) and
//! the other axes run at speeds scaled by their own max-speed ratio, so all
//! three arrive together and the resultant path is straight. Rather than a
//! square root per step (hopeless on a small MCU), the instantaneous speed
//! is recomputed from progress at a 200 Hz cadence and the per-step loop
//! stays a cheap timer compare.

use crate::fmath;
use crate::hal::{Clock, GpioOut, StatusUi, Watchdog};
use crate::kinematics::Axis;
use crate::stepper::Steppers;

/// Speed recomputation cadence.
const SPEED_UPDATE_MS: u32 = 5;
/// Display refresh cadence while blocking.
const UI_UPDATE_MS: u32 = 150;
/// Speed floor: fraction of the dominant max speed...
const MIN_SPEED_FRACTION: f32 = 0.05;
/// ...but never below this many steps/s, or the ramp never starts.
const MIN_SPEED_FLOOR: f32 = 50.0;

/// How a blocking run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// All channels reached their targets.
    Completed,
    /// The abort predicate fired; every channel was instant-stopped.
    Aborted,
}

/// Runs all channels to their seated targets. Blocks until done.
pub fn run_to_targets<O, C, W, U>(
    steppers: &mut Steppers<O>,
    clock: &C,
    watchdog: &mut W,
    ui: &mut U,
) where
    O: GpioOut,
    C: Clock,
    W: Watchdog,
    U: StatusUi,
{
    let _ = run_with_abort(steppers, clock, watchdog, ui, || false);
}

/// Like [`run_to_targets`], but evaluates `should_stop` at the speed-update
/// cadence. When it returns true every channel is stopped instantly (its
/// position reseated to itself, between pulses, so the counters stay exact)
/// and the run reports [`RunOutcome::Aborted`].
pub fn run_with_abort<O, C, W, U, F>(
    steppers: &mut Steppers<O>,
    clock: &C,
    watchdog: &mut W,
    ui: &mut U,
    mut should_stop: F,
) -> RunOutcome
where
    O: GpioOut,
    C: Clock,
    W: Watchdog,
    U: StatusUi,
    F: FnMut() -> bool,
{
    let dist = [
        steppers.channel(Axis::X).distance_to_go().unsigned_abs(),
        steppers.channel(Axis::Y).distance_to_go().unsigned_abs(),
        steppers.channel(Axis::Z).distance_to_go().unsigned_abs(),
    ];

    // Dominant axis: longest travel in steps, X preferred on ties.
    let dominant = if dist[0] >= dist[1] && dist[0] >= dist[2] {
        Axis::X
    } else if dist[1] >= dist[2] {
        Axis::Y
    } else {
        Axis::Z
    };
    let dominant_dist = dist[dominant.index()];
    if dominant_dist == 0 {
        return RunOutcome::Completed;
    }

    let dominant_max_speed = steppers.channel(dominant).max_speed();
    let dominant_accel = steppers.channel(dominant).acceleration();

    // Trapezoid on the dominant axis; collapses to a triangle when there is
    // not enough travel for a full accelerate + decelerate.
    let total = dominant_dist as f32;
    let mut accel_steps = (dominant_max_speed * dominant_max_speed) / (2.0 * dominant_accel);
    let mut decel_steps = accel_steps;
    if accel_steps + decel_steps > total {
        accel_steps = total / 2.0;
        decel_steps = total - accel_steps;
    }
    let cruise_start = accel_steps;
    let cruise_end = total - decel_steps;

    let start = steppers.positions();

    // Prime every moving axis with a nonzero speed before the first pass:
    // a zero speed generates no pulses at all, so the loop would never make
    // progress.
    let floor = (dominant_max_speed * MIN_SPEED_FRACTION).max(MIN_SPEED_FLOOR);
    seat_speeds(steppers, &dist, dominant, dominant_max_speed, floor);

    let mut last_speed_update = clock.millis();
    let mut last_ui_update = last_speed_update;

    while steppers.any_moving() {
        watchdog.feed();

        let now = clock.millis();
        if now.wrapping_sub(last_speed_update) >= SPEED_UPDATE_MS {
            last_speed_update = now;

            if should_stop() {
                for axis in Axis::ALL {
                    steppers.channel_mut(axis).stop_immediate();
                }
                return RunOutcome::Aborted;
            }

            // Progress along the dominant axis, estimated as the largest
            // per-axis travel so a stalled dominant reading cannot wedge the
            // ramp.
            let here = steppers.positions();
            let mut progress: u32 = 0;
            for i in 0..3 {
                progress = progress.max(here[i].wrapping_sub(start[i]).unsigned_abs());
            }

            let target_speed = if (progress as f32) < cruise_start {
                // v = sqrt(2 * a * d)
                let v = fmath::sqrtf(2.0 * dominant_accel * (progress.max(1) as f32));
                v.min(dominant_max_speed).max(floor)
            } else if (progress as f32) < cruise_end {
                dominant_max_speed
            } else {
                let remaining = dominant_dist.saturating_sub(progress);
                let v = fmath::sqrtf(2.0 * dominant_accel * (remaining.max(1) as f32));
                v.min(dominant_max_speed).max(floor)
            };

            seat_speeds(steppers, &dist, dominant, dominant_max_speed, target_speed);
        }

        if now.wrapping_sub(last_ui_update) >= UI_UPDATE_MS {
            last_ui_update = now;
            ui.tick(now);
        }

        for axis in Axis::ALL {
            steppers.channel_mut(axis).run_speed_to_position(clock);
        }
    }

    RunOutcome::Completed
}

/// Seats `dominant_speed` on the dominant axis and the ratio-scaled speed on
/// every other moving axis, so the group decelerates and arrives as one.
fn seat_speeds<O: GpioOut>(
    steppers: &mut Steppers<O>,
    dist: &[u32; 3],
    dominant: Axis,
    dominant_max_speed: f32,
    dominant_speed: f32,
) {
    let ratio = dominant_speed / dominant_max_speed;
    for axis in Axis::ALL {
        if dist[axis.index()] == 0 {
            continue;
        }
        let chan = steppers.channel_mut(axis);
        let speed = if axis == dominant {
            dominant_speed
        } else {
            chan.max_speed() * ratio
        };
        chan.set_speed(speed);
    }
}
