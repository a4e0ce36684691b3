// src/stepper.rs

//! Step/direction stepper channels.
//!
//! A channel tracks its position in steps and emits at most one pulse per
//! `run_speed_to_position` call, paced by the currently seated speed. It has
//! no profile of its own; the motion executor reseats the speed at a fixed
//! cadence to shape acceleration, which keeps the per-step path down to a
//! timer compare and two pin writes.

use crate::hal::{delay_us, Clock, GpioOut, Watchdog};
use crate::kinematics::Axis;

/// One step/dir/enable channel.
pub struct StepperChannel<O: GpioOut> {
    step_pin: O,
    dir_pin: O,
    enable_pin: O,
    dir_inverted: bool,
    enable_inverted: bool,
    position: i32,
    target: i32,
    /// Steps per second currently driving the pulse pacing. Zero means no
    /// pulses are generated at all.
    speed: f32,
    max_speed: f32,
    accel: f32,
    step_interval_us: u32,
    last_step_us: u32,
}

impl<O: GpioOut> StepperChannel<O> {
    pub fn new(
        mut step_pin: O,
        mut dir_pin: O,
        enable_pin: O,
        dir_inverted: bool,
        enable_inverted: bool,
    ) -> Self {
        step_pin.write(false);
        dir_pin.write(dir_inverted);
        let mut chan = Self {
            step_pin,
            dir_pin,
            enable_pin,
            dir_inverted,
            enable_inverted,
            position: 0,
            target: 0,
            speed: 0.0,
            max_speed: 0.0,
            accel: 0.0,
            step_interval_us: 0,
            last_step_us: 0,
        };
        chan.set_enabled(false);
        chan
    }

    /// Zero max speed would make the step interval undefined, so it is
    /// silently refused; an axis that does not move in a composite move
    /// simply never has its speed driven.
    pub fn set_max_speed(&mut self, steps_per_s: f32) {
        if steps_per_s > 0.0 {
            self.max_speed = steps_per_s;
        }
    }

    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    pub fn set_acceleration(&mut self, steps_per_s2: f32) {
        if steps_per_s2 > 0.0 {
            self.accel = steps_per_s2;
        }
    }

    pub fn acceleration(&self) -> f32 {
        self.accel
    }

    /// Seats the instantaneous speed and recomputes the pulse interval.
    /// Only the magnitude matters for pacing; direction comes from the sign
    /// of the remaining travel.
    pub fn set_speed(&mut self, steps_per_s: f32) {
        let magnitude = crate::fmath::absf(steps_per_s);
        let magnitude = if self.max_speed > 0.0 {
            magnitude.min(self.max_speed)
        } else {
            magnitude
        };
        self.speed = magnitude;
        self.step_interval_us = if magnitude > 0.0 {
            (1_000_000.0 / magnitude) as u32
        } else {
            0
        };
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn move_to(&mut self, target_steps: i32) {
        self.target = target_steps;
    }

    pub fn move_by(&mut self, delta_steps: i32) {
        self.target = self.position.wrapping_add(delta_steps);
    }

    pub fn distance_to_go(&self) -> i32 {
        self.target - self.position
    }

    pub fn current_position(&self) -> i32 {
        self.position
    }

    /// Reseats the step counter. Also zeroes the remaining distance and the
    /// speed, which makes `set_current_position(current_position())` the
    /// instant-stop primitive: no deceleration, counters stay consistent.
    pub fn set_current_position(&mut self, steps: i32) {
        self.position = steps;
        self.target = steps;
        self.speed = 0.0;
        self.step_interval_us = 0;
    }

    /// Instant stop, no deceleration.
    pub fn stop_immediate(&mut self) {
        let here = self.position;
        self.set_current_position(here);
    }

    /// Emits at most one step toward the target if the pulse interval has
    /// elapsed. Returns whether a step was taken.
    pub fn run_speed_to_position(&mut self, clock: &impl Clock) -> bool {
        let remaining = self.distance_to_go();
        if remaining == 0 || self.step_interval_us == 0 {
            return false;
        }
        let now = clock.micros();
        if now.wrapping_sub(self.last_step_us) < self.step_interval_us {
            return false;
        }
        self.last_step_us = now;

        let forward = remaining > 0;
        self.dir_pin.write(forward != self.dir_inverted);
        self.step_pin.write(true);
        self.step_pin.write(false);
        self.position += if forward { 1 } else { -1 };
        true
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enable_pin.write(on != self.enable_inverted);
    }

    /// Diagnostic path: raw step pulses that bypass the speed machinery
    /// entirely, for checking the MCU -> driver -> motor wiring (M999).
    /// Deliberately does not touch the step counter; the dispatcher reseats
    /// positions afterwards if it cares.
    pub fn pulse_raw<C: Clock, W: Watchdog>(
        &mut self,
        steps: u32,
        half_period_us: u32,
        clock: &C,
        watchdog: &mut W,
    ) {
        self.set_enabled(true);
        // Let the driver stabilize before the first edge.
        delay_us(clock, 5_000);
        self.dir_pin.write(true);
        delay_us(clock, 1_000);
        for _ in 0..steps {
            watchdog.feed();
            self.step_pin.write(true);
            delay_us(clock, half_period_us);
            self.step_pin.write(false);
            delay_us(clock, half_period_us);
        }
        self.set_enabled(false);
    }
}

/// The three channels plus the shared disabled flag.
pub struct Steppers<O: GpioOut> {
    channels: [StepperChannel<O>; 3],
    disabled: bool,
}

impl<O: GpioOut> Steppers<O> {
    pub fn new(x: StepperChannel<O>, y: StepperChannel<O>, z: StepperChannel<O>) -> Self {
        let mut steppers = Self {
            channels: [x, y, z],
            disabled: true,
        };
        steppers.disable_all();
        steppers
    }

    pub fn channel(&self, axis: Axis) -> &StepperChannel<O> {
        &self.channels[axis.index()]
    }

    pub fn channel_mut(&mut self, axis: Axis) -> &mut StepperChannel<O> {
        &mut self.channels[axis.index()]
    }

    pub fn enable_all(&mut self) {
        for chan in &mut self.channels {
            chan.set_enabled(true);
        }
        self.disabled = false;
    }

    pub fn disable_all(&mut self) {
        for chan in &mut self.channels {
            chan.set_enabled(false);
        }
        self.disabled = true;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn positions(&self) -> [i32; 3] {
        [
            self.channels[0].current_position(),
            self.channels[1].current_position(),
            self.channels[2].current_position(),
        ]
    }

    pub fn set_current_positions(&mut self, steps: [i32; 3]) {
        for (chan, s) in self.channels.iter_mut().zip(steps) {
            chan.set_current_position(s);
        }
    }

    pub fn any_moving(&self) -> bool {
        self.channels.iter().any(|c| c.distance_to_go() != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Clock;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Default)]
    struct PinLog {
        levels: RefCell<Vec<bool>>,
        level: Cell<bool>,
    }

    struct LogPin(Rc<PinLog>);

    impl GpioOut for LogPin {
        fn write(&mut self, high: bool) {
            self.0.level.set(high);
            self.0.levels.borrow_mut().push(high);
        }
    }

    struct ManualClock(Rc<Cell<u32>>);

    impl Clock for ManualClock {
        fn millis(&self) -> u32 {
            self.0.get() / 1000
        }

        fn micros(&self) -> u32 {
            self.0.get()
        }
    }

    fn channel() -> (StepperChannel<LogPin>, Rc<PinLog>, Rc<PinLog>, Rc<PinLog>, Rc<Cell<u32>>, ManualClock) {
        let step = Rc::new(PinLog::default());
        let dir = Rc::new(PinLog::default());
        let enable = Rc::new(PinLog::default());
        let time = Rc::new(Cell::new(0u32));
        let clock = ManualClock(time.clone());
        let chan = StepperChannel::new(
            LogPin(step.clone()),
            LogPin(dir.clone()),
            LogPin(enable.clone()),
            false,
            true,
        );
        (chan, step, dir, enable, time, clock)
    }

    fn rising_edges(log: &PinLog) -> usize {
        let levels = log.levels.borrow();
        let mut edges = 0;
        let mut prev = false;
        for &l in levels.iter() {
            if l && !prev {
                edges += 1;
            }
            prev = l;
        }
        edges
    }

    #[test]
    fn no_pulses_without_speed() {
        let (mut chan, step, _dir, _en, time, clock) = channel();
        chan.move_to(100);
        for t in (0..10_000).step_by(100) {
            time.set(t);
            chan.run_speed_to_position(&clock);
        }
        assert_eq!(rising_edges(&step), 0);
        assert_eq!(chan.current_position(), 0);
    }

    #[test]
    fn paces_pulses_by_interval() {
        let (mut chan, step, _dir, _en, time, clock) = channel();
        chan.set_max_speed(10_000.0);
        chan.move_to(5);
        chan.set_speed(1000.0); // 1000 us interval
        let mut steps = 0;
        for t in (0..20_000).step_by(100) {
            time.set(t);
            if chan.run_speed_to_position(&clock) {
                steps += 1;
            }
        }
        assert_eq!(steps, 5);
        assert_eq!(chan.current_position(), 5);
        assert_eq!(rising_edges(&step), 5);
        // Stops cleanly at the target even though we kept calling.
        assert_eq!(chan.distance_to_go(), 0);
    }

    #[test]
    fn direction_follows_sign_of_travel() {
        let (mut chan, _step, dir, _en, time, clock) = channel();
        chan.set_max_speed(10_000.0);
        chan.set_speed(1000.0);
        chan.move_to(-2);
        let mut t = 0;
        while chan.distance_to_go() != 0 {
            t += 500;
            time.set(t);
            chan.run_speed_to_position(&clock);
        }
        assert_eq!(chan.current_position(), -2);
        assert_eq!(dir.level.get(), false);

        chan.move_to(2);
        chan.set_speed(1000.0);
        while chan.distance_to_go() != 0 {
            t += 500;
            time.set(t);
            chan.run_speed_to_position(&clock);
        }
        assert_eq!(dir.level.get(), true);
    }

    #[test]
    fn dir_inversion_flips_pin_level() {
        let step = Rc::new(PinLog::default());
        let dir = Rc::new(PinLog::default());
        let enable = Rc::new(PinLog::default());
        let time = Rc::new(Cell::new(0u32));
        let clock = ManualClock(time.clone());
        let mut chan = StepperChannel::new(
            LogPin(step),
            LogPin(dir.clone()),
            LogPin(enable),
            true,
            true,
        );
        chan.set_max_speed(10_000.0);
        chan.set_speed(1000.0);
        chan.move_to(1);
        time.set(2000);
        chan.run_speed_to_position(&clock);
        // Forward travel with an inverted direction pin drives the pin LOW.
        assert_eq!(dir.level.get(), false);
    }

    #[test]
    fn set_max_speed_refuses_zero() {
        let (mut chan, ..) = channel();
        chan.set_max_speed(800.0);
        chan.set_max_speed(0.0);
        assert_eq!(chan.max_speed(), 800.0);
    }

    #[test]
    fn set_speed_clamps_to_max() {
        let (mut chan, ..) = channel();
        chan.set_max_speed(100.0);
        chan.set_speed(5000.0);
        assert_eq!(chan.speed(), 100.0);
    }

    #[test]
    fn reseating_position_is_an_instant_stop() {
        let (mut chan, _step, _dir, _en, time, clock) = channel();
        chan.set_max_speed(10_000.0);
        chan.set_speed(1000.0);
        chan.move_to(1000);
        time.set(2000);
        chan.run_speed_to_position(&clock);
        assert!(chan.distance_to_go() != 0);

        chan.stop_immediate();
        assert_eq!(chan.distance_to_go(), 0);
        assert_eq!(chan.speed(), 0.0);
        // Further runs emit nothing.
        time.set(100_000);
        assert!(!chan.run_speed_to_position(&clock));
    }

    #[test]
    fn enable_is_active_low_when_inverted() {
        let (mut chan, _step, _dir, enable, _time, _clock) = channel();
        chan.set_enabled(true);
        assert_eq!(enable.level.get(), false);
        chan.set_enabled(false);
        assert_eq!(enable.level.get(), true);
    }

    #[test]
    fn raw_pulse_test_leaves_counters_alone() {
        struct NullWatchdog;
        impl Watchdog for NullWatchdog {
            fn feed(&mut self) {}
        }
        struct FreeClock(Cell<u32>);
        impl Clock for FreeClock {
            fn millis(&self) -> u32 {
                self.0.get() / 1000
            }
            fn micros(&self) -> u32 {
                self.0.set(self.0.get().wrapping_add(50));
                self.0.get()
            }
        }

        let step = Rc::new(PinLog::default());
        let dir = Rc::new(PinLog::default());
        let enable = Rc::new(PinLog::default());
        let mut chan = StepperChannel::new(
            LogPin(step.clone()),
            LogPin(dir),
            LogPin(enable),
            false,
            true,
        );
        let clock = FreeClock(Cell::new(0));
        let mut wdg = NullWatchdog;
        chan.pulse_raw(8, 500, &clock, &mut wdg);
        assert_eq!(rising_edges(&step), 8);
        assert_eq!(chan.current_position(), 0);
    }
}
