// tests/common/mod.rs
//
// Hardware-in-the-loop simulation for integration tests. Step pulses from
// the firmware move a simulated carriage; simulated endstops trip by
// position, so homing and jog-guard behavior run against physics rather
// than canned answers. The clock self-advances a little on every query,
// which keeps the firmware's blocking loops finite in test time.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use inkplot::config::MachineConfig;
use inkplot::dispatch::Dispatcher;
use inkplot::endstop::{EndstopChannel, EndstopConfig, Endstops};
use inkplot::hal::{
    Clock, GpioIn, GpioOut, JobSource, NoDial, NoUi, Platform, SerialPort, Watchdog,
};
use inkplot::stepper::{StepperChannel, Steppers};

/// Microseconds the simulated clock advances per query.
const CLOCK_TICK_US: u64 = 20;

pub struct SimState {
    pub cfg: MachineConfig,
    pub now_us: u64,
    /// Physical carriage position per axis, in steps from the soft zero.
    pub positions: [i64; 3],
    pub dir_level: [bool; 3],
    pub step_level: [bool; 3],
    pub enable_level: [bool; 3],
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub watchdog_feeds: u64,
    /// Per-axis override: Some(triggered) pins the endstop regardless of
    /// position (for stall-injection tests).
    pub endstop_forced: [Option<bool>; 3],
}

impl SimState {
    fn new(cfg: MachineConfig) -> Self {
        Self {
            cfg,
            now_us: 0,
            positions: [0; 3],
            dir_level: [false; 3],
            step_level: [false; 3],
            enable_level: [true; 3], // active-low drivers start disabled
            rx: VecDeque::new(),
            tx: Vec::new(),
            watchdog_feeds: 0,
            endstop_forced: [None; 3],
        }
    }

    fn endstop_triggered(&self, axis: usize) -> bool {
        if let Some(forced) = self.endstop_forced[axis] {
            return forced;
        }
        let max_steps = (self.cfg.max_pos[axis] * self.cfg.steps_per_mm[axis]).round() as i64;
        if self.cfg.home_dir[axis] > 0 {
            self.positions[axis] >= max_steps
        } else {
            self.positions[axis] <= 0
        }
    }
}

pub type SharedSim = Rc<RefCell<SimState>>;

#[derive(Copy, Clone)]
pub enum OutRole {
    Step(usize),
    Dir(usize),
    Enable(usize),
}

pub struct SimOut {
    sim: SharedSim,
    role: OutRole,
}

impl GpioOut for SimOut {
    fn write(&mut self, high: bool) {
        let mut sim = self.sim.borrow_mut();
        match self.role {
            OutRole::Step(axis) => {
                let rising = high && !sim.step_level[axis];
                sim.step_level[axis] = high;
                if rising {
                    // Direction pin level moves the carriage; the default
                    // config wires drivers without inversion, so HIGH is +.
                    let delta = if sim.dir_level[axis] { 1 } else { -1 };
                    sim.positions[axis] += delta;
                }
            }
            OutRole::Dir(axis) => sim.dir_level[axis] = high,
            OutRole::Enable(axis) => sim.enable_level[axis] = high,
        }
    }
}

pub struct SimIn {
    sim: SharedSim,
    axis: usize,
}

impl GpioIn for SimIn {
    fn read(&mut self) -> bool {
        let sim = self.sim.borrow();
        let triggered = sim.endstop_triggered(self.axis);
        // The endstop layer un-inverts; present the matching electrical
        // level for this axis's configured polarity.
        if sim.cfg.endstop_inverting[self.axis] {
            !triggered
        } else {
            triggered
        }
    }
}

pub struct SimClock {
    sim: SharedSim,
}

impl Clock for SimClock {
    fn millis(&self) -> u32 {
        let mut sim = self.sim.borrow_mut();
        sim.now_us += CLOCK_TICK_US;
        (sim.now_us / 1000) as u32
    }

    fn micros(&self) -> u32 {
        let mut sim = self.sim.borrow_mut();
        sim.now_us += CLOCK_TICK_US;
        sim.now_us as u32
    }
}

pub struct SimWatchdog {
    sim: SharedSim,
}

impl Watchdog for SimWatchdog {
    fn feed(&mut self) {
        self.sim.borrow_mut().watchdog_feeds += 1;
    }
}

pub struct SimSerial {
    sim: SharedSim,
}

impl SerialPort for SimSerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.sim.borrow_mut().rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.sim.borrow_mut().tx.extend_from_slice(bytes);
    }
}

/// Scripted file-reader: a canned list of lines, then EOF.
pub struct SimJob {
    lines: VecDeque<String>,
    pub closed: bool,
}

impl SimJob {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            closed: false,
        }
    }
}

impl JobSource for SimJob {
    fn next_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        let line = self.lines.pop_front()?;
        let bytes = line.as_bytes();
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Some(len)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub struct SimPlatform;

impl Platform for SimPlatform {
    type Out = SimOut;
    type In = SimIn;
    type Serial = SimSerial;
    type Clock = SimClock;
    type Watchdog = SimWatchdog;
    type Dial = NoDial;
    type Ui = NoUi;
    type Job = SimJob;
}

pub struct SimMachine {
    pub sim: SharedSim,
    pub dispatcher: Dispatcher<SimPlatform>,
}

impl SimMachine {
    pub fn build() -> Self {
        Self::build_with(MachineConfig::standard(), &[])
    }

    pub fn build_with(cfg: MachineConfig, job_lines: &[&str]) -> Self {
        let sim: SharedSim = Rc::new(RefCell::new(SimState::new(cfg.clone())));

        let out = |role| SimOut {
            sim: sim.clone(),
            role,
        };
        let stepper = |axis: usize| {
            StepperChannel::new(
                out(OutRole::Step(axis)),
                out(OutRole::Dir(axis)),
                out(OutRole::Enable(axis)),
                cfg.invert_dir[axis],
                cfg.invert_enable[axis],
            )
        };
        let steppers = Steppers::new(stepper(0), stepper(1), stepper(2));

        let seed_clock = SimClock { sim: sim.clone() };
        let endstop = |axis: usize| {
            EndstopChannel::new(
                SimIn {
                    sim: sim.clone(),
                    axis,
                },
                EndstopConfig {
                    inverting: cfg.endstop_inverting[axis],
                    pullup: cfg.endstop_pullup[axis],
                    debounce_ms: cfg.endstop_debounce_ms,
                },
                &seed_clock,
            )
        };
        let endstops = Endstops::new(endstop(0), endstop(1), endstop(2));

        let dispatcher: Dispatcher<SimPlatform> = Dispatcher::new(
            cfg,
            steppers,
            endstops,
            SimSerial { sim: sim.clone() },
            SimClock { sim: sim.clone() },
            SimWatchdog { sim: sim.clone() },
            NoDial,
            NoUi,
            SimJob::new(job_lines),
        );

        Self { sim, dispatcher }
    }

    /// Queues host input (terminator appended).
    pub fn send(&mut self, line: &str) {
        let mut sim = self.sim.borrow_mut();
        sim.rx.extend(line.bytes());
        sim.rx.push_back(b'\n');
    }

    pub fn poll_n(&mut self, passes: usize) {
        for _ in 0..passes {
            self.dispatcher.poll();
        }
    }

    /// Sends each line, then runs enough passes to drain and execute them.
    pub fn run_lines(&mut self, lines: &[&str]) {
        for line in lines {
            self.send(line);
        }
        self.poll_n(lines.len() + 2);
    }

    /// Drains and returns everything the firmware wrote to the host.
    pub fn take_output(&mut self) -> String {
        let bytes = std::mem::take(&mut self.sim.borrow_mut().tx);
        String::from_utf8(bytes).unwrap()
    }

    pub fn position_steps(&self) -> [i64; 3] {
        self.sim.borrow().positions
    }
}
