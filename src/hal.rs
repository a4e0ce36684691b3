// src/hal.rs

//! Hardware abstraction layer.
//!
//! The motion core never touches registers; everything it needs from the
//! board comes through these traits. An embedding implements them over its
//! HAL crate (adapters for `embedded-hal` digital pins are provided below),
//! a test implements them over plain memory.

/// Internal pull resistor selection for input pins.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PullType {
    Up,
    Down,
    Floating,
}

/// A push-pull digital output.
pub trait GpioOut {
    fn write(&mut self, high: bool);
}

/// A digital input. `read` returns the raw electrical level; polarity
/// interpretation belongs to the endstop layer.
pub trait GpioIn {
    fn read(&mut self) -> bool;
}

/// Monotonic time source. Both counters wrap; consumers compare with
/// `wrapping_sub` only.
pub trait Clock {
    fn millis(&self) -> u32;
    fn micros(&self) -> u32;
}

/// The hardware watchdog. Every long loop in the core feeds it once per
/// iteration; an unfed watchdog resets the device.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Byte-oriented serial transport (115200 8N1 on the stock board).
pub trait SerialPort {
    /// Returns the next received byte, or `None` when the RX buffer is empty.
    fn read_byte(&mut self) -> Option<u8>;
    fn write(&mut self, bytes: &[u8]);
}

/// Analog speed-override input (front-panel potentiometer).
///
/// Implementations debounce/average internally and report a value only when
/// the knob physically moved, so a serial M220 stays in effect until the
/// operator turns the dial again.
pub trait SpeedDial {
    /// New override percent, if the dial changed since the last poll.
    fn poll(&mut self, now_ms: u32) -> Option<u16>;
}

/// Status display hook. `tick` must not block; it is also called at a
/// ~150 ms cadence from inside blocking motion so a spinner can animate.
pub trait StatusUi {
    fn tick(&mut self, now_ms: u32);
}

/// Alternate command producer (SD-card style line reader).
pub trait JobSource {
    /// Copies the next line into `buf` and returns its length, or `None` at
    /// end of file. Lines are raw; the dispatcher strips comments itself.
    fn next_line(&mut self, buf: &mut [u8]) -> Option<usize>;
    fn close(&mut self);
}

/// The full set of peripheral types a board provides to the dispatcher.
pub trait Platform {
    type Out: GpioOut;
    type In: GpioIn;
    type Serial: SerialPort;
    type Clock: Clock;
    type Watchdog: Watchdog;
    type Dial: SpeedDial;
    type Ui: StatusUi;
    type Job: JobSource;
}

/// Busy-wait for `ms` milliseconds, feeding the watchdog while spinning.
pub fn delay_ms<C: Clock, W: Watchdog>(clock: &C, watchdog: &mut W, ms: u32) {
    let start = clock.millis();
    while clock.millis().wrapping_sub(start) < ms {
        watchdog.feed();
    }
}

/// Busy-wait for `us` microseconds.
pub fn delay_us<C: Clock>(clock: &C, us: u32) {
    let start = clock.micros();
    while clock.micros().wrapping_sub(start) < us {}
}

// --- No-op collaborators -------------------------------------------------
//
// Embeddings without a dial, display or file reader plug these in.

pub struct NoDial;

impl SpeedDial for NoDial {
    fn poll(&mut self, _now_ms: u32) -> Option<u16> {
        None
    }
}

pub struct NoUi;

impl StatusUi for NoUi {
    fn tick(&mut self, _now_ms: u32) {}
}

pub struct NoJob;

impl JobSource for NoJob {
    fn next_line(&mut self, _buf: &mut [u8]) -> Option<usize> {
        None
    }

    fn close(&mut self) {}
}

// --- embedded-hal interop ------------------------------------------------

/// Wraps any `embedded_hal` output pin as a [`GpioOut`]. Pin errors are
/// infallible on the supported boards; failures are swallowed.
pub struct OutPin<T>(pub T);

impl<T: embedded_hal::digital::OutputPin> GpioOut for OutPin<T> {
    fn write(&mut self, high: bool) {
        if high {
            let _ = self.0.set_high();
        } else {
            let _ = self.0.set_low();
        }
    }
}

/// Wraps any `embedded_hal` input pin as a [`GpioIn`].
pub struct InPin<T>(pub T);

impl<T: embedded_hal::digital::InputPin> GpioIn for InPin<T> {
    fn read(&mut self) -> bool {
        self.0.is_high().unwrap_or(false)
    }
}
