// src/config.rs

//! Compile-time machine description.
//!
//! All mechanical and protocol constants live here; nothing is persisted at
//! runtime. The [`MachineConfig`] aggregate is the single wiring point the
//! dispatcher and the tests share, so a test can home a shorter axis or flip
//! a homing direction without touching the module constants.

/// Firmware identity, reported by the M115 banner.
pub const FIRMWARE_NAME: &str = "Inkplot";
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BOARD_TYPE: &str = "MKS_Gen_v1.4";

/// Serial transport runs 8N1 at this rate. The core never touches the UART
/// registers itself; the embedding configures its port with this value.
pub const BAUD_RATE: u32 = 115_200;

/// Maximum characters in one G-code line (terminator excluded).
pub const GCODE_MAX_LENGTH: usize = 64;

/// Parsed commands buffered between the serial producer and the dispatcher.
pub const COMMAND_QUEUE_DEPTH: usize = 8;

// Steps per mm.
// X/Y: DRV8825 at 1/32 microstepping, GT2 belt, 20-tooth pulley:
// 200 * 32 / (20 * 2 mm) = 160 steps/mm.
// Z: T8 leadscrew (8 mm pitch) at 1/16 microstepping: 200 * 16 / 8 = 400.
// TODO: if the Z driver is jumpered for 1/32 this must be 800; verify on
// the machine before trusting Z travel.
pub const X_STEPS_PER_MM: f32 = 160.0;
pub const Y_STEPS_PER_MM: f32 = 160.0;
pub const Z_STEPS_PER_MM: f32 = 400.0;

// Measured travel of the physical machine, in mm.
pub const X_MAX_POS: f32 = 234.0;
pub const Y_MAX_POS: f32 = 191.0;
pub const Z_MAX_POS: f32 = 203.0;

// Motion ceilings.
pub const MAX_VELOCITY_XY: f32 = 100.0; // mm/s
pub const MAX_VELOCITY_Z: f32 = 10.0; // mm/s, leadscrew axis
pub const MAX_ACCEL_X: f32 = 1000.0; // mm/s^2
pub const MAX_ACCEL_Y: f32 = 1000.0;
pub const MAX_ACCEL_Z: f32 = 500.0; // pen lift, gentle

// Pen Z positions. Z=0 is at the endstop / paper level, Z+ moves up.
pub const PEN_UP_Z: f32 = 3.0;
/// Where Z parks after a successful Z home (pen start height).
pub const Z_HOME_POSITION: f32 = 2.0;

// Homing.
pub const HOMING_FEEDRATE_FAST: f32 = 20.0; // mm/s, gentle to avoid missed steps
pub const HOMING_FEEDRATE_SLOW: f32 = 5.0; // mm/s, precision pass
pub const HOMING_BACKOFF_MM: f32 = 10.0;
pub const HOMING_TIMEOUT_MS: u32 = 60_000; // per phase, per axis
pub const HOMING_ACCEL_FACTOR: f32 = 0.5;

/// Longest single G0/G1 segment the dispatcher will accept, in mm.
pub const MAX_ALLOWED_JUMP_MM: f32 = 1000.0;

/// Endstop switch debounce window.
pub const ENDSTOP_DEBOUNCE_MS: u8 = 10;

/// Steppers auto-disable after this much idle time (0 = never).
pub const DISABLE_STEPPERS_AFTER_IDLE_S: u32 = 600;

// Speed-dial (analog override) clamp, in percent.
pub const DIAL_MIN_PERCENT: u16 = 10;
pub const DIAL_MAX_PERCENT: u16 = 200;

/// Per-axis and machine-wide configuration, indexable by `Axis::index()`.
#[derive(Clone, Debug)]
pub struct MachineConfig {
    pub steps_per_mm: [f32; 3],
    pub max_velocity: [f32; 3],
    pub max_accel: [f32; 3],
    pub max_pos: [f32; 3],
    /// -1 homes toward the min endstop, +1 toward the max endstop.
    pub home_dir: [i8; 3],
    pub invert_dir: [bool; 3],
    /// Driver enable lines are active-low on the stock board.
    pub invert_enable: [bool; 3],
    /// true = endstop reads triggered when the pin is LOW.
    pub endstop_inverting: [bool; 3],
    pub endstop_pullup: [bool; 3],
    pub endstop_debounce_ms: u8,
    pub pen_up_z: f32,
    pub z_home_position: f32,
    pub homing_feedrate_fast: f32,
    pub homing_feedrate_slow: f32,
    pub homing_backoff_mm: f32,
    pub homing_timeout_ms: u32,
    pub homing_accel_factor: f32,
    pub max_jump_mm: f32,
    pub idle_timeout_ms: u32,
    pub dial_min_percent: u16,
    pub dial_max_percent: u16,
}

impl MachineConfig {
    /// The stock plotter: X and Y home to their max endstops, Z to min.
    pub const fn standard() -> Self {
        Self {
            steps_per_mm: [X_STEPS_PER_MM, Y_STEPS_PER_MM, Z_STEPS_PER_MM],
            max_velocity: [MAX_VELOCITY_XY, MAX_VELOCITY_XY, MAX_VELOCITY_Z],
            max_accel: [MAX_ACCEL_X, MAX_ACCEL_Y, MAX_ACCEL_Z],
            max_pos: [X_MAX_POS, Y_MAX_POS, Z_MAX_POS],
            home_dir: [1, 1, -1],
            invert_dir: [false, false, false],
            invert_enable: [true, true, true],
            endstop_inverting: [false, true, false],
            endstop_pullup: [true, true, true],
            endstop_debounce_ms: ENDSTOP_DEBOUNCE_MS,
            pen_up_z: PEN_UP_Z,
            z_home_position: Z_HOME_POSITION,
            homing_feedrate_fast: HOMING_FEEDRATE_FAST,
            homing_feedrate_slow: HOMING_FEEDRATE_SLOW,
            homing_backoff_mm: HOMING_BACKOFF_MM,
            homing_timeout_ms: HOMING_TIMEOUT_MS,
            homing_accel_factor: HOMING_ACCEL_FACTOR,
            max_jump_mm: MAX_ALLOWED_JUMP_MM,
            idle_timeout_ms: DISABLE_STEPPERS_AFTER_IDLE_S * 1000,
            dial_min_percent: DIAL_MIN_PERCENT,
            dial_max_percent: DIAL_MAX_PERCENT,
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_is_consistent() {
        let cfg = MachineConfig::standard();
        for i in 0..3 {
            assert!(cfg.steps_per_mm[i] > 0.0);
            assert!(cfg.max_velocity[i] > 0.0);
            assert!(cfg.max_accel[i] > 0.0);
            assert!(cfg.max_pos[i] > 0.0);
            assert!(cfg.home_dir[i] == 1 || cfg.home_dir[i] == -1);
        }
        assert!(cfg.homing_accel_factor > 0.0 && cfg.homing_accel_factor < 1.0);
        assert!(cfg.z_home_position <= cfg.pen_up_z);
        assert!(cfg.dial_min_percent < cfg.dial_max_percent);
    }
}
