// src/state.rs

//! Process-wide machine state, owned solely by the dispatcher.
//!
//! The logical position in mm is the source of truth; the dispatcher keeps
//! it in lockstep with the stepper counters through the kinematics
//! conversions. Nothing here is shared or locked; single-threaded
//! cooperative scheduling means single ownership is enough.

use crate::config::MachineConfig;
use crate::kinematics::Point3D;

/// File-feeder playback state (M24/M25/M0).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Paused,
}

/// Mutable machine-wide state.
pub struct MachineState {
    /// Current logical position in mm.
    pub position: Point3D,
    /// G90 (true) vs G91 (false).
    pub absolute_mode: bool,
    /// Current feed rate in mm/min; a move's F word persists here.
    pub feed_mm_min: f32,
    /// Speed override in percent. M220 clamps to [1, 999]; the analog dial
    /// clamps to its own narrower range.
    pub speed_factor: f32,
    /// Steppers auto-disable after this idle time; 0 disables the policy.
    pub idle_timeout_ms: u32,
    pub last_activity_ms: u32,
    pub job: JobState,
}

impl MachineState {
    pub fn new(cfg: &MachineConfig, now_ms: u32) -> Self {
        Self {
            position: Point3D::ORIGIN,
            absolute_mode: true,
            // Default to the rapid feed until the first F word arrives.
            feed_mm_min: cfg.max_velocity[0] * 60.0,
            speed_factor: 100.0,
            idle_timeout_ms: cfg.idle_timeout_ms,
            last_activity_ms: now_ms,
            job: JobState::Idle,
        }
    }

    /// Feed rate with the speed override applied, in mm/s.
    pub fn effective_feed_mm_s(&self, requested_mm_min: f32) -> f32 {
        requested_mm_min * (self.speed_factor / 100.0) / 60.0
    }
}
