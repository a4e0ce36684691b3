// src/kinematics.rs

//! Millimeter <-> step conversion and soft-limit checks.
//!
//! Step densities differ per axis (belt-driven X/Y vs leadscrew Z), so every
//! conversion is axis-indexed. Positions in mm are the authoritative logical
//! coordinates; step counts are what the channels actually move.

use bitflags::bitflags;

use crate::config::MachineConfig;
use crate::fmath;

/// One of the three machine axes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    pub fn from_letter(c: char) -> Option<Axis> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            _ => None,
        }
    }
}

bitflags! {
    /// A set of axes, used for G28 selections and the homed flags.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct AxisSet: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
    }
}

impl AxisSet {
    pub fn of(axis: Axis) -> AxisSet {
        match axis {
            Axis::X => AxisSet::X,
            Axis::Y => AxisSet::Y,
            Axis::Z => AxisSet::Z,
        }
    }

    pub fn has(self, axis: Axis) -> bool {
        self.contains(AxisSet::of(axis))
    }
}

/// A position or offset in machine millimeters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub const ORIGIN: Point3D = Point3D { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn axis(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn set_axis(&mut self, axis: Axis, value: f32) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }
}

/// Conversion and validation against the machine envelope.
pub struct Kinematics {
    steps_per_mm: [f32; 3],
    max_pos: [f32; 3],
}

impl Kinematics {
    pub fn new(cfg: &MachineConfig) -> Self {
        Self {
            steps_per_mm: cfg.steps_per_mm,
            max_pos: cfg.max_pos,
        }
    }

    pub fn steps_per_mm(&self, axis: Axis) -> f32 {
        self.steps_per_mm[axis.index()]
    }

    pub fn max_pos(&self, axis: Axis) -> f32 {
        self.max_pos[axis.index()]
    }

    pub fn mm_to_steps(&self, axis: Axis, mm: f32) -> i32 {
        fmath::roundf(mm * self.steps_per_mm[axis.index()]) as i32
    }

    pub fn steps_to_mm(&self, axis: Axis, steps: i32) -> f32 {
        steps as f32 / self.steps_per_mm[axis.index()]
    }

    pub fn point_to_steps(&self, p: &Point3D) -> [i32; 3] {
        [
            self.mm_to_steps(Axis::X, p.x),
            self.mm_to_steps(Axis::Y, p.y),
            self.mm_to_steps(Axis::Z, p.z),
        ]
    }

    pub fn steps_to_point(&self, steps: [i32; 3]) -> Point3D {
        Point3D::new(
            self.steps_to_mm(Axis::X, steps[0]),
            self.steps_to_mm(Axis::Y, steps[1]),
            self.steps_to_mm(Axis::Z, steps[2]),
        )
    }

    /// Soft-limit check: every coordinate within [0, max] for its axis.
    pub fn is_valid_position(&self, p: &Point3D) -> bool {
        for axis in Axis::ALL {
            let v = p.axis(axis);
            if v < 0.0 || v > self.max_pos[axis.index()] {
                return false;
            }
        }
        true
    }
}
