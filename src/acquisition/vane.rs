//! Wind vane decoding.
//!
//! The vane activates one reed switch per cardinal point, or two adjacent switches when
//! the magnet sits between them. Pins are read with pull-downs and the vane drives every
//! line high except those of the active switches, so a code of `0111` means the first
//! switch is active. An undriven vane (unplugged, unpowered) reads `0000`, which decodes
//! as [`Direction::Invalid`].
//!
//! Decoding is a single-sample lookup per poll with no debouncing; a vane caught
//! mid-swing decodes as whatever the pins read at that instant.

use crate::error::AppResult;
use crate::hardware::capabilities::GpioCapability;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Levels of the four vane pins, in configured pin order (`true` = high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VaneCode(pub [bool; 4]);

impl VaneCode {
    /// Build a code from the low four bits of `bits`, first pin in the most
    /// significant position (`0b0111` = first switch active).
    pub fn from_bits(bits: u8) -> Self {
        Self([
            bits & 0b1000 != 0,
            bits & 0b0100 != 0,
            bits & 0b0010 != 0,
            bits & 0b0001 != 0,
        ])
    }

    /// Inverse of [`from_bits`](Self::from_bits)
    pub fn bits(&self) -> u8 {
        self.0
            .iter()
            .fold(0u8, |acc, &level| (acc << 1) | u8::from(level))
    }
}

impl fmt::Display for VaneCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04b}", self.bits())
    }
}

/// Decoded wind direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// N
    North,
    /// NE
    NorthEast,
    /// E
    East,
    /// SE
    SouthEast,
    /// S
    South,
    /// SW
    SouthWest,
    /// W
    West,
    /// NW
    NorthWest,
    /// Switch combination the vane cannot physically produce
    Invalid,
    /// No switch active
    Unknown,
    /// Nothing decoded yet
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl Direction {
    /// Every value `decode` can return.
    pub const DECODED: [Direction; 10] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
        Direction::Invalid,
        Direction::Unknown,
    ];

    /// Label written to the station log
    pub fn label(&self) -> &'static str {
        match self {
            Direction::North => "North",
            Direction::NorthEast => "NorthEast",
            Direction::East => "East",
            Direction::SouthEast => "SouthEast",
            Direction::South => "South",
            Direction::SouthWest => "SouthWest",
            Direction::West => "West",
            Direction::NorthWest => "NorthWest",
            Direction::Invalid => "Invalid",
            Direction::Unknown => "Unknown",
            Direction::NotAvailable => "N/A",
        }
    }

    /// Whether this is an actual compass point
    pub fn is_compass_point(&self) -> bool {
        !matches!(
            self,
            Direction::Invalid | Direction::Unknown | Direction::NotAvailable
        )
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a vane code to a direction. Total over all 16 codes.
pub fn decode(code: VaneCode) -> Direction {
    match code.bits() {
        0b0111 => Direction::North,
        0b0011 => Direction::NorthEast,
        0b1011 => Direction::East,
        0b1001 => Direction::SouthEast,
        0b1101 => Direction::South,
        0b1100 => Direction::SouthWest,
        0b1110 => Direction::West,
        0b0110 => Direction::NorthWest,
        // undriven, opposite pairs, three active
        0b0000 | 0b0101 | 0b1010 | 0b0001 | 0b0010 | 0b0100 | 0b1000 => Direction::Invalid,
        _ => Direction::Unknown,
    }
}

/// Sample the four vane pins once, in `pins` order.
pub fn read_code(gpio: &dyn GpioCapability, pins: [u8; 4]) -> AppResult<VaneCode> {
    let mut levels = [false; 4];
    for (level, pin) in levels.iter_mut().zip(pins) {
        *level = gpio.read_level(pin)?;
    }
    Ok(VaneCode(levels))
}
