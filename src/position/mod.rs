//! # Position Module
//!
//! Geographic position of the logger, used for the day-file header.
//!
//! This module handles:
//! - Degree/minute/second coordinates with hemisphere
//! - Parsing the modem's GNSS report (see [`parser`])
//! - The bounded-retry acquisition protocol (see [`acquirer`])
//!
//! Position is advisory: a fix that cannot be obtained is replaced by the
//! configured fallback and never blocks startup.

use serde::Deserialize;
use std::fmt;

pub mod acquirer;
pub mod parser;

pub use acquirer::{PositionAcquirer, PositionOutcome};

/// Latitude hemisphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NorthSouth {
    #[serde(rename = "N")]
    North,
    #[serde(rename = "S")]
    South,
}

impl NorthSouth {
    /// Parse the single-letter marker used in reports and headers.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim() {
            "N" => Some(NorthSouth::North),
            "S" => Some(NorthSouth::South),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            NorthSouth::North => 'N',
            NorthSouth::South => 'S',
        }
    }
}

/// Longitude hemisphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EastWest {
    #[serde(rename = "E")]
    East,
    #[serde(rename = "W")]
    West,
}

impl EastWest {
    /// Parse the single-letter marker used in reports and headers.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim() {
            "E" => Some(EastWest::East),
            "W" => Some(EastWest::West),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            EastWest::East => 'E',
            EastWest::West => 'W',
        }
    }
}

/// Latitude in degrees, minutes and seconds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Latitude {
    pub degrees: u16,
    pub minutes: u8,
    pub seconds: f64,
    pub hemisphere: NorthSouth,
}

/// Longitude in degrees, minutes and seconds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Longitude {
    pub degrees: u16,
    pub minutes: u8,
    pub seconds: f64,
    pub hemisphere: EastWest,
}

/// A resolved geographic position
///
/// Immutable once produced; either freshly acquired from the modem or
/// copied from the configured fallback.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PositionFix {
    pub latitude: Latitude,
    pub longitude: Longitude,
}

impl fmt::Display for Latitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}°{}'{:.3}\"{}",
            self.degrees,
            self.minutes,
            self.seconds,
            self.hemisphere.as_char()
        )
    }
}

impl fmt::Display for Longitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}°{}'{:.3}\"{}",
            self.degrees,
            self.minutes,
            self.seconds,
            self.hemisphere.as_char()
        )
    }
}

impl fmt::Display for PositionFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}
