use chrono::NaiveTime;
use core::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::PayloadError;

/// How open the window is, as a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(u8);

impl Position {
    pub const CLOSED: Position = Position(0);
    pub const OPEN: Position = Position(100);

    pub fn new(percent: u8) -> Option<Position> {
        (percent <= 100).then_some(Position(percent))
    }
}

impl FromStr for Position {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Position::new)
            .ok_or_else(|| PayloadError::InvalidPosition(s.to_string()))
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    Auto,
    Manual,
}

impl OperatingMode {
    pub fn toggled(self) -> OperatingMode {
        match self {
            OperatingMode::Auto => OperatingMode::Manual,
            OperatingMode::Manual => OperatingMode::Auto,
        }
    }

    pub fn is_auto(self) -> bool {
        self == OperatingMode::Auto
    }

    pub fn from_auto_flag(auto: bool) -> OperatingMode {
        if auto {
            OperatingMode::Auto
        } else {
            OperatingMode::Manual
        }
    }
}

impl FromStr for OperatingMode {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(OperatingMode::Auto),
            "manual" => Ok(OperatingMode::Manual),
            _ => Err(PayloadError::InvalidMode(s.to_string())),
        }
    }
}

impl Display for OperatingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::Auto => write!(f, "auto"),
            OperatingMode::Manual => write!(f, "manual"),
        }
    }
}

/// Times of day travel as `HH:MM` on a 24 hour clock.
pub const WIRE_TIME_FORMAT: &str = "%H:%M";

/// Rendering for people, e.g. `1:05 PM`. Never sent to the broker.
pub const DISPLAY_TIME_FORMAT: &str = "%-I:%M %p";

pub fn parse_clock_time(s: &str) -> Result<NaiveTime, PayloadError> {
    NaiveTime::parse_from_str(s.trim(), WIRE_TIME_FORMAT)
        .map_err(|_| PayloadError::InvalidTime(s.to_string()))
}

pub fn encode_clock_time(time: NaiveTime) -> String {
    time.format(WIRE_TIME_FORMAT).to_string()
}
