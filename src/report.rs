//! Text lines a tag prints for each measurement
//!
//! Downstream tooling parses these lines, so their shape is fixed:
//!
//! ```text
//! [TAG] A3 = 2.35 m
//! 12:04:56.789 -> [TAG] A3 = 2.35 m
//! ```
//!
//! The anchor identity is printed in decimal without padding, the distance
//! with two decimals, followed by a literal `" m"`.

use core::fmt::{self, Display, Formatter, Write as _};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{slot::AnchorId, tof::RangeMeasurement};

/// Capacity of a formatted report line
pub const LINE_CAPACITY: usize = 64;

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// A wall-clock time of day with millisecond resolution
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeOfDay {
    millis: u32,
}

impl TimeOfDay {
    /// Time of day `millis` after midnight, wrapping at 24 hours
    pub fn from_millis(millis: u64) -> Self {
        TimeOfDay {
            millis: (millis % MILLIS_PER_DAY) as u32,
        }
    }

    /// Hours, minutes, seconds and milliseconds
    pub fn hms_millis(&self) -> (u32, u32, u32, u32) {
        let seconds = self.millis / 1000;
        (seconds / 3600, seconds / 60 % 60, seconds % 60, self.millis % 1000)
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (h, m, s, ms) = self.hms_millis();
        write!(f, "{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
    }
}

/// One printed measurement
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagReport {
    /// The anchor measured against, `A?` when unknown
    pub anchor: Option<AnchorId>,
    /// Distance in metres
    pub distance_m: f64,
    /// Optional time prefix
    pub timestamp: Option<TimeOfDay>,
}

impl TagReport {
    /// A report for `measurement`, optionally stamped with the time of day
    pub fn new(measurement: &RangeMeasurement, timestamp: Option<TimeOfDay>) -> Self {
        TagReport {
            anchor: measurement.anchor,
            distance_m: measurement.distance_m,
            timestamp,
        }
    }

    /// Formats the report into a fixed-capacity line
    ///
    /// Fails only for distances too large to print within
    /// [`LINE_CAPACITY`] bytes.
    pub fn to_line(&self) -> Result<heapless::String<LINE_CAPACITY>, fmt::Error> {
        let mut line = heapless::String::new();
        write!(line, "{}", self)?;
        Ok(line)
    }
}

impl From<&RangeMeasurement> for TagReport {
    fn from(measurement: &RangeMeasurement) -> Self {
        TagReport::new(measurement, None)
    }
}

impl Display for TagReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(timestamp) = self.timestamp {
            write!(f, "{} -> ", timestamp)?;
        }
        match self.anchor {
            Some(anchor) => write!(f, "[TAG] A{} = {:.2} m", anchor, self.distance_m),
            None => write!(f, "[TAG] A? = {:.2} m", self.distance_m),
        }
    }
}

/// Extracts the anchor identity and distance from a report line
///
/// Accepts anything before the `[TAG]` marker and flexible whitespace
/// around the `=` and before the unit. Lines for unknown anchors, or with a
/// negative or malformed distance, yield `None`.
pub fn parse_report_line(line: &str) -> Option<(u8, f64)> {
    let start = line.find("[TAG]")?;
    let rest = line[start + "[TAG]".len()..].trim_start();

    let rest = rest.strip_prefix('A')?;
    let id_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let id = rest[..id_len].parse::<u8>().ok()?;

    let rest = rest[id_len..].trim_start().strip_prefix('=')?.trim_start();
    let number_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let number = &rest[..number_len];
    if number.ends_with('.') || number.matches('.').count() > 1 {
        return None;
    }
    let distance = number.parse::<f64>().ok()?;

    rest[number_len..].trim_start().strip_prefix('m')?;

    Some((id, distance))
}
