//! GNSS position tracking
//!
//! The modem's GNSS receiver produces NMEA 0183 sentences on a separate
//! stream. [`GnssReceiver`] frames that stream, parses it with
//! [`NmeaParser`] and keeps the last good [`PositionFix`]. It shares no state
//! with the AT command engine.

use serde::Serialize;

mod nmea;
mod receiver;

pub use nmea::{
    Coordinate, Date, Gga, Gll, Hemisphere, NMEA_MAX_LENGTH, NmeaError, NmeaParser, Rmc, Sentence, SentenceKind,
    UtcTime, parse_coordinate, parse_date, parse_time,
};
pub use receiver::GnssReceiver;

/// GGA fix quality indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FixQuality {
    /// No fix
    #[default]
    Invalid,
    /// Autonomous GNSS fix
    Gps,
    /// Differential fix
    Dgps,
    /// PPS fix
    Pps,
    /// Real time kinematic
    Rtk,
    /// Float RTK
    FloatRtk,
    /// Dead reckoning
    Estimated,
    /// Manual input
    Manual,
    /// Simulator
    Simulation,
}

impl FixQuality {
    /// Quality from the numeric GGA indicator.
    pub fn from_indicator(indicator: u8) -> Self {
        match indicator {
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::Rtk,
            5 => FixQuality::FloatRtk,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulation,
            _ => FixQuality::Invalid,
        }
    }

    /// Whether the receiver reports a usable position.
    pub fn has_fix(&self) -> bool {
        *self != FixQuality::Invalid
    }
}

/// A position fix. Replaced as a whole by the next good fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionFix {
    /// UTC time of the fix
    pub time: UtcTime,
    /// Date, once an RMC sentence has supplied one
    pub date: Option<Date>,
    /// Signed decimal degrees
    pub latitude: f64,
    /// Signed decimal degrees
    pub longitude: f64,
    /// Meters above mean sea level
    pub altitude_m: Option<f32>,
    /// Fix quality
    pub quality: FixQuality,
    /// Satellites used
    pub satellites: u8,
    /// Local clock reading when the fix was accepted
    #[serde(skip)]
    pub received_at_ms: u64,
}

/// The last fix together with its age.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReport {
    /// The fix itself
    pub fix: PositionFix,
    /// Milliseconds since the fix was accepted
    pub age_ms: u64,
    /// Older than [`GnssConfig::stale_after_ms`]
    pub stale: bool,
}

/// GNSS options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GnssConfig {
    /// A fix older than this is reported as stale
    pub stale_after_ms: u32,
    /// Reject sentences without a `*hh` checksum
    pub require_checksum: bool,
}

impl Default for GnssConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 10_000,
            require_checksum: true,
        }
    }
}
