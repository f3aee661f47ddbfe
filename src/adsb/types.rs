//! ADS-B data types

use chrono::{DateTime, Utc};

/// Downlink format identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DownlinkFormat {
    AllCallReply = 11,
    ExtendedSquitter = 17,
    ExtendedSquitterNonTransponder = 18,
    Unknown = 255,
}

impl From<u8> for DownlinkFormat {
    fn from(df: u8) -> Self {
        match df {
            11 => Self::AllCallReply,
            17 => Self::ExtendedSquitter,
            18 => Self::ExtendedSquitterNonTransponder,
            _ => Self::Unknown,
        }
    }
}

/// What one decoder message tells us about one aircraft.
///
/// Every field except the identifier may be missing: identification,
/// velocity and altitude messages carry no position, and position
/// messages often carry no callsign.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftData {
    /// ICAO address, 6 uppercase hex digits (`~` prefix for non-ICAO)
    pub aircraft_id: String,

    /// Flight callsign, trimmed
    pub callsign: Option<String>,

    /// Latitude in degrees (-90 to 90)
    pub latitude: Option<f64>,

    /// Longitude in degrees (-180 to 180)
    pub longitude: Option<f64>,

    /// Barometric altitude in feet
    pub altitude_ft: Option<i32>,

    /// Ground speed in knots
    pub ground_speed_kts: Option<f32>,

    /// Track over ground in degrees (0-360)
    pub track_deg: Option<f32>,

    /// Vertical rate in feet per minute
    pub vertical_rate_fpm: Option<i32>,

    /// Squawk code, 4 octal digits
    pub squawk: Option<String>,

    /// Distance from the receiver as computed by the decoder itself, in NM
    pub decoder_distance_nm: Option<f64>,

    /// When the decoder generated the message, if it says so
    pub timestamp: Option<DateTime<Utc>>,
}

impl AircraftData {
    pub fn new(aircraft_id: impl Into<String>) -> Self {
        Self {
            aircraft_id: aircraft_id.into(),
            ..Self::default()
        }
    }

    /// Both halves of a position are present
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Normalise and check an aircraft address the way dump1090 prints it.
///
/// Returns `None` unless the address is six hex digits, optionally
/// preceded by `~`.
pub fn normalize_aircraft_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (prefix, hex) = match raw.strip_prefix('~') {
        Some(rest) => ("~", rest),
        None => ("", raw),
    };
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{}{}", prefix, hex.to_ascii_uppercase()))
}

/// Callsigns arrive space padded, and dump1090 uses `#` for unknown characters
pub fn clean_callsign(raw: &str) -> Option<String> {
    let cs = raw.trim();
    if cs.is_empty() || cs.chars().all(|c| c == '#') {
        None
    } else {
        Some(cs.to_string())
    }
}
