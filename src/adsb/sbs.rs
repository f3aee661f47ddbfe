//! SBS-1 / BaseStation message parser (dump1090 port 30003)
//!
//! ```text
//! MSG,3,1,1,4840D6,1,2024/05/01,12:00:00.000,2024/05/01,12:00:00.000,,37000,,,51.45735,-1.02826,,,0,0,0,0
//! ```
//!
//! Only `MSG` records are interesting. Transmission types 2 (surface) and 3
//! (airborne) carry a position; the others are still useful for callsign,
//! speed and squawk.

use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, Utc};

use super::parser::ParseError;
use super::types::{clean_callsign, normalize_aircraft_id, AircraftData};

const FIELD_TRANSMISSION_TYPE: usize = 1;
const FIELD_HEX_IDENT: usize = 4;
const FIELD_DATE_GENERATED: usize = 6;
const FIELD_TIME_GENERATED: usize = 7;
const FIELD_CALLSIGN: usize = 10;
const FIELD_ALTITUDE: usize = 11;
const FIELD_GROUND_SPEED: usize = 12;
const FIELD_TRACK: usize = 13;
const FIELD_LATITUDE: usize = 14;
const FIELD_LONGITUDE: usize = 15;
const FIELD_VERTICAL_RATE: usize = 16;
const FIELD_SQUAWK: usize = 17;

/// SBS transmission types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionType {
    Identification = 1,
    SurfacePosition = 2,
    AirbornePosition = 3,
    AirborneVelocity = 4,
    SurveillanceAltitude = 5,
    SurveillanceId = 6,
    AirToAir = 7,
    AllCallReply = 8,
}

impl TransmissionType {
    fn from_field(s: &str) -> Result<Self, ParseError> {
        Ok(match s.trim() {
            "1" => Self::Identification,
            "2" => Self::SurfacePosition,
            "3" => Self::AirbornePosition,
            "4" => Self::AirborneVelocity,
            "5" => Self::SurveillanceAltitude,
            "6" => Self::SurveillanceId,
            "7" => Self::AirToAir,
            "8" => Self::AllCallReply,
            other => {
                return Err(ParseError::InvalidField {
                    field: "transmission type",
                    value: other.to_string(),
                })
            }
        })
    }

    pub fn carries_position(self) -> bool {
        matches!(self, Self::SurfacePosition | Self::AirbornePosition)
    }
}

/// Parse one SBS line into an observation.
///
/// Position types without a latitude/longitude (dump1090 emits those until
/// it has decoded a CPR pair) come back without a position rather than as
/// an error; whether that is acceptable is the caller's business.
pub fn parse_sbs_line(line: &str) -> Result<AircraftData, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields[0] != "MSG" {
        return Err(ParseError::UnsupportedMessage(fields[0].to_string()));
    }
    // Everything up to the squawk must be there, the trailing flags may not
    if fields.len() <= FIELD_SQUAWK {
        return Err(ParseError::MissingField("squawk"));
    }

    let kind = TransmissionType::from_field(fields[FIELD_TRANSMISSION_TYPE])?;

    let hex = fields[FIELD_HEX_IDENT];
    let aircraft_id = normalize_aircraft_id(hex).ok_or_else(|| ParseError::InvalidField {
        field: "hex ident",
        value: hex.to_string(),
    })?;

    let mut aircraft = AircraftData::new(aircraft_id);
    aircraft.timestamp = parse_timestamp(fields[FIELD_DATE_GENERATED], fields[FIELD_TIME_GENERATED]);
    aircraft.callsign = clean_callsign(fields[FIELD_CALLSIGN]);
    aircraft.altitude_ft = optional(fields[FIELD_ALTITUDE], "altitude")?;
    aircraft.ground_speed_kts = optional(fields[FIELD_GROUND_SPEED], "ground speed")?;
    aircraft.track_deg = optional(fields[FIELD_TRACK], "track")?;
    aircraft.vertical_rate_fpm = optional(fields[FIELD_VERTICAL_RATE], "vertical rate")?;
    aircraft.squawk = Some(fields[FIELD_SQUAWK].trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if kind.carries_position() {
        aircraft.latitude = optional(fields[FIELD_LATITUDE], "latitude")?;
        aircraft.longitude = optional(fields[FIELD_LONGITUDE], "longitude")?;
    }

    Ok(aircraft)
}

/// Empty means absent, anything else must parse
fn optional<T: FromStr>(raw: &str, field: &'static str) -> Result<Option<T>, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| ParseError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// dump1090 writes the generation date/time in the receiver's local time
fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", date.trim(), time.trim()), "%Y/%m/%d %H:%M:%S%.f")
            .ok()?;
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AIRBORNE: &str = "MSG,3,1,1,4840D6,1,2024/05/01,12:00:00.000,2024/05/01,12:00:00.000,,37000,,,51.45735,-1.02826,,,0,0,0,0";

    #[test]
    fn test_parse_airborne_position() {
        let data = parse_sbs_line(AIRBORNE).unwrap();
        assert_eq!(data.aircraft_id, "4840D6");
        assert_eq!(data.latitude, Some(51.45735));
        assert_eq!(data.longitude, Some(-1.02826));
        assert_eq!(data.altitude_ft, Some(37000));
        assert!(data.callsign.is_none());
        assert!(data.has_position());

        let expected = NaiveDateTime::parse_from_str("2024/05/01 12:00:00", "%Y/%m/%d %H:%M:%S")
            .unwrap()
            .and_local_timezone(Local)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(data.timestamp, Some(expected));
    }

    #[test]
    fn test_parse_identification() {
        let line = "MSG,1,1,1,4CA2D6,1,2024/05/01,12:00:01.000,2024/05/01,12:00:01.000,RYR12AB ,,,,,,,,0,0,0,0";
        let data = parse_sbs_line(line).unwrap();
        assert_eq!(data.aircraft_id, "4CA2D6");
        assert_eq!(data.callsign.as_deref(), Some("RYR12AB"));
        assert!(!data.has_position());
    }

    #[test]
    fn test_parse_velocity() {
        let line = "MSG,4,1,1,4CA2D6,1,2024/05/01,12:00:02.000,2024/05/01,12:00:02.000,,,451,87,,,-64,,0,0,0,0";
        let data = parse_sbs_line(line).unwrap();
        assert_eq!(data.ground_speed_kts, Some(451.0));
        assert_eq!(data.track_deg, Some(87.0));
        assert_eq!(data.vertical_rate_fpm, Some(-64));
    }

    #[test]
    fn test_position_fields_ignored_on_other_types() {
        let line = "MSG,5,1,1,4CA2D6,1,2024/05/01,12:00:02.000,2024/05/01,12:00:02.000,,12000,,,51.0,-1.0,,7700,0,0,0,0";
        let data = parse_sbs_line(line).unwrap();
        assert!(!data.has_position());
        assert_eq!(data.squawk.as_deref(), Some("7700"));
    }

    #[test]
    fn test_position_type_without_coordinates() {
        let line = "MSG,3,1,1,4CA2D6,1,2024/05/01,12:00:02.000,2024/05/01,12:00:02.000,,12000,,,,,,,0,0,0,0";
        let data = parse_sbs_line(line).unwrap();
        assert!(!data.has_position());
        assert_eq!(data.altitude_ft, Some(12000));
    }

    #[test]
    fn test_missing_timestamp_is_not_an_error() {
        let line = "MSG,3,1,1,4CA2D6,1,,,,,,12000,,,51.0,-1.0,,,0,0,0,0";
        let data = parse_sbs_line(line).unwrap();
        assert!(data.timestamp.is_none());
        assert!(data.has_position());
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert_eq!(parse_sbs_line(""), Err(ParseError::Empty));
        assert!(matches!(
            parse_sbs_line("SEL,,496,2286,4CA4E5,27215,2010/02/19,18:06:07.710,,,RYR1427"),
            Err(ParseError::UnsupportedMessage(_))
        ));
        assert!(parse_sbs_line("MSG,3,1,1,4840D6").is_err());
        assert!(parse_sbs_line("garbage").is_err());
        assert!(matches!(
            parse_sbs_line("MSG,9,1,1,4840D6,1,,,,,,37000,,,51.4,-1.0,,,0,0,0,0"),
            Err(ParseError::InvalidField { field: "transmission type", .. })
        ));
        assert!(matches!(
            parse_sbs_line("MSG,3,1,1,XYZ,1,,,,,,37000,,,51.4,-1.0,,,0,0,0,0"),
            Err(ParseError::InvalidField { field: "hex ident", .. })
        ));
        assert!(matches!(
            parse_sbs_line("MSG,3,1,1,4840D6,1,,,,,,37000,,,north,-1.0,,,0,0,0,0"),
            Err(ParseError::InvalidField { field: "latitude", .. })
        ));
    }
}
