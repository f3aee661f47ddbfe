//! dump1090 `aircraft.json` snapshots
//!
//! Field names changed between dump1090 forks (`altitude` vs `alt_baro`,
//! `speed` vs `gs`, `vert_rate` vs `baro_rate`); both spellings are read.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::Deserialize;

use super::parser::ParseError;
use super::types::{clean_callsign, normalize_aircraft_id, AircraftData};

#[derive(Debug, Deserialize)]
struct Snapshot {
    /// Seconds since the epoch when the snapshot was written
    now: Option<f64>,
    #[serde(default)]
    aircraft: Vec<Entry>,
}

/// Altitude is either a number or the string "ground"
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Altitude {
    Feet(f64),
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct Entry {
    hex: String,
    flight: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    seen_pos: Option<f64>,
    #[serde(alias = "alt_baro")]
    altitude: Option<Altitude>,
    #[serde(alias = "gs")]
    speed: Option<f64>,
    track: Option<f64>,
    #[serde(alias = "baro_rate")]
    vert_rate: Option<f64>,
    squawk: Option<String>,
    r_dst: Option<f64>,
}

/// Parse a whole snapshot.
///
/// The outer error means the document itself is unusable; the inner ones
/// are per-aircraft entries that had to be dropped. A position is only
/// attached when `seen_pos` says it is younger than `max_position_age_secs`.
pub fn parse_aircraft_json(
    doc: &str,
    max_position_age_secs: f64,
    received_at: DateTime<Utc>,
) -> Result<Vec<Result<AircraftData, ParseError>>, ParseError> {
    let snapshot: Snapshot =
        serde_json::from_str(doc).map_err(|e| ParseError::Document(e.to_string()))?;

    let now = snapshot
        .now
        .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single())
        .unwrap_or(received_at);

    Ok(snapshot
        .aircraft
        .into_iter()
        .map(|entry| convert(entry, now, max_position_age_secs))
        .collect())
}

fn convert(entry: Entry, now: DateTime<Utc>, max_age: f64) -> Result<AircraftData, ParseError> {
    let aircraft_id = normalize_aircraft_id(&entry.hex).ok_or_else(|| ParseError::InvalidField {
        field: "hex",
        value: entry.hex.clone(),
    })?;

    let mut aircraft = AircraftData::new(aircraft_id);
    aircraft.callsign = entry.flight.as_deref().and_then(clean_callsign);
    aircraft.altitude_ft = match entry.altitude {
        Some(Altitude::Feet(ft)) => Some(ft.round() as i32),
        Some(Altitude::Other(_)) | None => None,
    };
    aircraft.ground_speed_kts = entry.speed.map(|v| v as f32);
    aircraft.track_deg = entry.track.map(|v| v as f32);
    aircraft.vertical_rate_fpm = entry.vert_rate.map(|v| v.round() as i32);
    aircraft.squawk = entry.squawk.filter(|s| !s.trim().is_empty());
    aircraft.decoder_distance_nm = entry.r_dst;

    match (entry.lat, entry.lon, entry.seen_pos) {
        (Some(lat), Some(lon), Some(age)) if age >= 0.0 && age < max_age => {
            aircraft.latitude = Some(lat);
            aircraft.longitude = Some(lon);
            aircraft.timestamp = Some(now - chrono::Duration::milliseconds((age * 1000.0) as i64));
        }
        _ => {
            aircraft.timestamp = Some(now);
        }
    }

    Ok(aircraft)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "now": 1714564800.0,
        "messages": 81234,
        "aircraft": [
            {"hex": "4840d6", "flight": "KLM1023 ", "lat": 51.5, "lon": -0.5,
             "seen_pos": 2.0, "altitude": 37000, "speed": 451, "track": 87,
             "vert_rate": -64, "squawk": "1000", "seen": 0.4},
            {"hex": "4ca2d6", "alt_baro": "ground", "gs": 12.5, "lat": 51.47,
             "lon": -0.45, "seen_pos": 75.0},
            {"hex": "~2d1f00", "lat": 50.0, "lon": 0.0, "seen_pos": 0.5,
             "baro_rate": 128, "r_dst": 42.1},
            {"hex": "bogus"},
            {"hex": "a1b2c3", "altitude": 12000}
        ]
    }"#;

    fn received() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    #[test]
    fn test_parse_snapshot() {
        let entries = parse_aircraft_json(SNAPSHOT, 60.0, received()).unwrap();
        assert_eq!(entries.len(), 5);

        let first = entries[0].as_ref().unwrap();
        assert_eq!(first.aircraft_id, "4840D6");
        assert_eq!(first.callsign.as_deref(), Some("KLM1023"));
        assert_eq!(first.latitude, Some(51.5));
        assert_eq!(first.altitude_ft, Some(37000));
        assert_eq!(first.ground_speed_kts, Some(451.0));
        assert_eq!(first.vertical_rate_fpm, Some(-64));
        assert_eq!(first.squawk.as_deref(), Some("1000"));
        assert_eq!(
            first.timestamp,
            Some(Utc.timestamp_opt(1_714_564_798, 0).unwrap())
        );
    }

    #[test]
    fn test_stale_position_is_dropped() {
        let entries = parse_aircraft_json(SNAPSHOT, 60.0, received()).unwrap();
        let ground = entries[1].as_ref().unwrap();
        assert!(!ground.has_position());
        assert_eq!(ground.altitude_ft, None);
        assert_eq!(ground.ground_speed_kts, Some(12.5));
    }

    #[test]
    fn test_newer_field_names_and_decoder_distance() {
        let entries = parse_aircraft_json(SNAPSHOT, 60.0, received()).unwrap();
        let tisb = entries[2].as_ref().unwrap();
        assert_eq!(tisb.aircraft_id, "~2D1F00");
        assert_eq!(tisb.vertical_rate_fpm, Some(128));
        assert_eq!(tisb.decoder_distance_nm, Some(42.1));
    }

    #[test]
    fn test_bad_entries_do_not_spoil_the_snapshot() {
        let entries = parse_aircraft_json(SNAPSHOT, 60.0, received()).unwrap();
        assert!(entries[3].is_err());
        let no_position = entries[4].as_ref().unwrap();
        assert!(!no_position.has_position());
        assert_eq!(no_position.timestamp, Some(Utc.timestamp_opt(1_714_564_800, 0).unwrap()));
    }

    #[test]
    fn test_missing_now_uses_receive_time() {
        let doc = r#"{"aircraft": [{"hex": "4840d6", "lat": 1.0, "lon": 2.0, "seen_pos": 0}]}"#;
        let entries = parse_aircraft_json(doc, 60.0, received()).unwrap();
        assert_eq!(entries[0].as_ref().unwrap().timestamp, Some(received()));
    }

    #[test]
    fn test_rejects_broken_documents() {
        assert!(matches!(
            parse_aircraft_json("{\"aircraft\": [", 60.0, received()),
            Err(ParseError::Document(_))
        ));
        assert!(parse_aircraft_json("{}", 60.0, received()).unwrap().is_empty());
    }
}
