//! Furthest observed position per aircraft
//!
//! The registry keeps exactly one record per aircraft id. A new report only
//! replaces the stored one when it is strictly further from the receiver;
//! on a tie the first report stays.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lookup::AircraftInfo;

/// A validated position of one aircraft at one moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub aircraft_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_ft: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_speed_kts: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_deg: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_rate_fpm: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
}

/// The furthest report seen so far for one aircraft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftRecord {
    pub report: PositionReport,
    /// Timestamp of the first valid report, kept across replacements
    pub first_seen: DateTime<Utc>,
    /// Registration details, once looked up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<AircraftInfo>,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upsert {
    /// First report for this aircraft
    Inserted,
    /// Further than before; carries the previous distance
    Replaced { previous_km: f64 },
    /// Not further; nothing changed
    Kept { stored_km: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AircraftRegistry {
    aircraft: BTreeMap<String, AircraftRecord>,
}

impl AircraftRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the furthest-wins rule to one report
    pub fn upsert(&mut self, report: PositionReport) -> Upsert {
        match self.aircraft.get_mut(&report.aircraft_id) {
            None => {
                debug!(
                    "{} first seen at {:.2} km",
                    report.aircraft_id, report.distance_km
                );
                let record = AircraftRecord {
                    first_seen: report.timestamp,
                    report,
                    info: None,
                };
                self.aircraft
                    .insert(record.report.aircraft_id.clone(), record);
                Upsert::Inserted
            }
            Some(record) if report.distance_km > record.report.distance_km => {
                let previous_km = record.report.distance_km;
                debug!(
                    "{} now at {:.2} km, previously {:.2} km",
                    report.aircraft_id, report.distance_km, previous_km
                );
                record.report = report;
                Upsert::Replaced { previous_km }
            }
            Some(record) => Upsert::Kept {
                stored_km: record.report.distance_km,
            },
        }
    }

    /// Attach looked up details; false if the aircraft is not registered
    pub fn set_info(&mut self, aircraft_id: &str, info: AircraftInfo) -> bool {
        match self.aircraft.get_mut(aircraft_id) {
            Some(record) => {
                record.info = Some(info);
                true
            }
            None => false,
        }
    }

    /// Ids of aircraft without looked up details
    pub fn unidentified(&self) -> impl Iterator<Item = &str> {
        self.aircraft
            .values()
            .filter(|r| r.info.is_none())
            .map(|r| r.report.aircraft_id.as_str())
    }

    #[cfg(test)]
    pub fn get(&self, aircraft_id: &str) -> Option<&AircraftRecord> {
        self.aircraft.get(aircraft_id)
    }

    /// Records in ascending aircraft id order
    pub fn iter(&self) -> impl Iterator<Item = &AircraftRecord> {
        self.aircraft.values()
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// The record furthest from the receiver overall
    pub fn furthest(&self) -> Option<&AircraftRecord> {
        self.aircraft
            .values()
            .max_by(|a, b| a.report.distance_km.total_cmp(&b.report.distance_km))
    }
}

impl fmt::Display for AircraftRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.furthest() {
            Some(record) => write!(
                f,
                "{} aircraft, furthest {} at {:.2} km",
                self.len(),
                record.report.aircraft_id,
                record.report.distance_km
            ),
            None => write!(f, "no aircraft"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn report(id: &str, distance_km: f64, secs: i64) -> PositionReport {
        PositionReport {
            aircraft_id: id.to_string(),
            latitude: 51.0 + distance_km / 1000.0,
            longitude: -1.0,
            distance_km,
            timestamp: Utc.timestamp_opt(1_714_564_800 + secs, 0).unwrap(),
            callsign: None,
            altitude_ft: None,
            ground_speed_kts: None,
            track_deg: None,
            vertical_rate_fpm: None,
            squawk: None,
        }
    }

    #[test]
    fn test_first_report_is_inserted() {
        let mut registry = AircraftRegistry::new();
        assert_eq!(registry.upsert(report("4840D6", 10.0, 0)), Upsert::Inserted);
        assert_eq!(registry.len(), 1);
        let record = registry.get("4840D6").unwrap();
        assert_eq!(record.report.distance_km, 10.0);
        assert_eq!(record.first_seen, record.report.timestamp);
    }

    #[test]
    fn test_further_report_replaces() {
        let mut registry = AircraftRegistry::new();
        registry.upsert(report("4840D6", 10.0, 0));
        let further = report("4840D6", 15.0, 5);
        assert_eq!(
            registry.upsert(further.clone()),
            Upsert::Replaced { previous_km: 10.0 }
        );
        let record = registry.get("4840D6").unwrap();
        assert_eq!(record.report, further);
        assert_eq!(record.first_seen, report("4840D6", 10.0, 0).timestamp);
    }

    #[test]
    fn test_tie_keeps_first() {
        let mut registry = AircraftRegistry::new();
        let first = report("4840D6", 10.0, 0);
        registry.upsert(first.clone());
        let mut tie = report("4840D6", 10.0, 5);
        tie.callsign = Some("KLM1023".to_string());
        assert_eq!(registry.upsert(tie), Upsert::Kept { stored_km: 10.0 });
        assert_eq!(registry.get("4840D6").unwrap().report, first);
    }

    #[test]
    fn test_closer_report_is_discarded() {
        let mut registry = AircraftRegistry::new();
        registry.upsert(report("4840D6", 10.0, 0));
        assert_eq!(
            registry.upsert(report("4840D6", 3.0, 5)),
            Upsert::Kept { stored_km: 10.0 }
        );
        assert_eq!(registry.get("4840D6").unwrap().report.distance_km, 10.0);
    }

    #[test]
    fn test_same_report_twice_is_idempotent() {
        let mut registry = AircraftRegistry::new();
        let r = report("4840D6", 10.0, 0);
        registry.upsert(r.clone());
        let before = registry.clone();
        registry.upsert(r);
        assert_eq!(registry, before);
    }

    #[test]
    fn test_distance_never_decreases_and_ids_stay_unique() {
        let mut registry = AircraftRegistry::new();
        let distances = [5.0, 12.0, 7.5, 12.0, 30.2, 1.0, 30.1];
        let mut max_so_far: f64 = 0.0;
        for (i, &d) in distances.iter().enumerate() {
            registry.upsert(report("4840D6", d, i as i64));
            registry.upsert(report("4CA2D6", d / 2.0, i as i64));
            max_so_far = max_so_far.max(d);
            assert_eq!(registry.get("4840D6").unwrap().report.distance_km, max_so_far);
            assert_eq!(registry.len(), 2);
        }
    }

    #[test]
    fn test_info_survives_replacement() {
        let mut registry = AircraftRegistry::new();
        registry.upsert(report("4840D6", 10.0, 0));
        registry.upsert(report("4CA2D6", 5.0, 0));
        assert!(!registry.set_info("400F01", AircraftInfo::unknown()));
        assert!(registry.set_info("4840D6", AircraftInfo::unknown()));
        assert_eq!(registry.unidentified().collect::<Vec<_>>(), ["4CA2D6"]);

        registry.upsert(report("4840D6", 20.0, 5));
        let record = registry.get("4840D6").unwrap();
        assert_eq!(record.report.distance_km, 20.0);
        assert_eq!(record.info, Some(AircraftInfo::unknown()));
    }

    #[test]
    fn test_iteration_is_sorted_by_id() {
        let mut registry = AircraftRegistry::new();
        registry.upsert(report("A1B2C3", 1.0, 0));
        registry.upsert(report("4840D6", 2.0, 0));
        registry.upsert(report("~2D1F00", 3.0, 0));
        let ids: Vec<_> = registry.iter().map(|r| r.report.aircraft_id.as_str()).collect();
        assert_eq!(ids, ["4840D6", "A1B2C3", "~2D1F00"]);
    }

    #[test]
    fn test_display_summary() {
        let mut registry = AircraftRegistry::new();
        assert_eq!(registry.to_string(), "no aircraft");
        registry.upsert(report("4840D6", 12.5, 0));
        registry.upsert(report("4CA2D6", 80.25, 0));
        assert_eq!(registry.to_string(), "2 aircraft, furthest 4CA2D6 at 80.25 km");
    }
}
