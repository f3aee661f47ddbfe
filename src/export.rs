//! CSV export of the registry
//!
//! One row per aircraft in ascending id order, written to a temporary file
//! and moved into place once complete.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{info, trace};

use crate::atomic::write_atomically;
use crate::registry::{AircraftRecord, AircraftRegistry};

const HEADER: [&str; 15] = [
    "aircraft_id",
    "callsign",
    "latitude",
    "longitude",
    "distance_km",
    "altitude_ft",
    "ground_speed_kts",
    "track_deg",
    "vertical_rate_fpm",
    "squawk",
    "timestamp",
    "first_seen",
    "registration",
    "operator",
    "aircraft_type",
];

/// Private struct for one CSV line, fields in column order
#[derive(Debug, Serialize)]
struct Row<'a> {
    aircraft_id: &'a str,
    callsign: Option<&'a str>,
    latitude: f64,
    longitude: f64,
    distance_km: f64,
    altitude_ft: Option<i32>,
    ground_speed_kts: Option<f32>,
    track_deg: Option<f32>,
    vertical_rate_fpm: Option<i32>,
    squawk: Option<&'a str>,
    timestamp: String,
    first_seen: String,
    registration: Option<&'a str>,
    operator: Option<&'a str>,
    aircraft_type: Option<&'a str>,
}

impl<'a> From<&'a AircraftRecord> for Row<'a> {
    fn from(record: &'a AircraftRecord) -> Self {
        let r = &record.report;
        let info = record.info.as_ref();
        Row {
            aircraft_id: &r.aircraft_id,
            callsign: r.callsign.as_deref(),
            latitude: r.latitude,
            longitude: r.longitude,
            distance_km: r.distance_km,
            altitude_ft: r.altitude_ft,
            ground_speed_kts: r.ground_speed_kts,
            track_deg: r.track_deg,
            vertical_rate_fpm: r.vertical_rate_fpm,
            squawk: r.squawk.as_deref(),
            timestamp: rfc3339(r.timestamp),
            first_seen: rfc3339(record.first_seen),
            registration: info.map(|i| i.registration.as_str()),
            operator: info.map(|i| i.operator.as_str()),
            aircraft_type: info.map(|i| i.aircraft_type.as_str()),
        }
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write the registry as CSV to any writer
pub fn write_csv<W: std::io::Write>(registry: &AircraftRegistry, out: W) -> Result<()> {
    // Header written by hand so an empty registry still gets one
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(HEADER)?;

    for record in registry.iter() {
        trace!("{}: {:.2} km", record.report.aircraft_id, record.report.distance_km);
        wtr.serialize(Row::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Export the registry to `path`
pub fn export(registry: &AircraftRegistry, path: &Path) -> Result<()> {
    write_atomically(path, |w| write_csv(registry, w))
        .with_context(|| format!("Failed to export to {}", path.display()))?;
    info!("Exported {} aircraft to {}", registry.len(), path.display());
    Ok(())
}
