//! Message ingestion
//!
//! Turns decoder output into position reports and folds them into the
//! registry. Bad input is counted and skipped; only losing the input source
//! itself ends a run with an error.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::adsb::{self, AircraftData, CprContext, InputFormat, ParseError};
use crate::aircraft_tracker::{AircraftState, AircraftTracker};
use crate::geo::{self, Receiver, KM_PER_NM};
use crate::lookup::{AircraftInfo, AircraftLookup};
use crate::registry::{AircraftRegistry, PositionReport, Upsert};
use crate::source::Source;
use crate::store::Store;

/// Maximum aircraft with pending CPR frames
const MAX_CPR_AIRCRAFT: usize = 512;

/// How often the run loop logs progress
const PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Why an observation is not a usable position report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("no position")]
    MissingPosition,
    #[error("position out of range ({lat}, {lon})")]
    InvalidPosition { lat: f64, lon: f64 },
    #[error("no receiver location and no decoder supplied distance")]
    MissingDistance,
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub observations: u64,
    pub reports: u64,
    pub inserted: u64,
    pub replaced: u64,
    pub kept: u64,
    pub skipped: u64,
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines, {} observations, {} reports ({} new, {} further, {} kept), {} skipped",
            self.lines,
            self.observations,
            self.reports,
            self.inserted,
            self.replaced,
            self.kept,
            self.skipped
        )
    }
}

/// Owns the registry while decoder output is being folded into it
pub struct Ingestor {
    format: InputFormat,
    receiver: Option<Receiver>,
    max_position_age_secs: f64,
    registry: AircraftRegistry,
    tracker: AircraftTracker,
    cpr: CprContext,
    stats: IngestStats,
    identify: bool,
    unidentified: Vec<String>,
}

impl Ingestor {
    pub fn new(
        format: InputFormat,
        receiver: Option<Receiver>,
        registry: AircraftRegistry,
    ) -> Self {
        let cpr = match receiver {
            Some(rx) => CprContext::new(MAX_CPR_AIRCRAFT).with_reference(rx.lat, rx.lon),
            None => CprContext::new(MAX_CPR_AIRCRAFT),
        };
        Self {
            format,
            receiver,
            max_position_age_secs: 60.0,
            registry,
            tracker: AircraftTracker::new(60),
            cpr,
            stats: IngestStats::default(),
            identify: false,
            unidentified: Vec::new(),
        }
    }

    pub fn with_max_position_age(mut self, secs: f64) -> Self {
        self.max_position_age_secs = secs;
        self
    }

    pub fn with_tracker_timeout(mut self, secs: u64) -> Self {
        self.tracker = AircraftTracker::new(secs);
        self
    }

    /// Queue aircraft for lookup, starting with stored ones lacking details
    pub fn with_identification(mut self) -> Self {
        self.identify = true;
        self.unidentified = self.registry.unidentified().map(String::from).collect();
        self
    }

    pub fn registry(&self) -> &AircraftRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Aircraft heard recently enough to still have metadata
    pub fn tracked(&self) -> usize {
        self.tracker.count()
    }

    /// Ids queued for lookup since the last call
    pub fn take_unidentified(&mut self) -> Vec<String> {
        std::mem::take(&mut self.unidentified)
    }

    pub fn set_info(&mut self, aircraft_id: &str, info: AircraftInfo) -> bool {
        self.registry.set_info(aircraft_id, info)
    }

    /// Feed one chunk as produced by a [`Source`]: a line, or a whole
    /// document for the json format. Returns true if the registry changed.
    pub fn ingest_chunk(&mut self, chunk: &str, now: DateTime<Utc>) -> bool {
        match self.format {
            InputFormat::Json => self.ingest_document(chunk, now),
            InputFormat::Sbs | InputFormat::Raw => self.ingest_line(chunk, now),
        }
    }

    /// Feed one line of SBS or raw output
    pub fn ingest_line(&mut self, line: &str, now: DateTime<Utc>) -> bool {
        self.stats.lines += 1;

        let parsed = match self.format {
            InputFormat::Sbs => adsb::parse_sbs_line(line),
            InputFormat::Raw => adsb::parse_avr_line(line)
                .and_then(|frame| adsb::parse_message(&frame, &mut self.cpr, now)),
            InputFormat::Json => Err(ParseError::UnsupportedMessage(
                "json is not line oriented".to_string(),
            )),
        };

        match parsed {
            Ok(data) => self.observe(data, now),
            Err(ParseError::Empty) => false,
            Err(e) => {
                self.stats.skipped += 1;
                debug!("Skipping line ({}): {}", e, line.trim_end());
                false
            }
        }
    }

    /// Feed one `aircraft.json` snapshot
    pub fn ingest_document(&mut self, doc: &str, now: DateTime<Utc>) -> bool {
        self.stats.lines += 1;

        let entries = match adsb::parse_aircraft_json(doc, self.max_position_age_secs, now) {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.skipped += 1;
                debug!("Skipping snapshot: {}", e);
                return false;
            }
        };
        trace!("Snapshot with {} aircraft", entries.len());

        let mut changed = false;
        for entry in entries {
            match entry {
                Ok(data) => changed |= self.observe(data, now),
                Err(e) => {
                    self.stats.skipped += 1;
                    debug!("Skipping aircraft entry: {}", e);
                }
            }
        }
        changed
    }

    /// Track metadata, and if the observation holds a position, apply it
    fn observe(&mut self, data: AircraftData, now: DateTime<Utc>) -> bool {
        self.stats.observations += 1;
        let at = data.timestamp.unwrap_or(now);
        let state = self.tracker.update(&data, at);

        if !data.has_position() {
            return false;
        }

        let report = match build_report(&data, state, at, self.receiver) {
            Ok(report) => report,
            Err(e) => {
                self.stats.skipped += 1;
                debug!("Dropping position of {}: {}", data.aircraft_id, e);
                return false;
            }
        };

        self.stats.reports += 1;
        match self.registry.upsert(report) {
            Upsert::Inserted => {
                self.stats.inserted += 1;
                if self.identify {
                    self.unidentified.push(data.aircraft_id);
                }
                true
            }
            Upsert::Replaced { .. } => {
                self.stats.replaced += 1;
                true
            }
            Upsert::Kept { .. } => {
                self.stats.kept += 1;
                false
            }
        }
    }
}

/// Validate an observation and complete it with tracked metadata.
///
/// `state` must already include `data`; its metadata has passed the
/// tracker's sanity bounds, so implausible values in `data` never reach a
/// report. The distance comes from the receiver when one is configured,
/// otherwise from the decoder if it supplied one.
pub fn build_report(
    data: &AircraftData,
    state: &AircraftState,
    at: DateTime<Utc>,
    receiver: Option<Receiver>,
) -> Result<PositionReport, ReportError> {
    let (lat, lon) = match (data.latitude, data.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(ReportError::MissingPosition),
    };
    if !geo::valid_position(lat, lon) {
        return Err(ReportError::InvalidPosition { lat, lon });
    }

    let distance_km = match (receiver, data.decoder_distance_nm) {
        (Some(rx), _) => rx.distance_km(lat, lon),
        (None, Some(nm)) if nm.is_finite() && nm >= 0.0 => geo::round_km(nm * KM_PER_NM),
        _ => return Err(ReportError::MissingDistance),
    };

    Ok(PositionReport {
        aircraft_id: data.aircraft_id.clone(),
        latitude: lat,
        longitude: lon,
        distance_km,
        timestamp: at,
        callsign: state.callsign.clone(),
        altitude_ft: state.altitude_ft,
        ground_speed_kts: state.ground_speed_kts,
        track_deg: state.track_deg,
        vertical_rate_fpm: state.vertical_rate_fpm,
        squawk: state.squawk.clone(),
    })
}

/// Stop conditions and persistence for a live run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this long
    pub duration: Option<Duration>,
    /// Save the registry this often while running
    pub checkpoint: Option<Duration>,
    /// Look up registration details of new aircraft
    pub lookup: Option<AircraftLookup>,
}

/// Look up every aircraft queued since the last call
async fn identify_new(ingestor: &mut Ingestor, lookup: &AircraftLookup) -> bool {
    let mut changed = false;
    for aircraft_id in ingestor.take_unidentified() {
        let info = lookup.identify(&aircraft_id).await;
        changed |= ingestor.set_info(&aircraft_id, info);
    }
    changed
}

/// Read the source until it ends, Ctrl-C, or the duration runs out.
///
/// The registry is saved at every checkpoint and once more on the way out,
/// including when the source fails.
pub async fn run(
    ingestor: &mut Ingestor,
    source: &mut Source,
    store: &Store,
    options: &RunOptions,
) -> Result<()> {
    let deadline = options.duration.map(|d| Instant::now() + d);
    let stop = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    let mut checkpoint = interval(options.checkpoint.unwrap_or(Duration::from_secs(3600)));
    checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);
    checkpoint.reset();
    let mut progress = interval(PROGRESS_INTERVAL);
    progress.reset();

    let mut dirty = false;
    let result = loop {
        tokio::select! {
            chunk = source.next_chunk() => match chunk {
                Ok(Some(chunk)) => {
                    dirty |= ingestor.ingest_chunk(&chunk, Utc::now());
                    if let Some(lookup) = &options.lookup {
                        dirty |= identify_new(ingestor, lookup).await;
                    }
                }
                Ok(None) => {
                    info!("End of input");
                    break Ok(());
                }
                Err(e) => break Err(e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break Ok(());
            }
            _ = &mut stop => {
                info!("Run time limit reached, stopping");
                break Ok(());
            }
            _ = checkpoint.tick(), if options.checkpoint.is_some() => {
                if dirty {
                    store.save(ingestor.registry())?;
                    dirty = false;
                    debug!("Checkpoint saved: {}", ingestor.registry());
                }
            }
            _ = progress.tick() => {
                info!(
                    "[Ingest] {} | {} | {} tracked",
                    ingestor.stats(),
                    ingestor.registry(),
                    ingestor.tracked()
                );
            }
        }
    };

    if let Err(e) = &result {
        warn!("Input failed, saving what we have: {:#}", e);
    }
    store.save(ingestor.registry())?;
    info!("[Ingest] {} | {}", ingestor.stats(), ingestor.registry());
    result
}
