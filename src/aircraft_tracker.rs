//! Aircraft state tracking and aggregation
//!
//! Decoders spread what they know about an aircraft over several messages:
//! the callsign arrives in one, speed in another, the position in a third.
//! The tracker keeps the latest value of each so a position report can be
//! completed with metadata heard shortly before it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::adsb::AircraftData;

/// How often, in observation time, stale entries are purged
const CLEANUP_INTERVAL_SECS: i64 = 30;

/// Latest known metadata for one aircraft
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub callsign: Option<String>,
    pub altitude_ft: Option<i32>,
    pub ground_speed_kts: Option<f32>,
    pub track_deg: Option<f32>,
    pub vertical_rate_fpm: Option<i32>,
    pub squawk: Option<String>,
    /// Time of the last message for this aircraft
    pub last_seen: DateTime<Utc>,
    /// Message count
    pub messages: u64,
}

impl AircraftState {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            callsign: None,
            altitude_ft: None,
            ground_speed_kts: None,
            track_deg: None,
            vertical_rate_fpm: None,
            squawk: None,
            last_seen: at,
            messages: 0,
        }
    }

    /// Fold one observation in, keeping values that pass basic sanity checks
    fn update(&mut self, data: &AircraftData, at: DateTime<Utc>) {
        self.last_seen = self.last_seen.max(at);
        self.messages += 1;

        if let Some(cs) = &data.callsign {
            self.callsign = Some(cs.clone());
        }

        if let Some(alt) = data.altitude_ft {
            if alt > -2000 && alt < 60000 {
                self.altitude_ft = Some(alt);
            }
        }

        if let Some(speed) = data.ground_speed_kts {
            if (0.0..1000.0).contains(&speed) {
                self.ground_speed_kts = Some(speed);
            }
        }

        if let Some(track) = data.track_deg {
            if (0.0..=360.0).contains(&track) {
                self.track_deg = Some(track);
            }
        }

        if let Some(vr) = data.vertical_rate_fpm {
            if vr.abs() < 10000 {
                self.vertical_rate_fpm = Some(vr);
            }
        }

        if let Some(sq) = &data.squawk {
            self.squawk = Some(sq.clone());
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_seen > timeout
    }
}

/// Tracks metadata for every aircraft currently heard
pub struct AircraftTracker {
    aircraft: HashMap<String, AircraftState>,
    timeout: Duration,
    last_cleanup: Option<DateTime<Utc>>,
}

impl AircraftTracker {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            aircraft: HashMap::new(),
            timeout: Duration::seconds(timeout_secs as i64),
            last_cleanup: None,
        }
    }

    /// Record an observation and return the aggregated state for its aircraft
    pub fn update(&mut self, data: &AircraftData, at: DateTime<Utc>) -> &AircraftState {
        match self.last_cleanup {
            Some(last) if at - last < Duration::seconds(CLEANUP_INTERVAL_SECS) => {}
            _ => {
                self.cleanup_stale(at);
                self.last_cleanup = Some(at);
            }
        }

        let timeout = self.timeout;
        let state = self
            .aircraft
            .entry(data.aircraft_id.clone())
            .or_insert_with(|| {
                debug!("New aircraft tracked: {}", data.aircraft_id);
                AircraftState::new(at)
            });

        // Metadata from an aircraft we lost track of is not worth keeping
        if state.is_stale(at, timeout) {
            *state = AircraftState::new(at);
        }

        state.update(data, at);
        state
    }

    #[cfg(test)]
    pub fn get(&self, aircraft_id: &str) -> Option<&AircraftState> {
        self.aircraft.get(aircraft_id)
    }

    /// Aircraft currently tracked
    pub fn count(&self) -> usize {
        self.aircraft.len()
    }

    fn cleanup_stale(&mut self, now: DateTime<Utc>) {
        let before = self.aircraft.len();
        let timeout = self.timeout;
        self.aircraft.retain(|_, state| !state.is_stale(now, timeout));
        let removed = before - self.aircraft.len();
        if removed > 0 {
            debug!(
                "Cleaned up {} stale aircraft, {} remaining",
                removed,
                self.aircraft.len()
            );
        }
    }
}
