//! CPR (Compact Position Reporting) position decoding

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// 2^17, the CPR coordinate resolution
const CPR_SCALE: f64 = 131072.0;

/// Maximum spacing between an even and an odd frame for global decoding
const GLOBAL_PAIR_WINDOW_SECS: i64 = 10;

/// How long a decoded position stays good enough as a local reference
const LOCAL_REFERENCE_SECS: i64 = 600;

/// Largest accepted offset from the aircraft's own last position, in zones
const OWN_REFERENCE_ZONES: f64 = 0.5;

/// Largest accepted offset from the receiver, in zones. Aircraft further
/// than half a zone alias to a closer position; the tighter window turns
/// most of those into a rejection instead.
const RECEIVER_REFERENCE_ZONES: f64 = 0.25;

/// Raw CPR fields of one airborne position frame
#[derive(Debug, Clone, Copy)]
struct CprFrame {
    lat: i32,
    lon: i32,
    at: DateTime<Utc>,
}

/// CPR state for a single aircraft
#[derive(Debug, Clone, Default)]
struct CprState {
    even: Option<CprFrame>,
    odd: Option<CprFrame>,
    last_position: Option<(f64, f64, DateTime<Utc>)>,
    last_update: Option<DateTime<Utc>>,
}

/// Context for CPR decoding across multiple aircraft
pub struct CprContext {
    states: HashMap<u32, CprState>,
    max_aircraft: usize,
    /// Receiver position, the fallback reference for local decoding
    reference: Option<(f64, f64)>,
}

impl CprContext {
    pub fn new(max_aircraft: usize) -> Self {
        Self {
            states: HashMap::with_capacity(max_aircraft),
            max_aircraft,
            reference: None,
        }
    }

    /// Allow single-frame decoding relative to the receiver
    pub fn with_reference(mut self, lat: f64, lon: f64) -> Self {
        self.reference = Some((lat, lon));
        self
    }

    fn get_or_create(&mut self, icao: u32) -> &mut CprState {
        if self.states.len() >= self.max_aircraft && !self.states.contains_key(&icao) {
            let oldest = self
                .states
                .iter()
                .min_by_key(|(_, s)| s.last_update)
                .map(|(&k, _)| k);
            if let Some(key) = oldest {
                self.states.remove(&key);
            }
        }

        self.states.entry(icao).or_default()
    }

    /// Record a position frame and try to turn it into lat/lon.
    ///
    /// Global decoding of an even/odd pair is preferred. Failing that, the
    /// frame is decoded locally against the aircraft's last known position
    /// or, if there is none, the receiver.
    pub fn update(
        &mut self,
        icao: u32,
        lat_cpr: i32,
        lon_cpr: i32,
        odd_flag: bool,
        at: DateTime<Utc>,
    ) -> Option<(f64, f64)> {
        let reference = self.reference;
        let state = self.get_or_create(icao);
        let frame = CprFrame {
            lat: lat_cpr,
            lon: lon_cpr,
            at,
        };

        state.last_update = Some(at);
        if odd_flag {
            state.odd = Some(frame);
        } else {
            state.even = Some(frame);
        }

        let local_ref = state
            .last_position
            .filter(|&(_, _, t)| at - t <= Duration::seconds(LOCAL_REFERENCE_SECS))
            .map(|(lat, lon, _)| (lat, lon, OWN_REFERENCE_ZONES))
            .or(reference.map(|(lat, lon)| (lat, lon, RECEIVER_REFERENCE_ZONES)));

        let position = decode_global(state, odd_flag).or_else(|| {
            let (ref_lat, ref_lon, max_zones) = local_ref?;
            decode_local((ref_lat, ref_lon), max_zones, lat_cpr, lon_cpr, odd_flag)
        })?;

        state.last_position = Some((position.0, position.1, at));
        Some(position)
    }
}

/// NL (Number of Longitude zones) lookup function
/// Returns the number of longitude zones at a given latitude
fn cpr_nl(lat: f64) -> i32 {
    const BOUNDS: [f64; 58] = [
        10.47047130, 14.82817437, 18.18626357, 21.02939493, 23.54504487, 25.82924707,
        27.93898710, 29.91135686, 31.77209708, 33.53993436, 35.22899598, 36.85025108,
        38.41241892, 39.92256684, 41.38651832, 42.80914012, 44.19454951, 45.54626723,
        46.86733252, 48.16039128, 49.42776439, 50.67150166, 51.89342469, 53.09516153,
        54.27817472, 55.44378444, 56.59318756, 57.72747354, 58.84763776, 59.95459277,
        61.04917774, 62.13216659, 63.20427479, 64.26616523, 65.31845310, 66.36171008,
        67.39646774, 68.42322022, 69.44242631, 70.45451075, 71.45986473, 72.45884545,
        73.45177442, 74.43893416, 75.42056257, 76.39684391, 77.36789461, 78.33374083,
        79.29428225, 80.24923213, 81.19801349, 82.13956981, 83.07199445, 83.99173563,
        84.89166191, 85.75541621, 86.53536998, 87.00000000,
    ];

    let lat = lat.abs();
    let zones_passed = BOUNDS.iter().take_while(|&&b| lat >= b).count() as i32;
    59 - zones_passed
}

/// Decode CPR position using global decoding.
/// Requires both even and odd frames within ten seconds of each other.
fn decode_global(state: &CprState, odd_flag: bool) -> Option<(f64, f64)> {
    let even = state.even?;
    let odd = state.odd?;

    if (even.at - odd.at).num_seconds().abs() > GLOBAL_PAIR_WINDOW_SECS {
        return None;
    }

    let lat_cpr_even = even.lat as f64 / CPR_SCALE;
    let lon_cpr_even = even.lon as f64 / CPR_SCALE;
    let lat_cpr_odd = odd.lat as f64 / CPR_SCALE;
    let lon_cpr_odd = odd.lon as f64 / CPR_SCALE;

    let dlat_even = 360.0 / 60.0;
    let dlat_odd = 360.0 / 59.0;

    let j = (59.0 * lat_cpr_even - 60.0 * lat_cpr_odd + 0.5).floor() as i32;

    let mut lat_even = dlat_even * (j.rem_euclid(60) as f64 + lat_cpr_even);
    let mut lat_odd = dlat_odd * (j.rem_euclid(59) as f64 + lat_cpr_odd);

    if lat_even >= 270.0 {
        lat_even -= 360.0;
    }
    if lat_odd >= 270.0 {
        lat_odd -= 360.0;
    }

    // Both frames must sit in the same longitude zone
    if cpr_nl(lat_even) != cpr_nl(lat_odd) {
        return None;
    }

    let (lat, nl, lon_cpr, ni) = if odd_flag {
        let nl = cpr_nl(lat_odd);
        (lat_odd, nl, lon_cpr_odd, (nl - 1).max(1))
    } else {
        let nl = cpr_nl(lat_even);
        (lat_even, nl, lon_cpr_even, nl.max(1))
    };

    let m = (lon_cpr_even * (nl - 1) as f64 - lon_cpr_odd * nl as f64 + 0.5).floor() as i32;
    let lon = (360.0 / ni as f64) * (m.rem_euclid(ni) as f64 + lon_cpr);

    checked(lat, normalize_lon(lon))
}

/// Decode a single frame relative to a reference position.
///
/// Only unambiguous within half a zone (about 180 NM) of the reference;
/// results further than `max_zones` of a zone from it are rejected.
fn decode_local(
    (ref_lat, ref_lon): (f64, f64),
    max_zones: f64,
    lat_cpr: i32,
    lon_cpr: i32,
    odd_flag: bool,
) -> Option<(f64, f64)> {
    let lat_cpr = lat_cpr as f64 / CPR_SCALE;
    let lon_cpr = lon_cpr as f64 / CPR_SCALE;
    let odd = if odd_flag { 1 } else { 0 };

    let dlat = 360.0 / (60 - odd) as f64;
    let j = (ref_lat / dlat).floor()
        + (0.5 + ref_lat.rem_euclid(dlat) / dlat - lat_cpr).floor();
    let lat = dlat * (j + lat_cpr);
    if (lat - ref_lat).abs() > dlat * max_zones {
        return None;
    }

    let ni = (cpr_nl(lat) - odd).max(1);
    let dlon = 360.0 / ni as f64;
    let m = (ref_lon / dlon).floor()
        + (0.5 + ref_lon.rem_euclid(dlon) / dlon - lon_cpr).floor();
    let lon = dlon * (m + lon_cpr);
    let dlon_ref = (lon - ref_lon).rem_euclid(360.0);
    if dlon_ref.min(360.0 - dlon_ref) > dlon * max_zones {
        return None;
    }

    checked(lat, normalize_lon(lon))
}

fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

fn checked(lat: f64, lon: f64) -> Option<(f64, f64)> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Some((lat, lon))
    } else {
        None
    }
}
