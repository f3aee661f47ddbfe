//! Raw Mode S frame parser (dump1090 `--raw` / AVR output)

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::cpr::CprContext;
use super::crc::{check_crc, get_df, get_icao};
use super::types::{AircraftData, DownlinkFormat};

/// Callsign character lookup table
const CALLSIGN_CHARS: &[u8; 64] = b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

/// Why a line could not be turned into an observation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unsupported message {0}")]
    UnsupportedMessage(String),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid frame length {0}")]
    InvalidLength(usize),
    #[error("CRC mismatch")]
    CrcError,
    #[error("malformed document: {0}")]
    Document(String),
}

/// Parse an AVR line: `*<hex>;`, or `@<12 hex digit timestamp><hex>;`.
/// Returns the raw frame bytes.
pub fn parse_avr_line(line: &str) -> Result<Vec<u8>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let body = if let Some(rest) = line.strip_prefix('*') {
        rest
    } else if let Some(rest) = line.strip_prefix('@') {
        rest.get(12..).ok_or(ParseError::InvalidLength(rest.len()))?
    } else {
        return Err(ParseError::UnsupportedMessage(line.chars().take(16).collect()));
    };

    let end_idx = body.find(';').ok_or(ParseError::MissingField("terminator"))?;
    let hex_str = &body[..end_idx];

    // 14 hex chars (56 bit) or 28 hex chars (112 bit)
    if hex_str.len() != 14 && hex_str.len() != 28 {
        return Err(ParseError::InvalidLength(hex_str.len() / 2));
    }

    hex::decode(hex_str).map_err(|_| ParseError::InvalidField {
        field: "frame",
        value: hex_str.to_string(),
    })
}

/// Parse one raw frame.
///
/// `at` is when the frame was heard; it drives the CPR pairing window.
pub fn parse_message(
    msg: &[u8],
    cpr_ctx: &mut CprContext,
    at: DateTime<Utc>,
) -> Result<AircraftData, ParseError> {
    check_crc(msg)?;

    let icao = get_icao(msg);
    let mut aircraft = AircraftData::new(format!("{:06X}", icao));
    aircraft.timestamp = Some(at);

    match DownlinkFormat::from(get_df(msg)) {
        DownlinkFormat::AllCallReply => {
            // Just the address, which we already have
        }

        DownlinkFormat::ExtendedSquitter | DownlinkFormat::ExtendedSquitterNonTransponder => {
            // Type code from first 5 bits of ME field
            let tc = (msg[4] >> 3) & 0x1F;

            match tc {
                1..=4 => {
                    aircraft.callsign = super::types::clean_callsign(&decode_callsign(msg));
                }
                9..=18 | 20..=22 => {
                    decode_airborne_position(msg, icao, &mut aircraft, cpr_ctx, at);
                }
                19 => {
                    decode_airborne_velocity(msg, &mut aircraft);
                }
                _ => {}
            }
        }

        DownlinkFormat::Unknown => {
            return Err(ParseError::UnsupportedMessage(format!("DF{}", get_df(msg))));
        }
    }

    Ok(aircraft)
}

/// Decode altitude from 12-bit AC code
fn decode_ac12_altitude(ac12: u16) -> Option<i32> {
    // Only the 25 ft (Q=1) encoding; Gillham coded altitudes are ignored
    if (ac12 >> 4) & 1 == 1 {
        let n = ((ac12 & 0x0FE0) >> 1) | (ac12 & 0x000F);
        Some(n as i32 * 25 - 1000)
    } else {
        None
    }
}

/// Decode callsign from type codes 1-4
fn decode_callsign(msg: &[u8]) -> String {
    let chars = [
        (msg[5] >> 2) & 0x3F,
        ((msg[5] & 0x03) << 4) | ((msg[6] >> 4) & 0x0F),
        ((msg[6] & 0x0F) << 2) | ((msg[7] >> 6) & 0x03),
        msg[7] & 0x3F,
        (msg[8] >> 2) & 0x3F,
        ((msg[8] & 0x03) << 4) | ((msg[9] >> 4) & 0x0F),
        ((msg[9] & 0x0F) << 2) | ((msg[10] >> 6) & 0x03),
        msg[10] & 0x3F,
    ];

    chars
        .iter()
        .map(|&c| CALLSIGN_CHARS[c as usize] as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Decode airborne position (type codes 9-18, 20-22)
fn decode_airborne_position(
    msg: &[u8],
    icao: u32,
    aircraft: &mut AircraftData,
    cpr_ctx: &mut CprContext,
    at: DateTime<Utc>,
) {
    let ac12 = ((msg[5] as u16) << 4) | ((msg[6] >> 4) as u16 & 0x0F);
    aircraft.altitude_ft = decode_ac12_altitude(ac12);

    // CPR format flag (F): 0 = even, 1 = odd
    let odd_flag = ((msg[6] >> 2) & 1) == 1;

    let lat_cpr = ((msg[6] as i32 & 0x03) << 15)
        | ((msg[7] as i32) << 7)
        | ((msg[8] as i32 >> 1) & 0x7F);

    let lon_cpr = ((msg[8] as i32 & 0x01) << 16)
        | ((msg[9] as i32) << 8)
        | (msg[10] as i32);

    if let Some((lat, lon)) = cpr_ctx.update(icao, lat_cpr, lon_cpr, odd_flag, at) {
        aircraft.latitude = Some(lat);
        aircraft.longitude = Some(lon);
    }
}

/// Decode airborne velocity (type code 19)
fn decode_airborne_velocity(msg: &[u8], aircraft: &mut AircraftData) {
    let subtype = msg[4] & 0x07;

    match subtype {
        1 | 2 => {
            // Ground speed from east/west and north/south components
            let dew = ((msg[5] >> 2) & 1) == 1;
            let vew = ((msg[5] as i32 & 0x03) << 8) | msg[6] as i32;
            let dns = ((msg[7] >> 7) & 1) == 1;
            let vns = ((msg[7] as i32 & 0x7F) << 3) | ((msg[8] >> 5) as i32 & 0x07);

            if vew > 0 && vns > 0 {
                let multiplier = if subtype == 2 { 4 } else { 1 };
                let mut v_ew = (vew - 1) * multiplier;
                let mut v_ns = (vns - 1) * multiplier;

                if dew {
                    v_ew = -v_ew;
                }
                if dns {
                    v_ns = -v_ns;
                }

                let speed = ((v_ew * v_ew + v_ns * v_ns) as f64).sqrt() as f32;
                let mut track = (v_ew as f64).atan2(v_ns as f64).to_degrees() as f32;
                if track < 0.0 {
                    track += 360.0;
                }

                aircraft.ground_speed_kts = Some(speed);
                aircraft.track_deg = Some(track);
            }
        }
        3 | 4 => {
            // Airspeed and heading; heading stands in for track
            let hdg_avail = ((msg[5] >> 2) & 1) == 1;
            let hdg = ((msg[5] as u16 & 0x03) << 8) | msg[6] as u16;

            if hdg_avail {
                aircraft.track_deg = Some(hdg as f32 * 360.0 / 1024.0);
            }

            let airspeed = ((msg[7] as u16 & 0x7F) << 3) | ((msg[8] >> 5) as u16 & 0x07);
            if airspeed > 0 {
                let multiplier = if subtype == 4 { 4 } else { 1 };
                aircraft.ground_speed_kts = Some(((airspeed - 1) * multiplier) as f32);
            }
        }
        _ => return,
    }

    aircraft.vertical_rate_fpm = decode_vertical_rate(msg);
}

fn decode_vertical_rate(msg: &[u8]) -> Option<i32> {
    let negative = ((msg[8] >> 3) & 1) == 1;
    let vr = ((msg[8] as i32 & 0x07) << 6) | ((msg[9] >> 2) as i32 & 0x3F);
    if vr == 0 {
        return None;
    }
    let rate = (vr - 1) * 64;
    Some(if negative { -rate } else { rate })
}
