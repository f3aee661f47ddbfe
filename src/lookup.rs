//! Aircraft registration lookup
//!
//! Asks a hexdb.io style service for the registration, owner and type behind
//! an ICAO address. Failures never stop ingestion; the aircraft is recorded
//! with the "Unknown" placeholders instead.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_LOOKUP_URL: &str = "https://hexdb.io/api/v1/aircraft";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const UNKNOWN_REGISTRATION: &str = "Unknown Registration";
const UNKNOWN_OPERATOR: &str = "Unknown Airline";
const UNKNOWN_TYPE: &str = "Unknown Aircraft Type";

/// Registration details of one airframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftInfo {
    pub registration: String,
    pub operator: String,
    pub aircraft_type: String,
}

impl AircraftInfo {
    pub fn unknown() -> Self {
        Self {
            registration: UNKNOWN_REGISTRATION.to_string(),
            operator: UNKNOWN_OPERATOR.to_string(),
            aircraft_type: UNKNOWN_TYPE.to_string(),
        }
    }
}

#[derive(Error, Debug)]
enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service answered {0}")]
    Status(StatusCode),
    #[error("unexpected answer: {0}")]
    Json(#[from] serde_json::Error),
}

/// The service's answer; only the fields we keep
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HexDbAircraft {
    registration: Option<String>,
    registered_owners: Option<String>,
    #[serde(rename = "Type")]
    aircraft_type: Option<String>,
}

fn or_unknown(value: Option<String>, unknown: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| unknown.to_string())
}

impl From<HexDbAircraft> for AircraftInfo {
    fn from(a: HexDbAircraft) -> Self {
        Self {
            registration: or_unknown(a.registration, UNKNOWN_REGISTRATION),
            operator: or_unknown(a.registered_owners, UNKNOWN_OPERATOR),
            aircraft_type: or_unknown(a.aircraft_type, UNKNOWN_TYPE),
        }
    }
}

/// Client for the lookup service
#[derive(Debug, Clone)]
pub struct AircraftLookup {
    http: reqwest::Client,
    base_url: String,
}

impl AircraftLookup {
    /// `base_url` is joined with `/<aircraft id>` for each request
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Registration details for `aircraft_id`, or the unknown placeholders
    pub async fn identify(&self, aircraft_id: &str) -> AircraftInfo {
        // Non-ICAO addresses are not in any registry
        if aircraft_id.starts_with('~') {
            return AircraftInfo::unknown();
        }
        match self.fetch(aircraft_id).await {
            Ok(info) => {
                debug!(
                    "{} is {} ({}, {})",
                    aircraft_id, info.registration, info.aircraft_type, info.operator
                );
                info
            }
            Err(LookupError::Status(StatusCode::NOT_FOUND)) => {
                debug!("{} is not in the aircraft database", aircraft_id);
                AircraftInfo::unknown()
            }
            Err(e) => {
                warn!("Lookup of {} failed: {}", aircraft_id, e);
                AircraftInfo::unknown()
            }
        }
    }

    async fn fetch(&self, aircraft_id: &str) -> Result<AircraftInfo, LookupError> {
        let url = format!("{}/{}", self.base_url, aircraft_id);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }
        let body = response.text().await?;
        let aircraft: HexDbAircraft = serde_json::from_str(&body)?;
        Ok(aircraft.into())
    }
}
