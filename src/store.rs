//! On-disk registry shared by the ingest and export stages
//!
//! The file is a single JSON document:
//! `{"version": 1, "receiver": {"lat": .., "lon": ..} | null, "aircraft": {id: record}}`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::atomic::write_atomically;
use crate::geo::Receiver;
use crate::registry::AircraftRegistry;

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unsupported store version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Malformed store file: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    receiver: Option<Receiver>,
    aircraft: &'a AircraftRegistry,
}

#[derive(Deserialize)]
struct StoreFile {
    #[serde(default)]
    receiver: Option<Receiver>,
    #[serde(default)]
    aircraft: AircraftRegistry,
}

/// Registry persistence at a fixed path
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    receiver: Option<Receiver>,
}

impl Store {
    pub fn new(path: PathBuf, receiver: Option<Receiver>) -> Self {
        Self { path, receiver }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry, starting empty when the file does not exist yet.
    ///
    /// Without a configured receiver the stored one is adopted, so saving
    /// does not erase it.
    pub fn load(&mut self) -> Result<AircraftRegistry> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No store at {}, starting empty", self.path.display());
                return Ok(AircraftRegistry::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let file = decode(&text).with_context(|| format!("Failed to load {}", self.path.display()))?;

        match (file.receiver, self.receiver) {
            (Some(stored), None) => {
                debug!("Keeping stored receiver {:.4},{:.4}", stored.lat, stored.lon);
                self.receiver = Some(stored);
            }
            (Some(stored), Some(current)) if stored != current => {
                warn!(
                    "Store {} was built for receiver {:.4},{:.4}; distances were not recomputed for {:.4},{:.4}",
                    self.path.display(),
                    stored.lat,
                    stored.lon,
                    current.lat,
                    current.lon
                );
            }
            _ => {}
        }

        info!("Loaded {} from {}", file.aircraft, self.path.display());
        Ok(file.aircraft)
    }

    /// Write the whole registry, replacing the previous file atomically
    pub fn save(&self, registry: &AircraftRegistry) -> Result<()> {
        let file = StoreFileRef {
            version: STORE_VERSION,
            receiver: self.receiver,
            aircraft: registry,
        };
        write_atomically(&self.path, |w| {
            serde_json::to_writer_pretty(&mut *w, &file)?;
            w.write_all(b"\n")?;
            Ok(())
        })
        .with_context(|| format!("Failed to save {}", self.path.display()))?;
        debug!("Saved {} aircraft to {}", registry.len(), self.path.display());
        Ok(())
    }
}

fn decode(text: &str) -> Result<StoreFile, StoreError> {
    // Check the version before the body so a future layout reports clearly
    #[derive(Deserialize)]
    struct Header {
        version: u32,
    }
    let header: Header = serde_json::from_str(text)?;
    if header.version != STORE_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: header.version,
            expected: STORE_VERSION,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::report;

    fn receiver() -> Option<Receiver> {
        Receiver::new(51.5, -0.1)
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path().join("register.json"), receiver());

        let mut registry = AircraftRegistry::new();
        registry.upsert(report("4840D6", 10.0, 0));
        let mut further = report("4840D6", 42.5, 30);
        further.callsign = Some("KLM1023".to_string());
        further.altitude_ft = Some(37000);
        registry.upsert(further);
        registry.upsert(report("4CA2D6", 7.25, 10));

        store.save(&registry).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(
            loaded.get("4840D6").unwrap().first_seen,
            report("4840D6", 10.0, 0).timestamp
        );
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path().join("absent.json"), None);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register.json");
        fs::write(&path, r#"{"version": 2, "receiver": null, "aircraft": {}}"#).unwrap();

        let err = Store::new(path, None).load().unwrap_err();
        let store_err = err.downcast_ref::<StoreError>().unwrap();
        assert!(matches!(
            store_err,
            StoreError::UnsupportedVersion { found: 2, .. }
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Store::new(path, None).load().is_err());
    }

    #[test]
    fn test_other_receiver_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register.json");
        let mut registry = AircraftRegistry::new();
        registry.upsert(report("4840D6", 10.0, 0));
        Store::new(path.clone(), receiver()).save(&registry).unwrap();

        let mut elsewhere = Store::new(path, Receiver::new(48.0, 2.0));
        assert_eq!(elsewhere.load().unwrap(), registry);
    }

    #[test]
    fn test_save_without_receiver_keeps_stored_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register.json");
        let mut registry = AircraftRegistry::new();
        registry.upsert(report("4840D6", 10.0, 0));
        Store::new(path.clone(), receiver()).save(&registry).unwrap();

        let mut anonymous = Store::new(path.clone(), None);
        let mut loaded = anonymous.load().unwrap();
        loaded.upsert(report("4CA2D6", 20.0, 5));
        anonymous.save(&loaded).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["receiver"]["lat"], 51.5);
        assert_eq!(doc["receiver"]["lon"], -0.1);
        assert_eq!(doc["aircraft"].as_object().unwrap().len(), 2);
    }
}
