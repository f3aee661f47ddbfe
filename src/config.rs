//! Configuration loaded from a TOML file and `ADSB_*` environment variables
//!
//! Precedence, lowest first: built-in defaults, the file, the environment.
//! Command line flags are applied on top by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ::config::{Config, Environment, File, FileFormat, Map};
use serde::Deserialize;
use tracing::debug;

use crate::adsb::InputFormat;
use crate::geo::Receiver;
use crate::lookup::DEFAULT_LOOKUP_URL;

/// Used when no `-c` is given, if it exists
pub const DEFAULT_CONFIG_FILE: &str = "adsb-register.toml";

const ENV_PREFIX: &str = "ADSB";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Receiver antenna latitude
    pub receiver_lat: Option<f64>,

    /// Receiver antenna longitude
    pub receiver_lon: Option<f64>,

    /// `-`, a file, `tcp://host:port`, `exec:program args` or an http(s) URL
    pub source: String,

    /// Decoder output format
    pub format: InputFormat,

    /// Registry store between ingest and export
    pub store: PathBuf,

    /// CSV destination
    pub output: PathBuf,

    /// aircraft.json positions older than this are ignored
    pub max_position_age_secs: f64,

    /// aircraft.json polling interval over http
    pub poll_interval_ms: u64,

    /// Store save interval while ingesting, 0 disables
    pub checkpoint_secs: u64,

    /// Metadata of aircraft silent for this long is dropped
    pub tracker_timeout_secs: u64,

    /// Look up registration details of new aircraft
    pub lookup_aircraft: bool,

    /// Lookup service, queried as `<lookup_url>/<aircraft id>`
    pub lookup_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            receiver_lat: None,
            receiver_lon: None,
            source: "-".to_string(),
            format: InputFormat::Sbs,
            store: PathBuf::from("aircraft_register.json"),
            output: PathBuf::from("aircraft_register.csv"),
            max_position_age_secs: 60.0,
            poll_interval_ms: 1000,
            checkpoint_secs: 30,
            tracker_timeout_secs: 60,
            lookup_aircraft: false,
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
        }
    }
}

impl Settings {
    /// Load from `file` (required) or the default file (optional), then the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// `env` replaces the process environment when given
    fn load_from(file: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let (path, required) = match file {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };
        debug!("Configuration file: {} (required: {})", path.display(), required);

        let settings = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read configuration {}", path.display()))?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;

        Ok(settings)
    }

    /// The receiver position, if both coordinates are set and valid
    pub fn receiver(&self) -> Result<Option<Receiver>> {
        match (self.receiver_lat, self.receiver_lon) {
            (None, None) => Ok(None),
            (Some(lat), Some(lon)) => match Receiver::new(lat, lon) {
                Some(rx) => Ok(Some(rx)),
                None => bail!("Receiver position {}, {} is out of range", lat, lon),
            },
            _ => bail!("receiver_lat and receiver_lon must be given together"),
        }
    }

    pub fn checkpoint(&self) -> Option<Duration> {
        (self.checkpoint_secs > 0).then(|| Duration::from_secs(self.checkpoint_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn env(vars: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        // An absent optional file is fine
        let settings = Settings::load_from(None, env(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.receiver().unwrap(), None);
        assert_eq!(settings.checkpoint(), Some(Duration::from_secs(30)));

        // A named file must exist
        let missing = dir.path().join("nope.toml");
        assert!(Settings::load_from(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_file_then_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adsb.toml");
        fs::write(
            &path,
            r#"
receiver_lat = 51
receiver_lon = -0.5
format = "raw"
source = "tcp://localhost:30002"
checkpoint_secs = 0
"#,
        )
        .unwrap();

        let settings = Settings::load_from(
            Some(&path),
            env(&[
                ("ADSB_RECEIVER_LAT", "52.25"),
                ("ADSB_STORE", "/tmp/r.json"),
                ("ADSB_LOOKUP_AIRCRAFT", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.receiver_lat, Some(52.25));
        assert_eq!(settings.receiver_lon, Some(-0.5));
        assert_eq!(settings.format, InputFormat::Raw);
        assert_eq!(settings.source, "tcp://localhost:30002");
        assert_eq!(settings.store, PathBuf::from("/tmp/r.json"));
        assert_eq!(settings.output, PathBuf::from("aircraft_register.csv"));
        assert_eq!(settings.checkpoint(), None);
        assert!(settings.lookup_aircraft);
        assert_eq!(settings.lookup_url, "https://hexdb.io/api/v1/aircraft");
        assert_eq!(
            settings.receiver().unwrap(),
            Receiver::new(52.25, -0.5)
        );
    }

    #[test]
    fn test_bad_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adsb.toml");
        fs::write(&path, "format = \"beast\"\n").unwrap();
        assert!(Settings::load_from(Some(&path), env(&[])).is_err());
    }

    #[test]
    fn test_receiver_validation() {
        let mut settings = Settings {
            receiver_lat: Some(51.5),
            ..Settings::default()
        };
        assert!(settings.receiver().is_err());

        settings.receiver_lon = Some(200.0);
        assert!(settings.receiver().is_err());

        settings.receiver_lon = Some(-0.1);
        assert_eq!(settings.receiver().unwrap(), Receiver::new(51.5, -0.1));
    }
}
