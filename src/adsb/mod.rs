//! Decoder message parsing
//!
//! Every supported dump1090 output is reduced to [`AircraftData`]
//! observations; deciding whether one is a usable position report happens
//! later, in the ingestor.

mod cpr;
mod crc;
pub mod json;
pub mod parser;
pub mod sbs;
mod types;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use cpr::CprContext;
pub use json::parse_aircraft_json;
pub use parser::{parse_avr_line, parse_message, ParseError};
pub use sbs::parse_sbs_line;
pub use types::AircraftData;

/// Which dump1090 output the input is in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// SBS-1 / BaseStation text, one message per line (port 30003)
    #[default]
    Sbs,
    /// AVR raw frames, `*hex;` per line (port 30002)
    Raw,
    /// `aircraft.json` snapshots
    Json,
}

impl InputFormat {
    /// Line oriented formats are read one line at a time, the rest as documents
    pub fn is_line_oriented(self) -> bool {
        !matches!(self, Self::Json)
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sbs => "sbs",
            Self::Raw => "raw",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}
