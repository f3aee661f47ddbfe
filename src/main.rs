//! ADS-B Register - furthest position per aircraft
//!
//! Reads dump1090 output (SBS, AVR raw frames or aircraft.json), keeps the
//! report furthest from the receiver for every aircraft, and exports the
//! register to CSV.

mod adsb;
mod aircraft_tracker;
mod atomic;
mod config;
mod export;
mod geo;
mod ingest;
mod lookup;
mod registry;
mod source;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{crate_description, crate_name, crate_version, ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::adsb::InputFormat;
use crate::config::Settings;
use crate::ingest::{Ingestor, RunOptions};
use crate::lookup::AircraftLookup;
use crate::registry::AircraftRegistry;
use crate::source::{Source, SourceSpec};
use crate::store::Store;

#[derive(Debug, Parser)]
#[command(name = crate_name!(), about = crate_description!(), version = crate_version!())]
struct Opts {
    /// Configuration file (default: adsb-register.toml if present)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    /// More logging, repeat for more
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    /// Read decoder output into the registry store
    Ingest(IngestOpts),
    /// Write the registry store as CSV
    Export(ExportOpts),
}

#[derive(Debug, Args)]
struct IngestOpts {
    /// `-`, a file, tcp://host:port, exec:program args, or an http(s) URL
    #[arg(short = 's', long)]
    source: Option<String>,
    /// Decoder output format
    #[arg(short = 'f', long, value_enum)]
    format: Option<InputFormat>,
    /// Receiver latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    receiver_lat: Option<f64>,
    /// Receiver longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    receiver_lon: Option<f64>,
    /// Registry store file
    #[arg(long)]
    store: Option<PathBuf>,
    /// Ignore any existing store and start empty
    #[arg(long)]
    fresh: bool,
    /// Stop after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
    /// Ignore aircraft.json positions older than this many seconds
    #[arg(long)]
    max_position_age: Option<f64>,
    /// Look up registration, operator and type of new aircraft
    #[arg(long)]
    lookup: bool,
}

#[derive(Debug, Args)]
struct ExportOpts {
    /// Registry store file
    #[arg(long)]
    store: Option<PathBuf>,
    /// CSV output file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose);

    let settings = Settings::load(opts.config.as_deref())?;

    match opts.subcmd {
        SubCommand::Ingest(iopts) => ingest(settings, iopts).await,
        SubCommand::Export(eopts) => export(settings, eopts),
    }
}

async fn ingest(mut settings: Settings, opts: IngestOpts) -> Result<()> {
    if let Some(source) = opts.source {
        settings.source = source;
    }
    if let Some(format) = opts.format {
        settings.format = format;
    }
    if opts.receiver_lat.is_some() {
        settings.receiver_lat = opts.receiver_lat;
    }
    if opts.receiver_lon.is_some() {
        settings.receiver_lon = opts.receiver_lon;
    }
    if let Some(store) = opts.store {
        settings.store = store;
    }
    if let Some(age) = opts.max_position_age {
        settings.max_position_age_secs = age;
    }
    if opts.lookup {
        settings.lookup_aircraft = true;
    }

    let receiver = settings.receiver()?;
    let spec: SourceSpec = settings.source.parse()?;

    info!("===========================================");
    info!("   ADS-B Register - ingest");
    info!("===========================================");
    info!("Configuration:");
    info!("  Source: {} ({})", spec, settings.format);
    match receiver {
        Some(rx) => info!("  Receiver: {:.4}, {:.4}", rx.lat, rx.lon),
        None => warn!("  Receiver: not set, only decoder supplied distances are usable"),
    }
    info!("  Store: {}", settings.store.display());
    if settings.lookup_aircraft {
        info!("  Lookup: {}", settings.lookup_url);
    }

    let mut store = Store::new(settings.store.clone(), receiver);
    let registry = if opts.fresh {
        AircraftRegistry::new()
    } else {
        store.load()?
    };

    let mut ingestor = Ingestor::new(settings.format, receiver, registry)
        .with_max_position_age(settings.max_position_age_secs)
        .with_tracker_timeout(settings.tracker_timeout_secs);
    let lookup = if settings.lookup_aircraft {
        ingestor = ingestor.with_identification();
        Some(AircraftLookup::new(&settings.lookup_url)?)
    } else {
        None
    };

    let mut source = Source::open(&spec, settings.format, settings.poll_interval()).await?;

    let options = RunOptions {
        duration: opts.duration.map(Duration::from_secs),
        checkpoint: settings.checkpoint(),
        lookup,
    };
    ingest::run(&mut ingestor, &mut source, &store, &options).await?;

    info!("Registry saved to {}", store.path().display());
    Ok(())
}

fn export(mut settings: Settings, opts: ExportOpts) -> Result<()> {
    if let Some(store) = opts.store {
        settings.store = store;
    }
    if let Some(output) = opts.output {
        settings.output = output;
    }

    let mut store = Store::new(settings.store.clone(), settings.receiver()?);
    let registry = store.load()?;
    if registry.is_empty() {
        warn!("{} holds no aircraft, writing header only", store.path().display());
    }
    export::export(&registry, &settings.output)
}
