use clap::{Parser, Subcommand};
use qcount::config::{AppConfig, ClassPreset, ClassesConfig};
use qcount::error::{Error, Result};
use qcount::frame::read_frames;
use qcount::pipeline::FlushMode;
use qcount::store::{CountStore, SqliteStore};
use qcount::{runtime, zone, ClassMap, CountAggregator, Pipeline, Tracker};

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Line crossing counter over recorded detection streams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay detection dumps and persist the counts
    Run(RunArgs),
    /// Print stored totals per location and class as JSON
    Report {
        #[arg(long, default_value = "traffic_counts.db")]
        db: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Zone configuration (JSON)
    #[arg(short, long)]
    zones: PathBuf,

    #[arg(long, default_value = "traffic_counts.db")]
    db: PathBuf,

    /// `location=path` of a detection dump, repeatable
    #[arg(short, long = "stream", value_parser = parse_stream, required = true)]
    streams: Vec<(String, PathBuf)>,

    /// Application configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// `identity`, `coco` or a JSON class map file
    #[arg(long)]
    classes: Option<String>,

    /// Seconds between flushes
    #[arg(long)]
    flush_interval: Option<f64>,

    #[arg(long, value_enum)]
    flush_mode: Option<Mode>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Inline,
    Detached,
}

fn parse_stream(s: &str) -> std::result::Result<(String, PathBuf), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid LOCATION=PATH: no `=` found in `{}`", s))?;

    let (location, path) = (s[..pos].trim(), s[pos + 1..].trim());
    if location.is_empty() || path.is_empty() {
        return Err(format!("invalid LOCATION=PATH: `{}`", s));
    }

    Ok((location.to_string(), PathBuf::from(path)))
}

fn class_map(config: &AppConfig, arg: Option<&str>) -> Result<ClassMap> {
    match arg {
        None => config.classes.build(),
        Some("identity") => ClassesConfig::Preset(ClassPreset::Identity).build(),
        Some("coco") => ClassesConfig::Preset(ClassPreset::Coco).build(),
        Some(path) => {
            let src = std::fs::read_to_string(path)
                .map_err(|e| Error::config(format!("cannot read class map `{}`: {}", path, e)))?;

            ClassMap::from_json(&src)
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(secs) = args.flush_interval {
        config.counter.flush_interval_secs = secs;
    }

    if let Some(mode) = args.flush_mode {
        config.flush_mode = match mode {
            Mode::Inline => FlushMode::Inline,
            Mode::Detached => FlushMode::Detached,
        };
    }

    let zones = zone::load_zones(&args.zones)?;
    let classes = class_map(&config, args.classes.as_deref())?;
    let store: Arc<dyn CountStore> = Arc::new(SqliteStore::open(&args.db)?);

    info!(zones = zones.len(), db = %args.db.display(), "starting");

    runtime::check_unique_locations(args.streams.iter().map(|(location, _)| location.as_str()))?;

    // every stream is set up before the first frame so config errors stop everything
    let mut streams = Vec::with_capacity(args.streams.len());
    for (location, path) in &args.streams {
        let mut counter = config.counter.clone();
        counter.location = location.clone();

        let tracker = Tracker::new(config.tracker.clone(), classes.clone())?;
        let aggregator = Arc::new(CountAggregator::open(&counter, store.clone())?);
        let pipeline = Pipeline::new(tracker, zones.clone(), aggregator, config.flush_mode)?;

        let reader = BufReader::new(File::open(path)?);
        streams.push((pipeline, read_frames(reader)));
    }

    let mut failed = None;
    for res in runtime::run_streams(streams, config.queue_size())? {
        match res {
            Ok(summary) => println!("{}", serde_json::to_string(&summary)?),
            Err(err) => {
                error!(%err, "stream failed");
                if failed.is_none() {
                    failed = Some(err);
                }
            }
        }
    }

    match failed {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn report(db: PathBuf) -> Result<()> {
    let store = SqliteStore::open(db)?;
    println!("{}", serde_json::to_string_pretty(&store.totals()?)?);

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Report { db } => report(db),
    }
}
