// Copyright: ivy contributors
// Removal of the attribution is not allowed, as covered under the AGPL license

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use gtfs_structures::Gtfs;
use ivy::config::MIN_TRIP_STOPS;
use ivy::feed_archive::{output_path, write_enriched_archive};
use ivy::{OsrmClient, ShapeConfig, enrich_feed};
use tracing::info;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Adds OSRM generated shapes to the rail trips of a GTFS feed.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// GTFS feed, zipped or unpacked.
    gtfs_path: PathBuf,

    /// Base url of the OSRM server.
    #[arg(long, env = "OSRM_URL")]
    osrm_url: Option<String>,

    #[arg(long, env = "OSRM_PROFILE")]
    profile: Option<String>,

    /// Number of trips resolved at the same time.
    #[arg(long, env = "IVY_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long, env = "IVY_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Keep every n-th interior point of a shape.
    #[arg(long, env = "IVY_DECIMATION_STRIDE")]
    decimation_stride: Option<usize>,

    #[arg(long, env = "IVY_MIN_STOPS")]
    min_stops: Option<usize>,

    /// Comma separated GTFS route types to enrich.
    #[arg(long, env = "IVY_ROUTE_TYPES", value_delimiter = ',')]
    route_types: Option<Vec<i16>>,

    /// Where to write the enriched feed. Defaults to `shaped-<input>` next to
    /// the input.
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn shape_config(&self) -> ShapeConfig {
        let defaults = ShapeConfig::default();

        ShapeConfig {
            osrm_url: self.osrm_url.clone().unwrap_or(defaults.osrm_url),
            profile: self.profile.clone().unwrap_or(defaults.profile),
            request_timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency).max(1),
            decimation_stride: self
                .decimation_stride
                .unwrap_or(defaults.decimation_stride),
            min_stops: self
                .min_stops
                .unwrap_or(defaults.min_stops)
                .max(MIN_TRIP_STOPS),
            route_types: self.route_types.clone().unwrap_or(defaults.route_types),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config = args.shape_config();
    let start = Instant::now();

    let output = match &args.output {
        Some(output) => output.clone(),
        None => output_path(&args.gtfs_path, &config.output_prefix)?,
    };

    let gtfs_path = args
        .gtfs_path
        .to_str()
        .with_context(|| format!("{} is not valid utf-8", args.gtfs_path.display()))?
        .to_string();

    info!(feed = %gtfs_path, "loading feed");
    let gtfs = tokio::task::spawn_blocking(move || Gtfs::new(&gtfs_path))
        .await?
        .context("could not read gtfs feed")?;
    info!(
        routes = gtfs.routes.len(),
        trips = gtfs.trips.len(),
        stops = gtfs.stops.len(),
        elapsed = ?start.elapsed(),
        "feed loaded"
    );

    let client = OsrmClient::from_config(&config).context("could not build http client")?;
    info!(osrm_url = %config.osrm_url, profile = %config.profile, "resolving shapes");

    let enrichment = enrich_feed(&gtfs, &client, &config).await;
    drop(gtfs);

    let summary = enrichment.summary;
    info!(
        tasks = summary.tasks,
        resolved = summary.resolved,
        missing_coordinates = summary.missing_coordinates,
        no_result = summary.no_result,
        points_written = summary.points_written,
        elapsed = ?start.elapsed(),
        "shapes resolved"
    );

    let input = args.gtfs_path.clone();
    let archive_output = output.clone();
    tokio::task::spawn_blocking(move || {
        write_enriched_archive(&input, &archive_output, &enrichment.shapes)
    })
    .await?
    .with_context(|| format!("could not write {}", output.display()))?;

    info!(
        output = %output.display(),
        "execution time: {:.2}s",
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
