use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use school_buildings::config::PipelineConfig;
use school_buildings::pipeline::{Disposition, IngestionLoop};
use school_buildings::schedule::ThreadSleeper;
use school_buildings::store::{GeometryStore, Region};
use school_buildings::tiles::TilePlan;

#[derive(Parser)]
#[command(name = "clip-buildings")]
#[command(about = "Keep the buildings of downloaded tiles that stand in census blocks with schools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline settings (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory the downloader writes tiles into
    #[arg(long, global = true)]
    watch_dir: Option<PathBuf>,

    /// Output dataset (.fgb or .geojson)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// File listing the tiles already processed
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// United States census blocks with schools
    #[arg(long, global = true)]
    us_reference: Option<PathBuf>,

    /// Canada census blocks with schools
    #[arg(long, global = true)]
    canada_reference: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the tile directory and process tiles as they arrive, forever
    Run,

    /// Run a single scan of the tile directory and exit
    Once,

    /// Work out which tiles cover the reference blocks and write the download lists
    #[command(name = "plan-tiles")]
    PlanTiles(PlanTilesArgs),
}

#[derive(Args)]
struct PlanTilesArgs {
    /// Directory the tile list, mapping and rsync pattern are written to
    #[arg(long, default_value = "../outputs")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => run(config),
        Commands::Once => once(config),
        Commands::PlanTiles(args) => plan_tiles(config, &args.out_dir),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(watch_dir) = &cli.watch_dir {
        config.watch_dir = watch_dir.clone();
    }
    if let Some(output) = &cli.output {
        config.output = output.clone();
    }
    if let Some(ledger) = &cli.ledger {
        config.ledger = ledger.clone();
    }
    if let Some(us_reference) = &cli.us_reference {
        config.us_reference = us_reference.clone();
    }
    if let Some(canada_reference) = &cli.canada_reference {
        config.canada_reference = canada_reference.clone();
    }
    Ok(config)
}

fn load_store(config: &PipelineConfig) -> Result<GeometryStore> {
    log::info!("Loading census blocks");
    let mut store = GeometryStore::new();
    for region in Region::ALL {
        let path = match region {
            Region::UnitedStates => &config.us_reference,
            Region::Canada => &config.canada_reference,
        };
        store.load(region, path);
    }
    if store.is_empty() {
        bail!("No census data loaded");
    }
    Ok(store)
}

fn run(config: PipelineConfig) -> Result<()> {
    let store = load_store(&config)?;
    log::info!("Watching {}", config.watch_dir.display());
    log::info!("Output: {}", config.output.display());
    IngestionLoop::new(config, &store, ThreadSleeper).run_forever()
}

fn once(config: PipelineConfig) -> Result<()> {
    let store = load_store(&config)?;
    let mut ingestion = IngestionLoop::new(config, &store, ThreadSleeper);
    let report = ingestion.run_cycle();

    let appended: usize = report
        .tiles
        .iter()
        .map(|tile| match tile.disposition {
            Disposition::Appended { rows } => rows,
            _ => 0,
        })
        .sum();
    println!("Unprocessed tiles found: {}", report.unprocessed);
    println!(
        "Appended: {} tiles ({appended} buildings)",
        report.count(|d| matches!(d, Disposition::Appended { .. }))
    );
    println!(
        "No matches: {}",
        report.count(|d| matches!(d, Disposition::EmptyDropped))
    );
    println!(
        "Geometry errors: {}",
        report.count(|d| matches!(d, Disposition::ErrorKept(_)))
    );
    println!(
        "Write failures: {}",
        report.count(|d| matches!(d, Disposition::SinkFailed(_)))
    );
    println!(
        "Still downloading: {}",
        report.count(|d| matches!(d, Disposition::Deferred))
    );
    println!(
        "Skipped: {}",
        report.count(|d| matches!(d, Disposition::Skipped(_)))
    );
    Ok(())
}

fn plan_tiles(config: PipelineConfig, out_dir: &Path) -> Result<()> {
    let store = load_store(&config)?;
    let plan = TilePlan::from_store(&store).context("Failed to derive tiles")?;
    log::info!("Total unique tiles needed: {}", plan.len());

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let tile_list = out_dir.join("required_building_tiles_from_census.txt");
    plan.write_tile_list(BufWriter::new(create(&tile_list)?))?;
    let mapping = out_dir.join("tile_to_filename_mapping.txt");
    plan.write_mapping(BufWriter::new(create(&mapping)?))?;
    let pattern = out_dir.join("rsync_include_pattern_lod1_only.txt");
    plan.write_rsync_pattern(BufWriter::new(create(&pattern)?))?;

    println!("Tile list saved to: {}", tile_list.display());
    println!("Tile mapping saved to: {}", mapping.display());
    println!("rsync pattern saved to: {}", pattern.display());

    let estimate = plan.estimate();
    println!();
    println!("{estimate}");
    println!();
    println!("Total tiles to download: {}", plan.len());
    println!("Estimated size: {:.1} GB (average)", estimate.average_gb());
    println!("With RSYNC_PASSWORD set, run:");
    println!("  {}", TilePlan::rsync_command(&pattern));
    println!("The download can be interrupted and resumed by re-running the same command.");
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}
