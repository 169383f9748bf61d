//! PM2.5 Trainer - fits a model bundle from a historical CSV

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use pm25_core::constants::{self, DEFAULT_MODEL_VERSION};
use pm25_core::logic::features::presets;
use pm25_core::logic::model::GbmParams;
use pm25_core::{FeatureSpec, TrainingConfig, TrainingPipeline};

#[derive(Parser, Debug)]
#[command(name = "pm25-train")]
#[command(about = "Train a versioned PM2.5 model bundle from historical air-quality data")]
struct Args {
    /// Historical dataset (CSV with a header row)
    #[arg(long)]
    data: PathBuf,

    /// Shipped contract name (basic-v1, temporal-v2) or a FeatureSpec JSON file
    #[arg(long, default_value = DEFAULT_MODEL_VERSION)]
    spec: String,

    /// Publish the contract under another version name
    #[arg(long)]
    version: Option<String>,

    /// Directory receiving <version>/ bundles [default: MODEL_DIR or the platform data directory]
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Timestamp column name
    #[arg(long, default_value = constants::DEFAULT_TIMESTAMP_COLUMN)]
    timestamp_column: String,

    /// Read dates like 01/02/2024 as day/month instead of month/day
    #[arg(long)]
    day_first: bool,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value_t = constants::DEFAULT_TEST_FRACTION)]
    test_fraction: f64,

    /// Shuffle rows before splitting instead of holding out the newest
    #[arg(long)]
    shuffle: bool,

    #[arg(long, default_value_t = constants::DEFAULT_SEED)]
    seed: u64,

    #[arg(long, default_value_t = constants::DEFAULT_N_ESTIMATORS)]
    trees: usize,

    #[arg(long, default_value_t = constants::DEFAULT_LEARNING_RATE)]
    learning_rate: f64,

    #[arg(long, default_value_t = constants::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    #[arg(long, default_value_t = constants::DEFAULT_SUBSAMPLE)]
    subsample: f64,

    #[arg(long, default_value_t = constants::DEFAULT_COLSAMPLE)]
    colsample: f64,
}

fn load_spec(name: &str) -> Result<FeatureSpec> {
    if let Some(spec) = presets::by_name(name) {
        return Ok(spec?);
    }
    let path = PathBuf::from(name);
    if !path.is_file() {
        bail!("'{}' is neither a shipped contract ({}, {}) nor a file", name, presets::BASIC_V1, presets::TEMPORAL_V2);
    }
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let spec: FeatureSpec =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    spec.validate()?;
    Ok(spec)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Starting {} trainer v{}", constants::APP_NAME, constants::APP_VERSION);

    let mut spec = load_spec(&args.spec)?;
    if let Some(version) = &args.version {
        spec = spec.with_version(version)?;
    }

    let config = TrainingConfig {
        timestamp_column: args.timestamp_column,
        day_first: args.day_first,
        test_fraction: args.test_fraction,
        shuffle: args.shuffle,
        seed: args.seed,
        params: GbmParams {
            n_estimators: args.trees,
            learning_rate: args.learning_rate,
            max_depth: args.max_depth,
            subsample: args.subsample,
            colsample: args.colsample,
            seed: args.seed,
            ..GbmParams::default()
        },
        ..TrainingConfig::default()
    };

    let out_dir = args.out_dir.unwrap_or_else(constants::get_model_dir);
    let pipeline = TrainingPipeline::new(spec, config)?;
    let dataset = pipeline.read_dataset(&args.data)?;
    let report = pipeline.run(&dataset, &out_dir)?;

    log::info!("Bundle '{}' written to {}", report.version, report.bundle_dir.display());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
