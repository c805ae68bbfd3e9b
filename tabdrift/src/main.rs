//! tabdrift CLI
//!
//! # Usage
//!
//! ```bash
//! # Fit one model per seed on the train months, score the validation months
//! tabdrift train --config configs/base.toml --model gbdt --seeds 42 43 44
//!
//! # Score the saved models on the test months and sweep cost thresholds
//! tabdrift evaluate --config configs/base.toml --model gbdt
//!
//! # Reliability bins and ECE with a bootstrap interval
//! tabdrift calibrate --config configs/base.toml --model gbdt --seed 42
//!
//! # Walk-forward evaluation over every month in the processed directory
//! tabdrift rolling --config configs/base.toml --model logreg --min-train-months 3
//!
//! # Feature-group ablation
//! tabdrift ablation --config configs/base.toml --ablation configs/ablation.toml
//!
//! # Score one JSON feature row with a saved model
//! tabdrift predict --config configs/base.toml --model gbdt --input row.json
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;

use tabdrift::ablation::AblationHarness;
use tabdrift::config::{AblationConfig, EvalConfig};
use tabdrift::data::TimePartitionedStore;
use tabdrift::experiment::FixedSplitRunner;
use tabdrift::model::{model_path, FittedPipeline, ModelKind, PipelineFactory};
use tabdrift::report::{ArtifactStore, JsonlObserver, RunManifest, RunObserver};
use tabdrift::serving::ModelCache;
use tabdrift::walkforward::{summarize_windows, WalkForwardScheduler};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "tabdrift")]
#[command(about = "Walk-forward evaluation and cost-sensitive thresholds for tabular classifiers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Path to the main configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Classifier backend
    #[arg(short, long, value_enum, default_value_t = ModelKind::Gbdt)]
    model: ModelKind,

    /// Append run-tracking events to this JSONL file
    #[arg(long)]
    track: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit one model per seed and score the validation months
    Train {
        #[command(flatten)]
        common: Common,

        #[arg(long, num_args = 1.., default_values_t = vec![42u64, 43, 44])]
        seeds: Vec<u64>,
    },

    /// Score saved models on the test months
    Evaluate {
        #[command(flatten)]
        common: Common,

        #[arg(long, num_args = 1.., default_values_t = vec![42u64, 43, 44])]
        seeds: Vec<u64>,
    },

    /// Calibration report for one saved model
    Calibrate {
        #[command(flatten)]
        common: Common,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Overrides calibration.n_bins
        #[arg(long)]
        n_bins: Option<usize>,

        /// Overrides calibration.n_boot
        #[arg(long)]
        n_boot: Option<usize>,
    },

    /// Walk-forward evaluation over all available months
    Rolling {
        #[command(flatten)]
        common: Common,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Overrides rolling.min_train_months
        #[arg(long)]
        min_train_months: Option<usize>,
    },

    /// Feature-group ablation on the train/validation months
    Ablation {
        #[command(flatten)]
        common: Common,

        /// Path to the ablation configuration file
        #[arg(long)]
        ablation: PathBuf,

        #[arg(long, num_args = 1.., default_values_t = vec![42u64, 43, 44])]
        seeds: Vec<u64>,
    },

    /// Score one feature row with a saved model
    Predict {
        #[command(flatten)]
        common: Common,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// JSON object mapping feature names to values
        #[arg(long)]
        input: PathBuf,
    },
}

/// Progress bar plus optional JSONL tracking.
struct CliObserver {
    progress: ProgressBar,
    tracker: Option<JsonlObserver>,
}

impl CliObserver {
    fn new(len: u64, track: Option<&Path>) -> Result<Self> {
        let progress = ProgressBar::new(len);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );
        let tracker = track
            .map(|p| {
                JsonlObserver::open(p)
                    .with_context(|| format!("Failed to open tracking file {}", p.display()))
            })
            .transpose()?;
        Ok(Self { progress, tracker })
    }

    fn finish(&self, msg: &str) {
        self.progress.finish_with_message(msg.to_string());
    }
}

impl RunObserver for CliObserver {
    fn on_run_start(&self, name: &str, params: &Value) {
        self.progress.set_message(name.to_string());
        if let Some(t) = &self.tracker {
            t.on_run_start(name, params);
        }
    }

    fn on_metrics(&self, step: usize, metrics: &BTreeMap<String, f64>) {
        self.progress.inc(1);
        if let Some(t) = &self.tracker {
            t.on_metrics(step, metrics);
        }
    }

    fn on_run_end(&self, name: &str) {
        if let Some(t) = &self.tracker {
            t.on_run_end(name);
        }
    }
}

fn load_config(path: &Path) -> Result<EvalConfig> {
    EvalConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn write_manifest(
    config: &EvalConfig,
    command: &str,
    seeds: &[u64],
    common: &Common,
) -> Result<()> {
    let manifest = RunManifest::new(command, seeds.to_vec(), Some(common.model.name()), &common.config);
    ArtifactStore::new(&config.output.reports_dir)
        .write_manifest(&manifest)
        .context("Failed to write run manifest")?;
    Ok(())
}

fn train(common: &Common, seeds: &[u64]) -> Result<()> {
    let config = load_config(&common.config)?;
    write_manifest(&config, "train", seeds, common)?;

    let runner = FixedSplitRunner::from_config(&config, common.model);
    let observer = CliObserver::new(seeds.len() as u64, common.track.as_deref())?;
    let runs = runner
        .train(
            &config.train_buckets()?,
            &config.valid_buckets()?,
            seeds,
            Some(&observer),
        )
        .context("Training failed")?;
    observer.finish("trained");

    println!("\n{}", SEPARATOR);
    println!("VALIDATION METRICS ({})", common.model);
    println!("{}", SEPARATOR);
    for run in &runs {
        println!("seed {}: {}", run.seed, serde_json::to_string(&run.metrics)?);
    }
    Ok(())
}

fn evaluate(common: &Common, seeds: &[u64]) -> Result<()> {
    let config = load_config(&common.config)?;
    write_manifest(&config, "evaluate", seeds, common)?;

    let runner = FixedSplitRunner::from_config(&config, common.model);
    let observer = CliObserver::new(seeds.len() as u64, common.track.as_deref())?;
    let summary = runner
        .evaluate(&config.test_buckets()?, &config.costs, seeds, Some(&observer))
        .context("Evaluation failed")?;
    observer.finish("evaluated");

    println!("{}", serde_json::to_string_pretty(&summary.aggregate)?);
    Ok(())
}

fn calibrate(
    common: &Common,
    seed: u64,
    n_bins: Option<usize>,
    n_boot: Option<usize>,
) -> Result<()> {
    let mut config = load_config(&common.config)?;
    if let Some(n) = n_bins {
        config.calibration.n_bins = n;
    }
    if let Some(n) = n_boot {
        config.calibration.n_boot = n;
    }
    config.validate().context("Invalid calibration overrides")?;
    write_manifest(&config, "calibrate", &[seed], common)?;

    let runner = FixedSplitRunner::from_config(&config, common.model);
    let report = runner
        .calibrate(
            &config.test_buckets()?,
            seed,
            config.calibration.n_bins,
            &config.calibration.bootstrap(seed),
        )
        .with_context(|| format!("Calibration failed for seed {} ({})", seed, common.model))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn rolling(common: &Common, seed: u64, min_train_months: Option<usize>) -> Result<()> {
    let config = load_config(&common.config)?;
    write_manifest(&config, "rolling", &[seed], common)?;

    let min_train = min_train_months.unwrap_or(config.rolling.min_train_months);
    let store = TimePartitionedStore::new(config.parquet_source());
    let buckets = store
        .available_buckets()
        .with_context(|| format!("Failed to list {}", config.data.processed_dir.display()))?;
    info!("Found {} monthly tables", buckets.len());

    let scheduler = WalkForwardScheduler::new(config.costs.clone())
        .with_min_train(min_train)
        .with_seed(seed);
    let windows = scheduler.plan(&buckets)?;

    let factory = PipelineFactory::new(common.model, config.models.clone());
    let observer = CliObserver::new(windows.len() as u64, common.track.as_deref())?;
    let run = scheduler
        .run(&store, &buckets, &factory, Some(&observer))
        .context("Walk-forward evaluation failed")?;
    observer.finish("rolling complete");

    let summary = if run.results.is_empty() {
        BTreeMap::new()
    } else {
        summarize_windows(&run.results)?
    };
    let path = ArtifactStore::new(&config.output.reports_dir).write_rolling(&run, &summary)?;
    println!("Saved rolling metrics -> {}", path.display());
    run.ensure_complete().context("Walk-forward evaluation incomplete")?;
    Ok(())
}

fn ablation(common: &Common, ablation_path: &Path, seeds: &[u64]) -> Result<()> {
    let config = load_config(&common.config)?;
    let ablation = AblationConfig::load(ablation_path)
        .with_context(|| format!("Failed to load ablation config {}", ablation_path.display()))?;
    write_manifest(&config, "ablation", seeds, common)?;

    let store = TimePartitionedStore::new(config.parquet_source());
    let train = store.load(&config.train_buckets()?).context("Failed to load train months")?;
    let valid = store.load(&config.valid_buckets()?).context("Failed to load valid months")?;

    let factory = PipelineFactory::new(common.model, config.models.clone());
    let harness = AblationHarness::new(ablation.feature_groups.clone(), seeds.to_vec());
    let observer = CliObserver::new(
        (ablation.experiments.len() * seeds.len()) as u64,
        common.track.as_deref(),
    )?;
    let run = harness
        .run(&train, &valid, &ablation.experiments, &factory, Some(&observer))
        .context("Ablation failed")?;
    observer.finish("ablation complete");

    let store = ArtifactStore::new(&config.output.reports_dir);
    let path = store.write_ablation(&run.summaries)?;
    println!("Saved ablation summary -> {}", path.display());
    if !run.is_complete() {
        let failures = store.write_json("ablation/failures.json", &run.failures)?;
        println!("Saved {} ablation failures -> {}", run.failures.len(), failures.display());
    }
    run.ensure_complete().context("Ablation incomplete")?;
    Ok(())
}

fn predict(common: &Common, seed: u64, input: &Path) -> Result<()> {
    let config = load_config(&common.config)?;
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let row: HashMap<String, Value> =
        serde_json::from_str(&text).context("Input must be a JSON object of feature values")?;

    let models_dir = config.output.models_dir.clone();
    let cache = ModelCache::new(move |id: &str| {
        let kind = ModelKind::parse(id)?;
        FittedPipeline::load(&model_path(&models_dir, seed, kind))
    });

    let start = Instant::now();
    let prediction = cache
        .predict_one(common.model.name(), &row)
        .with_context(|| format!("Prediction failed for {} (seed {})", common.model, seed))?;
    info!("Scored in {:.2?} including model load", start.elapsed());

    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tabdrift=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train { common, seeds } => train(common, seeds),
        Commands::Evaluate { common, seeds } => evaluate(common, seeds),
        Commands::Calibrate {
            common,
            seed,
            n_bins,
            n_boot,
        } => calibrate(common, *seed, *n_bins, *n_boot),
        Commands::Rolling {
            common,
            seed,
            min_train_months,
        } => rolling(common, *seed, *min_train_months),
        Commands::Ablation {
            common,
            ablation: path,
            seeds,
        } => ablation(common, path, seeds),
        Commands::Predict {
            common,
            seed,
            input,
        } => predict(common, *seed, input),
    }
}
