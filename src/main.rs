use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use rssitrack::config::Config;
use rssitrack::correction::CalibrationReport;
use rssitrack::distance::format_distance;
use rssitrack::features::FEATURE_NAMES;
use rssitrack::fingerprint;
use rssitrack::model::{ModelArtifact, RegressionEstimator, Regressor};
use rssitrack::pipeline::{Pipeline, TelemetryPayload};
use rssitrack::replay;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rssitrack")]
#[command(version = "0.1.0")]
#[command(about = "Beacon position estimation from two-scanner RSSI")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Model artifact (overrides config)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Smoothing window size (overrides config)
    #[arg(long)]
    window_size: Option<usize>,

    /// Smoothing alpha (overrides config)
    #[arg(long)]
    alpha: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Estimate a position from a single RSSI pair
    Estimate {
        /// RSSI at scanner A (dBm)
        #[arg(allow_negative_numbers = true)]
        rssi_a: i32,

        /// RSSI at scanner B (dBm)
        #[arg(allow_negative_numbers = true)]
        rssi_b: i32,
    },

    /// Replay recorded readings (JSON lines) and emit telemetry payloads
    Replay {
        /// Input file (stdin if not specified)
        input: Option<PathBuf>,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit bias-correction coefficients against a fingerprint CSV
    Calibrate {
        /// Fingerprint dataset with x_cm, y_cm, rssi_A, rssi_B columns
        data: PathBuf,
    },

    /// Show model artifact details
    Inspect,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    // Handle init command before loading config
    if matches!(cli.command, Commands::Init) {
        return handle_init(&cli.config);
    }

    // Load configuration
    let mut config = if cli.config.exists() {
        Config::load(&cli.config).context("Failed to load config")?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // Override config with CLI args
    if let Some(model) = cli.model {
        config.model.path = model.to_string_lossy().to_string();
    }
    if let Some(window_size) = cli.window_size {
        config.filter.window_size = window_size;
    }
    if let Some(alpha) = cli.alpha {
        config.filter.alpha = alpha;
    }

    // A missing or malformed artifact is fatal for every remaining command
    let artifact = Arc::new(
        ModelArtifact::load(&config.model.path).context("Failed to load model")?,
    );

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Estimate { rssi_a, rssi_b } => handle_estimate(&config, artifact, rssi_a, rssi_b),
        Commands::Replay { input, output } => handle_replay(&config, artifact, input, output),
        Commands::Calibrate { data } => handle_calibrate(&config, artifact, data),
        Commands::Inspect => handle_inspect(&artifact),
    }
}

fn handle_init(path: &Path) -> Result<()> {
    info!("Initializing rssitrack configuration...");

    Config::default().save(path)?;
    info!("Created {:?}", path);
    info!("Edit it to set the model path and correction coefficients.");

    Ok(())
}

fn handle_estimate(config: &Config, artifact: Arc<ModelArtifact>, rssi_a: i32, rssi_b: i32) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config, artifact);
    let estimate = pipeline.estimate(rssi_a, rssi_b)?;

    println!("Filtered RSSI: A={} dBm, B={} dBm", estimate.rssi_a_filtered, estimate.rssi_b_filtered);
    println!(
        "Distances:     A={}, B={}",
        format_distance(estimate.distance_a),
        format_distance(estimate.distance_b)
    );
    println!("Position:      ({:5.1}, {:5.1}) cm", estimate.x * 100.0, estimate.y * 100.0);

    let payload = TelemetryPayload::new(&estimate, None, None);
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn handle_replay(
    config: &Config,
    artifact: Arc<ModelArtifact>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config, artifact);

    let writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?,
        ),
        None => Box::new(io::stdout()),
    };

    let summary = match &input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open input file: {:?}", path))?;
            replay::run(&mut pipeline, &config.screening, BufReader::new(file), writer)?
        }
        None => replay::run(&mut pipeline, &config.screening, io::stdin().lock(), writer)?,
    };

    replay::write_summary(io::stderr(), &summary)
}

fn handle_calibrate(config: &Config, artifact: Arc<ModelArtifact>, data: PathBuf) -> Result<()> {
    let fingerprints = fingerprint::load(&data)?;
    let estimator = RegressionEstimator::with_artifact(artifact);

    let (predicted, truth) = fingerprint::predict_all(&estimator, &fingerprints, &config.distance)?;
    let report = CalibrationReport::build(&predicted, &truth)
        .context("Fingerprint dataset has no rows")?;

    println!("Correction coefficients (x_corr = a * x_pred + b, in cm):");
    println!("{}", serde_json::to_string_pretty(&report.coefficients)?);
    println!();
    println!("Before correction:");
    println!("  Mean error   : {:.2} cm", report.before.mean_cm);
    println!("  Median error : {:.2} cm", report.before.median_cm);
    println!("  Max error    : {:.2} cm", report.before.max_cm);
    println!("After correction:");
    println!("  Mean error   : {:.2} cm", report.after.mean_cm);
    println!("  Median error : {:.2} cm", report.after.median_cm);
    println!("  Max error    : {:.2} cm", report.after.max_cm);
    println!("Improvement: {:.1}%", report.improvement_percent());

    Ok(())
}

fn handle_inspect(artifact: &ModelArtifact) -> Result<()> {
    println!("Model X: {} ({})", artifact.model_type_x(), artifact.model_x().name());
    println!("Model Y: {} ({})", artifact.model_type_y(), artifact.model_y().name());
    println!("Features:");

    let scaler = artifact.scaler();
    for (index, name) in FEATURE_NAMES.iter().enumerate() {
        match (scaler.mean.get(index), scaler.scale.get(index)) {
            (Some(mean), Some(scale)) => {
                println!("  {:<10} mean={:>10.4} scale={:>10.4}", name, mean, scale)
            }
            _ => println!("  {:<10} (not in scaler)", name),
        }
    }
    if scaler.n_features() != FEATURE_NAMES.len() {
        println!(
            "Warning: scaler expects {} features, feature builder produces {}",
            scaler.n_features(),
            FEATURE_NAMES.len()
        );
    }

    Ok(())
}
