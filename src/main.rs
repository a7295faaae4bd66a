//! Command-line entry point for the plot-level trait-extraction pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lidar_plot::algorithm::{AlgorithmDeclarations, AlgorithmSpec, MeanValueCalculator};
use lidar_plot::config;
use lidar_plot::metadata::find_metadata_value;
use lidar_plot::pipeline::{check_continue, discover_files, perform_process, RunRequest};
use lidar_plot::plots::GeoJsonPlotSource;
use lidar_plot::writer::BackoffPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "lidar-plot",
    version = config::TRANSFORMER_VERSION,
    about = config::TRANSFORMER_DESCRIPTION
)]
struct Cli {
    /// Name of the cultivar associated with the plots
    germplasm_name: String,

    /// Capture files or directories to scan for captures
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// GeoJSON FeatureCollection with the site's plot boundaries
    #[arg(long)]
    plots: PathBuf,

    /// The path to use when generating the CSV files
    #[arg(long)]
    csv_path: Option<PathBuf>,

    /// Override to always create the Geostreams-compatible CSV file
    #[arg(long)]
    geostreams_csv: bool,

    /// Override to always create the BETYdb-compatible CSV file
    #[arg(long)]
    betydb_csv: bool,

    /// Directory clipped plot files are written under
    #[arg(long, default_value = ".")]
    working_space: PathBuf,

    /// ISO-8601 capture timestamp; read from --metadata when omitted
    #[arg(long)]
    timestamp: Option<String>,

    /// JSON metadata file searched for run details
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Site name the plot boundaries belong to
    #[arg(long, default_value = "Maricopa")]
    site: String,

    /// Sensor name recorded with each capture
    #[arg(long, default_value = config::TRANSFORMER_SENSOR)]
    sensor: String,

    /// Default EPSG code for point clouds without an embedded CRS
    #[arg(long)]
    epsg: Option<i32>,

    /// JSON file of algorithm declarations (name, citation, flags) applied
    /// over the built-in mean-value calculation; the built-in declarations
    /// are used when omitted
    #[arg(long)]
    algorithm: Option<PathBuf>,
}

fn resolve_timestamp(cli: &Cli) -> Option<String> {
    if let Some(timestamp) = &cli.timestamp {
        return Some(timestamp.clone());
    }
    let metadata_path = cli.metadata.as_ref()?;
    let text = std::fs::read_to_string(metadata_path).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&text).ok()?;
    let found = find_metadata_value(&[parsed], &["timestamp", "time_utc", "time"]);
    (!found.is_empty()).then_some(found)
}

fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let declarations = match &cli.algorithm {
        Some(path) => AlgorithmDeclarations::from_json_file(path)?,
        None => MeanValueCalculator::declarations(),
    };
    let spec = AlgorithmSpec::from_declarations(&declarations)?;
    info!(
        algorithm = %spec.name,
        version = %spec.version,
        "Plot level lidar algorithm"
    );

    let mut files = Vec::new();
    for input in &cli.inputs {
        if input.is_dir() {
            files.extend(discover_files(input));
        } else {
            files.push(input.clone());
        }
    }

    if let Err(e) = check_continue(&files) {
        error!(error = %e, "Pre-flight check failed");
        return Ok(lidar_plot::pipeline::ERROR_CODE_NO_INPUT);
    }

    let Some(timestamp) = resolve_timestamp(&cli) else {
        return Err("no --timestamp given and none found in --metadata".into());
    };

    std::fs::create_dir_all(&cli.working_space)?;
    let request = RunRequest {
        timestamp,
        site: cli.site.clone(),
        germplasm_name: cli.germplasm_name.clone(),
        files,
        working_dir: cli.working_space.clone(),
        sensor: cli.sensor.clone(),
        default_epsg: cli.epsg,
        csv_path: cli.csv_path.clone(),
        force_geostreams: cli.geostreams_csv,
        force_betydb: cli.betydb_csv,
    };

    let plot_source = GeoJsonPlotSource::new(&cli.plots);
    let mut policy = BackoffPolicy::from_entropy();
    let summary = perform_process(&request, &spec, &MeanValueCalculator, &plot_source, &mut policy);

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary.code)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => {
            error!(code, "Run finished with a failure code");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Run aborted");
            ExitCode::FAILURE
        }
    }
}
