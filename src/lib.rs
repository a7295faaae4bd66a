//! Plot-level trait extraction for gantry LiDAR and imagery captures.
//!
//! Given geo-referenced captures and known field-plot boundary polygons,
//! the pipeline clips each capture to the plots it overlaps, runs a
//! pluggable trait-calculation algorithm over each clipped region, and
//! appends the computed traits to three CSV outputs (flat, geostreams, and
//! BETYdb layouts).
//!
//! ## Architecture
//!
//! - [`geometry`]: bounding boxes, rings, and EPSG reprojection
//! - [`georef`]: footprint/CRS extraction for GeoTIFF and LAS captures
//! - [`plots`]: plot boundary resolution ([`PlotSource`] contract)
//! - [`clip`]: overlap admission and raster/point-cloud clipping
//! - [`algorithm`]: the plug-in contract and calc-value normalization
//! - [`tables`]: the three output schemas and row assembly
//! - [`writer`]: resilient shared-file CSV appends with backoff
//! - [`metadata`]: key search over untyped capture metadata
//! - [`pipeline`]: the per-run orchestration loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use lidar_plot::algorithm::{AlgorithmSpec, MeanValueCalculator};
//! use lidar_plot::pipeline::{check_continue, perform_process, RunRequest};
//! use lidar_plot::plots::GeoJsonPlotSource;
//! use lidar_plot::writer::BackoffPolicy;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = AlgorithmSpec::from_declarations(&MeanValueCalculator::declarations())?;
//!     let request = RunRequest {
//!         timestamp: "2018-05-22T12:02:00-07:00".to_string(),
//!         site: "Maricopa".to_string(),
//!         germplasm_name: "Sorghum bicolor".to_string(),
//!         files: vec!["scan.tif".into()],
//!         working_dir: "work".into(),
//!         sensor: "scanner3DTop".to_string(),
//!         default_epsg: None,
//!         csv_path: None,
//!         force_geostreams: false,
//!         force_betydb: false,
//!     };
//!     check_continue(&request.files)?;
//!     let plots = GeoJsonPlotSource::new("plots.geojson");
//!     let mut policy = BackoffPolicy::from_entropy();
//!     let summary = perform_process(&request, &spec, &MeanValueCalculator, &plots, &mut policy);
//!     println!("wrote {} entries", summary.entries_written);
//!     Ok(())
//! }
//! ```

// ============================================================================
// Public modules
// ============================================================================

pub mod algorithm;
pub mod clip;
pub mod config;
pub mod error;
pub mod geometry;
pub mod georef;
pub mod metadata;
pub mod pipeline;
pub mod plots;
pub mod tables;
pub mod writer;

// ============================================================================
// Errors
// ============================================================================

pub use error::PipelineError;

// ============================================================================
// Geometry & Georeferencing
// ============================================================================

pub use geometry::projection::{project_point, Reprojection};
pub use geometry::{BoundingBox, LAT_LON_EPSG_CODE};
pub use georef::{capture_extents, centroid_latlon, CaptureKind};

// ============================================================================
// Plot Boundaries
// ============================================================================

pub use plots::{reproject_plot, GeoJsonPlotSource, PlotSource, PLOT_SOURCE_EPSG};

// ============================================================================
// Overlap & Clipping
// ============================================================================

pub use clip::{
    clip_point_cloud, clip_raster, overlap_fraction, RasterWindow, OVERLAP_THRESHOLD,
};

// ============================================================================
// Algorithm Contract
// ============================================================================

pub use algorithm::{
    validate_calc_value, AlgorithmDeclarations, AlgorithmSpec, CalcValue, PlotCalculator,
    TraitValue,
};

// ============================================================================
// Output
// ============================================================================

pub use writer::{write_row, BackoffPolicy, MAX_CSV_FILE_OPEN_TRIES, MAX_FILE_OPEN_SLEEP_SEC};

// ============================================================================
// Orchestration
// ============================================================================

pub use pipeline::{
    check_continue, perform_process, Capture, RunRequest, RunSummary, ERROR_CODE_NO_INPUT,
};
