//! Run orchestration: discover captures, pair them with overlapping plots,
//! clip, calculate, validate, and write.
//!
//! Failures local to one capture or one plot are logged and skipped; the
//! run always completes with a [`RunSummary`], even when nothing was
//! written. Only a missing required algorithm declaration (caught before
//! this module runs) aborts a run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use geo::{Centroid, Polygon};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::algorithm::{validate_calc_value, AlgorithmSpec, PlotCalculator, TraitValue};
use crate::clip;
use crate::config;
use crate::error::PipelineError;
use crate::geometry::{polygon_bounds, BoundingBox};
use crate::georef::{capture_extents, CaptureKind};
use crate::plots::{reproject_plot, PlotSource, PLOT_SOURCE_EPSG};
use crate::tables;
use crate::writer::{write_row, BackoffPolicy};

/// Return code when no supported file is present in the input list.
pub const ERROR_CODE_NO_INPUT: i32 = -1000;

/// One discovered sensor acquisition with a usable georeference.
#[derive(Debug, Clone)]
pub struct Capture {
    pub path: PathBuf,
    pub kind: CaptureKind,
    pub sensor: String,
    pub bounds: BoundingBox,
    pub epsg: i32,
}

/// Everything one processing run needs to know.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// ISO-8601 capture timestamp for the run.
    pub timestamp: String,
    /// Site name the plot boundaries are keyed by.
    pub site: String,
    /// Cultivar/germplasm name recorded in the flat CSV.
    pub germplasm_name: String,
    /// Candidate capture files.
    pub files: Vec<PathBuf>,
    /// Directory clipped outputs (and, by default, CSVs) are written under.
    pub working_dir: PathBuf,
    /// Sensor name recorded with each capture.
    pub sensor: String,
    /// EPSG to assume for point clouds without an embedded CRS.
    pub default_epsg: Option<i32>,
    /// Optional override directory for the CSV files.
    pub csv_path: Option<PathBuf>,
    /// Force the geostreams CSV regardless of the algorithm's flag.
    pub force_geostreams: bool,
    /// Force the BETYdb CSV regardless of the algorithm's flag.
    pub force_betydb: bool,
}

/// Files produced for one plot, merged across the captures that hit it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlotClipRecord {
    pub plot_name: String,
    pub sensor: String,
    pub sources: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// Merge a clipped output into the per-plot container records.
fn record_clip(
    container: &mut Vec<PlotClipRecord>,
    plot_name: &str,
    sensor: &str,
    source: &Path,
    output: PathBuf,
) {
    if let Some(record) = container.iter_mut().find(|r| r.plot_name == plot_name) {
        if !record.sources.iter().any(|s| s == source) {
            record.sources.push(source.to_path_buf());
        }
        record.outputs.push(output);
    } else {
        container.push(PlotClipRecord {
            plot_name: plot_name.to_string(),
            sensor: sensor.to_string(),
            sources: vec![source.to_path_buf()],
            outputs: vec![output],
        });
    }
}

/// Run-level statistics, always produced, partial failure included.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub code: i32,
    pub transformer_name: String,
    pub utc_timestamp: String,
    pub processing_time: String,
    pub total_file_count: usize,
    pub processed_file_count: usize,
    pub total_plots_processed: usize,
    pub entries_written: usize,
    pub sensor: String,
    pub container: Vec<PlotClipRecord>,
}

/// Recursively discover candidate capture files under a directory.
#[must_use]
pub fn discover_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

/// Keep only files whose extension names a supported capture kind.
#[must_use]
pub fn supported_files(files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|path| CaptureKind::from_path(path).is_some())
        .cloned()
        .collect()
}

/// Pre-flight gate: at least one file must have a supported extension.
///
/// # Errors
/// Returns [`PipelineError::NoSupportedFiles`] (reported with
/// [`ERROR_CODE_NO_INPUT`]) when none does.
pub fn check_continue(files: &[PathBuf]) -> Result<(), PipelineError> {
    if supported_files(files).is_empty() {
        debug!("Image not found in list of files. Supported types are: tif, tiff, las");
        return Err(PipelineError::NoSupportedFiles(
            "unable to find an image in the list of files".to_string(),
        ));
    }
    Ok(())
}

/// Resolve the georeference of every supported file, skipping files that
/// have none.
#[must_use]
pub fn collect_captures(
    files: &[PathBuf],
    sensor: &str,
    default_epsg: Option<i32>,
) -> Vec<Capture> {
    let mut captures = Vec::new();
    for path in supported_files(files) {
        let Some(kind) = CaptureKind::from_path(&path) else {
            continue;
        };
        match capture_extents(&path, kind, default_epsg) {
            Some((bounds, epsg)) => captures.push(Capture {
                path,
                kind,
                sensor: sensor.to_string(),
                bounds,
                epsg,
            }),
            None => {
                warn!(path = %path.display(), "Skipping capture without usable georeferencing");
            }
        }
    }
    captures
}

/// Split an ISO timestamp into a date stamp (`YYYY-MM-DD`) and an
/// offset-stripped local timestamp (`YYYY-MM-DDTHH:MM:SS`).
///
/// # Errors
/// Returns [`PipelineError::Config`] when the remainder does not parse as a
/// local date-time.
pub fn split_timestamp(iso_timestamp: &str) -> Result<(String, String), PipelineError> {
    let date_sep = iso_timestamp.find('T');
    let offset_sep = iso_timestamp.rfind('-');
    let working = match (date_sep, offset_sep) {
        // A trailing negative offset sits after the date/time separator
        (Some(t), Some(off)) if t < off => &iso_timestamp[..off],
        _ => iso_timestamp,
    };

    let parsed = NaiveDateTime::parse_from_str(working, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| PipelineError::Config(format!("bad timestamp '{iso_timestamp}': {e}")))?;
    Ok((
        parsed.format("%Y-%m-%d").to_string(),
        parsed.format("%Y-%m-%dT%H:%M:%S").to_string(),
    ))
}

/// The main processing loop.
///
/// For every georeferenced capture, every plot whose overlap fraction meets
/// the admission threshold is clipped into
/// `working_dir/<plot_name>/<file_name>`. Raster clips feed the calculator
/// and produce rows in the enabled output tables; point-cloud clips are
/// recorded without trait calculation. Malformed calculator results skip the
/// rest of the current file; clip failures skip the current plot.
#[must_use]
pub fn perform_process(
    request: &RunRequest,
    spec: &AlgorithmSpec,
    calculator: &dyn PlotCalculator,
    plot_source: &dyn PlotSource,
    policy: &mut BackoffPolicy,
) -> RunSummary {
    let start = Instant::now();
    let mut summary = RunSummary {
        code: 0,
        transformer_name: config::TRANSFORMER_NAME.to_string(),
        utc_timestamp: Utc::now().to_rfc3339(),
        processing_time: String::new(),
        total_file_count: request.files.len(),
        processed_file_count: 0,
        total_plots_processed: 0,
        entries_written: 0,
        sensor: request.sensor.clone(),
        container: Vec::new(),
    };

    let captures = collect_captures(&request.files, &request.sensor, request.default_epsg);
    info!(count = captures.len(), "Found files to process");

    let datestamp = if request.timestamp.len() >= 10 {
        request.timestamp[..10].to_string()
    } else {
        request.timestamp.clone()
    };
    let (date_stamp, local_time) = match split_timestamp(&request.timestamp) {
        Ok(stamps) => stamps,
        Err(e) => {
            warn!(error = %e, "Unable to split run timestamp, using it verbatim");
            (datestamp.clone(), request.timestamp.clone())
        }
    };

    let all_plots = match plot_source.site_boundaries(&datestamp, &request.site) {
        Ok(plots) => plots,
        Err(e) => {
            error!(error = %e, "Unable to load plot boundaries");
            summary.code = -1;
            summary.processing_time = elapsed_string(start);
            return summary;
        }
    };
    debug!(count = all_plots.len(), "Have plots for site");

    let csv_dir = config::determine_csv_path(&[
        request.csv_path.clone(),
        Some(request.working_dir.clone()),
    ])
    .unwrap_or_else(|| request.working_dir.clone());
    let (csv_file, geo_file, bety_file) = config::csv_file_names(&csv_dir);

    let outputs = OutputFiles {
        csv_file,
        geo_file,
        bety_file,
        csv_header: tables::csv_header_fields(spec),
        bety_header: tables::bety_traits_table(spec).fields().to_vec(),
        geo_header: tables::geo_traits_table().fields().to_vec(),
        write_geostreams: spec.write_geostreams_csv || request.force_geostreams,
        write_betydb: spec.write_betydb_csv || request.force_betydb,
    };

    'files: for capture in &captures {
        summary.processed_file_count += 1;
        debug!(path = %capture.path.display(), bounds = ?capture.bounds, "File bounds");

        let mut overlapping = 0usize;
        for (plot_name, plot_poly) in &all_plots {
            let plot_local = match reproject_plot(plot_poly, PLOT_SOURCE_EPSG, capture.epsg) {
                Ok(p) => p,
                Err(e) => {
                    warn!(plot = %plot_name, error = %e, "Unable to reproject plot boundary");
                    continue;
                }
            };

            let fraction = clip::overlap_fraction(&plot_local, &capture.bounds);
            if !clip::admits(fraction) {
                if fraction > 0.0 {
                    info!(plot = %plot_name, fraction, "Skipping plot with too small overlap");
                }
                continue;
            }
            overlapping += 1;
            summary.total_plots_processed += 1;

            let clip_bounds = polygon_bounds(&plot_local);
            debug!(plot = %plot_name, bounds = ?clip_bounds, "Clipping out plot");

            let out_dir = request.working_dir.join(plot_name);
            if let Err(e) = std::fs::create_dir_all(&out_dir) {
                error!(dir = %out_dir.display(), error = %e, "Unable to create plot directory");
                continue;
            }
            let Some(file_name) = capture.path.file_name() else {
                continue;
            };
            let out_file = out_dir.join(file_name);

            match capture.kind {
                CaptureKind::Raster => {
                    let window =
                        match clip::clip_raster(&capture.path, &clip_bounds, &out_file, true) {
                            Ok(window) => window,
                            Err(e) => {
                                error!(plot = %plot_name, error = %e, "Raster clip failed");
                                continue;
                            }
                        };
                    record_clip(
                        &mut summary.container,
                        plot_name,
                        &capture.sensor,
                        &capture.path,
                        out_file,
                    );

                    let calc_value = match calculator.calculate(&window) {
                        Ok(value) => value,
                        Err(e) => {
                            error!(plot = %plot_name, error = %e, "Trait calculation failed");
                            continue 'files;
                        }
                    };
                    let values = match validate_calc_value(calc_value, &spec.variable_names) {
                        Ok(values) => values,
                        Err(e) => {
                            error!(plot = %plot_name, error = %e, "Calculated value rejected");
                            continue 'files;
                        }
                    };

                    summary.entries_written += write_trait_rows(
                        spec,
                        &outputs,
                        &RowContext {
                            plot_name,
                            plot_poly,
                            germplasm_name: &request.germplasm_name,
                            date_stamp: &date_stamp,
                            local_time: &local_time,
                            source: &capture.sensor,
                        },
                        &values,
                        policy,
                    );
                }
                CaptureKind::PointCloud => {
                    let bounds_tuple = (
                        clip_bounds.minx,
                        clip_bounds.maxx,
                        clip_bounds.miny,
                        clip_bounds.maxy,
                    );
                    if let Err(e) = clip::clip_point_cloud(&capture.path, bounds_tuple, &out_file) {
                        warn!(plot = %plot_name, error = %e, "Point cloud clip failed");
                        continue;
                    }
                    record_clip(
                        &mut summary.container,
                        plot_name,
                        &capture.sensor,
                        &capture.path,
                        out_file,
                    );
                }
            }
        }
        info!(
            count = overlapping,
            path = %capture.path.display(),
            "Plots intersecting file"
        );
    }

    if summary.entries_written == 0 {
        warn!("No trait entries were written for this run");
    }

    summary.processing_time = elapsed_string(start);
    summary
}

fn elapsed_string(start: Instant) -> String {
    format!("{:.3}s", start.elapsed().as_secs_f64())
}

struct OutputFiles {
    csv_file: PathBuf,
    geo_file: PathBuf,
    bety_file: PathBuf,
    csv_header: Vec<String>,
    geo_header: Vec<String>,
    bety_header: Vec<String>,
    write_geostreams: bool,
    write_betydb: bool,
}

struct RowContext<'a> {
    plot_name: &'a str,
    plot_poly: &'a Polygon<f64>,
    germplasm_name: &'a str,
    date_stamp: &'a str,
    local_time: &'a str,
    source: &'a str,
}

/// Write one plot's trait values into every enabled output table.
///
/// Returns the number of rows successfully written; write failures are
/// logged and cost only the affected record.
fn write_trait_rows(
    spec: &AlgorithmSpec,
    outputs: &OutputFiles,
    ctx: &RowContext<'_>,
    values: &[TraitValue],
    policy: &mut BackoffPolicy,
) -> usize {
    let (lat, lon) = ctx
        .plot_poly
        .centroid()
        .map_or((f64::NAN, f64::NAN), |c| (c.y(), c.x()));
    let lat_text = lat.to_string();
    let lon_text = lon.to_string();
    let mut written = 0;

    // Flat CSV: one row per plot
    let mut csv_table = tables::csv_traits_table(spec);
    csv_table.set_text("germplasmName", ctx.germplasm_name);
    csv_table.set_text("site", ctx.plot_name);
    csv_table.set_text("timestamp", ctx.date_stamp);
    csv_table.set_text("lat", lat_text.clone());
    csv_table.set_text("lon", lon_text.clone());
    for (name, value) in spec.variable_names.iter().zip(values) {
        csv_table.set(name, value.clone());
    }
    written += checked_write(&outputs.csv_file, &outputs.csv_header, &csv_table.row(), policy);

    // Geostreams CSV: one row per (plot, variable)
    if outputs.write_geostreams {
        for (name, value) in spec.variable_names.iter().zip(values) {
            let mut geo_table = tables::geo_traits_table();
            geo_table.set_text("site", ctx.plot_name);
            geo_table.set_text("trait", name.clone());
            geo_table.set_text("lat", lat_text.clone());
            geo_table.set_text("lon", lon_text.clone());
            geo_table.set_text("dp_time", ctx.local_time);
            geo_table.set_text("source", ctx.source);
            geo_table.set_text("value", value.to_string());
            geo_table.set_text("timestamp", ctx.date_stamp);
            written += checked_write(&outputs.geo_file, &outputs.geo_header, &geo_table.row(), policy);
        }
    }

    // BETYdb CSV: one row per plot
    if outputs.write_betydb {
        let mut bety_table = tables::bety_traits_table(spec);
        bety_table.set_text("local_datetime", ctx.local_time);
        bety_table.set_text("site", ctx.plot_name);
        for (name, value) in spec.variable_names.iter().zip(values) {
            bety_table.set(name, value.clone());
        }
        written += checked_write(&outputs.bety_file, &outputs.bety_header, &bety_table.row(), policy);
    }

    written
}

fn checked_write(
    path: &Path,
    header: &[String],
    row: &[String],
    policy: &mut BackoffPolicy,
) -> usize {
    match write_row(path, header, row, policy) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed writing trait record");
            0
        }
    }
}
