//! Plot overlap computation and capture clipping.
//!
//! Admission is decided by the fraction of a plot polygon's area that falls
//! inside a capture's rectangular footprint. Admitted rasters are cropped to
//! the plot's bounding box and rewritten as GeoTIFFs; admitted point clouds
//! are cropped by delegating to the external `pdal` tool.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::process::Command;

use geo::{Area, BooleanOps, Polygon};
use serde_json::json;
use tiff::encoder::colortype::{Gray32Float, RGB32Float, RGBA32Float};
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::geometry::projection::is_geographic_crs;
use crate::geometry::BoundingBox;
use crate::georef::raster::{
    read_raster, GeoTransform, RasterData, GEOGRAPHIC_TYPE_GEO_KEY, GEOTIFF_GEOASCIIPARAMS,
    GEOTIFF_GEOKEYDIRECTORY, GEOTIFF_MODELPIXELSCALE, GEOTIFF_MODELTIEPOINT,
    GT_MODEL_TYPE_GEO_KEY, GT_RASTER_TYPE_GEO_KEY, MODEL_TYPE_GEOGRAPHIC, MODEL_TYPE_PROJECTED,
    PROJECTED_CS_TYPE_GEO_KEY, RASTER_PIXEL_IS_AREA,
};

/// Minimum fraction of a plot's area that must fall inside a capture's
/// footprint for the plot to be processed.
pub const OVERLAP_THRESHOLD: f64 = 0.10;

/// Fraction of `plot`'s area that lies inside the capture footprint.
///
/// Always in `[0, 1]`; degenerate (zero-area) plots yield `0`.
#[must_use]
pub fn overlap_fraction(plot: &Polygon<f64>, capture: &BoundingBox) -> f64 {
    let plot_area = plot.unsigned_area();
    if plot_area <= 0.0 {
        return 0.0;
    }

    let footprint = capture.to_polygon();
    let intersection = plot.intersection(&footprint).unsigned_area();
    (intersection / plot_area).clamp(0.0, 1.0)
}

/// Whether a plot with the given overlap fraction is admitted for clipping.
#[inline]
#[must_use]
pub fn admits(fraction: f64) -> bool {
    fraction >= OVERLAP_THRESHOLD
}

/// The pixels of a clipped plot region, handed to the trait calculator.
#[derive(Debug, Clone)]
pub struct RasterWindow {
    /// Interleaved band values, row-major.
    pub pixels: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
}

/// Crop a raster capture to a clip boundary and write the result.
///
/// The clip bounds are in the raster's native CRS. The output keeps the
/// source pixel scale and CRS; its tiepoint is moved to the window origin.
/// `compress` selects LZW for the output.
///
/// Returns the clipped pixel window so the caller can run trait calculation
/// without re-reading the file it just wrote.
///
/// # Errors
/// Returns [`PipelineError::Clip`] when the source cannot be opened or
/// decoded, the clip boundary misses the raster, or the output cannot be
/// written.
pub fn clip_raster(
    capture_path: &Path,
    clip_bounds: &BoundingBox,
    out_path: &Path,
    compress: bool,
) -> Result<RasterWindow, PipelineError> {
    let raster = read_raster(capture_path).map_err(PipelineError::Clip)?;
    let (window, transform) = crop_window(&raster, clip_bounds)?;

    write_geotiff(out_path, &window, &transform, raster.epsg, compress)?;
    debug!(
        out = %out_path.display(),
        width = window.width,
        height = window.height,
        "Wrote clipped raster"
    );
    Ok(window)
}

/// Cut the pixel window covering `clip_bounds` out of a decoded raster.
fn crop_window(
    raster: &RasterData,
    clip_bounds: &BoundingBox,
) -> Result<(RasterWindow, GeoTransform), PipelineError> {
    let (pw, ph) = raster.transform.pixel_scale;
    let (ox, oy) = raster.transform.origin;

    // World -> fractional pixel coordinates, then clamp to the raster
    let col0 = ((clip_bounds.minx - ox) / pw).floor().max(0.0);
    let col1 = ((clip_bounds.maxx - ox) / pw).ceil();
    let row0 = ((oy - clip_bounds.maxy) / ph).floor().max(0.0);
    let row1 = ((oy - clip_bounds.miny) / ph).ceil();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (col0, row0) = (col0 as usize, row0 as usize);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let col1 = (col1.max(0.0) as usize).min(raster.width);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let row1 = (row1.max(0.0) as usize).min(raster.height);

    if col0 >= col1 || row0 >= row1 {
        return Err(PipelineError::Clip(
            "clip boundary does not intersect the raster".to_string(),
        ));
    }

    let width = col1 - col0;
    let height = row1 - row0;
    let bands = raster.bands;
    let mut pixels = Vec::with_capacity(width * height * bands);
    for row in row0..row1 {
        let start = (row * raster.width + col0) * bands;
        let end = start + width * bands;
        pixels.extend_from_slice(&raster.pixels[start..end]);
    }

    #[allow(clippy::cast_precision_loss)]
    let transform = GeoTransform {
        pixel_scale: (pw, ph),
        origin: (ox + col0 as f64 * pw, oy - row0 as f64 * ph),
    };

    Ok((
        RasterWindow {
            pixels,
            width,
            height,
            bands,
        },
        transform,
    ))
}

fn write_geotiff(
    out_path: &Path,
    window: &RasterWindow,
    transform: &GeoTransform,
    epsg: Option<i32>,
    compress: bool,
) -> Result<(), PipelineError> {
    let file = File::create(out_path)
        .map_err(|e| PipelineError::Clip(format!("cannot create {}: {e}", out_path.display())))?;
    let writer = BufWriter::new(file);

    let compression = if compress {
        Compression::Lzw
    } else {
        Compression::Uncompressed
    };
    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| PipelineError::Clip(format!("TIFF encoder: {e}")))?
        .with_compression(compression);

    #[allow(clippy::cast_possible_truncation)]
    let (width, height) = (window.width as u32, window.height as u32);

    let result = match window.bands {
        1 => {
            let mut image = encoder
                .new_image::<Gray32Float>(width, height)
                .map_err(|e| PipelineError::Clip(format!("TIFF image: {e}")))?;
            write_geo_tags(image.encoder(), transform, epsg)?;
            image.write_data(&window.pixels)
        }
        3 => {
            let mut image = encoder
                .new_image::<RGB32Float>(width, height)
                .map_err(|e| PipelineError::Clip(format!("TIFF image: {e}")))?;
            write_geo_tags(image.encoder(), transform, epsg)?;
            image.write_data(&window.pixels)
        }
        4 => {
            let mut image = encoder
                .new_image::<RGBA32Float>(width, height)
                .map_err(|e| PipelineError::Clip(format!("TIFF image: {e}")))?;
            write_geo_tags(image.encoder(), transform, epsg)?;
            image.write_data(&window.pixels)
        }
        n => {
            return Err(PipelineError::Clip(format!(
                "unsupported band count {n} for clipped output"
            )))
        }
    };

    result.map_err(|e| PipelineError::Clip(format!("cannot write {}: {e}", out_path.display())))
}

fn write_geo_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
    dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    transform: &GeoTransform,
    epsg: Option<i32>,
) -> Result<(), PipelineError> {
    let tag_err = |e: tiff::TiffError| PipelineError::Clip(format!("GeoTIFF tags: {e}"));

    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [transform.pixel_scale.0, transform.pixel_scale.1, 0.0];
    dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())
        .map_err(tag_err)?;

    // ModelTiepoint ties pixel (0, 0) to the window's upper-left corner
    let tiepoint = [0.0, 0.0, 0.0, transform.origin.0, transform.origin.1, 0.0];
    dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())
        .map_err(tag_err)?;

    if let Some(epsg) = epsg {
        let geographic = is_geographic_crs(epsg);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let code = epsg as u16;
        let mut keys = vec![1, 1, 0, 3];
        keys.extend_from_slice(&[
            GT_MODEL_TYPE_GEO_KEY,
            0,
            1,
            if geographic {
                MODEL_TYPE_GEOGRAPHIC
            } else {
                MODEL_TYPE_PROJECTED
            },
        ]);
        keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
        if geographic {
            keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, code]);
        } else {
            keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]);
        }
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), keys.as_slice())
            .map_err(tag_err)?;

        if let Some(proj_string) = crate::geometry::projection::get_proj_string(epsg) {
            let ascii_params = format!("{proj_string}|");
            dir.write_tag(Tag::Unknown(GEOTIFF_GEOASCIIPARAMS), ascii_params.as_bytes())
                .map_err(tag_err)?;
        }
    }

    Ok(())
}

/// Crop a LAS point cloud to a 2D axis-aligned box by running a PDAL
/// pipeline.
///
/// `clip_bounds` is `(min_x, max_x, min_y, max_y)` in the capture's native
/// CRS. A transient pipeline-description file is written next to the output
/// and removed again once the tool has run.
///
/// # Errors
/// Returns [`PipelineError::Clip`] when the pipeline file cannot be written
/// or `pdal` cannot be invoked or exits nonzero. The orchestrator logs this
/// and moves on to the next plot.
pub fn clip_point_cloud(
    capture_path: &Path,
    clip_bounds: (f64, f64, f64, f64),
    out_path: &Path,
) -> Result<(), PipelineError> {
    let (min_x, max_x, min_y, max_y) = clip_bounds;
    let bounds_spec = format!("([{min_x}, {max_x}], [{min_y}, {max_y}])");

    let pipeline = json!({
        "pipeline": [
            capture_path.to_string_lossy(),
            {
                "type": "filters.crop",
                "bounds": bounds_spec,
            },
            {
                "type": "writers.las",
                "filename": out_path.to_string_lossy(),
            }
        ]
    });

    let spec_path = out_path.with_extension("pipeline.json");
    debug!(spec = %spec_path.display(), bounds = %bounds_spec, "Writing PDAL pipeline spec");
    std::fs::write(&spec_path, pipeline.to_string())
        .map_err(|e| PipelineError::Clip(format!("cannot write pipeline spec: {e}")))?;

    let status = Command::new("pdal")
        .arg("pipeline")
        .arg(&spec_path)
        .status();

    // The spec file is transient regardless of how the tool fared
    if let Err(e) = std::fs::remove_file(&spec_path) {
        warn!(spec = %spec_path.display(), error = %e, "Unable to remove pipeline spec");
    }

    match status {
        Ok(code) if code.success() => Ok(()),
        Ok(code) => Err(PipelineError::Clip(format!(
            "pdal pipeline exited with {code} for {}",
            capture_path.display()
        ))),
        Err(e) => Err(PipelineError::Clip(format!("cannot invoke pdal: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::geometry::ring_to_polygon;

    fn unit_plot() -> Polygon<f64> {
        ring_to_polygon(&[(1.0, 1.0), (1.0, 2.0), (2.0, 2.0), (2.0, 1.0), (1.0, 1.0)])
    }

    #[test]
    fn test_fully_contained_plot_overlaps_completely() {
        // Footprint (min_y, max_y, min_x, max_x) = [0, 10, 0, 10]
        let capture = BoundingBox::from_extents(0.0, 10.0, 0.0, 10.0);
        let fraction = overlap_fraction(&unit_plot(), &capture);
        assert_relative_eq!(fraction, 1.0, epsilon = 1e-6);
        assert!(admits(fraction));
    }

    #[test]
    fn test_disjoint_plot_has_zero_overlap() {
        let capture = BoundingBox::new(100.0, 100.0, 110.0, 110.0);
        let fraction = overlap_fraction(&unit_plot(), &capture);
        assert!(fraction.abs() < 1e-12);
        assert!(!admits(fraction));
    }

    #[test]
    fn test_partial_overlap_fraction() {
        // Capture covers the left half of the unit plot
        let capture = BoundingBox::new(0.0, 0.0, 1.5, 10.0);
        let fraction = overlap_fraction(&unit_plot(), &capture);
        assert_relative_eq!(fraction, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_admission_boundary_is_inclusive() {
        assert!(admits(0.10));
        assert!(!admits(0.099_999));
        assert!(admits(0.11));
    }

    #[test]
    fn test_degenerate_plot_is_rejected() {
        let line = ring_to_polygon(&[(0.0, 0.0), (5.0, 0.0), (0.0, 0.0)]);
        let capture = BoundingBox::new(-10.0, -10.0, 10.0, 10.0);
        assert_eq!(overlap_fraction(&line, &capture), 0.0);
    }

    #[test]
    fn test_crop_window_extracts_expected_pixels() {
        // 4x4 single-band raster, 1 unit per pixel, origin (0, 4)
        let raster = RasterData {
            pixels: (0u8..16).map(f32::from).collect(),
            width: 4,
            height: 4,
            bands: 1,
            transform: GeoTransform {
                pixel_scale: (1.0, 1.0),
                origin: (0.0, 4.0),
            },
            epsg: Some(32612),
        };

        // World box covering pixel columns 1..3, rows 1..3
        let clip = BoundingBox::new(1.0, 1.0, 3.0, 3.0);
        let (window, transform) = crop_window(&raster, &clip).unwrap();

        assert_eq!(window.width, 2);
        assert_eq!(window.height, 2);
        assert_eq!(window.pixels, vec![5.0, 6.0, 9.0, 10.0]);
        assert_eq!(transform.origin, (1.0, 3.0));
    }

    #[test]
    fn test_crop_window_outside_raster_is_clip_error() {
        let raster = RasterData {
            pixels: vec![0.0; 16],
            width: 4,
            height: 4,
            bands: 1,
            transform: GeoTransform {
                pixel_scale: (1.0, 1.0),
                origin: (0.0, 4.0),
            },
            epsg: None,
        };
        let clip = BoundingBox::new(100.0, 100.0, 110.0, 110.0);
        assert!(matches!(
            crop_window(&raster, &clip),
            Err(PipelineError::Clip(_))
        ));
    }

    #[test]
    fn test_clip_raster_unreadable_source_is_clip_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.tif");
        let err = clip_raster(
            Path::new("/nonexistent/capture.tif"),
            &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            &out,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Clip(_)));
    }
}
