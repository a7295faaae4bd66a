//! Capture georeferencing: footprints, CRS codes, and centroids.
//!
//! Raster captures carry their georeference in GeoTIFF tags
//! ([`raster::geobounds`], [`raster::epsg`]); point clouds carry theirs in
//! the LAS header ([`las::extents`]). Both surface the same
//! [`BoundingBox`](crate::geometry::BoundingBox) + EPSG pair.

pub mod las;
pub mod raster;

use std::path::Path;

use geo::{Centroid, Point};

use crate::error::PipelineError;
use crate::geometry::projection::Reprojection;
use crate::geometry::{ring_to_polygon, BoundingBox, LAT_LON_EPSG_CODE};

/// The kind of sensor capture a file holds, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Raster,
    PointCloud,
}

impl CaptureKind {
    /// Classify a path by its extension; `None` for unsupported files.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "tif" | "tiff" => Some(Self::Raster),
            "las" => Some(Self::PointCloud),
            _ => None,
        }
    }
}

/// Footprint and CRS for a capture of either kind.
///
/// Returns `None` (with the warning logged by the kind-specific reader) when
/// the file has no usable georeference.
#[must_use]
pub fn capture_extents(
    path: &Path,
    kind: CaptureKind,
    default_epsg: Option<i32>,
) -> Option<(BoundingBox, i32)> {
    match kind {
        CaptureKind::Raster => {
            let bounds = raster::geobounds(path)?;
            let epsg = raster::epsg(path).or(default_epsg)?;
            Some((bounds, epsg))
        }
        CaptureKind::PointCloud => las::extents(path, default_epsg),
    }
}

/// Compute the lat/lon centroid of a raster capture.
///
/// Builds the rectangular footprint ring (upper-left, upper-right,
/// lower-right, lower-left, closing point), reprojects it to EPSG:4326, and
/// takes the centroid.
///
/// # Errors
/// Returns [`PipelineError::Georeference`] when the file's bounds or EPSG
/// cannot be determined, or the reprojection to lat/lon fails. Fatal for
/// this one file, not for the run.
pub fn centroid_latlon(path: &Path) -> Result<Point<f64>, PipelineError> {
    let bounds = raster::geobounds(path).ok_or_else(|| {
        PipelineError::Georeference(format!("no usable bounds in {}", path.display()))
    })?;
    let epsg = raster::epsg(path).ok_or_else(|| {
        PipelineError::Georeference(format!("no EPSG code in {}", path.display()))
    })?;

    let reproj = Reprojection::new(epsg, LAT_LON_EPSG_CODE).map_err(PipelineError::Georeference)?;
    let ring = reproj
        .ring(&bounds.corner_ring())
        .map_err(PipelineError::Georeference)?;

    ring_to_polygon(&ring).centroid().ok_or_else(|| {
        PipelineError::Georeference(format!("degenerate footprint in {}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_capture_kind_from_extension() {
        assert_eq!(
            CaptureKind::from_path(Path::new("scan.tif")),
            Some(CaptureKind::Raster)
        );
        assert_eq!(
            CaptureKind::from_path(Path::new("scan.TIFF")),
            Some(CaptureKind::Raster)
        );
        assert_eq!(
            CaptureKind::from_path(Path::new("scan.las")),
            Some(CaptureKind::PointCloud)
        );
        assert_eq!(CaptureKind::from_path(Path::new("scan.jpg")), None);
        assert_eq!(CaptureKind::from_path(Path::new("scan")), None);
    }

    #[test]
    fn test_centroid_latlon_missing_file_is_georeference_error() {
        let err = centroid_latlon(&PathBuf::from("/nonexistent/scan.tif")).unwrap_err();
        assert!(matches!(err, PipelineError::Georeference(_)));
    }
}
