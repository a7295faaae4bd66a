//! Plot boundary resolution.
//!
//! Field plots are named polygons valid for a site and date. The pipeline
//! only depends on the [`PlotSource`] contract; the concrete implementation
//! shipped here reads a GeoJSON FeatureCollection exported from the plot
//! management system, with one feature per plot keyed by a name property.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use geo::Polygon;
use geojson::{GeoJson, Value as GeoValue};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::geometry::projection::Reprojection;
use crate::geometry::ring_to_polygon;

/// The CRS plot boundaries are published in.
pub const PLOT_SOURCE_EPSG: i32 = 4326;

/// Provider of plot boundary polygons for a site and date.
///
/// The returned mapping is keyed by unique plot name; each polygon is a
/// simple ring in [`PLOT_SOURCE_EPSG`].
pub trait PlotSource {
    /// Fetch all plot boundaries known for `date` (YYYY-MM-DD) at `site`.
    ///
    /// # Errors
    /// Returns an error when the underlying boundary store cannot be read.
    fn site_boundaries(
        &self,
        date: &str,
        site: &str,
    ) -> Result<BTreeMap<String, Polygon<f64>>, PipelineError>;
}

/// Plot boundaries read from a GeoJSON FeatureCollection on disk.
///
/// The file is expected to already be the site/date slice of the plot
/// database; the lookup parameters are logged for traceability only.
pub struct GeoJsonPlotSource {
    path: PathBuf,
    name_property: String,
}

impl GeoJsonPlotSource {
    /// Create a source reading `path`, keying plots by the `plot_name`
    /// feature property.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name_property: "plot_name".to_string(),
        }
    }

    /// Use a different feature property as the plot name.
    #[must_use]
    pub fn with_name_property(mut self, property: &str) -> Self {
        self.name_property = property.to_string();
        self
    }
}

impl PlotSource for GeoJsonPlotSource {
    fn site_boundaries(
        &self,
        date: &str,
        site: &str,
    ) -> Result<BTreeMap<String, Polygon<f64>>, PipelineError> {
        debug!(path = %self.path.display(), date, site, "Loading plot boundaries");

        let text = fs::read_to_string(&self.path)?;
        let geojson: GeoJson = text
            .parse()
            .map_err(|e| PipelineError::Config(format!("invalid plot GeoJSON: {e}")))?;

        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(PipelineError::Config(
                "plot boundary file is not a FeatureCollection".to_string(),
            ));
        };

        let mut plots = BTreeMap::new();
        for feature in collection.features {
            let Some(name) = feature
                .properties
                .as_ref()
                .and_then(|p| p.get(&self.name_property))
                .and_then(|v| v.as_str())
                .map(str::to_string)
            else {
                warn!(property = %self.name_property, "Skipping plot feature without a name");
                continue;
            };

            let Some(GeoValue::Polygon(rings)) = feature.geometry.map(|g| g.value) else {
                warn!(plot = %name, "Skipping plot feature without polygon geometry");
                continue;
            };
            let Some(exterior) = rings.first() else {
                warn!(plot = %name, "Skipping plot with empty polygon");
                continue;
            };

            let ring: Vec<(f64, f64)> = exterior
                .iter()
                .filter(|position| position.len() >= 2)
                .map(|position| (position[0], position[1]))
                .collect();
            if ring.len() < 4 {
                warn!(plot = %name, "Skipping plot with degenerate ring");
                continue;
            }

            plots.insert(name, ring_to_polygon(&ring));
        }

        debug!(count = plots.len(), "Loaded plot boundaries");
        Ok(plots)
    }
}

/// Reproject a plot polygon into a target spatial reference.
///
/// The ring keeps its point count and stays closed.
///
/// # Errors
/// Returns an error string if either CRS is unsupported or a point fails to
/// transform.
pub fn reproject_plot(
    plot: &Polygon<f64>,
    source_epsg: i32,
    target_epsg: i32,
) -> Result<Polygon<f64>, String> {
    Reprojection::new(source_epsg, target_epsg)?.polygon(plot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PLOTS_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"plot_name": "MAC Field Scanner Season 4 Range 1 Column 1"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [-111.9751, 33.0745],
                        [-111.9750, 33.0745],
                        [-111.9750, 33.0744],
                        [-111.9751, 33.0744],
                        [-111.9751, 33.0745]
                    ]]
                }
            },
            {
                "type": "Feature",
                "properties": {"other": "unnamed"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]
                }
            }
        ]
    }"#;

    fn write_plots(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots.geojson");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_loads_named_plots_and_skips_unnamed() {
        let (_dir, path) = write_plots(PLOTS_GEOJSON);
        let plots = GeoJsonPlotSource::new(&path)
            .site_boundaries("2017-06-28", "Maricopa")
            .unwrap();

        assert_eq!(plots.len(), 1);
        let poly = plots
            .get("MAC Field Scanner Season 4 Range 1 Column 1")
            .unwrap();
        assert_eq!(poly.exterior().coords().count(), 5);
    }

    #[test]
    fn test_non_collection_is_config_error() {
        let (_dir, path) = write_plots(r#"{"type": "Feature", "properties": {}, "geometry": null}"#);
        let err = GeoJsonPlotSource::new(&path)
            .site_boundaries("2017-06-28", "Maricopa")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = GeoJsonPlotSource::new("/nonexistent/plots.geojson")
            .site_boundaries("2017-06-28", "Maricopa")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_reproject_plot_preserves_ring_shape() {
        let plot = ring_to_polygon(&[
            (-111.9751, 33.0745),
            (-111.9750, 33.0745),
            (-111.9750, 33.0744),
            (-111.9751, 33.0744),
        ]);
        let n = plot.exterior().coords().count();
        let projected = reproject_plot(&plot, PLOT_SOURCE_EPSG, 32612).unwrap();
        assert_eq!(projected.exterior().coords().count(), n);
    }
}
