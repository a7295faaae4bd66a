//! Transformer identity and output-file naming.

use std::path::{Path, PathBuf};

/// The version number of the transformer.
pub const TRANSFORMER_VERSION: &str = "1.0";

/// The transformer description.
pub const TRANSFORMER_DESCRIPTION: &str = "Base for plot-level LiDAR-based algorithm transformers";

/// Short name of the transformer, used as the run-summary key.
pub const TRANSFORMER_NAME: &str = "lidar-plot-level-base";

/// The sensor associated with the transformer.
pub const TRANSFORMER_SENSOR: &str = "scanner3DTop";

/// The transformer type.
pub const TRANSFORMER_TYPE: &str = "lidar.algorithm.base";

/// Names of the files generated.
pub const FILE_NAME_CSV: &str = "lidar_plot.csv";
pub const FILE_NAME_GEO_CSV: &str = "lidar_plot_geo.csv";
pub const FILE_NAME_BETYDB_CSV: &str = "lidar_plot_betydb.csv";

/// First existing directory from an ordered candidate list, or `None`.
#[must_use]
pub fn determine_csv_path(path_list: &[Option<PathBuf>]) -> Option<PathBuf> {
    path_list
        .iter()
        .flatten()
        .find(|p| p.is_dir())
        .cloned()
}

/// The three CSV output paths under a base directory: flat CSV, geostreams
/// CSV, BETYdb CSV.
#[must_use]
pub fn csv_file_names(csv_path: &Path) -> (PathBuf, PathBuf, PathBuf) {
    (
        csv_path.join(FILE_NAME_CSV),
        csv_path.join(FILE_NAME_GEO_CSV),
        csv_path.join(FILE_NAME_BETYDB_CSV),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_csv_path_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![
            None,
            Some(PathBuf::from("/nonexistent/path")),
            Some(dir.path().to_path_buf()),
        ];
        assert_eq!(
            determine_csv_path(&candidates),
            Some(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_determine_csv_path_none_when_no_match() {
        assert_eq!(determine_csv_path(&[]), None);
        assert_eq!(
            determine_csv_path(&[Some(PathBuf::from("/nonexistent/path"))]),
            None
        );
    }

    #[test]
    fn test_csv_file_names() {
        let (csv, geo, bety) = csv_file_names(Path::new("/out"));
        assert_eq!(csv, Path::new("/out/lidar_plot.csv"));
        assert_eq!(geo, Path::new("/out/lidar_plot_geo.csv"));
        assert_eq!(bety, Path::new("/out/lidar_plot_betydb.csv"));
    }
}
