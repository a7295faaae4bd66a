//! EPSG coordinate reprojection using pure Rust (proj4rs + crs-definitions).
//!
//! Plot boundaries arrive in a geographic CRS while captures carry whatever
//! projected CRS the sensor was surveyed in, so every overlap test starts
//! with a reprojection. A [`Reprojection`] is built once per (source, target)
//! pair and reused for every point of a ring.

use geo::Polygon;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::{polygon_ring, ring_to_polygon};

/// Get the PROJ4 string for an EPSG code from the crs-definitions database.
#[inline]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS.
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        // Fallback: 4326 and its neighbors are geographic
        epsg == 4326 || (4000..5000).contains(&epsg)
    }
}

/// A reusable transform between two EPSG coordinate reference systems.
///
/// proj4rs works in radians for geographic CRSs; the degree conversions on
/// both ends are handled here so callers only ever see native units.
pub struct Reprojection {
    source: Option<Proj>,
    target: Option<Proj>,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl Reprojection {
    /// Build a transform from `source_epsg` to `target_epsg`.
    ///
    /// Identical codes produce a no-op transform.
    ///
    /// # Errors
    /// Returns an error if either EPSG code is not in the crs-definitions
    /// database or its PROJ string fails to parse.
    pub fn new(source_epsg: i32, target_epsg: i32) -> Result<Self, String> {
        if source_epsg == target_epsg {
            return Ok(Self {
                source: None,
                target: None,
                source_is_geographic: false,
                target_is_geographic: false,
            });
        }

        let source_str = get_proj_string(source_epsg)
            .ok_or_else(|| format!("EPSG:{source_epsg} is not in the crs-definitions database"))?;
        let target_str = get_proj_string(target_epsg)
            .ok_or_else(|| format!("EPSG:{target_epsg} is not in the crs-definitions database"))?;

        let source = Proj::from_proj_string(source_str)
            .map_err(|e| format!("Invalid source projection EPSG:{source_epsg}: {e:?}"))?;
        let target = Proj::from_proj_string(target_str)
            .map_err(|e| format!("Invalid target projection EPSG:{target_epsg}: {e:?}"))?;

        Ok(Self {
            source: Some(source),
            target: Some(target),
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    /// Transform a single coordinate pair.
    ///
    /// # Errors
    /// Returns an error if the underlying projection transform fails.
    pub fn point(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Ok((x, y));
        };

        let (x_in, y_in) = if self.source_is_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        let mut point = (x_in, y_in, 0.0);
        transform(source, target, &mut point).map_err(|e| format!("Transform failed: {e:?}"))?;

        if self.target_is_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Transform every point of a ring, preserving point count and order.
    ///
    /// # Errors
    /// Returns an error on the first point that fails to transform.
    pub fn ring(&self, ring: &[(f64, f64)]) -> Result<Vec<(f64, f64)>, String> {
        ring.iter().map(|&(x, y)| self.point(x, y)).collect()
    }

    /// Transform a polygon's exterior ring into the target CRS.
    ///
    /// The returned polygon has the same point count as the input and stays
    /// closed.
    ///
    /// # Errors
    /// Returns an error if any ring point fails to transform.
    pub fn polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>, String> {
        let projected = self.ring(&polygon_ring(polygon))?;
        Ok(ring_to_polygon(&projected))
    }
}

/// Project a point from one CRS to another.
///
/// One-shot convenience over [`Reprojection`]; build the struct directly when
/// transforming more than a point or two.
///
/// # Errors
/// Returns an error if the EPSG code is unsupported or the transform fails.
#[inline]
pub fn project_point(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64), String> {
    Reprojection::new(source_epsg, target_epsg)?.point(x, y)
}
