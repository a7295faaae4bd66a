//! Coordinate types shared across the pipeline.
//!
//! A capture's footprint is an axis-aligned [`BoundingBox`] in the capture's
//! native CRS; plot boundaries are [`geo::Polygon`] rings. This module holds
//! the conversions between the two.

pub mod projection;

use geo::{LineString, Polygon};

/// The latitude/longitude CRS every output row is expressed in.
pub const LAT_LON_EPSG_CODE: i32 = 4326;

/// Axis-aligned bounding box in a coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    /// Build from `(min_y, max_y, min_x, max_x)` extents, the order sensor
    /// footprints are reported in.
    #[must_use]
    pub fn from_extents(min_y: f64, max_y: f64, min_x: f64, max_x: f64) -> Self {
        Self {
            minx: min_x,
            miny: min_y,
            maxx: max_x,
            maxy: max_y,
        }
    }

    /// True when every coordinate is a usable number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.minx.is_finite() && self.miny.is_finite() && self.maxx.is_finite() && self.maxy.is_finite()
    }

    /// Corner ring in drawing order: upper-left, upper-right, lower-right,
    /// lower-left, and the closing point.
    #[must_use]
    pub fn corner_ring(&self) -> Vec<(f64, f64)> {
        vec![
            (self.minx, self.maxy),
            (self.maxx, self.maxy),
            (self.maxx, self.miny),
            (self.minx, self.miny),
            (self.minx, self.maxy),
        ]
    }

    /// The footprint as a closed polygon.
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        ring_to_polygon(&self.corner_ring())
    }
}

/// Build a polygon from an ordered coordinate ring.
///
/// The ring does not need to repeat its first point; [`geo`] closes the
/// exterior automatically.
#[must_use]
pub fn ring_to_polygon(ring: &[(f64, f64)]) -> Polygon<f64> {
    Polygon::new(LineString::from(ring.to_vec()), vec![])
}

/// Extract the exterior ring of a polygon as coordinate pairs, closing point
/// included.
#[must_use]
pub fn polygon_ring(polygon: &Polygon<f64>) -> Vec<(f64, f64)> {
    polygon.exterior().coords().map(|c| (c.x, c.y)).collect()
}

/// Axis-aligned bounds of a polygon's exterior ring.
#[must_use]
pub fn polygon_bounds(polygon: &Polygon<f64>) -> BoundingBox {
    let mut minx = f64::INFINITY;
    let mut miny = f64::INFINITY;
    let mut maxx = f64::NEG_INFINITY;
    let mut maxy = f64::NEG_INFINITY;
    for c in polygon.exterior().coords() {
        minx = minx.min(c.x);
        miny = miny.min(c.y);
        maxx = maxx.max(c.x);
        maxy = maxy.max(c.y);
    }
    BoundingBox::new(minx, miny, maxx, maxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    #[test]
    fn test_from_extents_axis_order() {
        let bounds = BoundingBox::from_extents(0.0, 10.0, 2.0, 8.0);
        assert_eq!(bounds.miny, 0.0);
        assert_eq!(bounds.maxy, 10.0);
        assert_eq!(bounds.minx, 2.0);
        assert_eq!(bounds.maxx, 8.0);
    }

    #[test]
    fn test_corner_ring_is_closed() {
        let ring = BoundingBox::new(0.0, 0.0, 4.0, 2.0).corner_ring();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        // Upper-left first
        assert_eq!(ring[0], (0.0, 2.0));
    }

    #[test]
    fn test_to_polygon_area() {
        let poly = BoundingBox::new(0.0, 0.0, 4.0, 2.0).to_polygon();
        assert!((poly.unsigned_area() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_bounds_roundtrip() {
        let bounds = BoundingBox::new(1.0, 2.0, 5.0, 7.0);
        let recovered = polygon_bounds(&bounds.to_polygon());
        assert_eq!(bounds, recovered);
    }

    #[test]
    fn test_non_finite_bounds_detected() {
        let bounds = BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0);
        assert!(!bounds.is_finite());
    }
}
