//! GeoTIFF georeference extraction via the `tiff` crate.
//!
//! Bounds come from the `ModelPixelScale` (33550) and `ModelTiepoint` (33922)
//! tags; the CRS comes from the GeoKeyDirectory (34735). Extraction never
//! panics and never errors: a file without usable tags simply yields `None`,
//! which the orchestrator treats as "skip this capture".

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

use crate::geometry::BoundingBox;

// GeoTIFF tag IDs not named by the tiff crate
pub(crate) const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
pub(crate) const GEOTIFF_MODELTIEPOINT: u16 = 33922;
pub(crate) const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
pub(crate) const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;

// GeoKey IDs
pub(crate) const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
pub(crate) const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
pub(crate) const MODEL_TYPE_PROJECTED: u16 = 1;
pub(crate) const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
pub(crate) const RASTER_PIXEL_IS_AREA: u16 = 1;

/// The affine georeferencing of a raster: pixel size and the world
/// coordinate tied to pixel (0, 0).
#[derive(Debug, Clone, Copy)]
pub struct GeoTransform {
    /// Pixel width and height in world units (both positive).
    pub pixel_scale: (f64, f64),
    /// World (x, y) of the raster's upper-left corner.
    pub origin: (f64, f64),
}

impl GeoTransform {
    /// Compute the bounds of a `width` x `height` raster under this
    /// transform. North-up rasters only: y decreases with row index.
    #[must_use]
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        #[allow(clippy::cast_precision_loss)]
        let maxx = self.origin.0 + self.pixel_scale.0 * width as f64;
        #[allow(clippy::cast_precision_loss)]
        let miny = self.origin.1 - self.pixel_scale.1 * height as f64;
        BoundingBox::new(self.origin.0, miny, maxx, self.origin.1)
    }
}

/// A fully decoded raster with its georeferencing, pixels as interleaved f32.
pub struct RasterData {
    pub pixels: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    pub epsg: Option<i32>,
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    Decoder::new(BufReader::new(file)).map_err(|e| format!("not a TIFF: {e}"))
}

fn read_geo_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder
        .find_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE))
        .ok()
        .flatten()
        .and_then(|v| v.into_f64_vec().ok())
        .filter(|v| v.len() >= 2)?;
    let tie = decoder
        .find_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT))
        .ok()
        .flatten()
        .and_then(|v| v.into_f64_vec().ok())
        .filter(|v| v.len() >= 6)?;

    Some(GeoTransform {
        pixel_scale: (scale[0], scale[1]),
        origin: (tie[3], tie[4]),
    })
}

fn read_geokey_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<i32> {
    let keys = decoder
        .find_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY))
        .ok()
        .flatten()
        .and_then(|v| v.into_u16_vec().ok())?;

    // Directory header is 4 shorts, then 4-short key entries:
    // [KeyID, TIFFTagLocation, Count, ValueOffset]
    for entry in keys.get(4..)?.chunks_exact(4) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location == 0
            && (key_id == PROJECTED_CS_TYPE_GEO_KEY || key_id == GEOGRAPHIC_TYPE_GEO_KEY)
        {
            return Some(i32::from(value));
        }
    }
    None
}

/// Read the geospatial bounds of a raster file.
///
/// Returns `None` if the file cannot be opened, is not a TIFF, or carries no
/// affine transform tags. Never errors.
#[must_use]
pub fn geobounds(path: &Path) -> Option<BoundingBox> {
    let mut decoder = match open_decoder(path) {
        Ok(d) => d,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unable to open raster for bounds");
            return None;
        }
    };
    let (width, height) = decoder.dimensions().ok()?;
    let transform = read_geo_transform(&mut decoder)?;
    let bounds = transform.bounds(width as usize, height as usize);
    bounds.is_finite().then_some(bounds)
}

/// Read the EPSG authority code embedded in a raster file.
///
/// Returns `None` if the file has no GeoKeyDirectory or no CRS key.
#[must_use]
pub fn epsg(path: &Path) -> Option<i32> {
    let mut decoder = match open_decoder(path) {
        Ok(d) => d,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unable to open raster for EPSG");
            return None;
        }
    };
    read_geokey_epsg(&mut decoder)
}

/// Decode a raster file completely: pixels, dimensions, bands, and
/// georeferencing.
///
/// # Errors
/// Returns an error string when the file cannot be opened, is missing its
/// affine transform, or uses an unsupported color layout.
pub fn read_raster(path: &Path) -> Result<RasterData, String> {
    let mut decoder = open_decoder(path)?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| format!("cannot read dimensions: {e}"))?;

    let transform = read_geo_transform(&mut decoder)
        .ok_or_else(|| format!("{} is not georeferenced", path.display()))?;
    let epsg = read_geokey_epsg(&mut decoder);

    let bands = match decoder
        .colortype()
        .map_err(|e| format!("cannot read color type: {e}"))?
    {
        ColorType::Gray(_) => 1,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => return Err(format!("unsupported color type {other:?}")),
    };

    let pixels = match decoder
        .read_image()
        .map_err(|e| format!("cannot decode image: {e}"))?
    {
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        #[allow(clippy::cast_precision_loss)]
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        #[allow(clippy::cast_precision_loss)]
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(data) => data,
        #[allow(clippy::cast_possible_truncation)]
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        other => return Err(format!("unsupported sample format {other:?}")),
    };

    Ok(RasterData {
        pixels,
        width: width as usize,
        height: height as usize,
        bands,
        transform,
        epsg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geobounds_missing_file_is_none() {
        assert!(geobounds(Path::new("/nonexistent/capture.tif")).is_none());
    }

    #[test]
    fn test_epsg_missing_file_is_none() {
        assert!(epsg(Path::new("/nonexistent/capture.tif")).is_none());
    }

    #[test]
    fn test_geo_transform_bounds() {
        let transform = GeoTransform {
            pixel_scale: (0.5, 0.5),
            origin: (100.0, 200.0),
        };
        let bounds = transform.bounds(20, 10);
        assert_eq!(bounds.minx, 100.0);
        assert_eq!(bounds.maxx, 110.0);
        assert_eq!(bounds.maxy, 200.0);
        assert_eq!(bounds.miny, 195.0);
    }

    #[test]
    fn test_non_tiff_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.tif");
        std::fs::write(&path, b"not a tiff at all").unwrap();
        assert!(geobounds(&path).is_none());
        assert!(epsg(&path).is_none());
    }
}
