//! LAS point-cloud georeference extraction.
//!
//! The LAS public header block is a fixed little-endian layout, so the
//! min/max bounds are read straight from their file offsets. The CRS is
//! recovered by walking the variable-length records for an OGC WKT string
//! and searching it for the EPSG authority code the way downstream tooling
//! expects: `DATUM`, then `AUTHORITY`, then `"EPSG"`, then the digits that
//! follow.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::geometry::BoundingBox;

// Public header offsets shared by LAS 1.0 through 1.4
const SIGNATURE: &[u8; 4] = b"LASF";
const OFFSET_HEADER_SIZE: usize = 94;
const OFFSET_POINT_DATA: usize = 96;
const OFFSET_VLR_COUNT: usize = 100;
const OFFSET_MAX_X: usize = 179;

// VLR record header: reserved u16, user id [16], record id u16,
// payload length u16, description [32]
const VLR_HEADER_LEN: usize = 54;
const VLR_USER_PROJECTION: &str = "LASF_Projection";
const VLR_RECORD_WKT: u16 = 2112;

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_f64(buf: &[u8], offset: usize) -> Option<f64> {
    buf.get(offset..offset + 8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Search a WKT string for the EPSG code of its datum authority.
///
/// The terms are located in order, each search starting where the previous
/// term ended; the code is the first digit run after the final match.
#[must_use]
pub fn epsg_from_wkt(wkt: &str) -> Option<i32> {
    let mut idx = 0;
    for term in ["DATUM", "AUTHORITY", "\"EPSG\""] {
        idx += wkt.get(idx..)?.find(term)? + term.len();
    }

    let rest = wkt.get(idx..)?;
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Extract the WKT spatial-reference string from the VLRs of a LAS file, if
/// one is present.
fn wkt_from_vlrs(data: &[u8], header_size: usize, vlr_count: u32, data_end: usize) -> Option<String> {
    let mut offset = header_size;
    for _ in 0..vlr_count {
        if offset + VLR_HEADER_LEN > data_end {
            break;
        }
        let user_id = data.get(offset + 2..offset + 18)?;
        let record_id = read_u16(data, offset + 18)?;
        let payload_len = read_u16(data, offset + 20)? as usize;
        let payload_start = offset + VLR_HEADER_LEN;

        let user_id = String::from_utf8_lossy(user_id);
        let user_id = user_id.trim_end_matches('\0');
        if user_id == VLR_USER_PROJECTION && record_id == VLR_RECORD_WKT {
            let payload = data.get(payload_start..payload_start + payload_len)?;
            let text = String::from_utf8_lossy(payload);
            return Some(text.trim_end_matches('\0').to_string());
        }

        offset = payload_start + payload_len;
    }
    None
}

/// Read the extents and CRS of a LAS point cloud.
///
/// Bounds come from the public header's min/max fields. The EPSG code is
/// searched for in the WKT variable-length record; when the file carries no
/// usable CRS, `default_epsg` is used if supplied, otherwise the capture is
/// reported as un-georeferenced (`None`) with a warning. Extraction failures
/// never raise.
#[must_use]
pub fn extents(path: &Path, default_epsg: Option<i32>) -> Option<(BoundingBox, i32)> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            if let Err(e) = file.read_to_end(&mut data) {
                debug!(path = %path.display(), error = %e, "Unable to read LAS file");
                return None;
            }
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unable to open LAS file");
            return None;
        }
    }

    if data.get(..4) != Some(SIGNATURE.as_slice()) {
        debug!(path = %path.display(), "Missing LASF signature");
        return None;
    }

    let max_x = read_f64(&data, OFFSET_MAX_X)?;
    let min_x = read_f64(&data, OFFSET_MAX_X + 8)?;
    let max_y = read_f64(&data, OFFSET_MAX_X + 16)?;
    let min_y = read_f64(&data, OFFSET_MAX_X + 24)?;
    let bounds = BoundingBox::new(min_x, min_y, max_x, max_y);
    if !bounds.is_finite() {
        debug!(path = %path.display(), "Non-finite bounds in LAS header");
        return None;
    }

    let header_size = read_u16(&data, OFFSET_HEADER_SIZE)? as usize;
    let point_data_offset = read_u32(&data, OFFSET_POINT_DATA)? as usize;
    let vlr_count = read_u32(&data, OFFSET_VLR_COUNT)?;
    let data_end = point_data_offset.min(data.len());

    let epsg = wkt_from_vlrs(&data, header_size, vlr_count, data_end)
        .and_then(|wkt| epsg_from_wkt(&wkt));

    match epsg.or(default_epsg) {
        Some(code) => Some((bounds, code)),
        None => {
            warn!(
                path = %path.display(),
                "Unable to find EPSG and no default is specified"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const WKT: &str = r#"PROJCS["WGS 84 / UTM zone 12N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],AUTHORITY["EPSG","32612"]]"#;

    /// Build a minimal LAS 1.2 file: 227-byte header plus an optional WKT VLR.
    fn synthetic_las(bounds: BoundingBox, wkt: Option<&str>) -> Vec<u8> {
        let header_size: u16 = 227;
        let vlr_count: u32 = u32::from(wkt.is_some());
        let vlr_len = wkt.map_or(0, |w| VLR_HEADER_LEN + w.len());
        let point_offset = (header_size as usize + vlr_len) as u32;

        let mut data = vec![0u8; header_size as usize];
        data[..4].copy_from_slice(b"LASF");
        data[24] = 1; // version major
        data[25] = 2; // version minor
        data[OFFSET_HEADER_SIZE..OFFSET_HEADER_SIZE + 2].copy_from_slice(&header_size.to_le_bytes());
        data[OFFSET_POINT_DATA..OFFSET_POINT_DATA + 4].copy_from_slice(&point_offset.to_le_bytes());
        data[OFFSET_VLR_COUNT..OFFSET_VLR_COUNT + 4].copy_from_slice(&vlr_count.to_le_bytes());
        for (i, value) in [bounds.maxx, bounds.minx, bounds.maxy, bounds.miny]
            .iter()
            .enumerate()
        {
            let at = OFFSET_MAX_X + i * 8;
            data[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }

        if let Some(wkt) = wkt {
            let mut vlr = vec![0u8; VLR_HEADER_LEN];
            vlr[2..2 + VLR_USER_PROJECTION.len()].copy_from_slice(VLR_USER_PROJECTION.as_bytes());
            vlr[18..20].copy_from_slice(&VLR_RECORD_WKT.to_le_bytes());
            vlr[20..22].copy_from_slice(&(wkt.len() as u16).to_le_bytes());
            data.extend_from_slice(&vlr);
            data.extend_from_slice(wkt.as_bytes());
        }
        data
    }

    fn write_temp(data: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.las");
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        (dir, path)
    }

    #[test]
    fn test_epsg_from_wkt_finds_datum_authority() {
        assert_eq!(epsg_from_wkt(WKT), Some(7030));
    }

    #[test]
    fn test_epsg_from_wkt_missing_terms() {
        assert_eq!(epsg_from_wkt("GEOGCS[\"no authority here\"]"), None);
        assert_eq!(epsg_from_wkt(""), None);
    }

    #[test]
    fn test_extents_with_embedded_wkt() {
        let bounds = BoundingBox::new(409_000.0, 3_659_000.0, 409_200.0, 3_659_400.0);
        let (_dir, path) = write_temp(&synthetic_las(bounds, Some(WKT)));

        let (found, epsg) = extents(&path, None).unwrap();
        assert_eq!(found, bounds);
        assert_eq!(epsg, 7030);
    }

    #[test]
    fn test_extents_default_epsg_fallback() {
        let bounds = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let (_dir, path) = write_temp(&synthetic_las(bounds, None));

        let (_, epsg) = extents(&path, Some(32612)).unwrap();
        assert_eq!(epsg, 32612);
    }

    #[test]
    fn test_extents_no_crs_no_default_is_none() {
        let bounds = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let (_dir, path) = write_temp(&synthetic_las(bounds, None));
        assert!(extents(&path, None).is_none());
    }

    #[test]
    fn test_extents_rejects_non_las() {
        let (_dir, path) = write_temp(b"not a point cloud");
        assert!(extents(&path, Some(4326)).is_none());
    }
}
