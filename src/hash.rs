//! Stable content hashing for change detection.
//!
//! The hash must be invariant under upstream cell reordering and under the
//! addition of irrelevant payload keys, so we project each cell down to the
//! tuple that actually matters before serializing.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::GridCell;

#[derive(Serialize)]
struct CanonicalCell {
    x: i64,
    y: i64,
    zoom: i64,
    observations_count: i64,
    taxa_count: i64,
    top_lat: f64,
    top_lon: f64,
    bottom_lat: f64,
    bottom_lon: f64,
}

/// Sort cells by `(x, y)`, project to the canonical tuple, serialize as
/// compact JSON, and SHA-256 the result.
pub fn stable_gridcells_hash(cells: &[GridCell]) -> String {
    let mut canonical: Vec<CanonicalCell> = cells
        .iter()
        .map(|c| {
            let (top_lat, top_lon, bottom_lat, bottom_lon) = c.bbox();
            CanonicalCell {
                x: c.x,
                y: c.y,
                zoom: c.zoom_or_zero(),
                observations_count: c.observations_count_or_zero(),
                taxa_count: c.taxa_count_or_zero(),
                top_lat,
                top_lon,
                bottom_lat,
                bottom_lon,
            }
        })
        .collect();

    canonical.sort_by_key(|c| (c.x, c.y));

    let blob = serde_json::to_vec(&canonical).expect("canonical cells always serialize");

    let mut hasher = Sha256::new();
    hasher.update(&blob);
    hex::encode(hasher.finalize())
}

const LOCAL_FROM_PREFIX: &str = "LOCAL_FROM_";

/// The derived-layer marker stored in `payload_sha256` for a zoom level
/// materialized locally from a finer source zoom.
pub fn local_from_marker(src_zoom: u32, src_sha: &str) -> String {
    format!("{LOCAL_FROM_PREFIX}{src_zoom}:{src_sha}")
}

/// `true` iff `marker` is exactly `LOCAL_FROM_<src_zoom>:<src_sha>`.
pub fn is_valid_local_from(marker: &str, src_zoom: u32, src_sha: &str) -> bool {
    marker == local_from_marker(src_zoom, src_sha)
}

/// Parses a `LOCAL_FROM_<zoom>:<sha>` marker back into its parts, if valid.
pub fn parse_local_from_marker(marker: &str) -> Option<(u32, &str)> {
    let rest = marker.strip_prefix(LOCAL_FROM_PREFIX)?;
    let (zoom_str, sha) = rest.split_once(':')?;
    let zoom = zoom_str.parse().ok()?;
    Some((zoom, sha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellBoundingBox, LatLon};

    fn cell(x: i64, y: i64, obs: i64, taxa: i64) -> GridCell {
        GridCell {
            x,
            y,
            zoom: Some(15),
            observations_count: Some(obs),
            taxa_count: Some(taxa),
            bounding_box: Some(CellBoundingBox {
                top_left: LatLon { latitude: 60.0, longitude: 10.0 },
                bottom_right: LatLon { latitude: 59.9, longitude: 10.1 },
            }),
        }
    }

    #[test]
    fn hash_is_invariant_under_reordering() {
        let a = vec![cell(1, 1, 10, 2), cell(2, 2, 5, 1)];
        let b = vec![cell(2, 2, 5, 1), cell(1, 1, 10, 2)];
        assert_eq!(stable_gridcells_hash(&a), stable_gridcells_hash(&b));
    }

    #[test]
    fn hash_changes_with_observation_counts() {
        let a = vec![cell(1, 1, 10, 2)];
        let b = vec![cell(1, 1, 11, 2)];
        assert_ne!(stable_gridcells_hash(&a), stable_gridcells_hash(&b));
    }

    #[test]
    fn hash_ignores_missing_zoom_field() {
        let mut with_zoom = cell(1, 1, 10, 2);
        let mut without_zoom = with_zoom.clone();
        without_zoom.zoom = None;
        with_zoom.zoom = Some(0);
        assert_eq!(
            stable_gridcells_hash(&[with_zoom]),
            stable_gridcells_hash(&[without_zoom])
        );
    }

    #[test]
    fn local_from_marker_roundtrips() {
        let marker = local_from_marker(15, "abc123");
        assert!(is_valid_local_from(&marker, 15, "abc123"));
        assert!(!is_valid_local_from(&marker, 14, "abc123"));
        assert_eq!(parse_local_from_marker(&marker), Some((15, "abc123")));
    }

    #[test]
    fn parse_local_from_marker_rejects_non_markers() {
        assert_eq!(parse_local_from_marker("not-a-marker"), None);
        assert_eq!(parse_local_from_marker("LOCAL_FROM_abc:sha"), None);
    }
}
