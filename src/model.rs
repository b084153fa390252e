//! Wire types shared between the upstream client, the content hash, and
//! storage — the upstream aggregator's `gridCells` shape and the
//! internal date/bbox filter fragments sent in request bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellBoundingBox {
    #[serde(rename = "topLeft")]
    pub top_left: LatLon,
    #[serde(rename = "bottomRight")]
    pub bottom_right: LatLon,
}

/// A single cell as returned by the upstream `GeoGridAggregation` endpoint.
/// Numeric fields are optional because the upstream payload is dynamically
/// typed; missing values coerce to 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCell {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub zoom: Option<i64>,
    #[serde(rename = "observationsCount", default)]
    pub observations_count: Option<i64>,
    #[serde(rename = "taxaCount", default)]
    pub taxa_count: Option<i64>,
    #[serde(rename = "boundingBox", default)]
    pub bounding_box: Option<CellBoundingBox>,
}

impl GridCell {
    pub fn observations_count_or_zero(&self) -> i64 {
        self.observations_count.unwrap_or(0).max(0)
    }

    pub fn taxa_count_or_zero(&self) -> i64 {
        self.taxa_count.unwrap_or(0).max(0)
    }

    pub fn zoom_or_zero(&self) -> i64 {
        self.zoom.unwrap_or(0)
    }

    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        match &self.bounding_box {
            Some(bb) => (
                bb.top_left.latitude,
                bb.top_left.longitude,
                bb.bottom_right.latitude,
                bb.bottom_right.longitude,
            ),
            None => (0.0, 0.0, 0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoGridResponse {
    #[serde(rename = "gridCells", default)]
    pub grid_cells: Vec<GridCell>,
}

/// Merge two cell lists, summing `observationsCount` and combining
/// `taxaCount` per `(x, y)`. Used both for merging resilient-split
/// quadrants back into one grid and for the all-years aggregate across
/// per-year grids. Bboxes are unioned via coordinate-wise min/max of the
/// two opposing corners, which is equivalent to taking the representative
/// tile bbox when sources agree.
pub fn merge_grid_cells(lists: Vec<Vec<GridCell>>) -> Vec<GridCell> {
    use std::collections::BTreeMap;

    let mut merged: BTreeMap<(i64, i64), GridCell> = BTreeMap::new();

    for cells in lists {
        for cell in cells {
            merged
                .entry((cell.x, cell.y))
                .and_modify(|existing| {
                    let obs = existing.observations_count_or_zero() + cell.observations_count_or_zero();
                    existing.observations_count = Some(obs);
                    // taxaCount semantics at merged boundaries are not
                    // defined by upstream; take the max, since each (x,y)
                    // cell is unique across quadrants and distinct taxa
                    // can't double count.
                    existing.taxa_count = Some(existing.taxa_count_or_zero().max(cell.taxa_count_or_zero()));
                    existing.bounding_box = union_bbox(existing.bounding_box, cell.bounding_box);
                })
                .or_insert(cell);
        }
    }

    merged.into_values().collect()
}

fn union_bbox(a: Option<CellBoundingBox>, b: Option<CellBoundingBox>) -> Option<CellBoundingBox> {
    match (a, b) {
        (Some(a), Some(b)) => Some(CellBoundingBox {
            top_left: LatLon {
                latitude: a.top_left.latitude.max(b.top_left.latitude),
                longitude: a.top_left.longitude.min(b.top_left.longitude),
            },
            bottom_right: LatLon {
                latitude: a.bottom_right.latitude.min(b.bottom_right.latitude),
                longitude: a.bottom_right.longitude.max(b.bottom_right.longitude),
            },
        }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn merge_sums_observations_for_disjoint_quadrants() {
        let a = vec![cell(1, 1, 10, 2)];
        let b = vec![cell(2, 2, 5, 1)];
        let merged = merge_grid_cells(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_sums_observations_for_overlapping_key() {
        let a = vec![cell(1, 1, 10, 2)];
        let b = vec![cell(1, 1, 5, 3)];
        let merged = merge_grid_cells(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].observations_count_or_zero(), 15);
        assert_eq!(merged[0].taxa_count_or_zero(), 3);
    }

    #[test]
    fn missing_numeric_fields_default_to_zero() {
        let raw = GridCell {
            x: 0,
            y: 0,
            zoom: None,
            observations_count: None,
            taxa_count: None,
            bounding_box: None,
        };
        assert_eq!(raw.observations_count_or_zero(), 0);
        assert_eq!(raw.taxa_count_or_zero(), 0);
    }
}
