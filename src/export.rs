//! Export writer (C10): renders hotmap tiles to GeoJSON polygons and a
//! top-N CSV (§4.10).

use serde_json::{json, Value};

use crate::storage::HotmapTile;

/// Closed 5-point polygon for a tile bbox, starting and ending at the
/// top-left corner, in `[lon, lat]` GeoJSON order.
fn tile_polygon(bbox: (f64, f64, f64, f64)) -> Vec<[f64; 2]> {
    let (top_lat, left_lon, bottom_lat, right_lon) = bbox;
    vec![
        [left_lon, top_lat],
        [right_lon, top_lat],
        [right_lon, bottom_lat],
        [left_lon, bottom_lat],
        [left_lon, top_lat],
    ]
}

/// Builds a FeatureCollection ordered by `coverage DESC, score DESC`
/// (the caller is expected to have already fetched `tiles` in that
/// order via [`crate::storage::query_hotmap`]).
pub fn hotmap_to_geojson(tiles: &[HotmapTile], year: i64, slot_id: i64) -> Value {
    let features: Vec<Value> = tiles
        .iter()
        .map(|tile| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [tile_polygon(tile.bbox)],
                },
                "properties": {
                    "zoom": tile.zoom,
                    "year": year,
                    "slot_id": slot_id,
                    "x": tile.x,
                    "y": tile.y_tile,
                    "coverage": tile.coverage,
                    "score": tile.score,
                },
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

const CSV_HEADER: &str = "rank,zoom,year,slot_id,x,y,coverage,score,centroid_lat,centroid_lon,\
topLeft_lat,topLeft_lon,bottomRight_lat,bottomRight_lon,source";

/// Renders the top `limit` tiles (already ordered) as a CSV string with
/// the header from §4.10.
pub fn hotmap_to_csv(tiles: &[HotmapTile], year: i64, slot_id: i64, limit: usize, source: &str) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for (i, tile) in tiles.iter().take(limit).enumerate() {
        let rank = i + 1;
        let (top_lat, left_lon, bottom_lat, right_lon) = tile.bbox;
        let centroid_lat = (top_lat + bottom_lat) / 2.0;
        let centroid_lon = (left_lon + right_lon) / 2.0;

        out.push_str(&format!(
            "{rank},{zoom},{year},{slot_id},{x},{y},{coverage},{score},{centroid_lat},{centroid_lon},\
{top_lat},{left_lon},{bottom_lat},{right_lon},{source}\n",
            zoom = tile.zoom,
            x = tile.x,
            y = tile.y_tile,
            coverage = tile.coverage,
            score = tile.score,
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> HotmapTile {
        HotmapTile {
            zoom: 15,
            x: 17000,
            y_tile: 9500,
            coverage: 3,
            score: 1.15256,
            obs_total: 60,
            bbox: (60.0, 10.0, 59.9, 10.1),
        }
    }

    #[test]
    fn geojson_has_closed_polygon_and_properties() {
        let value = hotmap_to_geojson(&[tile()], 0, 0);
        let coords = &value["features"][0]["geometry"]["coordinates"][0];
        assert_eq!(coords.as_array().unwrap().len(), 5);
        assert_eq!(coords[0], coords[4]);
        assert_eq!(value["features"][0]["properties"]["coverage"], 3);
    }

    #[test]
    fn csv_header_matches_spec_columns() {
        let csv = hotmap_to_csv(&[tile()], 2024, 15, 10, "hotgrid");
        let first_line = csv.lines().next().unwrap();
        assert_eq!(first_line, CSV_HEADER);
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn csv_respects_limit() {
        let tiles = vec![tile(), tile(), tile()];
        let csv = hotmap_to_csv(&tiles, 2024, 15, 2, "hotgrid");
        assert_eq!(csv.lines().count(), 3); // header + 2 rows
    }
}
