//! Slippy-tile / WGS84 conversions and parent/child tile arithmetic.

use std::f64::consts::PI;

/// Maximum latitude representable on a Web-Mercator slippy map.
pub const MAX_LATITUDE: f64 = 85.05112878;

/// A slippy-tile coordinate at a given zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

/// `(top_lat, left_lon, bottom_lat, right_lon)`.
pub type BBox = (f64, f64, f64, f64);

impl TileCoord {
    pub const fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    pub fn bbox(&self) -> BBox {
        tile_bbox(self.z, self.x, self.y)
    }

    /// The ancestor of this tile at `dst_zoom`. `dst_zoom` must be `<= self.z`.
    pub fn parent_at(&self, dst_zoom: u32) -> Option<Self> {
        if dst_zoom > self.z {
            return None;
        }
        let shift = self.z - dst_zoom;
        Some(Self {
            z: dst_zoom,
            x: self.x >> shift,
            y: self.y >> shift,
        })
    }
}

/// `lat = atan(sinh(pi(1 - 2y/n))) * 180/pi`, `lon = x/n*360 - 180`, `n = 2^z`.
pub fn tile_bbox(z: u32, x: u32, y: u32) -> BBox {
    let n = 2_f64.powi(i32::try_from(z).unwrap_or(i32::MAX));

    let left_lon = (f64::from(x) / n) * 360.0 - 180.0;
    let right_lon = (f64::from(x + 1) / n) * 360.0 - 180.0;

    let lat_from_ytile = |yy: u32| -> f64 {
        (PI * (1.0 - 2.0 * f64::from(yy) / n)).sinh().atan().to_degrees()
    };

    let top_lat = lat_from_ytile(y);
    let bottom_lat = lat_from_ytile(y + 1);

    (top_lat, left_lon, bottom_lat, right_lon)
}

/// Inverse of [`tile_bbox`], clamping latitude to `+/- MAX_LATITUDE` before
/// converting so `x` and `y` always land in `[0, 2^z)`.
pub fn lonlat_to_tile(z: u32, lon: f64, lat: f64) -> TileCoord {
    let n = 2_f64.powi(i32::try_from(z).unwrap_or(i32::MAX));
    let clamped_lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = ((lon + 180.0) / 360.0 * n).floor();
    let lat_rad = clamped_lat.to_radians();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).asinh() / PI) / 2.0 * n).floor();

    let max_index = n as u32 - 1;
    TileCoord {
        z,
        x: (x as i64).clamp(0, i64::from(max_index)) as u32,
        y: (y as i64).clamp(0, i64::from(max_index)) as u32,
    }
}

/// Centroid `(lat, lon)` of a tile's bbox.
pub fn tile_centroid(z: u32, x: u32, y: u32) -> (f64, f64) {
    let (top_lat, left_lon, bottom_lat, right_lon) = tile_bbox(z, x, y);
    ((top_lat + bottom_lat) / 2.0, (left_lon + right_lon) / 2.0)
}

/// The four non-overlapping quadrants of `bbox`, split at the midpoint of
/// each axis. Used by the upstream client's recursive bbox split.
pub fn split_bbox_quadrants(bbox: BBox) -> [BBox; 4] {
    let (top_lat, left_lon, bottom_lat, right_lon) = bbox;
    let mid_lat = (top_lat + bottom_lat) / 2.0;
    let mid_lon = (left_lon + right_lon) / 2.0;

    [
        (top_lat, left_lon, mid_lat, mid_lon),      // north-west
        (top_lat, mid_lon, mid_lat, right_lon),     // north-east
        (mid_lat, left_lon, bottom_lat, mid_lon),   // south-west
        (mid_lat, mid_lon, bottom_lat, right_lon),  // south-east
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_bbox_matches_known_value() {
        let (top, left, bottom, right) = tile_bbox(2, 2, 1);
        assert!((left - 0.0).abs() < 1e-9);
        assert!((right - 90.0).abs() < 1e-9);
        assert!(top > 0.0 && bottom < top);
    }

    #[test]
    fn lonlat_roundtrip_stays_in_range() {
        let z = 10;
        for (lon, lat) in [(-180.0, -85.0), (179.9, 84.9), (0.0, 0.0), (175.3, 60.1)] {
            let tile = lonlat_to_tile(z, lon, lat);
            let n = 1u32 << z;
            assert!(tile.x < n);
            assert!(tile.y < n);
        }
    }

    #[test]
    fn lonlat_clamps_beyond_mercator_limit() {
        let z = 5;
        let n = 1u32 << z;
        let north = lonlat_to_tile(z, 10.0, 89.9);
        let clamped = lonlat_to_tile(z, 10.0, MAX_LATITUDE);
        assert_eq!(north.y, clamped.y);
        assert!(north.y < n);

        let south = lonlat_to_tile(z, 10.0, -89.9);
        let clamped_south = lonlat_to_tile(z, 10.0, -MAX_LATITUDE);
        assert_eq!(south.y, clamped_south.y);
        assert!(south.y < n);
    }

    #[test]
    fn parent_tile_right_shifts_by_zoom_delta() {
        let tile = TileCoord::new(15, 34000, 19000);
        let parent = tile.parent_at(14).unwrap();
        assert_eq!(parent, TileCoord::new(14, 17000, 9500));
    }

    #[test]
    fn parent_at_finer_zoom_is_none() {
        let tile = TileCoord::new(10, 5, 5);
        assert!(tile.parent_at(12).is_none());
    }

    #[test]
    fn split_bbox_quadrants_are_disjoint_and_cover_input() {
        let bbox = (69.6, 10.0, 55.0, 25.0);
        let quads = split_bbox_quadrants(bbox);
        let (mid_lat, mid_lon) = ((69.6 + 55.0) / 2.0, (10.0 + 25.0) / 2.0);
        assert_eq!(quads[0], (69.6, 10.0, mid_lat, mid_lon));
        assert_eq!(quads[3], (mid_lat, mid_lon, 55.0, 25.0));
    }
}
