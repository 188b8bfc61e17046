//! Utility functions for coordinate conversions and rectangle tests
//!
//! All rectangles are `geo::Rect<f64>` in raw longitude/latitude degrees with `x` as
//! longitude and `y` as latitude. The tests here are plain axis-aligned comparisons;
//! there is no geodesic correction and no antimeridian wraparound.

use geo::{Coord, Point, Rect};

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;
pub const EARTH_SIZE_METERS: f64 = EARTH_MERCATOR_MAX - EARTH_MERCATOR_MIN;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Size of one map tile in pixels
pub const TILE_SIZE_PIXELS: f64 = 256.0;

const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon * LON_TO_X_FACTOR;
    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;
    Point::new(x, y)
}

/// Convert Web Mercator (x, y) in meters to WGS84, returned as `(lat, lon)`
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    (lat, lon)
}

/// Ground resolution of one screen pixel at the given zoom level
#[inline]
pub fn meters_per_pixel(zoom: f64) -> f64 {
    EARTH_SIZE_METERS / (TILE_SIZE_PIXELS * 2f64.powf(zoom))
}

/// Visible lon/lat bounds of a screen of `pixels` (width, height) centered on `center`
///
/// The extent is computed in Web Mercator and converted back, then clamped to the valid
/// longitude and latitude ranges.
pub fn bounds_from_center_zoom(center: Coord<f64>, zoom: f64, pixels: (u32, u32)) -> Rect<f64> {
    let resolution = meters_per_pixel(zoom);
    let half_width = pixels.0 as f64 / 2.0 * resolution;
    let half_height = pixels.1 as f64 / 2.0 * resolution;
    let mid = wgs84_to_mercator(center.y, center.x);

    let (south, west) = mercator_to_wgs84(mid.x() - half_width, mid.y() - half_height);
    let (north, east) = mercator_to_wgs84(mid.x() + half_width, mid.y() + half_height);

    Rect::new(
        Coord {
            x: west.max(-180.0),
            y: south.max(-MAX_LATITUDE),
        },
        Coord {
            x: east.min(180.0),
            y: north.min(MAX_LATITUDE),
        },
    )
}

/// Build a rectangle from compass edges
#[inline]
pub fn rect_from_edges(west: f64, south: f64, east: f64, north: f64) -> Rect<f64> {
    Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north })
}

/// Axis-aligned overlap test; touching edges count as intersecting
#[inline]
pub fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    !(a.min().x > b.max().x
        || a.max().x < b.min().x
        || a.max().y < b.min().y
        || a.min().y > b.max().y)
}

/// Point-in-rectangle test, inclusive on every edge
#[inline]
pub fn rect_contains(rect: &Rect<f64>, point: Coord<f64>) -> bool {
    point.x >= rect.min().x
        && point.x <= rect.max().x
        && point.y >= rect.min().y
        && point.y <= rect.max().y
}

/// Euclidean distance in raw degrees
#[inline]
pub fn planar_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Check that a coordinate is finite and inside the WGS84 ranges
#[inline]
pub fn is_valid_lon_lat(coord: Coord<f64>) -> bool {
    coord.x.is_finite()
        && coord.y.is_finite()
        && (-180.0..=180.0).contains(&coord.x)
        && (-90.0..=90.0).contains(&coord.y)
}
