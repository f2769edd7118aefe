#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Geohash bucket keys for the report spatial index.
//!
//! Maps a latitude/longitude pair to a short base-32 string by recursively
//! halving the longitude and latitude ranges. Reports sharing a key lie in
//! the same grid cell, so the key is used as the coarse index for proximity
//! lookups. Cell edges are rectangular, so callers must re-check exact
//! distances after fetching candidates by bucket.

use std::collections::BTreeSet;
use std::fmt;

use geo::Rect;
use serde::{Deserialize, Serialize};

/// The geohash base-32 alphabet (no `a`, `i`, `l`, `o`).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest supported key length.
pub const MAX_PRECISION: usize = 12;

/// Metres per degree of arc on the mean earth radius (6,371,008.8 m).
pub const METERS_PER_DEGREE: f64 = 111_195.08;

/// Errors produced while encoding or parsing bucket keys.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoBucketError {
    /// Latitude outside `[-90, 90]`, longitude outside `[-180, 180]`, or a
    /// non-finite value.
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    /// Requested precision is outside `1..=MAX_PRECISION`.
    #[error("Invalid geohash precision {precision}: expected 1-12")]
    InvalidPrecision {
        /// The rejected precision.
        precision: usize,
    },

    /// A key string that is empty, too long, or contains characters outside
    /// the geohash alphabet.
    #[error("Invalid bucket key: {key:?}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },
}

/// A geohash cell identifier.
///
/// Always holds a well-formed key: construction goes through [`encode`] or
/// [`BucketKey::parse`], and deserialization is validated the same way.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketKey(String);

impl BucketKey {
    /// Parses and validates a geohash string.
    ///
    /// # Errors
    ///
    /// Returns [`GeoBucketError::InvalidKey`] if the string is empty, longer
    /// than [`MAX_PRECISION`], or contains characters outside the alphabet.
    pub fn parse(key: &str) -> Result<Self, GeoBucketError> {
        let valid = !key.is_empty()
            && key.len() <= MAX_PRECISION
            && key.bytes().all(|b| char_index(b).is_some());

        if valid {
            Ok(Self(key.to_string()))
        } else {
            Err(GeoBucketError::InvalidKey {
                key: key.to_string(),
            })
        }
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of characters in the key.
    #[must_use]
    pub fn precision(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BucketKey {
    type Error = GeoBucketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BucketKey> for String {
    fn from(key: BucketKey) -> Self {
        key.0
    }
}

fn char_index(byte: u8) -> Option<u8> {
    BASE32
        .iter()
        .position(|&c| c == byte)
        .and_then(|i| u8::try_from(i).ok())
}

/// Checks that a coordinate is finite and within the valid ranges.
///
/// # Errors
///
/// Returns [`GeoBucketError::InvalidCoordinate`] otherwise.
pub fn validate_coordinate(latitude: f64, longitude: f64) -> Result<(), GeoBucketError> {
    if latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
    {
        Ok(())
    } else {
        Err(GeoBucketError::InvalidCoordinate {
            latitude,
            longitude,
        })
    }
}

/// Encodes a coordinate into a bucket key of the given precision.
///
/// # Errors
///
/// Returns [`GeoBucketError::InvalidCoordinate`] for out-of-range input and
/// [`GeoBucketError::InvalidPrecision`] if `precision` is not in
/// `1..=MAX_PRECISION`.
pub fn encode(
    latitude: f64,
    longitude: f64,
    precision: usize,
) -> Result<BucketKey, GeoBucketError> {
    validate_coordinate(latitude, longitude)?;
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(GeoBucketError::InvalidPrecision { precision });
    }

    let (mut lat_min, mut lat_max) = (-90.0_f64, 90.0_f64);
    let (mut lng_min, mut lng_max) = (-180.0_f64, 180.0_f64);

    let mut key = String::with_capacity(precision);
    let mut bits = 0_u8;
    let mut bit_count = 0;
    let mut lng_bit = true;

    while key.len() < precision {
        bits <<= 1;
        if lng_bit {
            let mid = f64::midpoint(lng_min, lng_max);
            if longitude >= mid {
                bits |= 1;
                lng_min = mid;
            } else {
                lng_max = mid;
            }
        } else {
            let mid = f64::midpoint(lat_min, lat_max);
            if latitude >= mid {
                bits |= 1;
                lat_min = mid;
            } else {
                lat_max = mid;
            }
        }
        lng_bit = !lng_bit;
        bit_count += 1;

        if bit_count == 5 {
            key.push(char::from(BASE32[usize::from(bits)]));
            bits = 0;
            bit_count = 0;
        }
    }

    Ok(BucketKey(key))
}

/// Decodes a bucket key into the bounding rectangle of its cell.
///
/// The rectangle uses `x` for longitude and `y` for latitude.
#[must_use]
pub fn decode(key: &BucketKey) -> Rect<f64> {
    let (mut lat_min, mut lat_max) = (-90.0_f64, 90.0_f64);
    let (mut lng_min, mut lng_max) = (-180.0_f64, 180.0_f64);
    let mut lng_bit = true;

    for index in key.0.bytes().filter_map(char_index) {
        for shift in (0..5).rev() {
            let set = (index >> shift) & 1 == 1;
            if lng_bit {
                let mid = f64::midpoint(lng_min, lng_max);
                if set {
                    lng_min = mid;
                } else {
                    lng_max = mid;
                }
            } else {
                let mid = f64::midpoint(lat_min, lat_max);
                if set {
                    lat_min = mid;
                } else {
                    lat_max = mid;
                }
            }
            lng_bit = !lng_bit;
        }
    }

    Rect::new((lng_min, lat_min), (lng_max, lat_max))
}

/// Height and width of a cell in degrees: `(lat_span, lng_span)`.
///
/// Longitude receives the extra bit when the total bit count is odd.
#[must_use]
pub fn cell_span_degrees(precision: usize) -> (f64, f64) {
    let total_bits = i32::try_from(precision * 5).unwrap_or(i32::MAX);
    let lng_bits = (total_bits + 1) / 2;
    let lat_bits = total_bits / 2;

    (180.0 / 2f64.powi(lat_bits), 360.0 / 2f64.powi(lng_bits))
}

/// Approximate cell dimensions in metres at the given latitude:
/// `(width_m, height_m)`.
#[must_use]
pub fn cell_size_m(precision: usize, latitude: f64) -> (f64, f64) {
    let (lat_span, lng_span) = cell_span_degrees(precision);
    let width = lng_span * METERS_PER_DEGREE * latitude.to_radians().cos().abs();

    (width, lat_span * METERS_PER_DEGREE)
}

/// Returns the bucket itself plus its (up to) eight adjacent cells.
///
/// Longitude wraps across the antimeridian. Rows that would lie beyond a pole
/// are omitted, so polar cells have fewer neighbors.
#[must_use]
pub fn neighbors(key: &BucketKey) -> BTreeSet<BucketKey> {
    cells_around(key, 1, 1)
}

/// Returns every cell within `lat_rings` rows and `lng_rings` columns of
/// `key`, including `key` itself.
#[must_use]
pub fn cells_around(key: &BucketKey, lat_rings: u16, lng_rings: u16) -> BTreeSet<BucketKey> {
    let precision = key.precision();
    let center = decode(key).center();
    let (lat_span, lng_span) = cell_span_degrees(precision);
    let lat_rings = i32::from(lat_rings);
    let lng_rings = i32::from(lng_rings);

    let mut cells = BTreeSet::new();

    for dy in -lat_rings..=lat_rings {
        let lat = f64::from(dy).mul_add(lat_span, center.y);
        if !(-90.0..=90.0).contains(&lat) {
            continue;
        }
        for dx in -lng_rings..=lng_rings {
            let lng = wrap_longitude(f64::from(dx).mul_add(lng_span, center.x));
            if let Ok(cell) = encode(lat, lng, precision) {
                cells.insert(cell);
            }
        }
    }

    cells
}

fn wrap_longitude(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reference_geohash() {
        let key = encode(57.649_11, 10.407_44, 11).unwrap();
        assert_eq!(key.as_str(), "u4pruydqqvj");

        let coarse = encode(57.649_11, 10.407_44, 6).unwrap();
        assert_eq!(coarse.as_str(), "u4pruy");
    }

    #[test]
    fn encode_is_prefix_stable() {
        let fine = encode(32.08, 34.78, 9).unwrap();
        let coarse = encode(32.08, 34.78, 6).unwrap();
        assert!(fine.as_str().starts_with(coarse.as_str()));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            encode(90.5, 0.0, 6),
            Err(GeoBucketError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            encode(0.0, -180.1, 6),
            Err(GeoBucketError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            encode(f64::NAN, 0.0, 6),
            Err(GeoBucketError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn rejects_bad_precision() {
        assert_eq!(
            encode(0.0, 0.0, 0),
            Err(GeoBucketError::InvalidPrecision { precision: 0 })
        );
        assert_eq!(
            encode(0.0, 0.0, 13),
            Err(GeoBucketError::InvalidPrecision { precision: 13 })
        );
    }

    #[test]
    fn accepts_range_edges() {
        assert!(encode(90.0, 180.0, 6).is_ok());
        assert!(encode(-90.0, -180.0, 6).is_ok());
    }

    #[test]
    fn decode_contains_encoded_point() {
        let (lat, lng) = (32.08, 34.78);
        let rect = decode(&encode(lat, lng, 6).unwrap());
        assert!(rect.min().y <= lat && lat <= rect.max().y);
        assert!(rect.min().x <= lng && lng <= rect.max().x);

        let (lat_span, lng_span) = cell_span_degrees(6);
        assert!((rect.height() - lat_span).abs() < 1e-12);
        assert!((rect.width() - lng_span).abs() < 1e-12);
    }

    #[test]
    fn precision_six_is_roughly_one_km() {
        let (width, height) = cell_size_m(6, 0.0);
        assert!((1_200.0..1_250.0).contains(&width), "width {width}");
        assert!((600.0..625.0).contains(&height), "height {height}");
    }

    #[test]
    fn parse_validates_alphabet() {
        assert!(BucketKey::parse("u4pruy").is_ok());
        assert!(BucketKey::parse("").is_err());
        assert!(BucketKey::parse("u4prua").is_err());
        assert!(BucketKey::parse("0123456789bcd").is_err());
    }

    #[test]
    fn deserialize_rejects_invalid_key() {
        let ok: BucketKey = serde_json::from_str("\"sv8wrq\"").unwrap();
        assert_eq!(ok.as_str(), "sv8wrq");
        assert!(serde_json::from_str::<BucketKey>("\"sv8wrl\"").is_err());
    }

    #[test]
    fn neighbors_of_interior_cell() {
        let key = encode(32.08, 34.78, 6).unwrap();
        let cells = neighbors(&key);
        assert_eq!(cells.len(), 9);
        assert!(cells.contains(&key));
    }

    #[test]
    fn neighbors_cover_points_within_one_cell() {
        let (lat, lng) = (32.08, 34.78);
        let key = encode(lat, lng, 6).unwrap();
        let cells = neighbors(&key);
        let (lat_span, lng_span) = cell_span_degrees(6);

        for dy in [-0.99_f64, -0.5, 0.0, 0.5, 0.99] {
            for dx in [-0.99_f64, -0.5, 0.0, 0.5, 0.99] {
                let p_lat = dy.mul_add(lat_span, lat);
                let p_lng = dx.mul_add(lng_span, lng);
                let bucket = encode(p_lat, p_lng, 6).unwrap();
                assert!(
                    cells.contains(&bucket),
                    "({p_lat}, {p_lng}) -> {bucket} not in neighbors of {key}"
                );
            }
        }
    }

    #[test]
    fn neighbors_wrap_antimeridian() {
        let east = encode(0.0, 179.999, 6).unwrap();
        let west = encode(0.0, -179.999, 6).unwrap();
        assert!(neighbors(&east).contains(&west));
        assert!(neighbors(&west).contains(&east));
    }

    #[test]
    fn polar_cells_have_fewer_neighbors() {
        let key = encode(89.9999, 0.0, 6).unwrap();
        assert_eq!(neighbors(&key).len(), 6);
    }

    #[test]
    fn cells_around_grows_with_rings() {
        let key = encode(32.08, 34.78, 6).unwrap();
        assert_eq!(cells_around(&key, 0, 0).len(), 1);
        assert_eq!(cells_around(&key, 2, 3).len(), 5 * 7);
    }
}
