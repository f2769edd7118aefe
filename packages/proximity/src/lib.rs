#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Proximity queries over the report cache.
//!
//! Queries run in two phases: the geohash index narrows the store down to
//! the cells covering the search area, then every candidate is checked
//! against the exact great-circle distance. Cells are rectangles, so the
//! second phase is what makes results exact.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use geo::{Distance, Haversine, Point};
use roadwatch_geobucket::{BucketKey, METERS_PER_DEGREE, cell_size_m, cells_around};
use roadwatch_report_models::{BUCKET_PRECISION, Coordinate, InvalidCoordinate, SafetyReport};
use roadwatch_store::ReportStore;

/// Above this many covering cells a query scans every active report
/// instead of expanding the bucket set further.
pub const MAX_COVERING_CELLS: usize = 4096;

/// Errors returned by proximity queries.
#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    /// The query center or a route point is out of range.
    #[error(transparent)]
    InvalidCoordinate(#[from] InvalidCoordinate),

    /// Negative or non-finite search distance.
    #[error("Invalid search distance {radius_m}: expected a finite, non-negative number of metres")]
    InvalidRadius {
        /// The rejected distance in metres.
        radius_m: f64,
    },
}

/// The part of the index a query has to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// Only these buckets can contain matches.
    Buckets(BTreeSet<BucketKey>),
    /// The area is too large (or too close to a pole) for bucket expansion.
    Everything,
}

impl Coverage {
    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Buckets(mut a), Self::Buckets(b)) => {
                a.extend(b);
                if a.len() > MAX_COVERING_CELLS {
                    Self::Everything
                } else {
                    Self::Buckets(a)
                }
            }
            _ => Self::Everything,
        }
    }

    fn candidates(&self, store: &mut ReportStore, now: DateTime<Utc>) -> Vec<SafetyReport> {
        match self {
            Self::Buckets(keys) => store.active_in_buckets(keys, now),
            Self::Everything => store.all_active(now),
        }
    }
}

/// Great-circle distance between two coordinates in metres.
#[must_use]
pub fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

fn validate_radius(radius_m: f64) -> Result<(), ProximityError> {
    if radius_m.is_finite() && radius_m >= 0.0 {
        Ok(())
    } else {
        Err(ProximityError::InvalidRadius { radius_m })
    }
}

/// Number of cell steps needed to span `radius_m`; always at least one so
/// the immediate neighbors are included.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rings_for(radius_m: f64, cell_m: f64) -> Option<u16> {
    let rings = (radius_m / cell_m).ceil().max(1.0);
    if rings.is_finite() && rings <= f64::from(u16::MAX) {
        Some(rings as u16)
    } else {
        None
    }
}

/// Buckets that together cover a circle of `radius_m` around `center`.
///
/// Starts from the center cell and its neighbors and keeps adding rings of
/// cells until the radius is spanned. Cell width is taken at the highest
/// latitude the circle reaches, where cells are narrowest.
///
/// # Errors
///
/// Returns [`ProximityError`] for an invalid center or radius.
pub fn covering_buckets(center: Coordinate, radius_m: f64) -> Result<Coverage, ProximityError> {
    validate_radius(radius_m)?;
    let key = center.bucket()?;

    let max_abs_lat = (center.latitude.abs() + radius_m / METERS_PER_DEGREE).min(90.0);
    let (width_m, _) = cell_size_m(BUCKET_PRECISION, max_abs_lat);
    let (_, height_m) = cell_size_m(BUCKET_PRECISION, center.latitude);

    let (Some(lat_rings), Some(lng_rings)) =
        (rings_for(radius_m, height_m), rings_for(radius_m, width_m))
    else {
        return Ok(Coverage::Everything);
    };

    let cell_count = (2 * usize::from(lat_rings) + 1) * (2 * usize::from(lng_rings) + 1);
    if cell_count > MAX_COVERING_CELLS {
        log::debug!(
            "Radius {radius_m}m around ({}, {}) needs {cell_count} cells, scanning all reports",
            center.latitude,
            center.longitude
        );
        return Ok(Coverage::Everything);
    }

    Ok(Coverage::Buckets(cells_around(&key, lat_rings, lng_rings)))
}

fn by_distance(a: &(SafetyReport, f64), b: &(SafetyReport, f64)) -> Ordering {
    a.1.total_cmp(&b.1)
        .then_with(|| a.0.created_at().cmp(&b.0.created_at()))
}

/// Active reports within `radius_m` of `center`, paired with their distance
/// in metres, nearest first.
///
/// # Errors
///
/// Returns [`ProximityError`] for an invalid center or radius.
pub fn near_point_with_distance(
    store: &mut ReportStore,
    center: Coordinate,
    radius_m: f64,
    now: DateTime<Utc>,
) -> Result<Vec<(SafetyReport, f64)>, ProximityError> {
    let coverage = covering_buckets(center, radius_m)?;

    let mut matches: Vec<(SafetyReport, f64)> = coverage
        .candidates(store, now)
        .into_iter()
        .map(|report| {
            let distance = distance_m(center, report.location());
            (report, distance)
        })
        .filter(|(_, distance)| *distance <= radius_m)
        .collect();

    matches.sort_by(by_distance);
    Ok(matches)
}

/// Active reports within `radius_m` of `center`, nearest first.
///
/// # Errors
///
/// Returns [`ProximityError`] for an invalid center or radius.
pub fn near_point(
    store: &mut ReportStore,
    center: Coordinate,
    radius_m: f64,
    now: DateTime<Utc>,
) -> Result<Vec<SafetyReport>, ProximityError> {
    Ok(near_point_with_distance(store, center, radius_m, now)?
        .into_iter()
        .map(|(report, _)| report)
        .collect())
}

/// Active reports within `corridor_m` of any point of `route`, paired with
/// the distance to the nearest route point, nearest first.
///
/// Route points are treated independently with no interpolation between
/// them, so sparse routes can miss reports lying between distant points.
///
/// # Errors
///
/// Returns [`ProximityError`] for an invalid route point or corridor width.
pub fn near_route_with_distance(
    store: &mut ReportStore,
    route: &[Coordinate],
    corridor_m: f64,
    now: DateTime<Utc>,
) -> Result<Vec<(SafetyReport, f64)>, ProximityError> {
    validate_radius(corridor_m)?;

    let mut coverage: Option<Coverage> = None;
    for point in route {
        let cells = covering_buckets(*point, corridor_m)?;
        coverage = Some(match coverage {
            Some(acc) => acc.merge(cells),
            None => cells,
        });
    }
    let Some(coverage) = coverage else {
        return Ok(Vec::new());
    };

    let mut matches: Vec<(SafetyReport, f64)> = coverage
        .candidates(store, now)
        .into_iter()
        .filter_map(|report| {
            let nearest = route
                .iter()
                .map(|point| distance_m(*point, report.location()))
                .min_by(f64::total_cmp)?;
            (nearest <= corridor_m).then_some((report, nearest))
        })
        .collect();

    matches.sort_by(by_distance);
    Ok(matches)
}

/// Active reports within `corridor_m` of any point of `route`, nearest
/// first.
///
/// # Errors
///
/// Returns [`ProximityError`] for an invalid route point or corridor width.
pub fn near_route(
    store: &mut ReportStore,
    route: &[Coordinate],
    corridor_m: f64,
    now: DateTime<Utc>,
) -> Result<Vec<SafetyReport>, ProximityError> {
    Ok(near_route_with_distance(store, route, corridor_m, now)?
        .into_iter()
        .map(|(report, _)| report)
        .collect())
}
