#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Safety report types and cache constants.
//!
//! A safety report is a short-lived, crowd-sourced hazard marker (police
//! presence, speed camera, accident) pinned to a coordinate. Reports are
//! immutable after creation except for the `active` flag, which only the
//! report store clears when it expires or evicts an entry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use roadwatch_geobucket::BucketKey;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// How long a report stays active after creation (45 minutes).
pub const REPORT_TTL_SECS: i64 = 45 * 60;

/// Two same-kind reports in neighboring buckets created within this many
/// seconds of each other are considered the same hazard (5 minutes).
pub const DEDUP_WINDOW_SECS: i64 = 5 * 60;

/// Upper bound on the number of active reports held in memory.
pub const MAX_CACHE_SIZE: usize = 1000;

/// Geohash precision of the spatial index (cells of roughly 1.2 x 0.6 km).
pub const BUCKET_PRECISION: usize = 6;

/// Default distance from a route point within which a report counts as
/// "on the route", in metres.
pub const ROUTE_CORRIDOR_M: f64 = 500.0;

/// Interval between expiry sweeps.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// [`REPORT_TTL_SECS`] as a duration.
#[must_use]
pub const fn report_ttl() -> TimeDelta {
    TimeDelta::seconds(REPORT_TTL_SECS)
}

/// [`DEDUP_WINDOW_SECS`] as a duration.
#[must_use]
pub const fn dedup_window() -> TimeDelta {
    TimeDelta::seconds(DEDUP_WINDOW_SECS)
}

/// The hazard a report describes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportKind {
    /// Police presence or a traffic stop
    Police,
    /// Fixed or mobile speed camera
    SpeedCamera,
    /// Collision or vehicle blocking the road
    Accident,
}

impl ReportKind {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Police, Self::SpeedCamera, Self::Accident]
    }
}

/// Error returned for a latitude/longitude pair outside the valid ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinate {
    /// The rejected latitude.
    pub latitude: f64,
    /// The rejected longitude.
    pub longitude: f64,
}

impl fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid coordinate ({}, {}): latitude must be within [-90, 90] \
             and longitude within [-180, 180]",
            self.latitude, self.longitude
        )
    }
}

impl std::error::Error for InvalidCoordinate {}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate without validating it.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Checks the coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCoordinate`] if either component is out of range or
    /// not finite.
    pub fn validate(self) -> Result<(), InvalidCoordinate> {
        roadwatch_geobucket::validate_coordinate(self.latitude, self.longitude)
            .map_err(|_| self.invalid())
    }

    /// Computes the index bucket for this coordinate at [`BUCKET_PRECISION`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCoordinate`] if the coordinate is out of range.
    pub fn bucket(self) -> Result<BucketKey, InvalidCoordinate> {
        roadwatch_geobucket::encode(self.latitude, self.longitude, BUCKET_PRECISION)
            .map_err(|_| self.invalid())
    }

    const fn invalid(self) -> InvalidCoordinate {
        InvalidCoordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

impl From<Coordinate> for geo::Point<f64> {
    fn from(c: Coordinate) -> Self {
        Self::new(c.longitude, c.latitude)
    }
}

/// Opaque, immutable report identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReportId(Uuid);

impl ReportId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ReportId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A crowd-sourced hazard report.
///
/// `expires_at` and `bucket` are derived once at construction and never
/// recomputed. Deserialization re-derives both from `created_at` and
/// `location` so persisted data cannot smuggle in an inconsistent index key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ReportRecord")]
pub struct SafetyReport {
    id: ReportId,
    kind: ReportKind,
    location: Coordinate,
    description: Option<String>,
    reporter: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    active: bool,
    bucket: BucketKey,
}

impl SafetyReport {
    /// Creates a new active report with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCoordinate`] if `location` is out of range.
    pub fn new(
        kind: ReportKind,
        location: Coordinate,
        created_at: DateTime<Utc>,
    ) -> Result<Self, InvalidCoordinate> {
        let bucket = location.bucket()?;

        Ok(Self {
            id: ReportId::new(),
            kind,
            location,
            description: None,
            reporter: None,
            created_at,
            expires_at: created_at + report_ttl(),
            active: true,
            bucket,
        })
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: ReportId) -> Self {
        self.id = id;
        self
    }

    /// Attaches a free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches an opaque reporter identifier.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl Into<String>) -> Self {
        self.reporter = Some(reporter.into());
        self
    }

    #[must_use]
    pub const fn id(&self) -> ReportId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> ReportKind {
        self.kind
    }

    #[must_use]
    pub const fn location(&self) -> Coordinate {
        self.location
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The reporter, or `None` for anonymous reports.
    #[must_use]
    pub fn reporter(&self) -> Option<&str> {
        self.reporter.as_deref()
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn bucket(&self) -> &BucketKey {
        &self.bucket
    }

    /// Whether the report has expired as of `now` (`expires_at <= now`).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time elapsed since creation. Negative if `now` precedes creation.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }

    /// Clears the `active` flag. Only the report store calls this, when the
    /// report leaves the cache through expiry or eviction.
    pub const fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Wire shape accepted when deserializing a [`SafetyReport`].
///
/// A stored `active` flag is ignored: a report read back into the cache is
/// active by definition, and expiry is decided from `created_at` alone.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRecord {
    id: ReportId,
    kind: ReportKind,
    location: Coordinate,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    reporter: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReportRecord> for SafetyReport {
    type Error = InvalidCoordinate;

    fn try_from(record: ReportRecord) -> Result<Self, Self::Error> {
        let mut report = Self::new(record.kind, record.location, record.created_at)?
            .with_id(record.id);
        report.description = record.description;
        report.reporter = record.reporter;
        Ok(report)
    }
}
