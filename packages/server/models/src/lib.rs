#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the roadwatch server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the engine types so the API contract can evolve independently of
//! the cache representation.

use chrono::{DateTime, Utc};
use roadwatch_alert::{AlertSeverity, ReportAlert};
use roadwatch_report_models::{Coordinate, ReportId, ReportKind};
use serde::{Deserialize, Serialize};

/// Default search radius for the nearby endpoint, in metres.
pub const DEFAULT_NEARBY_RADIUS_M: f64 = 1_000.0;

/// Largest search radius or corridor the API accepts, in metres. Larger
/// values are clamped.
pub const MAX_SEARCH_RADIUS_M: f64 = 50_000.0;

/// A safety report as returned by the API, with its current alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReport {
    /// Unique report ID.
    pub id: ReportId,
    /// Hazard kind.
    pub kind: ReportKind,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Free-text note from the reporter.
    pub description: Option<String>,
    /// Reporter identifier.
    pub reporter: Option<String>,
    /// When the report was accepted (ISO 8601).
    pub created_at: DateTime<Utc>,
    /// When the report stops being returned (ISO 8601).
    pub expires_at: DateTime<Utc>,
    /// Alert severity at response time.
    pub severity: AlertSeverity,
    /// Alert text.
    pub message: String,
}

impl From<ReportAlert> for ApiReport {
    fn from(alert: ReportAlert) -> Self {
        let report = alert.report;
        let location = report.location();
        Self {
            id: report.id(),
            kind: report.kind(),
            latitude: location.latitude,
            longitude: location.longitude,
            description: report.description().map(str::to_string),
            reporter: report.reporter().map(str::to_string),
            created_at: report.created_at(),
            expires_at: report.expires_at(),
            severity: alert.severity,
            message: alert.message,
        }
    }
}

/// Body of `POST /api/reports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiNewReport {
    /// Hazard kind (`police`, `speed_camera` or `accident`).
    pub kind: ReportKind,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Optional free-text note.
    pub description: Option<String>,
    /// Optional reporter identifier.
    pub reporter: Option<String>,
}

impl ApiNewReport {
    #[must_use]
    pub const fn location(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Response from `POST /api/reports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSubmitResponse {
    /// `false` when the submission duplicated an active report.
    pub accepted: bool,
    /// The stored report, present only when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ApiReport>,
}

/// Query parameters for `GET /api/reports/nearby`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQueryParams {
    /// Latitude of the search center.
    pub lat: f64,
    /// Longitude of the search center.
    pub lng: f64,
    /// Search radius in metres.
    pub radius: Option<f64>,
}

impl NearbyQueryParams {
    #[must_use]
    pub const fn center(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    /// The requested radius, defaulted and clamped to the API limit.
    #[must_use]
    pub fn radius_m(&self) -> f64 {
        clamp_distance(self.radius.unwrap_or(DEFAULT_NEARBY_RADIUS_M))
    }
}

/// A route point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPoint {
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
}

impl From<ApiPoint> for Coordinate {
    fn from(point: ApiPoint) -> Self {
        Self::new(point.latitude, point.longitude)
    }
}

/// Body of `POST /api/reports/route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRouteRequest {
    /// Route polyline points in travel order.
    pub points: Vec<ApiPoint>,
    /// Corridor width in metres; the engine default applies when absent.
    pub corridor: Option<f64>,
}

/// Alert text for one report kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKind {
    /// Kind name as accepted by the submission endpoint.
    pub kind: ReportKind,
    /// Alert text shown for this kind.
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Active reports in the cache.
    pub active_reports: usize,
}

/// Error body returned with 4xx/5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable error message.
    pub error: String,
}

impl ApiError {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Clamps a requested distance to [`MAX_SEARCH_RADIUS_M`]. Negative and
/// non-finite values pass through so the engine can reject them.
#[must_use]
pub fn clamp_distance(metres: f64) -> f64 {
    if metres.is_finite() {
        metres.min(MAX_SEARCH_RADIUS_M)
    } else {
        metres
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_radius_defaults_and_clamps() {
        let params = NearbyQueryParams {
            lat: 0.0,
            lng: 0.0,
            radius: None,
        };
        assert!((params.radius_m() - DEFAULT_NEARBY_RADIUS_M).abs() < f64::EPSILON);

        let params = NearbyQueryParams {
            radius: Some(250_000.0),
            ..params
        };
        assert!((params.radius_m() - MAX_SEARCH_RADIUS_M).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_and_nan_distances_pass_through() {
        assert!(clamp_distance(-5.0) < 0.0);
        assert!(clamp_distance(f64::NAN).is_nan());
    }

    #[test]
    fn new_report_body_uses_snake_case_kinds() {
        let body: ApiNewReport = serde_json::from_value(serde_json::json!({
            "kind": "speed_camera",
            "latitude": 32.08,
            "longitude": 34.78,
        }))
        .unwrap();
        assert_eq!(body.kind, ReportKind::SpeedCamera);
        assert!(body.description.is_none());
    }

    #[test]
    fn duplicate_response_omits_report() {
        let json = serde_json::to_value(ApiSubmitResponse {
            accepted: false,
            report: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "accepted": false }));
    }
}
