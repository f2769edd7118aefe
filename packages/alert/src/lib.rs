#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Alert severity and messages for safety reports.
//!
//! Severity depends only on the report kind and its age: fresh accidents and
//! police sightings are urgent, older ones decay. Speed cameras are permanent
//! hazards and never decay.

use chrono::{DateTime, TimeDelta, Utc};
use roadwatch_report_models::{ReportKind, SafetyReport};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Accidents stay [`AlertSeverity::High`] for this many minutes.
pub const ACCIDENT_HIGH_MINUTES: i64 = 15;

/// Police reports stay [`AlertSeverity::High`] for this many minutes.
pub const POLICE_HIGH_MINUTES: i64 = 30;

/// How urgently the client should surface a report.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

/// A report together with its derived alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAlert {
    /// The report being alerted on.
    pub report: SafetyReport,
    /// Severity at evaluation time.
    pub severity: AlertSeverity,
    /// Human-readable alert text.
    pub message: String,
}

/// Derives the severity of `report` as of `now`.
#[must_use]
pub fn severity(report: &SafetyReport, now: DateTime<Utc>) -> AlertSeverity {
    let age = report.age_at(now);

    match report.kind() {
        ReportKind::Accident if age < TimeDelta::minutes(ACCIDENT_HIGH_MINUTES) => {
            AlertSeverity::High
        }
        ReportKind::Accident | ReportKind::SpeedCamera => AlertSeverity::Medium,
        ReportKind::Police if age < TimeDelta::minutes(POLICE_HIGH_MINUTES) => {
            AlertSeverity::High
        }
        ReportKind::Police => AlertSeverity::Low,
    }
}

/// Alert text shown for a report kind.
#[must_use]
pub const fn message(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Police => "Police reported ahead",
        ReportKind::SpeedCamera => "Speed camera ahead",
        ReportKind::Accident => "Accident reported ahead",
    }
}

/// Builds the full alert for a report.
#[must_use]
pub fn evaluate(report: &SafetyReport, now: DateTime<Utc>) -> ReportAlert {
    ReportAlert {
        severity: severity(report, now),
        message: message(report.kind()).to_string(),
        report: report.clone(),
    }
}
