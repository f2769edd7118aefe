//! Outbound sync of accepted reports to other clients.

use roadwatch_report_models::SafetyReport;

/// Receives every accepted report after it is cached.
///
/// Implementations must return quickly and swallow their own failures; the
/// engine never waits on or retries a broadcast.
pub trait ReportBroadcaster: Send + Sync {
    fn broadcast(&self, report: &SafetyReport);
}

/// Drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl ReportBroadcaster for NoopBroadcaster {
    fn broadcast(&self, _report: &SafetyReport) {}
}

/// Logs each report at info level. Useful when running a single node.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl ReportBroadcaster for LogBroadcaster {
    fn broadcast(&self, report: &SafetyReport) {
        log::info!(
            "Broadcasting {} report {} at ({}, {}), expires {}",
            report.kind(),
            report.id(),
            report.location().latitude,
            report.location().longitude,
            report.expires_at()
        );
    }
}
