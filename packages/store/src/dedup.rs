//! Near-duplicate detection for incoming reports.
//!
//! A candidate is a duplicate when an active report of the same kind sits in
//! the candidate's bucket or one of its eight neighbors and was created
//! within [`dedup_window`] of the candidate. This is deliberately coarse:
//! several drivers reporting the same hazard a few hundred metres apart
//! collapse into the first report.
//!
//! [`dedup_window`]: roadwatch_report_models::dedup_window

use chrono::{DateTime, Utc};
use roadwatch_report_models::{SafetyReport, dedup_window};

use crate::ReportStore;

/// Returns the existing report that `candidate` duplicates, if any.
///
/// When several reports match, the one created closest in time to the
/// candidate wins.
pub fn find_duplicate(
    store: &mut ReportStore,
    candidate: &SafetyReport,
    now: DateTime<Utc>,
) -> Option<SafetyReport> {
    let window = dedup_window();
    let buckets = roadwatch_geobucket::neighbors(candidate.bucket());

    store
        .active_in_buckets(&buckets, now)
        .into_iter()
        .filter(|existing| existing.kind() == candidate.kind())
        .filter(|existing| (candidate.created_at() - existing.created_at()).abs() < window)
        .min_by_key(|existing| (candidate.created_at() - existing.created_at()).abs())
}

/// Whether `candidate` duplicates an active report in `store`.
pub fn is_duplicate(
    store: &mut ReportStore,
    candidate: &SafetyReport,
    now: DateTime<Utc>,
) -> bool {
    find_duplicate(store, candidate, now).is_some()
}

#[cfg(test)]
mod tests {
    use roadwatch_geobucket::cell_span_degrees;
    use roadwatch_report_models::{BUCKET_PRECISION, ReportKind};

    use super::*;
    use crate::test_utils::{minutes, report_at, t0};

    fn store_with(report: &SafetyReport) -> ReportStore {
        let mut store = ReportStore::new();
        store.insert(report.clone(), report.created_at()).unwrap();
        store
    }

    #[test]
    fn identical_submission_is_duplicate() {
        let first = report_at(ReportKind::Police, 32.08, 34.78, t0());
        let mut store = store_with(&first);

        let again = report_at(ReportKind::Police, 32.08, 34.78, t0());
        assert_eq!(
            find_duplicate(&mut store, &again, t0()).map(|r| r.id()),
            Some(first.id())
        );
    }

    #[test]
    fn outside_window_is_not_duplicate() {
        let first = report_at(ReportKind::Police, 32.08, 34.78, t0());
        let mut store = store_with(&first);

        let later = report_at(ReportKind::Police, 32.08, 34.78, t0() + minutes(5));
        assert!(!is_duplicate(&mut store, &later, t0() + minutes(5)));

        let almost = report_at(
            ReportKind::Police,
            32.08,
            34.78,
            t0() + minutes(5) - chrono::TimeDelta::seconds(1),
        );
        assert!(is_duplicate(&mut store, &almost, t0() + minutes(5)));
    }

    #[test]
    fn different_kind_is_not_duplicate() {
        let first = report_at(ReportKind::Police, 32.08, 34.78, t0());
        let mut store = store_with(&first);

        let camera = report_at(ReportKind::SpeedCamera, 32.08, 34.78, t0());
        assert!(!is_duplicate(&mut store, &camera, t0()));
    }

    #[test]
    fn neighboring_bucket_within_window_is_duplicate() {
        let first = report_at(ReportKind::SpeedCamera, 32.08, 34.78, t0());
        let mut store = store_with(&first);

        let (_, lng_span) = cell_span_degrees(BUCKET_PRECISION);
        let second = report_at(
            ReportKind::SpeedCamera,
            32.08,
            34.78 + lng_span,
            t0() + minutes(2),
        );
        assert_ne!(second.bucket(), first.bucket());

        assert!(is_duplicate(&mut store, &second, t0() + minutes(2)));
    }

    #[test]
    fn two_cells_away_is_not_duplicate() {
        let first = report_at(ReportKind::Accident, 32.08, 34.78, t0());
        let mut store = store_with(&first);

        let (_, lng_span) = cell_span_degrees(BUCKET_PRECISION);
        let far = report_at(
            ReportKind::Accident,
            32.08,
            lng_span.mul_add(2.5, 34.78),
            t0(),
        );
        assert!(!is_duplicate(&mut store, &far, t0()));
    }

    #[test]
    fn expired_report_never_counts() {
        let first = report_at(ReportKind::Accident, 32.08, 34.78, t0());
        let mut store = store_with(&first);

        // Created inside the window relative to `first`, but evaluated after
        // `first` has expired.
        let candidate = report_at(ReportKind::Accident, 32.08, 34.78, t0() + minutes(4));
        assert!(!is_duplicate(&mut store, &candidate, first.expires_at()));
        assert!(store.is_empty());
    }
}
