#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory cache of active safety reports.
//!
//! Reports are indexed three ways: by id (primary), by geohash bucket
//! (spatial lookups), and by `(created_at, insertion sequence)` (expiry and
//! eviction). Because every report lives exactly [`report_ttl`] after
//! creation, the age index is also an expiry index: expired entries always
//! form a prefix of it.
//!
//! Every read path applies lazy expiry, so an expired report is never
//! returned even if the periodic sweep has not run yet.
//!
//! [`report_ttl`]: roadwatch_report_models::report_ttl

pub mod dedup;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use roadwatch_geobucket::BucketKey;
use roadwatch_report_models::{InvalidCoordinate, MAX_CACHE_SIZE, ReportId, SafetyReport};

/// Errors returned by store operations. Both are caller mistakes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A report with this id is already cached.
    #[error("Report {id} is already in the store")]
    DuplicateId {
        /// The conflicting id.
        id: ReportId,
    },

    /// The report location is out of range.
    #[error(transparent)]
    InvalidCoordinate(#[from] InvalidCoordinate),
}

struct Entry {
    report: SafetyReport,
    seq: u64,
}

/// Key of the age index: oldest first, ties broken by insertion order.
type AgeKey = (DateTime<Utc>, u64, ReportId);

/// Bounded collection of active reports.
pub struct ReportStore {
    max_size: usize,
    reports: BTreeMap<ReportId, Entry>,
    buckets: BTreeMap<BucketKey, BTreeSet<ReportId>>,
    by_age: BTreeSet<AgeKey>,
    next_seq: u64,
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportStore {
    /// Creates an empty store bounded by [`MAX_CACHE_SIZE`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_size(MAX_CACHE_SIZE)
    }

    /// Creates an empty store with a custom bound (at least 1).
    #[must_use]
    pub const fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: if max_size == 0 { 1 } else { max_size },
            reports: BTreeMap::new(),
            buckets: BTreeMap::new(),
            by_age: BTreeSet::new(),
            next_seq: 0,
        }
    }

    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of cached reports, including any expired entries not yet
    /// swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Number of non-empty buckets in the spatial index.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Inserts a report.
    ///
    /// If the store would exceed its bound, expired entries are dropped
    /// first and then the oldest live reports are evicted until the bound
    /// holds. The removed reports are returned with `active` cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if a report with the same id is
    /// already cached. The store is left unchanged in that case.
    pub fn insert(
        &mut self,
        report: SafetyReport,
        now: DateTime<Utc>,
    ) -> Result<Vec<SafetyReport>, StoreError> {
        let id = report.id();
        if self.reports.contains_key(&id) {
            return Err(StoreError::DuplicateId { id });
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.by_age.insert((report.created_at(), seq, id));
        self.buckets
            .entry(report.bucket().clone())
            .or_default()
            .insert(id);
        log::debug!(
            "Cached {} report {id} in bucket {}",
            report.kind(),
            report.bucket()
        );
        self.reports.insert(id, Entry { report, seq });

        let mut removed = Vec::new();
        if self.reports.len() > self.max_size {
            removed.extend(self.remove_expired(now));
        }
        removed.extend(self.enforce_bound());

        Ok(removed)
    }

    /// Returns the report if it is cached and not expired.
    ///
    /// An expired entry is removed on the spot, exactly as if the sweep had
    /// already run.
    pub fn get_active(&mut self, id: ReportId, now: DateTime<Utc>) -> Option<SafetyReport> {
        let expired = self.reports.get(&id)?.report.is_expired_at(now);
        if expired {
            self.remove(id);
            return None;
        }
        self.reports.get(&id).map(|entry| entry.report.clone())
    }

    /// Returns every non-expired report whose bucket is in `keys`, removing
    /// any expired entries encountered along the way.
    pub fn active_in_buckets<'a, I>(
        &mut self,
        keys: I,
        now: DateTime<Utc>,
    ) -> Vec<SafetyReport>
    where
        I: IntoIterator<Item = &'a BucketKey>,
    {
        let keys: BTreeSet<&BucketKey> = keys.into_iter().collect();
        let mut active = Vec::new();
        let mut expired = Vec::new();

        for key in keys {
            let Some(ids) = self.buckets.get(key) else {
                continue;
            };
            for id in ids {
                let Some(entry) = self.reports.get(id) else {
                    continue;
                };
                if entry.report.is_expired_at(now) {
                    expired.push(*id);
                } else {
                    active.push(entry.report.clone());
                }
            }
        }

        for id in expired {
            self.remove(id);
        }

        active
    }

    /// Returns every non-expired report, oldest first.
    pub fn all_active(&mut self, now: DateTime<Utc>) -> Vec<SafetyReport> {
        self.remove_expired(now);
        self.by_age
            .iter()
            .filter_map(|(_, _, id)| self.reports.get(id))
            .map(|entry| entry.report.clone())
            .collect()
    }

    /// Removes every report with `expires_at <= now` and re-checks the size
    /// bound. Returns the removed reports with `active` cleared.
    ///
    /// Idempotent: a second call with the same `now` removes nothing.
    pub fn expire_and_evict(&mut self, now: DateTime<Utc>) -> Vec<SafetyReport> {
        let mut removed = self.remove_expired(now);
        removed.extend(self.enforce_bound());
        removed
    }

    /// Like [`Self::expire_and_evict`] but only reports how many entries were
    /// removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.expire_and_evict(now).len()
    }

    fn remove_expired(&mut self, now: DateTime<Utc>) -> Vec<SafetyReport> {
        let mut removed = Vec::new();

        while let Some(&(_, _, id)) = self.by_age.first() {
            let expired = self
                .reports
                .get(&id)
                .is_none_or(|entry| entry.report.is_expired_at(now));
            if !expired {
                break;
            }
            match self.remove(id) {
                Some(report) => removed.push(report),
                None => {
                    self.by_age.pop_first();
                }
            }
        }

        if !removed.is_empty() {
            log::debug!("Expired {} report(s)", removed.len());
        }

        removed
    }

    fn enforce_bound(&mut self) -> Vec<SafetyReport> {
        let mut evicted = Vec::new();

        while self.reports.len() > self.max_size {
            let Some(&(_, _, id)) = self.by_age.first() else {
                break;
            };
            match self.remove(id) {
                Some(report) => {
                    log::debug!("Evicted oldest report {id} to stay within {}", self.max_size);
                    evicted.push(report);
                }
                None => {
                    self.by_age.pop_first();
                }
            }
        }

        evicted
    }

    fn remove(&mut self, id: ReportId) -> Option<SafetyReport> {
        let Entry { mut report, seq } = self.reports.remove(&id)?;

        self.by_age.remove(&(report.created_at(), seq, id));
        if let Some(ids) = self.buckets.get_mut(report.bucket()) {
            ids.remove(&id);
            if ids.is_empty() {
                self.buckets.remove(report.bucket());
            }
        }

        report.deactivate();
        Some(report)
    }
}
