#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Report submission pipeline and query facade.
//!
//! [`ReportEngine`] owns the report cache and is the only way to reach it.
//! It is built explicitly and shared through an `Arc`. All cache access goes
//! through a single mutex, so a deduplication check and the insert that
//! follows it can never interleave with another submission. Persistence and
//! broadcast run after the lock is released.

pub mod broadcast;
pub mod clock;
pub mod persistence;
pub mod scheduler;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use roadwatch_alert::ReportAlert;
use roadwatch_proximity::ProximityError;
use roadwatch_report_models::{
    Coordinate, InvalidCoordinate, MAX_CACHE_SIZE, ROUTE_CORRIDOR_M, ReportId, ReportKind,
    SafetyReport,
};
use roadwatch_store::{ReportStore, StoreError, dedup};
use tokio::sync::watch;

use crate::broadcast::{NoopBroadcaster, ReportBroadcaster};
use crate::clock::{Clock, SystemClock};
use crate::persistence::{NoopPersistence, PersistenceError, ReportPersistence};

/// Errors returned by [`ReportEngine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The submitted location is out of range.
    #[error(transparent)]
    InvalidCoordinate(#[from] InvalidCoordinate),

    /// The cache rejected the report.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A proximity query had invalid parameters.
    #[error(transparent)]
    Proximity(#[from] ProximityError),

    /// Loading persisted reports failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// Whether the error was caused by the caller's input.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }
}

/// A report as submitted by a user, before the engine stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub kind: ReportKind,
    pub location: Coordinate,
    pub description: Option<String>,
    pub reporter: Option<String>,
}

impl NewReport {
    #[must_use]
    pub const fn new(kind: ReportKind, location: Coordinate) -> Self {
        Self {
            kind,
            location,
            description: None,
            reporter: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: impl Into<String>) -> Self {
        self.reporter = Some(reporter.into());
        self
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The report was cached and handed to the collaborators.
    Accepted(SafetyReport),
    /// An active report already covers this hazard. Nothing was stored.
    Duplicate {
        /// The report the submission was folded into.
        existing: SafetyReport,
    },
}

impl SubmitOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The stored report: the new one if accepted, otherwise the existing
    /// one it duplicated.
    #[must_use]
    pub const fn report(&self) -> &SafetyReport {
        match self {
            Self::Accepted(report) | Self::Duplicate { existing: report } => report,
        }
    }
}

/// The live view published to a nearby subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbySnapshot {
    pub center: Coordinate,
    pub radius_m: f64,
    /// Active reports in range, nearest first.
    pub alerts: Vec<ReportAlert>,
    pub computed_at: DateTime<Utc>,
}

struct NearbySubscription {
    center: Coordinate,
    radius_m: f64,
    sender: watch::Sender<NearbySnapshot>,
}

/// Owner of the report cache.
pub struct ReportEngine {
    store: Mutex<ReportStore>,
    clock: Arc<dyn Clock>,
    persistence: Arc<dyn ReportPersistence>,
    broadcaster: Arc<dyn ReportBroadcaster>,
    nearby: Mutex<Option<NearbySubscription>>,
}

impl Default for ReportEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEngine {
    /// Creates an engine with the default cache bound, the system clock and
    /// no-op collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(ReportStore::with_max_size(MAX_CACHE_SIZE)),
            clock: Arc::new(SystemClock),
            persistence: Arc::new(NoopPersistence),
            broadcaster: Arc::new(NoopBroadcaster),
            nearby: Mutex::new(None),
        }
    }

    /// Replaces the cache with an empty one bounded at `max_size`.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.store = Mutex::new(ReportStore::with_max_size(max_size));
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn ReportPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn ReportBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    fn lock_store(&self) -> MutexGuard<'_, ReportStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_nearby(&self) -> MutexGuard<'_, Option<NearbySubscription>> {
        self.nearby.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stamps, deduplicates and caches a new report.
    ///
    /// Accepted reports are handed to the persistence and broadcast
    /// collaborators, and the nearby view is refreshed. Duplicates are
    /// absorbed without touching either.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidCoordinate`] for an out-of-range
    /// location.
    pub fn submit(&self, new_report: NewReport) -> Result<SubmitOutcome, EngineError> {
        let now = self.clock.now();

        let mut report = SafetyReport::new(new_report.kind, new_report.location, now)?;
        if let Some(description) = new_report.description {
            report = report.with_description(description);
        }
        if let Some(reporter) = new_report.reporter {
            report = report.with_reporter(reporter);
        }

        let evicted = {
            let mut store = self.lock_store();
            if let Some(existing) = dedup::find_duplicate(&mut store, &report, now) {
                log::debug!(
                    "Folded {} report at ({}, {}) into existing report {}",
                    report.kind(),
                    report.location().latitude,
                    report.location().longitude,
                    existing.id()
                );
                return Ok(SubmitOutcome::Duplicate { existing });
            }
            store.insert(report.clone(), now)?
        };

        log::info!(
            "Accepted {} report {} in bucket {}",
            report.kind(),
            report.id(),
            report.bucket()
        );
        if !evicted.is_empty() {
            log::debug!("Removed {} report(s) to stay within the cache bound", evicted.len());
        }

        self.persistence.persist(&report);
        self.broadcaster.broadcast(&report);
        self.refresh_nearby();

        Ok(SubmitOutcome::Accepted(report))
    }

    /// Returns the report if it is cached and still active.
    #[must_use]
    pub fn get(&self, id: ReportId) -> Option<SafetyReport> {
        let now = self.clock.now();
        self.lock_store().get_active(id, now)
    }

    /// Active reports within `radius_m` of `center`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Proximity`] for an invalid center or radius.
    pub fn near_point(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<SafetyReport>, EngineError> {
        let now = self.clock.now();
        let mut store = self.lock_store();
        Ok(roadwatch_proximity::near_point(
            &mut store, center, radius_m, now,
        )?)
    }

    /// Active reports within the default corridor of any route point.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Proximity`] for an invalid route point.
    pub fn near_route(&self, route: &[Coordinate]) -> Result<Vec<SafetyReport>, EngineError> {
        self.near_route_with_corridor(route, ROUTE_CORRIDOR_M)
    }

    /// Active reports within `corridor_m` of any route point, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Proximity`] for an invalid route point or
    /// corridor width.
    pub fn near_route_with_corridor(
        &self,
        route: &[Coordinate],
        corridor_m: f64,
    ) -> Result<Vec<SafetyReport>, EngineError> {
        let now = self.clock.now();
        let mut store = self.lock_store();
        Ok(roadwatch_proximity::near_route(
            &mut store, route, corridor_m, now,
        )?)
    }

    fn alerts_near_point_at(
        &self,
        center: Coordinate,
        radius_m: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReportAlert>, EngineError> {
        let reports = {
            let mut store = self.lock_store();
            roadwatch_proximity::near_point(&mut store, center, radius_m, now)?
        };
        Ok(reports
            .iter()
            .map(|report| roadwatch_alert::evaluate(report, now))
            .collect())
    }

    /// Alerts for the active reports within `radius_m` of `center`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Proximity`] for an invalid center or radius.
    pub fn alerts_near_point(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<ReportAlert>, EngineError> {
        self.alerts_near_point_at(center, radius_m, self.clock.now())
    }

    /// Alerts for the active reports within `corridor_m` of the route.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Proximity`] for an invalid route point or
    /// corridor width.
    pub fn alerts_near_route(
        &self,
        route: &[Coordinate],
        corridor_m: f64,
    ) -> Result<Vec<ReportAlert>, EngineError> {
        let now = self.clock.now();
        let reports = {
            let mut store = self.lock_store();
            roadwatch_proximity::near_route(&mut store, route, corridor_m, now)?
        };
        Ok(reports
            .iter()
            .map(|report| roadwatch_alert::evaluate(report, now))
            .collect())
    }

    /// Number of active reports, applying expiry first.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        self.lock_store().all_active(now).len()
    }

    /// Number of cached entries, including expired ones not yet swept.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.lock_store().len()
    }

    /// Removes expired reports, re-checks the cache bound, prunes persisted
    /// reports that are gone, and refreshes the nearby view. Returns the
    /// number removed.
    ///
    /// The nearby view is recomputed on every sweep, not only when this call
    /// removed something: reads expire reports lazily and do not publish.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut store = self.lock_store();
            let removed = store.expire_and_evict(now);
            if !removed.is_empty() {
                // Queued under the lock so no later append can be ordered
                // before the rewrite.
                self.persistence.prune(&store.all_active(now));
            }
            removed.len()
        };

        if removed > 0 {
            log::debug!("Swept {removed} report(s) at {now}");
        }
        self.refresh_nearby();

        removed
    }

    /// Loads still-active reports from `persistence` into the cache.
    ///
    /// Reports are inserted as-is without deduplication, since they were
    /// accepted before. Ids already cached are skipped. Returns the number
    /// of reports that are in the cache afterwards; a report evicted by a
    /// later insert of the same batch is not counted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if the reports cannot be loaded.
    pub fn seed_from(&self, persistence: &dyn ReportPersistence) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let reports = persistence.load_active_reports(now)?;
        let total = reports.len();

        let mut inserted = BTreeSet::new();
        let mut evicted = BTreeSet::new();
        {
            let mut store = self.lock_store();
            for report in reports {
                if report.is_expired_at(now) {
                    continue;
                }
                let id = report.id();
                match store.insert(report, now) {
                    Ok(removed) => {
                        inserted.insert(id);
                        evicted.extend(removed.iter().map(SafetyReport::id));
                    }
                    Err(e) => log::warn!("Skipping persisted report: {e}"),
                }
            }
        }
        let seeded = inserted.difference(&evicted).count();

        log::info!("Seeded {seeded} of {total} persisted report(s)");
        if seeded > 0 {
            self.refresh_nearby();
        }
        Ok(seeded)
    }

    fn snapshot(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<NearbySnapshot, EngineError> {
        let now = self.clock.now();
        Ok(NearbySnapshot {
            center,
            radius_m,
            alerts: self.alerts_near_point_at(center, radius_m, now)?,
            computed_at: now,
        })
    }

    /// Starts publishing the reports around `center` to a watch channel.
    ///
    /// The view is recomputed after every accepted submission, seeding and
    /// sweep. Only one subscription exists at a time; subscribing again
    /// replaces it and closes the previous channel.
    /// Receivers are notified only when the visible alerts change.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Proximity`] for an invalid center or radius.
    pub fn subscribe_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<watch::Receiver<NearbySnapshot>, EngineError> {
        let mut nearby = self.lock_nearby();
        let snapshot = self.snapshot(center, radius_m)?;
        let (sender, receiver) = watch::channel(snapshot);

        *nearby = Some(NearbySubscription {
            center,
            radius_m,
            sender,
        });
        log::debug!(
            "Watching {radius_m}m around ({}, {})",
            center.latitude,
            center.longitude
        );

        Ok(receiver)
    }

    /// Stops the nearby subscription. Returns whether one was active.
    pub fn unsubscribe_nearby(&self) -> bool {
        self.lock_nearby().take().is_some()
    }

    fn refresh_nearby(&self) {
        let nearby = self.lock_nearby();
        let Some(subscription) = nearby.as_ref() else {
            return;
        };

        match self.snapshot(subscription.center, subscription.radius_m) {
            Ok(snapshot) => {
                subscription.sender.send_if_modified(|current| {
                    if current.alerts == snapshot.alerts {
                        false
                    } else {
                        *current = snapshot;
                        true
                    }
                });
            }
            Err(e) => log::warn!("Failed to refresh nearby reports: {e}"),
        }
    }
}
