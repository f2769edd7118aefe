//! Durable storage of accepted reports.
//!
//! The cache is the source of truth while the process runs. Persistence only
//! exists so a restart does not lose reports that are still active, so
//! writes are best-effort and happen off the request path.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use roadwatch_report_models::SafetyReport;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::{mpsc, oneshot};

/// Errors from loading or compacting persisted reports.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading or rewriting the backing file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A report could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Storage collaborator for accepted reports.
pub trait ReportPersistence: Send + Sync {
    /// Loads every stored report that is still active at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the backing storage cannot be read.
    fn load_active_reports(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SafetyReport>, PersistenceError>;

    /// Queues `report` for storage. Must not block; failures are logged by
    /// the implementation and never surfaced to the caller.
    fn persist(&self, report: &SafetyReport);

    /// Queues a rewrite of storage down to exactly `active`, dropping
    /// reports that expired or were evicted. Must not block.
    fn prune(&self, active: &[SafetyReport]) {
        let _ = active;
    }
}

/// Stores nothing and loads nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

impl ReportPersistence for NoopPersistence {
    fn load_active_reports(
        &self,
        _now: DateTime<Utc>,
    ) -> Result<Vec<SafetyReport>, PersistenceError> {
        Ok(Vec::new())
    }

    fn persist(&self, _report: &SafetyReport) {}
}

enum WriterCommand {
    Append(String),
    Rewrite(Vec<String>),
    Flush(oneshot::Sender<()>),
}

/// Appends one JSON report per line to a file.
///
/// Writes are handed to a background task over an unbounded channel, so
/// [`ReportPersistence::persist`] never waits on disk. Loading drops expired
/// and malformed lines and rewrites the file with what is left, and
/// [`ReportPersistence::prune`] does the same from the running cache, so the
/// file holds at most the active reports plus those appended since the last
/// sweep.
pub struct JsonLinesPersistence {
    path: PathBuf,
    sender: mpsc::UnboundedSender<WriterCommand>,
}

impl JsonLinesPersistence {
    /// Starts the writer task for `path`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), receiver));
        Self { path, sender }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until every report queued before this call has been written
    /// (or has failed to write).
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(WriterCommand::Flush(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }

    fn compact(&self, reports: &[SafetyReport]) -> Result<(), PersistenceError> {
        let mut contents = String::new();
        for report in reports {
            contents.push_str(&serde_json::to_string(report)?);
            contents.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ReportPersistence for JsonLinesPersistence {
    fn load_active_reports(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SafetyReport>, PersistenceError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No persisted reports at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut seen = BTreeSet::new();
        let mut active = Vec::new();
        let mut lines = 0_usize;

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            lines += 1;

            match serde_json::from_str::<SafetyReport>(line) {
                Ok(report) if report.is_expired_at(now) => {}
                Ok(report) => {
                    if seen.insert(report.id()) {
                        active.push(report);
                    }
                }
                Err(e) => log::warn!(
                    "Skipping malformed report on line {} of {}: {e}",
                    index + 1,
                    self.path.display()
                ),
            }
        }

        if active.len() < lines {
            log::info!(
                "Compacting {}: {} of {lines} stored reports still active",
                self.path.display(),
                active.len()
            );
            self.compact(&active)?;
        }

        Ok(active)
    }

    fn persist(&self, report: &SafetyReport) {
        match serde_json::to_string(report) {
            Ok(line) => {
                if self.sender.send(WriterCommand::Append(line)).is_err() {
                    log::warn!(
                        "Report writer for {} has stopped, dropping report {}",
                        self.path.display(),
                        report.id()
                    );
                }
            }
            Err(e) => log::warn!("Failed to serialize report {}: {e}", report.id()),
        }
    }

    fn prune(&self, active: &[SafetyReport]) {
        let lines: Result<Vec<String>, _> = active.iter().map(serde_json::to_string).collect();
        match lines {
            Ok(lines) => {
                if self.sender.send(WriterCommand::Rewrite(lines)).is_err() {
                    log::warn!(
                        "Report writer for {} has stopped, skipping prune",
                        self.path.display()
                    );
                }
            }
            Err(e) => log::warn!("Failed to serialize reports for pruning: {e}"),
        }
    }
}

async fn run_writer(path: PathBuf, mut receiver: mpsc::UnboundedReceiver<WriterCommand>) {
    log::debug!("Report writer for {} started", path.display());

    while let Some(command) = receiver.recv().await {
        let mut rewrite = None;
        let mut lines = Vec::new();
        let mut waiting = Vec::new();

        let mut next = Some(command);
        while let Some(command) = next {
            match command {
                WriterCommand::Append(line) => lines.push(line),
                WriterCommand::Rewrite(all) => {
                    // Earlier appends are superseded by the full rewrite.
                    lines.clear();
                    rewrite = Some(all);
                }
                WriterCommand::Flush(done) => waiting.push(done),
            }
            next = receiver.try_recv().ok();
        }

        if let Some(all) = rewrite {
            if let Err(e) = rewrite_lines(&path, &all).await {
                log::warn!("Failed to prune {}: {e}", path.display());
            }
        }

        if !lines.is_empty() {
            if let Err(e) = append_lines(&path, &lines).await {
                log::warn!(
                    "Failed to persist {} report(s) to {}: {e}",
                    lines.len(),
                    path.display()
                );
            }
        }

        for done in waiting {
            let _ = done.send(());
        }
    }

    log::debug!("Report writer for {} stopped", path.display());
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

fn join_lines(lines: &[String]) -> String {
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    buf
}

async fn rewrite_lines(path: &Path, lines: &[String]) -> std::io::Result<()> {
    ensure_parent(path).await?;
    let tmp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, join_lines(lines)).await?;
    tokio::fs::rename(&tmp, path).await?;
    log::debug!("Pruned {} to {} report(s)", path.display(), lines.len());
    Ok(())
}

/// Opens the file for each batch so a compaction that replaced it is picked
/// up.
async fn append_lines(path: &Path, lines: &[String]) -> std::io::Result<()> {
    ensure_parent(path).await?;
    let buf = join_lines(lines);

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buf.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use roadwatch_report_models::{Coordinate, ReportKind};

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn scratch_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "roadwatch_persistence_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("reports.jsonl")
    }

    fn report(kind: ReportKind, created_at: DateTime<Utc>) -> SafetyReport {
        SafetyReport::new(kind, Coordinate::new(32.08, 34.78), created_at).unwrap()
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let path = scratch_file("missing");
        let persistence = JsonLinesPersistence::spawn(&path);
        assert!(persistence.load_active_reports(t0()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn persisted_reports_load_back() {
        let path = scratch_file("roundtrip");
        let persistence = JsonLinesPersistence::spawn(&path);

        let first = report(ReportKind::Police, t0()).with_description("Unmarked car");
        let second = report(ReportKind::SpeedCamera, t0());
        persistence.persist(&first);
        persistence.persist(&second);
        persistence.flush().await;

        let loaded = persistence.load_active_reports(t0()).unwrap();
        assert_eq!(loaded, vec![first, second]);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn load_drops_expired_and_malformed_lines_and_compacts() {
        let path = scratch_file("compact");
        let persistence = JsonLinesPersistence::spawn(&path);

        let old = report(ReportKind::Accident, t0() - TimeDelta::hours(1));
        let fresh = report(ReportKind::Accident, t0());
        persistence.persist(&old);
        persistence.persist(&fresh);
        persistence.flush().await;

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json\n");
        std::fs::write(&path, contents).unwrap();

        let loaded = persistence.load_active_reports(t0()).unwrap();
        assert_eq!(loaded, vec![fresh.clone()]);

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert_eq!(rewritten.lines().count(), 1);

        // Appends after compaction land in the rewritten file.
        let later = report(ReportKind::Police, t0());
        persistence.persist(&later);
        persistence.flush().await;
        assert_eq!(
            persistence.load_active_reports(t0()).unwrap(),
            vec![fresh, later]
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn prune_rewrites_file_to_active_set() {
        let path = scratch_file("prune");
        let persistence = JsonLinesPersistence::spawn(&path);

        let gone = report(ReportKind::Accident, t0());
        let kept = report(ReportKind::Police, t0());
        persistence.persist(&gone);
        persistence.persist(&kept);
        persistence.prune(std::slice::from_ref(&kept));
        let later = report(ReportKind::SpeedCamera, t0());
        persistence.persist(&later);
        persistence.flush().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(
            persistence.load_active_reports(t0()).unwrap(),
            vec![kept, later]
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn repeated_ids_load_once() {
        let path = scratch_file("repeated");
        let persistence = JsonLinesPersistence::spawn(&path);

        let only = report(ReportKind::Police, t0());
        persistence.persist(&only);
        persistence.persist(&only);
        persistence.flush().await;

        assert_eq!(persistence.load_active_reports(t0()).unwrap(), vec![only]);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn noop_persistence_is_empty() {
        let persistence = NoopPersistence;
        persistence.persist(&report(ReportKind::Police, t0()));
        assert!(persistence.load_active_reports(t0()).unwrap().is_empty());
    }
}
