//! Era-based resource liveness tracking
//!
//! Every apply or delete starts a new era. Resources confirmed during the
//! run are touched with the current era; a sweep over a prefix removes every
//! record under it that was last touched in an older era, after asking a
//! [`Reclaimer`] to release the real resource.
//!
//! Touching goes through an [`EraSession`], and `sweep_and_gc` consumes the
//! session, so a sweep cannot start while anything still holds the session
//! for touching.

mod state;
mod sweep;

pub use state::{EraStateData, ResourceRecord, SCHEMA_ID, SCHEMA_VERSION, STATE_FILENAME};
pub use sweep::{CleanupFailure, Reclaimer, ResourceCleanupError, SweepReport};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors for era operations
#[derive(Debug, Error)]
pub enum EraError {
    #[error("another era is already in progress (era {0})")]
    EraInProgress(u64),

    #[error("unsupported era state schema version {found} in {path}")]
    Schema { path: PathBuf, found: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Owns the era counter and all resource records.
#[derive(Debug)]
pub struct EraTracker {
    /// State file; `None` keeps everything in memory
    path: Option<PathBuf>,
    state: Mutex<EraStateData>,
    active: AtomicBool,
}

impl EraTracker {
    /// Open (or create) the tracker stored in `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, EraError> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(STATE_FILENAME);
        let data = EraStateData::load_or_default(&path)?;
        debug!(path = %path.display(), era = data.era, records = data.resources.len(), "opened era state");
        Ok(Self {
            path: Some(path),
            state: Mutex::new(data),
            active: AtomicBool::new(false),
        })
    }

    /// A tracker that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(EraStateData::default()),
            active: AtomicBool::new(false),
        }
    }

    /// Path of the backing state file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The most recently started era.
    pub fn current_era(&self) -> u64 {
        self.lock_state().era
    }

    /// Snapshot of the records under `prefix`.
    pub fn resources(&self, prefix: &str) -> Vec<ResourceRecord> {
        self.lock_state().under_prefix(prefix).cloned().collect()
    }

    /// Advance the era counter and open a session for it.
    ///
    /// The state file is re-read first so that eras recorded by other
    /// processes since [`EraTracker::open`] are not reused; callers are
    /// expected to hold the state lock at this point.
    pub fn start_era(&self) -> Result<EraSession<'_>, EraError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EraError::EraInProgress(self.current_era()));
        }
        match self.advance() {
            Ok(era) => {
                info!(era, "started era");
                Ok(EraSession { tracker: self, era })
            }
            Err(e) => {
                self.active.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn advance(&self) -> Result<u64, EraError> {
        let mut state = self.lock_state();
        if let Some(path) = &self.path {
            *state = EraStateData::load_or_default(path)?;
        }
        state.era += 1;
        state.updated_at = Utc::now();
        self.persist(&state)?;
        Ok(state.era)
    }

    fn lock_state(&self) -> MutexGuard<'_, EraStateData> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &EraStateData) -> Result<(), EraError> {
        if let Some(path) = &self.path {
            state.write_to_file(path)?;
        }
        Ok(())
    }
}

/// The current era of one apply or delete invocation.
///
/// `EraSession` is `Sync`: concurrent sub-tasks may touch through a shared
/// reference. Dropping it without sweeping or [`EraSession::abandon`] ends
/// the era with no collection and leaves its touches unsaved.
#[derive(Debug)]
pub struct EraSession<'a> {
    tracker: &'a EraTracker,
    era: u64,
}

impl<'a> EraSession<'a> {
    pub fn era(&self) -> u64 {
        self.era
    }

    /// Mark `prefix + identifier` as live in this era.
    pub fn touch(&self, prefix: &str, identifier: &str) {
        let full = format!("{}{}", prefix, identifier);
        let mut state = self.tracker.lock_state();
        let record = state
            .resources
            .entry(full.clone())
            .or_insert_with(|| ResourceRecord {
                identifier: full.clone(),
                last_touched_era: self.era,
                touched_at: Utc::now(),
            });
        record.last_touched_era = self.era;
        record.touched_at = Utc::now();
        debug!(resource = %full, era = self.era, "touched");
    }

    /// Release and forget every record under `prefix` that was not touched
    /// in this era.
    ///
    /// Failures to release a resource do not stop the sweep; they are
    /// collected in the report and the record is kept for the next sweep.
    pub fn sweep_and_gc(self, prefix: &str, reclaimer: &dyn Reclaimer) -> Result<SweepReport, EraError> {
        let mut report = SweepReport {
            prefix: prefix.to_string(),
            era: self.era,
            ..SweepReport::default()
        };

        let stale: Vec<ResourceRecord> = {
            let state = self.tracker.lock_state();
            let mut stale = Vec::new();
            for record in state.under_prefix(prefix) {
                report.scanned += 1;
                if record.last_touched_era < self.era {
                    stale.push(record.clone());
                } else {
                    report.retained += 1;
                }
            }
            stale
        };

        let mut released = Vec::new();
        for record in &stale {
            match reclaimer.reclaim(record) {
                Ok(()) => {
                    debug!(resource = %record.identifier, last_era = record.last_touched_era, "reclaimed");
                    released.push(record.identifier.clone());
                }
                Err(reason) => {
                    warn!(resource = %record.identifier, %reason, "failed to reclaim resource");
                    report.failures.push(CleanupFailure {
                        identifier: record.identifier.clone(),
                        reason,
                    });
                }
            }
        }

        {
            let mut state = self.tracker.lock_state();
            for identifier in &released {
                state.resources.remove(identifier);
            }
            state.updated_at = Utc::now();
            self.tracker.persist(&state)?;
        }
        report.deleted = released;

        info!(
            prefix,
            era = self.era,
            scanned = report.scanned,
            deleted = report.deleted.len(),
            failed = report.failures.len(),
            "sweep finished"
        );
        Ok(report)
    }

    /// End the era without sweeping, keeping every record touched so far.
    ///
    /// Used when a run fails partway: what it already provisioned stays
    /// tracked, so a later apply or delete can still release it.
    pub fn abandon(self) -> Result<(), EraError> {
        let mut state = self.tracker.lock_state();
        state.updated_at = Utc::now();
        self.tracker.persist(&state)?;
        debug!(era = self.era, records = state.resources.len(), "era abandoned without sweep");
        Ok(())
    }
}

impl Drop for EraSession<'_> {
    fn drop(&mut self) {
        self.tracker.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Records every reclaim and fails for configured identifiers.
    #[derive(Default)]
    struct TestReclaimer {
        reclaimed: RefCell<Vec<String>>,
        fail: HashSet<String>,
    }

    impl Reclaimer for TestReclaimer {
        fn reclaim(&self, record: &ResourceRecord) -> Result<(), String> {
            if self.fail.contains(&record.identifier) {
                return Err("simulated failure".to_string());
            }
            self.reclaimed.borrow_mut().push(record.identifier.clone());
            Ok(())
        }
    }

    fn ids(tracker: &EraTracker, prefix: &str) -> Vec<String> {
        tracker
            .resources(prefix)
            .into_iter()
            .map(|r| r.identifier)
            .collect()
    }

    #[test]
    fn test_start_era_increments() {
        let tracker = EraTracker::in_memory();
        assert_eq!(tracker.current_era(), 0);

        let first = tracker.start_era().unwrap();
        assert_eq!(first.era(), 1);
        drop(first);

        let second = tracker.start_era().unwrap();
        assert_eq!(second.era(), 2);
        assert_eq!(tracker.current_era(), 2);
    }

    #[test]
    fn test_concurrent_era_rejected() {
        let tracker = EraTracker::in_memory();
        let _session = tracker.start_era().unwrap();
        assert!(matches!(tracker.start_era(), Err(EraError::EraInProgress(1))));
    }

    #[test]
    fn test_stale_resource_swept() {
        let tracker = EraTracker::in_memory();
        let reclaimer = TestReclaimer::default();

        let session = tracker.start_era().unwrap();
        session.touch("p/", "a");
        session.touch("p/", "b");
        session.sweep_and_gc("p/", &reclaimer).unwrap();

        let session = tracker.start_era().unwrap();
        session.touch("p/", "b");
        let report = session.sweep_and_gc("p/", &reclaimer).unwrap();

        assert_eq!(report.deleted, vec!["p/a".to_string()]);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.retained, 1);
        assert_eq!(ids(&tracker, "p/"), vec!["p/b".to_string()]);
        assert_eq!(*reclaimer.reclaimed.borrow(), vec!["p/a".to_string()]);
    }

    #[test]
    fn test_untouched_era_sweeps_everything() {
        let tracker = EraTracker::in_memory();
        let reclaimer = TestReclaimer::default();

        let session = tracker.start_era().unwrap();
        for name in ["a", "b", "c"] {
            session.touch("p/", name);
        }
        session.sweep_and_gc("p/", &reclaimer).unwrap();

        let session = tracker.start_era().unwrap();
        let report = session.sweep_and_gc("p/", &reclaimer).unwrap();

        assert_eq!(report.deleted.len(), 3);
        assert!(tracker.resources("p/").is_empty());
    }

    #[test]
    fn test_sweep_is_scoped_to_prefix() {
        let tracker = EraTracker::in_memory();
        let reclaimer = TestReclaimer::default();

        let session = tracker.start_era().unwrap();
        session.touch("p/", "a");
        session.touch("q/", "a");
        drop(session);

        let session = tracker.start_era().unwrap();
        session.sweep_and_gc("p/", &reclaimer).unwrap();

        assert!(tracker.resources("p/").is_empty());
        assert_eq!(ids(&tracker, "q/"), vec!["q/a".to_string()]);
    }

    #[test]
    fn test_touch_is_idempotent() {
        let tracker = EraTracker::in_memory();
        let session = tracker.start_era().unwrap();
        session.touch("p/", "a");
        session.touch("p/", "a");

        let records = tracker.resources("p/");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last_touched_era, 1);
    }

    #[test]
    fn test_failed_reclaim_keeps_record_and_continues() {
        let tracker = EraTracker::in_memory();

        let session = tracker.start_era().unwrap();
        for name in ["a", "b", "c"] {
            session.touch("p/", name);
        }
        drop(session);

        let reclaimer = TestReclaimer {
            fail: HashSet::from(["p/b".to_string()]),
            ..TestReclaimer::default()
        };
        let session = tracker.start_era().unwrap();
        let report = session.sweep_and_gc("p/", &reclaimer).unwrap();

        assert_eq!(report.deleted, vec!["p/a".to_string(), "p/c".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].identifier, "p/b");
        assert!(report.check().is_err());
        assert_eq!(ids(&tracker, "p/"), vec!["p/b".to_string()]);

        // A later sweep retries the kept record.
        let session = tracker.start_era().unwrap();
        let report = session.sweep_and_gc("p/", &TestReclaimer::default()).unwrap();
        assert_eq!(report.deleted, vec!["p/b".to_string()]);
        assert!(tracker.resources("p/").is_empty());
    }

    #[test]
    fn test_concurrent_touches_all_survive() {
        let tracker = EraTracker::in_memory();
        let session = tracker.start_era().unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let session = &session;
                scope.spawn(move || {
                    for i in 0..25 {
                        session.touch("p/", &format!("w{}-{}", worker, i));
                    }
                });
            }
        });

        let report = session.sweep_and_gc("p/", &TestReclaimer::default()).unwrap();
        assert_eq!(report.scanned, 100);
        assert_eq!(report.retained, 100);
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_state_persists_across_open() {
        let dir = TempDir::new().unwrap();

        {
            let tracker = EraTracker::open(dir.path()).unwrap();
            let session = tracker.start_era().unwrap();
            session.touch("p/", "a");
            session.sweep_and_gc("p/", &TestReclaimer::default()).unwrap();
        }

        let tracker = EraTracker::open(dir.path()).unwrap();
        assert_eq!(tracker.current_era(), 1);
        assert_eq!(ids(&tracker, "p/"), vec!["p/a".to_string()]);
        assert!(dir.path().join(STATE_FILENAME).exists());
    }

    #[test]
    fn test_abandoned_era_keeps_touched_records() {
        let dir = TempDir::new().unwrap();

        {
            let tracker = EraTracker::open(dir.path()).unwrap();
            let session = tracker.start_era().unwrap();
            session.touch("p/", "partial");
            session.abandon().unwrap();
            assert!(tracker.start_era().is_ok());
        }

        let tracker = EraTracker::open(dir.path()).unwrap();
        assert_eq!(ids(&tracker, "p/"), vec!["p/partial".to_string()]);

        let reclaimer = TestReclaimer::default();
        let session = tracker.start_era().unwrap();
        let report = session.sweep_and_gc("p/", &reclaimer).unwrap();
        assert_eq!(report.deleted, vec!["p/partial".to_string()]);
        assert!(ids(&tracker, "p/").is_empty());
    }

    #[test]
    fn test_start_era_sees_other_writers() {
        let dir = TempDir::new().unwrap();
        let first = EraTracker::open(dir.path()).unwrap();
        let second = EraTracker::open(dir.path()).unwrap();

        drop(first.start_era().unwrap());
        let session = second.start_era().unwrap();
        assert_eq!(session.era(), 2);
    }
}
