//! Sweep results and the reclaim hook

use serde::Serialize;
use thiserror::Error;

use super::state::ResourceRecord;

/// Releases the real resource behind a stale record.
///
/// Called once per stale record during a sweep. An `Err` keeps the record
/// so a later sweep retries it.
pub trait Reclaimer {
    fn reclaim(&self, record: &ResourceRecord) -> Result<(), String>;
}

/// A resource that could not be released during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub identifier: String,
    pub reason: String,
}

/// Result of sweeping one prefix.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Prefix that was swept
    pub prefix: String,
    /// Era the sweep ran in
    pub era: u64,
    /// Records found under the prefix
    pub scanned: usize,
    /// Records touched in the current era
    pub retained: usize,
    /// Identifiers removed
    pub deleted: Vec<String>,
    /// Stale records whose release failed (records are kept)
    pub failures: Vec<CleanupFailure>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn recorded failures into an error.
    pub fn check(&self) -> Result<(), ResourceCleanupError> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(ResourceCleanupError {
                prefix: self.prefix.clone(),
                failures: self.failures.clone(),
            })
        }
    }
}

/// One or more stale resources could not be released.
#[derive(Debug, Clone, Error)]
#[error("{} resource(s) under '{prefix}' could not be cleaned up: {}", .failures.len(), summarize(.failures))]
pub struct ResourceCleanupError {
    pub prefix: String,
    pub failures: Vec<CleanupFailure>,
}

fn summarize(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.identifier, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
