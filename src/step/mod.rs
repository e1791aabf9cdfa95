//! Steps and the context they run in
//!
//! A step provisions or confirms resources during an apply and releases
//! them again when the sweep finds them stale. Everything a step sees about
//! the current run arrives through [`StepContext`].

mod foobernetes;
mod registry;

pub use foobernetes::Foobernetes;
pub use registry::StepRegistry;

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::Span;

use crate::dlv::DebugConfig;
use crate::era::{EraSession, Reclaimer, ResourceRecord};
use crate::lookup::LayeredLookup;

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Apply,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Apply => write!(f, "apply"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Errors reported by step implementations
#[derive(Debug, Error)]
pub enum StepError {
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// A unit of work the runner can apply or delete.
pub trait Step: Send + Sync {
    /// Identifier, also the namespace of the step's resources.
    fn identifier(&self) -> &str;

    /// Provision or confirm resources, touching each one through `ctx`.
    fn run(&self, ctx: &StepContext<'_>) -> Result<Value, StepError>;

    /// Release the resource `name` (relative to the step's namespace).
    fn reclaim(&self, name: &str, record: &ResourceRecord) -> Result<(), StepError>;
}

/// GC prefix for a step identifier.
pub fn resource_prefix(identifier: &str) -> String {
    format!("{}/", identifier)
}

/// Per-run view handed to [`Step::run`].
pub struct StepContext<'a> {
    run_id: &'a str,
    identifier: &'a str,
    prefix: String,
    operation: Operation,
    lookup: &'a LayeredLookup,
    session: &'a EraSession<'a>,
    dlv: Option<&'a DebugConfig>,
    span: Span,
}

impl<'a> StepContext<'a> {
    pub fn new(
        run_id: &'a str,
        identifier: &'a str,
        operation: Operation,
        lookup: &'a LayeredLookup,
        session: &'a EraSession<'a>,
        dlv: Option<&'a DebugConfig>,
        span: Span,
    ) -> Self {
        Self {
            run_id,
            identifier,
            prefix: resource_prefix(identifier),
            operation,
            lookup,
            session,
            dlv,
            span,
        }
    }

    /// Mark `name` (under this step's namespace) as live in the current era.
    pub fn touch(&self, name: &str) {
        self.session.touch(&self.prefix, name);
    }

    pub fn lookup(&self) -> &LayeredLookup {
        self.lookup
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn era(&self) -> u64 {
        self.session.era()
    }

    pub fn run_id(&self) -> &str {
        self.run_id
    }

    pub fn identifier(&self) -> &str {
        self.identifier
    }

    pub fn dlv(&self) -> Option<&DebugConfig> {
        self.dlv
    }

    /// Span of the current run; enter it from spawned sub-tasks.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Adapts a step to the sweep's [`Reclaimer`] hook.
pub struct StepReclaimer<'a> {
    step: &'a dyn Step,
    prefix: &'a str,
}

impl<'a> StepReclaimer<'a> {
    pub fn new(step: &'a dyn Step, prefix: &'a str) -> Self {
        Self { step, prefix }
    }
}

impl Reclaimer for StepReclaimer<'_> {
    fn reclaim(&self, record: &ResourceRecord) -> Result<(), String> {
        self.step
            .reclaim(record.name_under(self.prefix), record)
            .map_err(|e| e.to_string())
    }
}
