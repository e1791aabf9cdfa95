//! Apply/delete orchestration
//!
//! One invocation:
//! - Validate the step id, merge the overlay and resolve the step (no era
//!   is started if any of this fails)
//! - Take the state lock
//! - Start a new era
//! - Apply: run the step, which touches what it provisions, then sweep
//!   `step_id + "/"`
//! - Delete: sweep `step_id + "/"` straight away, removing everything
//!
//! A failed apply is not swept, so resources from the previous era survive
//! until a later successful apply or delete decides their fate. Whatever the
//! step touched before failing is recorded too.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use eraflow_overlay::{merge, MergeError};
use regex_lite::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::dlv::DebugConfig;
use crate::era::{EraError, EraTracker, SweepReport};
use crate::lock::{LockError, StateLock};
use crate::lookup::{DataFileProvider, EnvProvider, LayeredLookup, OverlayProvider};
use crate::settings::Settings;
use crate::step::{resource_prefix, Operation, StepContext, StepError, StepReclaimer, StepRegistry};

/// Runner errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid step identifier '{0}'")]
    InvalidStepId(String),

    #[error("overlay error: {0}")]
    Merge(#[from] MergeError),

    #[error("unable to find definition for step {0}")]
    StepNotFound(String),

    #[error("state lock error: {0}")]
    Lock(#[from] LockError),

    #[error("era state error: {0}")]
    Era(#[from] EraError),

    #[error("step {step_id} failed: {source}")]
    StepFailed {
        step_id: String,
        #[source]
        source: StepError,
    },
}

impl RunnerError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::InvalidStepId(_) => 1,
            RunnerError::Merge(_) => 1,
            RunnerError::StepNotFound(_) => 2,
            RunnerError::StepFailed { .. } => 4,
            RunnerError::Lock(_) => 5,
            RunnerError::Era(_) => 5,
        }
    }
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Overall status of a finished invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    /// The step succeeded but some stale resources could not be released
    Degraded,
}

/// Outcome of a finished apply or delete.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub step_id: String,
    pub operation: Operation,
    pub era: u64,
    /// Step result (apply only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub sweep: SweepReport,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        if self.sweep.is_clean() {
            RunStatus::Succeeded
        } else {
            RunStatus::Degraded
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status() {
            RunStatus::Succeeded => 0,
            RunStatus::Degraded => 3,
        }
    }
}

/// Where the environment provider reads from.
#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Fixed(HashMap<String, String>),
}

/// Orchestrates apply and delete invocations.
pub struct StepRunner {
    registry: StepRegistry,
    tracker: EraTracker,
    lock_dir: Option<PathBuf>,
    lock_timeout: Duration,
    env_prefix: String,
    env_source: EnvSource,
    data_file: Option<PathBuf>,
    dlv: Option<DebugConfig>,
}

impl StepRunner {
    /// Default prefix of environment variables consulted by lookups
    pub const DEFAULT_ENV_PREFIX: &'static str = "ERAFLOW_";

    pub fn new(registry: StepRegistry, tracker: EraTracker) -> Self {
        Self {
            registry,
            tracker,
            lock_dir: None,
            lock_timeout: Duration::from_secs(30),
            env_prefix: Self::DEFAULT_ENV_PREFIX.to_string(),
            env_source: EnvSource::Process,
            data_file: None,
            dlv: None,
        }
    }

    /// Runner backed by the state directory and lookup sources in `settings`.
    pub fn from_settings(settings: &Settings, registry: StepRegistry) -> RunnerResult<Self> {
        let tracker = EraTracker::open(&settings.state_dir)?;
        Ok(Self::new(registry, tracker)
            .with_state_lock(settings.state_dir.clone(), settings.lock_timeout())
            .with_env_prefix(&settings.lookup.env_prefix)
            .with_data_file(settings.data_file()))
    }

    /// Hold the lock on `dir` for the duration of each invocation.
    pub fn with_state_lock(mut self, dir: PathBuf, timeout: Duration) -> Self {
        self.lock_dir = Some(dir);
        self.lock_timeout = timeout;
        self
    }

    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    /// Use a fixed set of variables instead of the process environment.
    pub fn with_env_vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env_source = EnvSource::Fixed(vars.into_iter().collect());
        self
    }

    pub fn with_data_file(mut self, path: Option<PathBuf>) -> Self {
        self.data_file = path;
        self
    }

    pub fn with_dlv(mut self, dlv: Option<DebugConfig>) -> Self {
        self.dlv = dlv;
        self
    }

    pub fn tracker(&self) -> &EraTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Apply `step_id`, then collect every resource under its namespace
    /// that the run did not touch.
    pub fn apply<I, K, V>(&self, step_id: &str, overlay: I) -> RunnerResult<RunOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.invoke(Operation::Apply, step_id, overlay)
    }

    /// Remove every resource under the namespace of `step_id`.
    pub fn delete<I, K, V>(&self, step_id: &str, overlay: I) -> RunnerResult<RunOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.invoke(Operation::Delete, step_id, overlay)
    }

    fn invoke<I, K, V>(&self, operation: Operation, step_id: &str, overlay: I) -> RunnerResult<RunOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        validate_step_id(step_id)?;
        let tree = merge(overlay)?;
        debug!(leaves = tree.leaf_count(), "merged overlay");
        let step = self
            .registry
            .get(step_id)
            .ok_or_else(|| RunnerError::StepNotFound(step_id.to_string()))?;

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id, step = step_id, %operation);
        let _entered = span.enter();

        let _lock = match &self.lock_dir {
            Some(dir) => Some(StateLock::acquire(dir, self.lock_timeout, Some(&run_id))?),
            None => None,
        };

        let lookup = self.build_lookup(OverlayProvider::new(tree));
        debug!(chain = ?lookup.chain(), "lookup chain ready");

        let session = self.tracker.start_era()?;
        let era = session.era();
        let prefix = resource_prefix(step_id);

        let payload = match operation {
            Operation::Apply => {
                let ctx = StepContext::new(
                    &run_id,
                    step_id,
                    operation,
                    &lookup,
                    &session,
                    self.dlv.as_ref(),
                    span.clone(),
                );
                let run = step.run(&ctx);
                drop(ctx);
                match run {
                    Ok(result) => {
                        debug!(%result, "step finished");
                        Some(result)
                    }
                    Err(source) => {
                        warn!(error = %source, era, "apply failed, skipping sweep to keep existing resources");
                        if let Err(e) = session.abandon() {
                            warn!(error = %e, "failed to record resources touched before the failure");
                        }
                        return Err(RunnerError::StepFailed {
                            step_id: step_id.to_string(),
                            source,
                        });
                    }
                }
            }
            Operation::Delete => None,
        };

        let reclaimer = StepReclaimer::new(step.as_ref(), &prefix);
        let sweep = session.sweep_and_gc(&prefix, &reclaimer)?;
        if let Err(e) = sweep.check() {
            warn!(error = %e, "sweep left resources behind");
        }

        info!(era, deleted = sweep.deleted.len(), "{} done", operation);
        Ok(RunOutcome {
            run_id,
            step_id: step_id.to_string(),
            operation,
            era,
            payload,
            sweep,
        })
    }

    fn build_lookup(&self, overlay: OverlayProvider) -> LayeredLookup {
        let env = match &self.env_source {
            EnvSource::Process => EnvProvider::from_process(&self.env_prefix),
            EnvSource::Fixed(vars) => EnvProvider::from_vars(&self.env_prefix, vars.clone()),
        };
        let mut lookup = LayeredLookup::new().with_provider(overlay).with_provider(env);
        if let Some(path) = &self.data_file {
            lookup = lookup.with_provider(DataFileProvider::new(path.clone()));
        }
        lookup
    }
}

fn step_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.-]+(/[A-Za-z0-9_.-]+)*$").expect("step id pattern is valid")
    })
}

/// Check that `step_id` is a `/`-separated path of plain name segments.
pub fn validate_step_id(step_id: &str) -> RunnerResult<()> {
    if step_id_pattern().is_match(step_id) {
        Ok(())
    } else {
        Err(RunnerError::InvalidStepId(step_id.to_string()))
    }
}
