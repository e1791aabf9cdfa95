//! eraflow - workflow apply/delete orchestrator
//!
//! Applies a step with a dotted-key configuration overlay, resolves the
//! step's configuration through a layered lookup (overlay, environment,
//! data file), and garbage-collects resources the step stopped touching,
//! using a persistent era counter to tell this run's resources from stale
//! ones.

pub mod dlv;
pub mod era;
pub mod input;
pub mod lock;
pub mod logging;
pub mod lookup;
pub mod runner;
pub mod settings;
pub mod step;

pub use dlv::DebugConfig;
pub use era::{EraSession, EraTracker, Reclaimer, ResourceRecord, SweepReport};
pub use eraflow_overlay::{merge, ConfigTree, MergeError, Node};
pub use lookup::{LayeredLookup, Provider, Resolved};
pub use runner::{RunOutcome, RunStatus, RunnerError, StepRunner};
pub use settings::{EffectiveSettings, Settings};
pub use step::{Operation, Step, StepContext, StepError, StepRegistry};
