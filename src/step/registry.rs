use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::{Foobernetes, Step};

/// Step definitions by identifier.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: BTreeMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in steps, provisioning under `workdir`.
    pub fn with_builtins(workdir: &Path) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Foobernetes::new(workdir.to_path_buf())));
        registry
    }

    /// Add a step, returning any step it replaced.
    pub fn register(&mut self, step: Arc<dyn Step>) -> Option<Arc<dyn Step>> {
        self.steps.insert(step.identifier().to_string(), step)
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(identifier).cloned()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }
}
