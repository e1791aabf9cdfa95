//! Built-in demonstration step
//!
//! Provisions a small fleet of load balancers and web servers as JSON
//! documents under `<workdir>/foobernetes/`. Counts and tags come from the
//! lookup chain:
//! - `foobernetes.loadbalancers` (default 1)
//! - `foobernetes.webservers` (default 2)
//! - `foobernetes.tags` (optional, any shape)

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Step, StepContext, StepError};
use crate::era::ResourceRecord;

const IDENTIFIER: &str = "foobernetes";

#[derive(Debug, Serialize)]
struct ResourceDocument<'a> {
    id: &'a str,
    kind: &'a str,
    index: u64,
    era: u64,
    run_id: &'a str,
    tags: Value,
}

#[derive(Debug, Clone)]
pub struct Foobernetes {
    workdir: PathBuf,
}

impl Foobernetes {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    fn resource_dir(&self) -> PathBuf {
        self.workdir.join(IDENTIFIER)
    }

    fn resource_path(&self, name: &str) -> PathBuf {
        self.resource_dir().join(format!("{}.json", name))
    }

    fn count(ctx: &StepContext<'_>, key: &str, default: u64) -> Result<u64, StepError> {
        match ctx.lookup().get_str(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| StepError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a non-negative integer, got '{}'", raw),
            }),
        }
    }

    fn provision(&self, ctx: &StepContext<'_>, kind: &str, count: u64, tags: &Value) -> Result<Vec<String>, StepError> {
        let _entered = ctx.span().enter();
        let mut names = Vec::new();
        for index in 0..count {
            let name = format!("{}-{}", kind, index);
            let doc = ResourceDocument {
                id: &name,
                kind,
                index,
                era: ctx.era(),
                run_id: ctx.run_id(),
                tags: tags.clone(),
            };
            fs::write(self.resource_path(&name), serde_json::to_string_pretty(&doc)?)?;
            ctx.touch(&name);
            debug!(resource = %name, "provisioned");
            names.push(name);
        }
        Ok(names)
    }
}

impl Step for Foobernetes {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<Value, StepError> {
        let loadbalancers = Self::count(ctx, "foobernetes.loadbalancers", 1)?;
        let webservers = Self::count(ctx, "foobernetes.webservers", 2)?;
        let tags = ctx.lookup().get("foobernetes.tags").unwrap_or(Value::Null);

        fs::create_dir_all(self.resource_dir())?;

        let (lb, ws) = std::thread::scope(|scope| {
            let lb = scope.spawn(|| self.provision(ctx, "loadbalancer", loadbalancers, &tags));
            let ws = scope.spawn(|| self.provision(ctx, "webserver", webservers, &tags));
            (lb.join(), ws.join())
        });
        let panicked = || StepError::Failed("provisioning task panicked".to_string());
        let mut resources = lb.map_err(|_| panicked())??;
        resources.extend(ws.map_err(|_| panicked())??);

        info!(count = resources.len(), "foobernetes resources provisioned");
        Ok(json!({ "resources": resources }))
    }

    fn reclaim(&self, name: &str, _record: &ResourceRecord) -> Result<(), StepError> {
        match fs::remove_file(self.resource_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
