// src/workflow/registry.rs

//! Shared registry of workflow job templates.
//!
//! Each template sits behind its own mutex so concurrent edits to the same
//! workflow serialize (read graph, validate, commit) while edits to other
//! workflows proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;

use crate::errors::{Result, TowerflowError};
use crate::graph::NodeGraph;
use crate::job::JobLaunchConfig;
use crate::workflow::template::{LaunchPrompts, WorkflowJobTemplate, WorkflowLaunch};

type Shared = Arc<Mutex<WorkflowJobTemplate>>;

#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: Arc<RwLock<HashMap<String, Shared>>>,
}

/// What a launch takes away from the template: the graph as it was at
/// launch time plus the resolved prompts.
#[derive(Debug, Clone)]
pub struct LaunchSnapshot {
    pub name: String,
    pub graph: NodeGraph,
    pub launch: WorkflowLaunch,
    pub allow_simultaneous: bool,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. Names are unique.
    pub fn insert(&self, template: WorkflowJobTemplate) -> Result<()> {
        let mut map = self.write_map()?;
        if map.contains_key(&template.name) {
            return Err(TowerflowError::DuplicateIdentifier(template.name));
        }
        debug!(workflow = %template.name, "registered workflow template");
        map.insert(template.name.clone(), Arc::new(Mutex::new(template)));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.write_map()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TowerflowError::TemplateNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates
            .read()
            .map(|map| map.contains_key(name))
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Run `f` with exclusive access to one template.
    ///
    /// Graph mutations go through here so validation and commit happen
    /// under the same lock.
    pub fn with_template_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut WorkflowJobTemplate) -> Result<T>,
    ) -> Result<T> {
        let shared = self.get(name)?;
        let mut guard = lock(&shared)?;
        f(&mut guard)
    }

    /// Read-only access to one template.
    pub fn with_template<T>(&self, name: &str, f: impl FnOnce(&WorkflowJobTemplate) -> T) -> Result<T> {
        let shared = self.get(name)?;
        let guard = lock(&shared)?;
        Ok(f(&guard))
    }

    /// Validate prompts and snapshot the graph for a new workflow job.
    pub fn snapshot_for_launch(&self, name: &str, prompts: &LaunchPrompts) -> Result<LaunchSnapshot> {
        self.with_template(name, |template| {
            let launch = template.resolve_launch(prompts)?;
            let graph = template.snapshot_graph()?;
            Ok(LaunchSnapshot {
                name: template.name.clone(),
                graph,
                launch,
                allow_simultaneous: template.allow_simultaneous,
            })
        })?
    }

    /// Snapshot the graph for a workflow job spawned by a workflow node.
    pub fn snapshot_for_spawn(&self, name: &str, config: &JobLaunchConfig) -> Result<LaunchSnapshot> {
        self.with_template(name, |template| {
            let launch = template.resolve_spawned_launch(config)?;
            let graph = template.snapshot_graph()?;
            Ok(LaunchSnapshot {
                name: template.name.clone(),
                graph,
                launch,
                allow_simultaneous: template.allow_simultaneous,
            })
        })?
    }

    fn get(&self, name: &str) -> Result<Shared> {
        let map = self
            .templates
            .read()
            .map_err(|_| poisoned("template registry"))?;
        map.get(name)
            .cloned()
            .ok_or_else(|| TowerflowError::TemplateNotFound(name.to_string()))
    }

    fn write_map(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Shared>>> {
        self.templates
            .write()
            .map_err(|_| poisoned("template registry"))
    }
}

fn lock(shared: &Shared) -> Result<MutexGuard<'_, WorkflowJobTemplate>> {
    shared.lock().map_err(|_| poisoned("workflow template"))
}

fn poisoned(what: &str) -> TowerflowError {
    TowerflowError::Other(anyhow::anyhow!("{what} lock poisoned"))
}
