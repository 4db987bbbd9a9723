// src/job/launch_config.rs

//! Launch-time parameter sets: per-node overrides and the resolved
//! configuration attached to a job at creation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object used for extra vars, extra data and artifacts.
pub type ExtraVars = Map<String, Value>;

/// Prompt overrides stored on a workflow node.
///
/// `None` means "use whatever the underlying template defines".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchOverrides {
    #[serde(default)]
    pub extra_data: ExtraVars,
    #[serde(default)]
    pub inventory: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub scm_branch: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub job_tags: Option<String>,
    #[serde(default)]
    pub skip_tags: Option<String>,
    #[serde(default)]
    pub verbosity: Option<u8>,
    #[serde(default)]
    pub diff_mode: Option<bool>,
    /// Credential names the job runs with. Empty keeps the template's own.
    #[serde(default)]
    pub credentials: Vec<String>,
}

/// Fully resolved launch parameters, owned by the job they were resolved for.
/// Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobLaunchConfig {
    extra_vars: ExtraVars,
    inventory: Option<String>,
    limit: Option<String>,
    scm_branch: Option<String>,
    job_type: Option<String>,
    job_tags: Option<String>,
    skip_tags: Option<String>,
    verbosity: Option<u8>,
    diff_mode: Option<bool>,
    credentials: Vec<String>,
}

impl JobLaunchConfig {
    /// Resolve the configuration for one workflow node.
    ///
    /// Extra vars are layered: node `extra_data`, then artifacts published by
    /// ancestor jobs, then the workflow's own extra vars (highest precedence).
    pub fn for_node(
        overrides: &LaunchOverrides,
        ancestor_artifacts: &ExtraVars,
        workflow_vars: &ExtraVars,
    ) -> Self {
        let mut extra_vars = overrides.extra_data.clone();
        merge_into(&mut extra_vars, ancestor_artifacts);
        merge_into(&mut extra_vars, workflow_vars);

        Self {
            extra_vars,
            inventory: overrides.inventory.clone(),
            limit: overrides.limit.clone(),
            scm_branch: overrides.scm_branch.clone(),
            job_type: overrides.job_type.clone(),
            job_tags: overrides.job_tags.clone(),
            skip_tags: overrides.skip_tags.clone(),
            verbosity: overrides.verbosity,
            diff_mode: overrides.diff_mode,
            credentials: overrides.credentials.clone(),
        }
    }

    /// Configuration for a job launched directly (no workflow context).
    pub fn from_overrides(overrides: &LaunchOverrides) -> Self {
        Self::for_node(overrides, &ExtraVars::new(), &ExtraVars::new())
    }

    pub fn extra_vars(&self) -> &ExtraVars {
        &self.extra_vars
    }

    pub fn inventory(&self) -> Option<&str> {
        self.inventory.as_deref()
    }

    pub fn limit(&self) -> Option<&str> {
        self.limit.as_deref()
    }

    pub fn scm_branch(&self) -> Option<&str> {
        self.scm_branch.as_deref()
    }

    pub fn job_type(&self) -> Option<&str> {
        self.job_type.as_deref()
    }

    pub fn job_tags(&self) -> Option<&str> {
        self.job_tags.as_deref()
    }

    pub fn skip_tags(&self) -> Option<&str> {
        self.skip_tags.as_deref()
    }

    pub fn verbosity(&self) -> Option<u8> {
        self.verbosity
    }

    pub fn diff_mode(&self) -> Option<bool> {
        self.diff_mode
    }

    pub fn credentials(&self) -> &[String] {
        &self.credentials
    }
}

/// Shallow merge: keys in `overlay` replace keys in `base`.
pub fn merge_into(base: &mut ExtraVars, overlay: &ExtraVars) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}
