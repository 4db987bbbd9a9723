#![allow(dead_code)]

use std::time::Duration;

use serde_json::Value;
use towerflow::config::EngineConfig;
use towerflow::engine::{CoreRuntime, RuntimeOptions};
use towerflow::graph::{GraphPolicy, NodeSpec, ParentPolicy};
use towerflow::job::{ExtraVars, LaunchOverrides, TemplateKind, UnifiedJobTemplate};
use towerflow::types::EdgeType;
use towerflow::workflow::{TemplateRegistry, WorkflowJobTemplate};

/// A job template named `name` running `<name>.yml`.
pub fn job_template(name: &str) -> UnifiedJobTemplate {
    UnifiedJobTemplate::new(
        name,
        TemplateKind::JobTemplate {
            playbook: format!("{name}.yml"),
        },
    )
}

/// An approval template with an optional timeout.
pub fn approval_template(name: &str, timeout: Option<Duration>) -> UnifiedJobTemplate {
    UnifiedJobTemplate::new(name, TemplateKind::Approval { timeout })
}

/// A template whose node runs the workflow template `workflow`.
pub fn nested_template(name: &str, workflow: &str) -> UnifiedJobTemplate {
    UnifiedJobTemplate::new(
        name,
        TemplateKind::WorkflowJobTemplate {
            workflow: workflow.to_string(),
        },
    )
}

/// JSON object from a `json!`-style value; panics on non-objects.
pub fn vars(value: Value) -> ExtraVars {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Builder for `WorkflowJobTemplate` to simplify test setup.
///
/// Node identifiers double as template names.
pub struct WorkflowBuilder {
    template: WorkflowJobTemplate,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self::with_policy(name, GraphPolicy::default())
    }

    /// Builder whose graph accepts nodes with several parents.
    pub fn converging(name: &str) -> Self {
        Self::with_policy(
            name,
            GraphPolicy {
                max_nodes: None,
                parents: ParentPolicy::Multiple,
            },
        )
    }

    pub fn with_policy(name: &str, policy: GraphPolicy) -> Self {
        Self {
            template: WorkflowJobTemplate::new(name, policy),
        }
    }

    /// Add a job-template node.
    pub fn job(self, identifier: &str) -> Self {
        self.node(NodeSpec::new(identifier, job_template(identifier)))
    }

    /// Add a job-template node that waits for every parent.
    pub fn join(self, identifier: &str) -> Self {
        self.node(NodeSpec::new(identifier, job_template(identifier)).converging(true))
    }

    pub fn approval(self, identifier: &str, timeout: Option<Duration>) -> Self {
        self.node(NodeSpec::new(
            identifier,
            approval_template(identifier, timeout),
        ))
    }

    /// Add a node that runs the workflow template `workflow`.
    pub fn nested(self, identifier: &str, workflow: &str) -> Self {
        self.node(NodeSpec::new(identifier, nested_template(identifier, workflow)))
    }

    /// Add a node whose template has been deleted.
    pub fn orphan(self, identifier: &str) -> Self {
        self.node(NodeSpec::without_template(identifier))
    }

    pub fn job_with(self, identifier: &str, overrides: LaunchOverrides) -> Self {
        self.node(NodeSpec::new(identifier, job_template(identifier)).with_overrides(overrides))
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.template
            .add_node(spec)
            .expect("Failed to add node in builder");
        self
    }

    pub fn success(self, parent: &str, child: &str) -> Self {
        self.edge(parent, child, EdgeType::Success)
    }

    pub fn failure(self, parent: &str, child: &str) -> Self {
        self.edge(parent, child, EdgeType::Failure)
    }

    pub fn always(self, parent: &str, child: &str) -> Self {
        self.edge(parent, child, EdgeType::Always)
    }

    pub fn edge(mut self, parent: &str, child: &str, edge_type: EdgeType) -> Self {
        self.template
            .add_edge(parent, child, edge_type)
            .expect("Failed to add edge in builder");
        self
    }

    pub fn extra_vars(mut self, value: Value) -> Self {
        self.template.extra_vars = vars(value);
        self
    }

    pub fn allow_simultaneous(mut self, allow: bool) -> Self {
        self.template.allow_simultaneous = allow;
        self
    }

    pub fn build(self) -> WorkflowJobTemplate {
        self.template
    }
}

/// Core runtime with the given templates registered and default options.
pub fn core_with(templates: Vec<WorkflowJobTemplate>, config: EngineConfig) -> CoreRuntime {
    let registry = TemplateRegistry::new();
    for template in templates {
        registry
            .insert(template)
            .expect("Failed to register template");
    }
    CoreRuntime::new(registry, config, RuntimeOptions::default())
}
