// src/workflow/mod.rs

//! Workflow templates and the per-job execution controller.
//!
//! The controller is pure: it decides what to launch, skip and cancel, and
//! the engine core applies those decisions to the job store.

pub mod approval;
pub mod controller;
pub mod controller_step;
pub mod node_state;
pub mod registry;
pub mod template;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalResolution};
pub use controller::WorkflowController;
pub use controller_step::{ControllerStep, NodeLaunch};
pub use node_state::{NodeOutcome, NodeRunInfo, NodeRunState};
pub use registry::{LaunchSnapshot, TemplateRegistry};
pub use template::{LaunchPrompts, PromptFlags, WorkflowJobTemplate, WorkflowLaunch};
