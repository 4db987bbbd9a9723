// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the jobs the core
//! launches, using `tokio::process::Command`, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the loop that tracks running job processes.
//! - [`job_runner`] runs one job process and collects its artifacts.
//! - [`backend`] provides the `LaunchBackend` trait and the
//!   `ProcessLaunchBackend` the runtime uses in production, which tests can
//!   replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod job_runner;

pub use backend::{BackendFuture, LaunchBackend, ProcessLaunchBackend};
pub use executor_loop::spawn_executor;
