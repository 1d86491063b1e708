//! Application reconciler
//!
//! The outer control loop: receives Application updates, runs the policy
//! pre-pass, manages revisions, drives the workflow steps, and writes
//! status back.

pub mod config;
pub mod controller;
pub mod error;
pub mod kube_stores;
pub mod reconciler;
pub mod restart;
pub mod revision;
pub mod runtime;
pub mod status;

pub use config::ControllerConfig;
pub use error::ControllerError;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use restart::{parse_restart_annotation, RestartSpec};
pub use revision::RevisionManager;
pub use runtime::DispatchRuntime;
pub use status::{InMemoryStatusWriter, StatusWriter};
