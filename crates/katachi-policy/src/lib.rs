//! Policy pre-pass and policy cache
//!
//! Before an Application is parsed into its rendered form, every global
//! and user-declared policy is rendered through the template evaluator and
//! its effects are merged into the in-memory Application. Rendered outputs
//! are cached at two levels: a process-local map and a durable per-app
//! key/value blob, invalidated by application-spec hash and by a cascade
//! hash over upstream policy outputs.

pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod hashing;
pub mod output;
pub mod prepass;
pub mod record;

pub use cache::PolicyResultCache;
pub use config::{OutputKind, PolicyConfig, RefreshMode, RefreshRule};
pub use durable::DurablePolicyCache;
pub use error::PolicyError;
pub use hashing::{application_hash, cascade_id};
pub use output::{AppliedDiff, PolicyArtifact, PolicyOutput, PolicyTransforms, TransformType};
pub use prepass::{PolicyPrePass, PrePassOutcome};
pub use record::{CachedOutputData, PolicyCacheRecord, RenderedPolicyResult};
