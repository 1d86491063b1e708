//! Controller configuration

use std::time::Duration;

/// Tunables of the reconciler, overridable through `KATACHI_*` environment
/// variables in the binary
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace global definitions are discovered in
    pub system_namespace: String,
    /// How many revisions to retain per Application
    pub revision_limit: usize,
    /// Lifetime of process-local policy cache entries
    pub policy_cache_ttl: Duration,
    /// Whether global policies are discovered and applied
    pub global_policies_enabled: bool,
    /// Field manager used for server-side apply
    pub field_manager: String,
    /// Requeue delay while a workflow is in progress
    pub requeue_running: Duration,
    /// Requeue delay once an Application is in steady state
    pub requeue_steady: Duration,
    /// Requeue delay after a reconciliation error
    pub requeue_error: Duration,
    /// Deadline for a single reconciliation; the cancellation signal fires
    /// when it elapses and the work item is re-enqueued
    pub reconcile_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_namespace: "katachi-system".to_string(),
            revision_limit: 10,
            policy_cache_ttl: Duration::from_secs(60),
            global_policies_enabled: true,
            field_manager: "katachi".to_string(),
            requeue_running: Duration::from_secs(5),
            requeue_steady: Duration::from_secs(30),
            requeue_error: Duration::from_secs(30),
            reconcile_timeout: Duration::from_secs(120),
        }
    }
}

impl ControllerConfig {
    /// Apply `KATACHI_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(namespace) = std::env::var("KATACHI_SYSTEM_NAMESPACE") {
            config.system_namespace = namespace;
        }
        if let Ok(limit) = std::env::var("KATACHI_REVISION_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.revision_limit = limit;
            }
        }
        if let Ok(flag) = std::env::var("KATACHI_GLOBAL_POLICIES") {
            config.global_policies_enabled = flag != "false";
        }
        if let Ok(timeout) = std::env::var("KATACHI_RECONCILE_TIMEOUT") {
            if let Ok(seconds) = timeout.parse() {
                config.reconcile_timeout = Duration::from_secs(seconds);
            }
        }
        config
    }
}
