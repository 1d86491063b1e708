//! Per-reconciliation context
//!
//! One `ReconcileContext` is built at the top of each reconciliation and
//! passed down the call graph. It owns the policy-contributed additional
//! context as a typed field and carries the cancellation signal every
//! suspension point checks.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use katachi_api::{LABEL_APP_NAME, LABEL_APP_NAMESPACE, LABEL_APP_REVISION};

/// Context errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("reconciliation cancelled")]
    Cancelled,
}

/// State shared by one reconciliation of one Application
#[derive(Clone, Debug)]
pub struct ReconcileContext {
    /// Application name
    pub app_name: String,
    /// Application namespace
    pub app_namespace: String,
    /// Name of the revision being reconciled
    pub revision_name: String,
    /// Content hash of the revision being reconciled
    pub revision_hash: String,
    /// User-controlled revision identifier, when set
    pub publish_version: Option<String>,
    /// Force re-apply even when resources probe healthy
    pub auto_update: bool,
    /// Namespace global definitions are discovered in
    pub system_namespace: String,
    /// Outer cancellation signal, checked at every suspension point
    cancellation: CancellationToken,
    /// Context contributed by policies, exposed to workflow steps
    policy_context: Map<String, Value>,
}

impl ReconcileContext {
    pub fn new(app_namespace: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_namespace: app_namespace.into(),
            revision_name: String::new(),
            revision_hash: String::new(),
            publish_version: None,
            auto_update: false,
            system_namespace: "katachi-system".to_string(),
            cancellation: CancellationToken::new(),
            policy_context: Map::new(),
        }
    }

    pub fn with_revision(mut self, name: impl Into<String>, hash: impl Into<String>) -> Self {
        self.revision_name = name.into();
        self.revision_hash = hash.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_system_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.system_namespace = namespace.into();
        self
    }

    /// Err when the outer deadline or cancel signal fired
    pub fn ensure_active(&self) -> Result<(), ContextError> {
        if self.cancellation.is_cancelled() {
            Err(ContextError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Owner labels stamped on every persisted side-effect
    pub fn owner_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_APP_NAME.to_string(), self.app_name.clone());
        labels.insert(LABEL_APP_NAMESPACE.to_string(), self.app_namespace.clone());
        if !self.revision_hash.is_empty() {
            labels.insert(LABEL_APP_REVISION.to_string(), self.revision_hash.clone());
        }
        labels
    }

    /// Merge a policy's `ctx` contribution into the additional context
    pub fn merge_policy_context(&mut self, ctx: &Map<String, Value>) {
        for (key, value) in ctx {
            match (self.policy_context.get_mut(key), value) {
                (Some(existing), incoming) => crate::merge::deep_merge(existing, incoming),
                (None, incoming) => {
                    self.policy_context.insert(key.clone(), incoming.clone());
                }
            }
        }
    }

    /// Context contributed by policies so far
    pub fn policy_context(&self) -> &Map<String, Value> {
        &self.policy_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn owner_labels_carry_identity() {
        let ctx = ReconcileContext::new("default", "demo").with_revision("demo-v1", "abc123");
        let labels = ctx.owner_labels();
        assert_eq!(labels.get(LABEL_APP_NAME).map(String::as_str), Some("demo"));
        assert_eq!(
            labels.get(LABEL_APP_REVISION).map(String::as_str),
            Some("abc123")
        );
    }

    #[test]
    fn policy_context_deep_merges() {
        let mut ctx = ReconcileContext::new("default", "demo");
        let first = json!({"limits": {"cpu": "1"}}).as_object().cloned().unwrap();
        let second = json!({"limits": {"memory": "1Gi"}})
            .as_object()
            .cloned()
            .unwrap();
        ctx.merge_policy_context(&first);
        ctx.merge_policy_context(&second);
        assert_eq!(
            Value::Object(ctx.policy_context().clone()),
            json!({"limits": {"cpu": "1", "memory": "1Gi"}})
        );
    }

    #[test]
    fn cancelled_context_reports_inactive() {
        let token = CancellationToken::new();
        let ctx = ReconcileContext::new("default", "demo").with_cancellation(token.clone());
        assert!(ctx.ensure_active().is_ok());
        token.cancel();
        assert!(matches!(ctx.ensure_active(), Err(ContextError::Cancelled)));
    }
}
