//! Health collection
//!
//! Health comes from two places: a definition's declarative health
//! template evaluated against live resource state, and a generic
//! status-shape fallback when no template exists. Health template protocol:
//! the evaluated value carries a boolean `isHealth`; a status template
//! carries a string `message`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use katachi_core::ReconcileContext;
use katachi_keeper::{ClusterRouter, ResourceManifest};
use katachi_template::{
    context::{CONTEXT_OUTPUT, CONTEXT_OUTPUTS},
    TemplateContext, TemplateEvaluator,
};

use crate::error::DispatchError;
use crate::manifest::ComponentManifest;

/// Outcome of one health evaluation
#[derive(Clone, Debug, PartialEq)]
pub struct HealthVerdict {
    pub healthy: bool,
    pub message: Option<String>,
}

impl HealthVerdict {
    pub fn healthy() -> Self {
        Self { healthy: true, message: None }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}

pub struct HealthCollector {
    evaluator: Arc<dyn TemplateEvaluator>,
    router: Arc<ClusterRouter>,
}

impl HealthCollector {
    pub fn new(evaluator: Arc<dyn TemplateEvaluator>, router: Arc<ClusterRouter>) -> Self {
        Self { evaluator, router }
    }

    async fn fetch(&self, manifest: &ResourceManifest) -> Result<Option<Value>, DispatchError> {
        let client = self.router.client(manifest.cluster())?;
        Ok(client.get(&manifest.ident()?).await?)
    }

    /// Health of the component workload: the definition's health template
    /// against the live resource, else the generic status fallback.
    /// Returns the live workload alongside for reuse in the Post stage.
    pub async fn workload_health(
        &self,
        manifest: &ComponentManifest,
        ctx: &ReconcileContext,
    ) -> Result<(HealthVerdict, Option<Value>), DispatchError> {
        ctx.ensure_active()?;
        let Some(workload) = &manifest.workload else {
            return Ok((HealthVerdict::healthy(), None));
        };
        let Some(live) = self.fetch(workload).await? else {
            return Ok((HealthVerdict::unhealthy("workload not observed"), None));
        };

        let mut verdict = match &manifest.definition.spec.health_policy {
            Some(template) => {
                let template_ctx = TemplateContext::new()
                    .with_parameter(
                        manifest.component.properties.clone().unwrap_or(Value::Null),
                    )
                    .with(CONTEXT_OUTPUT, live.clone());
                self.eval_health(template, &template_ctx).await
            }
            None => generic_status_health(&live),
        };

        if verdict.healthy {
            if let Some(template) = &manifest.definition.spec.custom_status {
                let template_ctx = TemplateContext::new()
                    .with_parameter(
                        manifest.component.properties.clone().unwrap_or(Value::Null),
                    )
                    .with(CONTEXT_OUTPUT, live.clone());
                if let Some(message) = self.eval_status_message(template, &template_ctx).await {
                    verdict.message = Some(message);
                }
            }
        }
        Ok((verdict, Some(live)))
    }

    /// Health of one trait. The declarative verdict takes precedence; the
    /// existence check can only downgrade a healthy trait when a required
    /// output resource is missing.
    pub async fn trait_health(
        &self,
        trait_def: &katachi_api::TraitDefinition,
        properties: Option<Value>,
        resources: &[ResourceManifest],
        enrichment: &[(&str, Value)],
        ctx: &ReconcileContext,
    ) -> Result<HealthVerdict, DispatchError> {
        ctx.ensure_active()?;

        let mut live_outputs = BTreeMap::new();
        let mut missing = Vec::new();
        for resource in resources {
            let name = resource.name().unwrap_or_default().to_string();
            match self.fetch(resource).await? {
                Some(live) => {
                    live_outputs.insert(name, live);
                }
                None => missing.push(name),
            }
        }

        let verdict = match trait_def.spec.health_policy.as_deref() {
            Some(template) => {
                let mut template_ctx = TemplateContext::new()
                    .with_parameter(properties.unwrap_or(Value::Null))
                    .with(
                        CONTEXT_OUTPUTS,
                        json!(live_outputs.clone()),
                    );
                for (key, value) in enrichment {
                    template_ctx.set(key, value.clone());
                }
                let declared = self.eval_health(template, &template_ctx).await;
                if declared.healthy && !missing.is_empty() {
                    // downgrade only: a required output never materialized
                    HealthVerdict::unhealthy(format!(
                        "output resource missing: {}",
                        missing.join(", ")
                    ))
                } else {
                    declared
                }
            }
            None => {
                if !missing.is_empty() {
                    HealthVerdict::unhealthy(format!(
                        "output resource missing: {}",
                        missing.join(", ")
                    ))
                } else {
                    live_outputs
                        .values()
                        .map(generic_status_health)
                        .find(|v| !v.healthy)
                        .unwrap_or_else(HealthVerdict::healthy)
                }
            }
        };
        Ok(verdict)
    }

    /// Health-template failures are treated as unhealthy, not fatal
    async fn eval_health(&self, template: &str, template_ctx: &TemplateContext) -> HealthVerdict {
        match self.evaluator.eval(template, template_ctx).await {
            Ok(value) => match value.as_bool("isHealth") {
                Some(true) => HealthVerdict::healthy(),
                Some(false) => {
                    let message = value
                        .as_str("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| "health template reported unhealthy".to_string());
                    HealthVerdict::unhealthy(message)
                }
                None => HealthVerdict::unhealthy("health template produced no 'isHealth'"),
            },
            Err(e) => HealthVerdict::unhealthy(format!("health check failed: {}", e)),
        }
    }

    async fn eval_status_message(
        &self,
        template: &str,
        template_ctx: &TemplateContext,
    ) -> Option<String> {
        match self.evaluator.eval(template, template_ctx).await {
            Ok(value) => value.as_str("message").map(str::to_string),
            Err(_) => None,
        }
    }
}

/// Generic health from the conventional status shape, used when no health
/// template exists
pub fn generic_status_health(resource: &Value) -> HealthVerdict {
    let Some(status) = resource.get("status") else {
        return HealthVerdict::healthy();
    };

    if status.get("ready").and_then(Value::as_bool) == Some(false) {
        return HealthVerdict::unhealthy("status.ready is false");
    }

    if let Some(phase) = status.get("phase").and_then(Value::as_str) {
        if phase == "Failed" || phase == "Error" {
            return HealthVerdict::unhealthy(format!("status.phase is {}", phase));
        }
    }

    if let Some(want) = resource
        .get("spec")
        .and_then(|s| s.get("replicas"))
        .and_then(Value::as_i64)
    {
        let ready = status
            .get("readyReplicas")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if ready != want {
            return HealthVerdict::unhealthy(format!("{}/{} replicas ready", ready, want));
        }
    }

    if let Some(conditions) = status.get("conditions").and_then(Value::as_array) {
        for condition in conditions {
            if condition.get("status").and_then(Value::as_str) != Some("True") {
                let message = condition
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("condition not met");
                return HealthVerdict::unhealthy(message.to_string());
            }
        }
    }

    HealthVerdict::healthy()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_without_status_is_healthy() {
        assert!(generic_status_health(&json!({"kind": "ConfigMap"})).healthy);
    }

    #[test]
    fn ready_false_is_unhealthy() {
        let v = generic_status_health(&json!({"status": {"ready": false}}));
        assert!(!v.healthy);
    }

    #[test]
    fn failed_phase_is_unhealthy() {
        assert!(!generic_status_health(&json!({"status": {"phase": "Failed"}})).healthy);
        assert!(!generic_status_health(&json!({"status": {"phase": "Error"}})).healthy);
        assert!(generic_status_health(&json!({"status": {"phase": "Running"}})).healthy);
    }

    #[test]
    fn replica_mismatch_is_unhealthy() {
        let v = generic_status_health(&json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1}
        }));
        assert!(!v.healthy);
        assert_eq!(v.message.as_deref(), Some("1/3 replicas ready"));

        let v = generic_status_health(&json!({
            "spec": {"replicas": 2},
            "status": {"readyReplicas": 2}
        }));
        assert!(v.healthy);
    }

    #[test]
    fn failing_condition_surfaces_its_message() {
        let v = generic_status_health(&json!({
            "status": {"conditions": [
                {"type": "Available", "status": "True"},
                {"type": "Progressing", "status": "False", "message": "rollout stuck"}
            ]}
        }));
        assert!(!v.healthy);
        assert_eq!(v.message.as_deref(), Some("rollout stuck"));
    }
}
