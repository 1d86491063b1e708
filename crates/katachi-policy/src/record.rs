//! Cache records
//!
//! The durable tier stores one `PolicyCacheRecord` per policy, carrying a
//! `CachedOutputData` per output type. The in-memory pipeline works with
//! `RenderedPolicyResult`s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{OutputKind, PolicyConfig, RefreshMode};
use crate::error::PolicyError;
use crate::output::{PolicyArtifact, PolicyOutput};

/// One output type's cached rendering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedOutputData {
    pub rendered_at: DateTime<Utc>,
    #[serde(default)]
    pub mode: RefreshMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    pub data: Value,
}

/// Durable cache record for one policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCacheRecord {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub priority: i32,
    /// Position in execution order
    pub sequence: u32,
    /// Hash of the Application spec at render time
    pub application_hash: String,
    /// Hash of upstream policies' spec-affecting outputs at render time
    #[serde(default)]
    pub last_cascade_id: String,
    /// One entry per output type, keyed by the output kind name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, CachedOutputData>,
    /// Legacy whole-output blob, read-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Legacy cache TTL; zero is read as refresh-always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_seconds: Option<u64>,
}

fn slice_of(output: &PolicyOutput, kind: OutputKind) -> Value {
    match kind {
        OutputKind::Spec => output.spec_projection(),
        OutputKind::Labels => serde_json::to_value(&output.labels).unwrap_or(Value::Null),
        OutputKind::Annotations => serde_json::to_value(&output.annotations).unwrap_or(Value::Null),
        OutputKind::Ctx => Value::Object(output.ctx.clone()),
    }
}

impl PolicyCacheRecord {
    /// Build a record from a freshly assembled output; `rendered_at` gives
    /// the per-output-type rendering time (kept times for reused slices)
    pub fn build(
        name: &str,
        namespace: &str,
        priority: i32,
        sequence: u32,
        application_hash: &str,
        cascade_id: &str,
        output: &PolicyOutput,
        config: &PolicyConfig,
        rendered_at: &BTreeMap<OutputKind, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut outputs = BTreeMap::new();
        for kind in OutputKind::ALL {
            let rule = config.rule(kind);
            outputs.insert(
                kind.as_str().to_string(),
                CachedOutputData {
                    rendered_at: rendered_at.get(&kind).copied().unwrap_or(now),
                    mode: rule.mode,
                    interval: rule.interval,
                    data: slice_of(output, kind),
                },
            );
        }
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            priority,
            sequence,
            application_hash: application_hash.to_string(),
            last_cascade_id: cascade_id.to_string(),
            outputs,
            data: None,
            cache_ttl_seconds: None,
        }
    }

    /// Valid under the invalidation keys only; per-output-type refresh is
    /// decided separately
    pub fn matches(&self, application_hash: &str, cascade_id: &str) -> bool {
        self.application_hash == application_hash && self.last_cascade_id == cascade_id
    }

    pub fn cached(&self, kind: OutputKind) -> Option<&CachedOutputData> {
        self.outputs.get(kind.as_str())
    }

    /// Whether the legacy TTL field forces re-rendering; a TTL of zero is
    /// read as refresh-always
    pub fn legacy_refresh_always(&self) -> bool {
        self.cache_ttl_seconds == Some(0)
    }

    /// Reassemble the cached effect
    pub fn artifact(&self) -> Result<PolicyArtifact, PolicyError> {
        if self.outputs.is_empty() {
            return match &self.data {
                Some(blob) => Ok(serde_json::from_value(blob.clone())?),
                None => Ok(PolicyArtifact::default()),
            };
        }
        Ok(PolicyArtifact::NewApi(self.assemble_output()?))
    }

    fn assemble_output(&self) -> Result<PolicyOutput, PolicyError> {
        let mut output = PolicyOutput::default();
        if let Some(spec) = self.cached(OutputKind::Spec) {
            if let Some(obj) = spec.data.as_object() {
                if let Some(components) = obj.get("components") {
                    output.components = Some(serde_json::from_value(components.clone())?);
                }
                if let Some(workflow) = obj.get("workflow") {
                    output.workflow = Some(serde_json::from_value(workflow.clone())?);
                }
                if let Some(policies) = obj.get("policies") {
                    output.policies = Some(serde_json::from_value(policies.clone())?);
                }
            }
        }
        if let Some(labels) = self.cached(OutputKind::Labels) {
            if !labels.data.is_null() {
                output.labels = serde_json::from_value(labels.data.clone())?;
            }
        }
        if let Some(annotations) = self.cached(OutputKind::Annotations) {
            if !annotations.data.is_null() {
                output.annotations = serde_json::from_value(annotations.data.clone())?;
            }
        }
        if let Some(ctx) = self.cached(OutputKind::Ctx) {
            if let Some(obj) = ctx.data.as_object() {
                output.ctx = obj.clone();
            }
        }
        Ok(output)
    }
}

/// In-memory result of rendering one policy
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedPolicyResult {
    pub name: String,
    pub namespace: String,
    pub priority: i32,
    pub enabled: bool,
    pub skip_reason: Option<String>,
    pub transforms: PolicyArtifact,
    pub additional_context: Map<String, Value>,
    pub config: PolicyConfig,
}

impl RenderedPolicyResult {
    pub fn skipped(name: &str, namespace: &str, priority: i32, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            priority,
            enabled: false,
            skip_reason: Some(reason.into()),
            transforms: PolicyArtifact::default(),
            additional_context: Map::new(),
            config: PolicyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_output() -> PolicyOutput {
        serde_json::from_value(json!({
            "components": [{"name": "web", "type": "webservice"}],
            "labels": {"owner": "team-x"},
            "ctx": {"quota": {"cpu": 4}}
        }))
        .unwrap()
    }

    #[test]
    fn record_round_trips_its_output() {
        let output = sample_output();
        let now = Utc::now();
        let record = PolicyCacheRecord::build(
            "quota",
            "default",
            5,
            0,
            "hash",
            "cascade",
            &output,
            &PolicyConfig::default(),
            &BTreeMap::new(),
            now,
        );
        let json = serde_json::to_value(&record).unwrap();
        let back: PolicyCacheRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record, back);
        assert_eq!(back.artifact().unwrap(), PolicyArtifact::NewApi(output));
    }

    #[test]
    fn legacy_ttl_zero_means_refresh_always() {
        let record = PolicyCacheRecord {
            name: "old".to_string(),
            namespace: "default".to_string(),
            priority: 0,
            sequence: 0,
            application_hash: "h".to_string(),
            last_cascade_id: String::new(),
            outputs: BTreeMap::new(),
            data: Some(json!({"transformType": "merge", "labels": {"a": "b"}})),
            cache_ttl_seconds: Some(0),
        };
        assert!(record.legacy_refresh_always());
        assert!(matches!(
            record.artifact().unwrap(),
            PolicyArtifact::LegacyApi(_)
        ));

        let fresh = PolicyCacheRecord::build(
            "new",
            "default",
            0,
            0,
            "h",
            "c",
            &PolicyOutput::default(),
            &PolicyConfig::default(),
            &BTreeMap::new(),
            Utc::now(),
        );
        assert!(!fresh.legacy_refresh_always());
    }

    #[test]
    fn matches_requires_both_hashes() {
        let record = PolicyCacheRecord::build(
            "p",
            "default",
            0,
            0,
            "h1",
            "c1",
            &PolicyOutput::default(),
            &PolicyConfig::default(),
            &BTreeMap::new(),
            Utc::now(),
        );
        assert!(record.matches("h1", "c1"));
        assert!(!record.matches("h2", "c1"));
        assert!(!record.matches("h1", "c2"));
    }
}
