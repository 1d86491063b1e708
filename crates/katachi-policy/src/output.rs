//! Policy outputs and their application to an Application
//!
//! A `PolicyOutput` is the declarative effect of one rendered policy.
//! Old cache records may instead carry the legacy transform shape; both
//! forms live behind the `PolicyArtifact` union with one `apply` entry
//! point per variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use katachi_api::{Application, ApplicationComponent, ApplicationPolicy, Workflow};
use katachi_core::{deep_merge, ReconcileContext};

use crate::error::PolicyError;

/// Declarative effect of one policy; unknown fields rejected
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyOutput {
    /// Replaces the Application's component list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ApplicationComponent>>,
    /// Replaces the Application's workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
    /// Replaces the Application's policy list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<ApplicationPolicy>>,
    /// Shallow-merged into the Application labels, policy value wins
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Shallow-merged into the Application annotations, policy value wins
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Deep-merged into the reconciliation's policy context
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ctx: Map<String, Value>,
}

impl PolicyOutput {
    /// The spec-affecting fields only, in canonical order, for cascade
    /// hashing; labels/annotations/ctx are deliberately excluded
    pub fn spec_projection(&self) -> Value {
        let mut projection = Map::new();
        if let Some(components) = &self.components {
            projection.insert(
                "components".to_string(),
                serde_json::to_value(components).unwrap_or(Value::Null),
            );
        }
        if let Some(workflow) = &self.workflow {
            projection.insert(
                "workflow".to_string(),
                serde_json::to_value(workflow).unwrap_or(Value::Null),
            );
        }
        if let Some(policies) = &self.policies {
            projection.insert(
                "policies".to_string(),
                serde_json::to_value(policies).unwrap_or(Value::Null),
            );
        }
        Value::Object(projection)
    }

    /// Whether applying this output would replace any top-level spec field
    pub fn modifies_spec(&self) -> bool {
        self.components.is_some() || self.workflow.is_some() || self.policies.is_some()
    }
}

/// What applying a policy changed on the Application
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppliedDiff {
    pub added_labels: Vec<String>,
    pub added_annotations: Vec<String>,
    pub spec_modified: bool,
    pub context_keys: Vec<String>,
}

/// Legacy transform kind retained to read old cache records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    #[default]
    Merge,
    Replace,
}

/// Legacy policy effect shape; only ever produced by deserializing old
/// cache records, rejected at template-decode time
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTransforms {
    #[serde(default)]
    pub transform_type: TransformType,
    /// Patch over the serialized Application spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A rendered policy effect in either API shape
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyArtifact {
    NewApi(PolicyOutput),
    LegacyApi(PolicyTransforms),
}

impl Default for PolicyArtifact {
    fn default() -> Self {
        PolicyArtifact::NewApi(PolicyOutput::default())
    }
}

impl PolicyArtifact {
    pub fn output(&self) -> Option<&PolicyOutput> {
        match self {
            PolicyArtifact::NewApi(output) => Some(output),
            PolicyArtifact::LegacyApi(_) => None,
        }
    }

    /// Spec-affecting projection for cascade hashing
    pub fn spec_projection(&self) -> Value {
        match self {
            PolicyArtifact::NewApi(output) => output.spec_projection(),
            PolicyArtifact::LegacyApi(transforms) => transforms
                .spec
                .clone()
                .map(|spec| serde_json::json!({ "spec": spec }))
                .unwrap_or_else(|| Value::Object(Map::new())),
        }
    }

    /// Merge this artifact into the in-memory Application
    pub fn apply(
        &self,
        app: &mut Application,
        ctx: &mut ReconcileContext,
    ) -> Result<AppliedDiff, PolicyError> {
        match self {
            PolicyArtifact::NewApi(output) => Ok(apply_output(output, app, ctx)),
            PolicyArtifact::LegacyApi(transforms) => apply_transforms(transforms, app),
        }
    }
}

fn merge_metadata(
    target: &mut Option<BTreeMap<String, String>>,
    incoming: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut added = Vec::new();
    if incoming.is_empty() {
        return added;
    }
    let map = target.get_or_insert_with(BTreeMap::new);
    for (key, value) in incoming {
        if map.get(key) != Some(value) {
            added.push(key.clone());
        }
        map.insert(key.clone(), value.clone());
    }
    added
}

fn apply_output(
    output: &PolicyOutput,
    app: &mut Application,
    ctx: &mut ReconcileContext,
) -> AppliedDiff {
    let mut diff = AppliedDiff::default();

    if let Some(components) = &output.components {
        app.spec.components = components.clone();
        diff.spec_modified = true;
    }
    if let Some(workflow) = &output.workflow {
        app.spec.workflow = Some(workflow.clone());
        diff.spec_modified = true;
    }
    if let Some(policies) = &output.policies {
        app.spec.policies = policies.clone();
        diff.spec_modified = true;
    }

    diff.added_labels = merge_metadata(&mut app.metadata.labels, &output.labels);
    diff.added_annotations = merge_metadata(&mut app.metadata.annotations, &output.annotations);

    if !output.ctx.is_empty() {
        diff.context_keys = output.ctx.keys().cloned().collect();
        ctx.merge_policy_context(&output.ctx);
    }

    diff
}

fn apply_transforms(
    transforms: &PolicyTransforms,
    app: &mut Application,
) -> Result<AppliedDiff, PolicyError> {
    let mut diff = AppliedDiff::default();

    if let Some(patch) = &transforms.spec {
        let mut spec = serde_json::to_value(&app.spec)?;
        match transforms.transform_type {
            TransformType::Replace => spec = patch.clone(),
            TransformType::Merge => deep_merge(&mut spec, patch),
        }
        app.spec = serde_json::from_value(spec)?;
        diff.spec_modified = true;
    }

    diff.added_labels = merge_metadata(&mut app.metadata.labels, &transforms.labels);
    diff.added_annotations = merge_metadata(&mut app.metadata.annotations, &transforms.annotations);

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app() -> Application {
        Application::new(
            "demo",
            serde_json::from_value(json!({
                "components": [{"name": "web", "type": "webservice"}]
            }))
            .unwrap(),
        )
    }

    #[test]
    fn unknown_output_field_is_rejected_naming_it() {
        let err = serde_json::from_value::<PolicyOutput>(json!({"labls": {}})).unwrap_err();
        assert!(err.to_string().contains("labls"));
    }

    #[test]
    fn spec_projection_excludes_metadata_and_ctx() {
        let output: PolicyOutput = serde_json::from_value(json!({
            "labels": {"owner": "team-x"},
            "annotations": {"note": "hi"},
            "ctx": {"quota": 3},
            "workflow": {"steps": []}
        }))
        .unwrap();
        assert_eq!(output.spec_projection(), json!({"workflow": {"steps": []}}));
    }

    #[test]
    fn apply_merges_labels_and_tracks_diff() {
        let mut application = app();
        application
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("owner".to_string(), "old".to_string());

        let output: PolicyOutput = serde_json::from_value(json!({
            "labels": {"owner": "team-x", "tier": "gold"},
            "ctx": {"quota": 3}
        }))
        .unwrap();
        let mut ctx = ReconcileContext::new("default", "demo");
        let diff = PolicyArtifact::NewApi(output)
            .apply(&mut application, &mut ctx)
            .unwrap();

        assert_eq!(diff.added_labels, vec!["owner", "tier"]);
        assert!(!diff.spec_modified);
        assert_eq!(diff.context_keys, vec!["quota"]);
        let labels = application.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("owner").map(String::as_str), Some("team-x"));
        assert_eq!(ctx.policy_context().get("quota"), Some(&json!(3)));
    }

    #[test]
    fn unchanged_label_is_not_reported_as_added() {
        let mut application = app();
        application
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("owner".to_string(), "team-x".to_string());
        let output: PolicyOutput =
            serde_json::from_value(json!({"labels": {"owner": "team-x"}})).unwrap();
        let mut ctx = ReconcileContext::new("default", "demo");
        let diff = PolicyArtifact::NewApi(output)
            .apply(&mut application, &mut ctx)
            .unwrap();
        assert!(diff.added_labels.is_empty());
    }

    #[test]
    fn apply_replaces_components() {
        let mut application = app();
        let output: PolicyOutput = serde_json::from_value(json!({
            "components": [
                {"name": "web", "type": "webservice"},
                {"name": "sidecar", "type": "worker"}
            ]
        }))
        .unwrap();
        let mut ctx = ReconcileContext::new("default", "demo");
        let diff = PolicyArtifact::NewApi(output)
            .apply(&mut application, &mut ctx)
            .unwrap();
        assert!(diff.spec_modified);
        assert_eq!(application.spec.components.len(), 2);
    }

    #[test]
    fn legacy_merge_transform_patches_the_spec() {
        let mut application = app();
        let transforms: PolicyTransforms = serde_json::from_value(json!({
            "transformType": "merge",
            "spec": {"workflow": {"steps": []}}
        }))
        .unwrap();
        let mut ctx = ReconcileContext::new("default", "demo");
        let diff = PolicyArtifact::LegacyApi(transforms)
            .apply(&mut application, &mut ctx)
            .unwrap();
        assert!(diff.spec_modified);
        assert!(application.spec.workflow.is_some());
        assert_eq!(application.spec.components.len(), 1);
    }

    #[test]
    fn artifact_round_trips_as_new_api_when_possible() {
        let artifact = PolicyArtifact::NewApi(
            serde_json::from_value(json!({"labels": {"a": "b"}})).unwrap(),
        );
        let json = serde_json::to_value(&artifact).unwrap();
        let back: PolicyArtifact = serde_json::from_value(json).unwrap();
        assert_eq!(artifact, back);
    }

    #[test]
    fn legacy_record_shape_deserializes_as_legacy() {
        let value = json!({"transformType": "replace", "spec": {"components": []}});
        let artifact: PolicyArtifact = serde_json::from_value(value).unwrap();
        assert!(matches!(artifact, PolicyArtifact::LegacyApi(_)));
    }
}
