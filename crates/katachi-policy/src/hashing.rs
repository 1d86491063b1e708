//! Invalidation keys
//!
//! `application_hash` covers the spec only: policies may mutate labels and
//! annotations, so including them would cause self-invalidation.
//! `cascade_id` covers the spec-affecting projection of upstream outputs
//! in execution order, so downstream caches fall when an upstream policy's
//! effect shifts.

use serde_json::Value;

use katachi_api::ApplicationSpec;
use katachi_core::content_hash;

use crate::error::PolicyError;
use crate::output::PolicyArtifact;

/// Content hash of the Application spec, labels and annotations excluded
pub fn application_hash(spec: &ApplicationSpec) -> Result<String, PolicyError> {
    Ok(content_hash(spec)?)
}

/// Hash of the spec-only projection of upstream outputs in execution order
pub fn cascade_id(upstream: &[PolicyArtifact]) -> Result<String, PolicyError> {
    let projections: Vec<Value> = upstream.iter().map(|a| a.spec_projection()).collect();
    Ok(content_hash(&projections)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PolicyOutput;
    use serde_json::json;

    fn artifact(value: Value) -> PolicyArtifact {
        PolicyArtifact::NewApi(serde_json::from_value::<PolicyOutput>(value).unwrap())
    }

    #[test]
    fn cascade_ignores_labels_annotations_and_ctx() {
        let base = artifact(json!({"components": [{"name": "a", "type": "worker"}]}));
        let with_metadata = artifact(json!({
            "components": [{"name": "a", "type": "worker"}],
            "labels": {"x": "1"},
            "annotations": {"y": "2"},
            "ctx": {"z": 3}
        }));
        assert_eq!(
            cascade_id(&[base]).unwrap(),
            cascade_id(&[with_metadata]).unwrap()
        );
    }

    #[test]
    fn cascade_changes_when_spec_output_changes() {
        let a = artifact(json!({"components": [{"name": "a", "type": "worker"}]}));
        let b = artifact(json!({"components": [{"name": "b", "type": "worker"}]}));
        assert_ne!(cascade_id(&[a]).unwrap(), cascade_id(&[b]).unwrap());
    }

    #[test]
    fn cascade_is_order_sensitive() {
        let a = artifact(json!({"components": [{"name": "a", "type": "worker"}]}));
        let b = artifact(json!({"workflow": {"steps": []}}));
        assert_ne!(
            cascade_id(&[a.clone(), b.clone()]).unwrap(),
            cascade_id(&[b, a]).unwrap()
        );
    }

    #[test]
    fn application_hash_covers_spec_only() {
        let spec: ApplicationSpec = serde_json::from_value(json!({
            "components": [{"name": "a", "type": "worker"}]
        }))
        .unwrap();
        // identical specs hash identically regardless of object metadata,
        // which is not part of the hashed input at all
        assert_eq!(
            application_hash(&spec).unwrap(),
            application_hash(&spec.clone()).unwrap()
        );
    }
}
