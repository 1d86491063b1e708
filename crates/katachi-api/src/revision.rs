//! The `ApplicationRevision` custom resource
//!
//! An immutable snapshot of the Application after the policy pre-pass,
//! keyed by a content hash of its spec plus embedded definition versions.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationSpec;

/// ApplicationRevision custom resource
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1beta1",
    kind = "ApplicationRevision",
    plural = "applicationrevisions",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevisionSpec {
    /// Snapshot of the Application spec after the policy pre-pass
    pub application: ApplicationSpec,
    /// Content hash of the snapshot plus definition versions
    pub revision_hash: String,
    /// Monotonic revision number
    pub revision: i64,
    /// Versions of the definitions embedded at render time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definition_versions: BTreeMap<String, String>,
    /// User-controlled revision identifier active at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_version: Option<String>,
}

impl ApplicationRevision {
    /// Conventional revision object name
    pub fn revision_name(app_name: &str, revision: i64) -> String {
        format!("{}-v{}", app_name, revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_name_convention() {
        assert_eq!(ApplicationRevision::revision_name("demo", 3), "demo-v3");
    }
}
