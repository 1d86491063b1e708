//! Behavioral annotations, owner labels, and the metadata filter

use std::collections::BTreeMap;

/// API group of all Katachi custom resources
pub const API_GROUP: &str = "core.oam.dev";

/// Opt out of global policy application for this Application
pub const ANNOTATION_SKIP_GLOBAL_POLICIES: &str = "policy.oam.dev/skip-global";
/// RFC3339 timestamp or duration triggering a workflow restart
pub const ANNOTATION_WORKFLOW_RESTART: &str = "app.oam.dev/workflow-restart";
/// Force re-apply in dispatch even when the health probe reports healthy
pub const ANNOTATION_AUTO_UPDATE: &str = "app.oam.dev/auto-update";
/// Persist policy-rendered spec mutations back before revision creation
pub const ANNOTATION_AUTO_REVISION: &str = "app.oam.dev/auto-revision";
/// User-controlled revision identifier
pub const ANNOTATION_PUBLISH_VERSION: &str = "app.oam.dev/publish-version";
/// Cluster a rendered resource targets, set by templates
pub const ANNOTATION_RESOURCE_CLUSTER: &str = "app.oam.dev/cluster";

/// Owner label: Application name
pub const LABEL_APP_NAME: &str = "app.oam.dev/name";
/// Owner label: Application namespace
pub const LABEL_APP_NAMESPACE: &str = "app.oam.dev/namespace";
/// Owner label: revision the resource was dispatched for
pub const LABEL_APP_REVISION: &str = "app.oam.dev/app-revision-hash";
/// Owner label: component the resource belongs to
pub const LABEL_APP_COMPONENT: &str = "app.oam.dev/component";
/// Marks a resource as dispatched workload state, distinguishing it from
/// control-plane bookkeeping (revisions, cache blobs) during GC
pub const LABEL_MANAGED_RESOURCE: &str = "app.oam.dev/managed-resource";

/// Labels and annotations with these prefixes carry internal bookkeeping
/// and are hidden from policy templates
pub const FILTERED_METADATA_PREFIXES: [&str; 7] = [
    "app.oam.dev/",
    "oam.dev/",
    "kubectl.kubernetes.io/",
    "kubernetes.io/",
    "k8s.io/",
    "helm.sh/",
    "app.kubernetes.io/",
];

/// Drop entries whose key carries a filtered prefix
pub fn filter_exposed_metadata(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .filter(|(k, _)| {
            !FILTERED_METADATA_PREFIXES
                .iter()
                .any(|prefix| k.starts_with(prefix))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
