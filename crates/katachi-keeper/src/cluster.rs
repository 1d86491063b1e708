//! Cluster access seam
//!
//! One `ClusterClient` per reachable cluster, a router keyed by cluster
//! name, and an in-memory implementation backing tests and local dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::manifest::{KeeperError, ResourceIdent, ResourceManifest};

/// Name of the control-plane cluster
pub const LOCAL_CLUSTER: &str = "local";

/// Apply options forwarded to the apply/patch primitive
#[derive(Clone, Debug)]
pub struct ApplyOptions {
    /// Field manager identity for server-side apply
    pub field_manager: String,
    /// Take ownership of conflicting fields
    pub force: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            field_manager: "katachi".to_string(),
            force: true,
        }
    }
}

/// Read/write access to one cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(&self, ident: &ResourceIdent) -> Result<Option<Value>, KeeperError>;

    /// Idempotent apply with optimistic-concurrency semantics
    async fn apply(
        &self,
        manifest: &ResourceManifest,
        options: &ApplyOptions,
    ) -> Result<(), KeeperError>;

    async fn delete(&self, ident: &ResourceIdent) -> Result<(), KeeperError>;

    /// Resources of any kind carrying all the given labels
    async fn list_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, KeeperError>;
}

/// Routes manifests to the cluster they target
#[derive(Default)]
pub struct ClusterRouter {
    clusters: RwLock<HashMap<String, Arc<dyn ClusterClient>>>,
}

impl ClusterRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A router with an in-memory local cluster, for tests and dry runs
    pub fn in_memory() -> Self {
        let router = Self::new();
        router.register(LOCAL_CLUSTER, Arc::new(InMemoryCluster::new()));
        router
    }

    pub fn register(&self, name: &str, client: Arc<dyn ClusterClient>) {
        self.clusters.write().insert(name.to_string(), client);
    }

    /// Resolve a cluster name; `None` targets the local cluster
    pub fn client(&self, cluster: Option<&str>) -> Result<Arc<dyn ClusterClient>, KeeperError> {
        let name = cluster.unwrap_or(LOCAL_CLUSTER);
        self.clusters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KeeperError::UnknownCluster(name.to_string()))
    }

    /// Registered cluster names in stable order
    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// In-memory cluster store
///
/// Emulates the apply/patch primitive: apply upserts and bumps a
/// `metadata.resourceVersion` counter so optimistic-concurrency paths are
/// observable in tests.
#[derive(Default)]
pub struct InMemoryCluster {
    resources: RwLock<HashMap<ResourceIdent, Value>>,
    version_counter: RwLock<u64>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Overwrite a stored resource directly, bypassing apply semantics
    pub fn put_raw(&self, ident: ResourceIdent, value: Value) {
        self.resources.write().insert(ident, value);
    }
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    value
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(&self, ident: &ResourceIdent) -> Result<Option<Value>, KeeperError> {
        Ok(self.resources.read().get(ident).cloned())
    }

    async fn apply(
        &self,
        manifest: &ResourceManifest,
        _options: &ApplyOptions,
    ) -> Result<(), KeeperError> {
        let ident = manifest.ident()?;
        let mut stored = manifest.value().clone();
        let version = {
            let mut counter = self.version_counter.write();
            *counter += 1;
            *counter
        };
        if let Some(metadata) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(version.to_string()),
            );
        }
        self.resources.write().insert(ident, stored);
        Ok(())
    }

    async fn delete(&self, ident: &ResourceIdent) -> Result<(), KeeperError> {
        self.resources.write().remove(ident);
        Ok(())
    }

    async fn list_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, KeeperError> {
        let resources = self.resources.read();
        let mut matched: Vec<(ResourceIdent, Value)> = resources
            .iter()
            .filter(|(_, value)| {
                let present = labels_of(value);
                labels
                    .iter()
                    .all(|(k, v)| present.get(k).map(|pv| pv == v).unwrap_or(false))
            })
            .map(|(ident, value)| (ident.clone(), value.clone()))
            .collect();
        matched.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(matched.into_iter().map(|(_, value)| value).collect())
    }
}
