//! Resource tracking and staged apply
//!
//! One `ResourceKeeper` serves one reconciliation: it stamps owner labels
//! on everything it applies, remembers what the current revision claimed,
//! and can tell whether a set of resources is already present and owned.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use katachi_api::{LABEL_APP_NAME, LABEL_APP_NAMESPACE, LABEL_MANAGED_RESOURCE};
use katachi_core::ReconcileContext;

use crate::cluster::{ApplyOptions, ClusterRouter, LOCAL_CLUSTER};
use crate::manifest::{KeeperError, ResourceIdent, ResourceManifest};

/// Tracking key: cluster plus in-cluster identity
pub type TrackedKey = (String, ResourceIdent);

pub struct ResourceKeeper {
    router: Arc<ClusterRouter>,
    owner_labels: BTreeMap<String, String>,
    owner_reference: Option<Value>,
    tracked: parking_lot::RwLock<BTreeSet<TrackedKey>>,
}

impl ResourceKeeper {
    pub fn new(router: Arc<ClusterRouter>, owner_labels: BTreeMap<String, String>) -> Self {
        Self {
            router,
            owner_labels,
            owner_reference: None,
            tracked: parking_lot::RwLock::new(BTreeSet::new()),
        }
    }

    /// Owner reference stamped on local-cluster resources
    pub fn with_owner_reference(mut self, owner_ref: Value) -> Self {
        self.owner_reference = Some(owner_ref);
        self
    }

    pub fn router(&self) -> &Arc<ClusterRouter> {
        &self.router
    }

    fn cluster_name(manifest: &ResourceManifest) -> String {
        manifest.cluster().unwrap_or(LOCAL_CLUSTER).to_string()
    }

    /// Apply manifests in order, stamping ownership
    pub async fn dispatch(
        &self,
        ctx: &ReconcileContext,
        manifests: &[ResourceManifest],
        options: &ApplyOptions,
    ) -> Result<(), KeeperError> {
        for manifest in manifests {
            ctx.ensure_active()?;
            let mut stamped = manifest.clone();
            stamped.set_labels(&self.owner_labels);
            stamped.set_label(LABEL_MANAGED_RESOURCE, "true");
            let cluster = Self::cluster_name(manifest);
            if cluster == LOCAL_CLUSTER {
                if let Some(owner_ref) = &self.owner_reference {
                    stamped.set_owner_reference(owner_ref.clone());
                }
            }
            let ident = stamped.ident()?;
            let client = self.router.client(Some(&cluster))?;
            client.apply(&stamped, options).await?;
            debug!(cluster = %cluster, resource = %ident, "applied resource");
            self.tracked.write().insert((cluster, ident));
        }
        Ok(())
    }

    /// Claim manifests without applying them, so the probe's no-op path
    /// still protects them from garbage collection
    pub fn track(&self, manifests: &[ResourceManifest]) -> Result<(), KeeperError> {
        let mut tracked = self.tracked.write();
        for manifest in manifests {
            tracked.insert((Self::cluster_name(manifest), manifest.ident()?));
        }
        Ok(())
    }

    /// Delete manifests in order
    pub async fn delete(
        &self,
        ctx: &ReconcileContext,
        manifests: &[ResourceManifest],
    ) -> Result<(), KeeperError> {
        for manifest in manifests {
            ctx.ensure_active()?;
            let ident = manifest.ident()?;
            let cluster = Self::cluster_name(manifest);
            let client = self.router.client(Some(&cluster))?;
            client.delete(&ident).await?;
            debug!(cluster = %cluster, resource = %ident, "deleted resource");
            self.tracked.write().remove(&(cluster, ident));
        }
        Ok(())
    }

    /// True iff every manifest is already present and carries this
    /// Application revision's owner labels
    pub async fn contains_resources(
        &self,
        manifests: &[ResourceManifest],
    ) -> Result<bool, KeeperError> {
        for manifest in manifests {
            let ident = manifest.ident()?;
            let client = self.router.client(manifest.cluster())?;
            let Some(live) = client.get(&ident).await? else {
                return Ok(false);
            };
            let live_labels = labels_of(&live);
            let owned = self
                .owner_labels
                .iter()
                .all(|(k, v)| live_labels.get(k).map(|lv| lv == v).unwrap_or(false));
            if !owned {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn app_selector(&self) -> BTreeMap<String, String> {
        let mut selector = BTreeMap::new();
        for key in [LABEL_APP_NAME, LABEL_APP_NAMESPACE] {
            if let Some(value) = self.owner_labels.get(key) {
                selector.insert(key.to_string(), value.clone());
            }
        }
        selector
    }

    /// Delete dispatched resources the current revision did not claim;
    /// control-plane bookkeeping (revisions, cache blobs) is untouched
    pub async fn gc(&self, ctx: &ReconcileContext) -> Result<Vec<TrackedKey>, KeeperError> {
        let mut selector = self.app_selector();
        selector.insert(LABEL_MANAGED_RESOURCE.to_string(), "true".to_string());

        let mut removed = Vec::new();
        let tracked = self.tracked.read().clone();
        for cluster in self.router.cluster_names() {
            ctx.ensure_active()?;
            let client = self.router.client(Some(&cluster))?;
            for live in client.list_by_labels(&selector).await? {
                let Some(ident) = ident_of(&live) else {
                    continue;
                };
                let key = (cluster.clone(), ident);
                if !tracked.contains(&key) {
                    client.delete(&key.1).await?;
                    debug!(cluster = %key.0, resource = %key.1, "garbage-collected resource");
                    removed.push(key);
                }
            }
        }
        Ok(removed)
    }

    /// Delete everything labeled as belonging to this Application,
    /// revisions included; used when the Application itself is deleted
    pub async fn purge(&self, ctx: &ReconcileContext) -> Result<(), KeeperError> {
        let selector = self.app_selector();
        for cluster in self.router.cluster_names() {
            ctx.ensure_active()?;
            let client = self.router.client(Some(&cluster))?;
            for live in client.list_by_labels(&selector).await? {
                let Some(ident) = ident_of(&live) else {
                    continue;
                };
                client.delete(&ident).await?;
                debug!(cluster = %cluster, resource = %ident, "cascade-deleted resource");
            }
        }
        Ok(())
    }

    /// Everything the current revision claimed, in stable order
    pub fn applied_resources(&self) -> Vec<TrackedKey> {
        self.tracked.read().iter().cloned().collect()
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

fn ident_of(value: &Value) -> Option<ResourceIdent> {
    Some(ResourceIdent {
        api_version: value.get("apiVersion")?.as_str()?.to_string(),
        kind: value.get("kind")?.as_str()?.to_string(),
        namespace: value
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)?
            .to_string(),
    })
}
