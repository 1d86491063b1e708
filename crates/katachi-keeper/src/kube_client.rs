//! Kubernetes-backed cluster client
//!
//! Applies manifests as `DynamicObject`s through server-side apply. The
//! apiserver offers no cross-kind list, so the client remembers which
//! group/version/kinds it has touched and fans the label query out over
//! those.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::cluster::{ApplyOptions, ClusterClient};
use crate::manifest::{KeeperError, ResourceIdent, ResourceManifest};

pub struct KubeCluster {
    client: kube::Client,
    touched_kinds: RwLock<BTreeSet<(String, String)>>,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            touched_kinds: RwLock::new(BTreeSet::new()),
        }
    }

    fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        GroupVersionKind::gvk(group, version, kind)
    }

    fn api_for(&self, ident: &ResourceIdent) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(&Self::gvk(&ident.api_version, &ident.kind));
        if ident.namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &ident.namespace, &resource)
        }
    }

    fn remember_kind(&self, ident: &ResourceIdent) {
        self.touched_kinds
            .write()
            .insert((ident.api_version.clone(), ident.kind.clone()));
    }
}

fn map_kube_error(resource: &ResourceIdent, err: kube::Error) -> KeeperError {
    match err {
        kube::Error::Api(ref response) if response.code == 409 => {
            KeeperError::Conflict(resource.to_string(), response.message.clone())
        }
        other => KeeperError::Cluster(other.to_string()),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, ident: &ResourceIdent) -> Result<Option<Value>, KeeperError> {
        let api = self.api_for(ident);
        let object = api
            .get_opt(&ident.name)
            .await
            .map_err(|e| map_kube_error(ident, e))?;
        match object {
            Some(object) => Ok(Some(
                serde_json::to_value(&object).map_err(|e| KeeperError::Cluster(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        manifest: &ResourceManifest,
        options: &ApplyOptions,
    ) -> Result<(), KeeperError> {
        let ident = manifest.ident()?;
        let api = self.api_for(&ident);
        let mut params = PatchParams::apply(&options.field_manager);
        if options.force {
            params = params.force();
        }
        api.patch(&ident.name, &params, &Patch::Apply(manifest.value()))
            .await
            .map_err(|e| map_kube_error(&ident, e))?;
        self.remember_kind(&ident);
        Ok(())
    }

    async fn delete(&self, ident: &ResourceIdent) -> Result<(), KeeperError> {
        let api = self.api_for(ident);
        match api.delete(&ident.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(map_kube_error(ident, e)),
        }
    }

    async fn list_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, KeeperError> {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        let params = ListParams::default().labels(&selector);

        let kinds = self.touched_kinds.read().clone();
        let mut results = Vec::new();
        for (api_version, kind) in kinds {
            let resource = ApiResource::from_gvk(&Self::gvk(&api_version, &kind));
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
            let objects = match api.list(&params).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(api_version = %api_version, kind = %kind, error = %e, "label query failed for kind");
                    continue;
                }
            };
            for object in objects {
                results
                    .push(serde_json::to_value(&object).map_err(|e| KeeperError::Cluster(e.to_string()))?);
            }
        }
        Ok(results)
    }
}
