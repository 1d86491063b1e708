//! Revision management
//!
//! An `ApplicationRevision` snapshots the Application spec after the
//! policy pre-pass, keyed by a content hash of the spec plus the versions
//! of the definitions it references. A new revision is created when that
//! hash or the publish version moves, so a definition-template change
//! produces a revision even with an unchanged spec; old revisions are
//! pruned to the configured retain window.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use katachi_api::{
    Application, ApplicationRevision, ApplicationRevisionSpec, LABEL_APP_NAME, LABEL_APP_NAMESPACE,
};
use katachi_core::content_hash;
use katachi_keeper::{ApplyOptions, ClusterClient, ResourceManifest};

use crate::error::ControllerError;

/// Result of ensuring a revision exists for the current spec
#[derive(Clone, Debug)]
pub struct EnsuredRevision {
    pub name: String,
    pub revision: i64,
    pub hash: String,
    /// A new revision object was created this reconciliation
    pub created: bool,
}

pub struct RevisionManager {
    local: Arc<dyn ClusterClient>,
    limit: usize,
}

impl RevisionManager {
    pub fn new(local: Arc<dyn ClusterClient>, limit: usize) -> Self {
        Self { local, limit }
    }

    fn owner_labels(app: &Application) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_APP_NAME.to_string(),
            app.metadata.name.clone().unwrap_or_default(),
        );
        labels.insert(
            LABEL_APP_NAMESPACE.to_string(),
            app.metadata.namespace.clone().unwrap_or_default(),
        );
        labels
    }

    /// Reuse the latest revision when nothing material changed, else
    /// snapshot a new one and prune
    ///
    /// `definition_versions` carries the versions of every definition the
    /// spec references; it is part of the revision identity.
    pub async fn ensure(
        &self,
        app: &Application,
        definition_versions: BTreeMap<String, String>,
        owner_reference: Option<Value>,
    ) -> Result<EnsuredRevision, ControllerError> {
        let app_name = app
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingMetadata("name"))?;
        let namespace = app
            .metadata
            .namespace
            .clone()
            .ok_or(ControllerError::MissingMetadata("namespace"))?;
        let hash = content_hash(&json!({
            "application": &app.spec,
            "definitionVersions": &definition_versions,
        }))?;
        let publish_version = app.publish_version().map(str::to_string);

        if let Some(latest) = app.status.as_ref().and_then(|s| s.latest_revision.as_ref()) {
            if latest.revision_hash == hash {
                let ident = katachi_keeper::ResourceIdent {
                    api_version: "core.oam.dev/v1beta1".to_string(),
                    kind: "ApplicationRevision".to_string(),
                    namespace: namespace.clone(),
                    name: latest.name.clone(),
                };
                if let Some(existing) = self.local.get(&ident).await? {
                    let existing_publish = existing
                        .get("spec")
                        .and_then(|s| s.get("publishVersion"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    if existing_publish == publish_version {
                        return Ok(EnsuredRevision {
                            name: latest.name.clone(),
                            revision: latest.revision,
                            hash,
                            created: false,
                        });
                    }
                }
            }
        }

        let revision = app
            .status
            .as_ref()
            .and_then(|s| s.latest_revision.as_ref())
            .map(|r| r.revision + 1)
            .unwrap_or(1);
        let name = ApplicationRevision::revision_name(&app_name, revision);

        let spec = ApplicationRevisionSpec {
            application: app.spec.clone(),
            revision_hash: hash.clone(),
            revision,
            definition_versions,
            publish_version,
        };
        let mut manifest = ResourceManifest::new(json!({
            "apiVersion": "core.oam.dev/v1beta1",
            "kind": "ApplicationRevision",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": Self::owner_labels(app),
            },
            "spec": serde_json::to_value(&spec)?,
        }))?;
        if let Some(owner_ref) = owner_reference {
            manifest.set_owner_reference(owner_ref);
        }
        self.local.apply(&manifest, &ApplyOptions::default()).await?;
        info!(app = %app_name, revision = revision, "created application revision");

        self.prune(app).await?;
        Ok(EnsuredRevision { name, revision, hash, created: true })
    }

    /// Delete the oldest revisions beyond the retain window
    async fn prune(&self, app: &Application) -> Result<(), ControllerError> {
        let mut revisions: Vec<(i64, katachi_keeper::ResourceIdent)> = self
            .local
            .list_by_labels(&Self::owner_labels(app))
            .await?
            .into_iter()
            .filter(|value| value.get("kind").and_then(Value::as_str) == Some("ApplicationRevision"))
            .filter_map(|value| {
                let revision = value
                    .get("spec")
                    .and_then(|s| s.get("revision"))
                    .and_then(Value::as_i64)?;
                let ident = katachi_keeper::ResourceIdent {
                    api_version: "core.oam.dev/v1beta1".to_string(),
                    kind: "ApplicationRevision".to_string(),
                    namespace: value.get("metadata")?.get("namespace")?.as_str()?.to_string(),
                    name: value.get("metadata")?.get("name")?.as_str()?.to_string(),
                };
                Some((revision, ident))
            })
            .collect();
        revisions.sort_by_key(|(revision, _)| *revision);

        while revisions.len() > self.limit {
            let (revision, ident) = revisions.remove(0);
            debug!(revision = revision, "pruning application revision");
            self.local.delete(&ident).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katachi_api::RevisionReference;
    use katachi_keeper::InMemoryCluster;

    fn app(replicas: u64) -> Application {
        let mut app = Application::new(
            "demo",
            serde_json::from_value(json!({
                "components": [{"name": "web", "type": "webservice", "properties": {"replicas": replicas}}]
            }))
            .unwrap(),
        );
        app.metadata.namespace = Some("default".to_string());
        app
    }

    #[tokio::test]
    async fn creates_then_reuses_revisions() {
        let cluster = Arc::new(InMemoryCluster::new());
        let manager = RevisionManager::new(cluster.clone(), 10);

        let mut application = app(1);
        let first = manager.ensure(&application, BTreeMap::new(), None).await.unwrap();
        assert!(first.created);
        assert_eq!(first.name, "demo-v1");

        // unchanged spec with the revision recorded in status: reuse
        application.status = Some(katachi_api::ApplicationStatus {
            latest_revision: Some(RevisionReference {
                name: first.name.clone(),
                revision: first.revision,
                revision_hash: first.hash.clone(),
            }),
            ..Default::default()
        });
        let second = manager.ensure(&application, BTreeMap::new(), None).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.name, "demo-v1");

        // spec change: a new revision
        let mut changed = app(2);
        changed.status = application.status.clone();
        let third = manager.ensure(&changed, BTreeMap::new(), None).await.unwrap();
        assert!(third.created);
        assert_eq!(third.name, "demo-v2");
    }

    #[tokio::test]
    async fn publish_version_change_creates_a_revision() {
        let cluster = Arc::new(InMemoryCluster::new());
        let manager = RevisionManager::new(cluster.clone(), 10);

        let mut application = app(1);
        let first = manager.ensure(&application, BTreeMap::new(), None).await.unwrap();
        application.status = Some(katachi_api::ApplicationStatus {
            latest_revision: Some(RevisionReference {
                name: first.name.clone(),
                revision: first.revision,
                revision_hash: first.hash.clone(),
            }),
            ..Default::default()
        });
        application
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                katachi_api::ANNOTATION_PUBLISH_VERSION.to_string(),
                "release-2".to_string(),
            );
        let second = manager.ensure(&application, BTreeMap::new(), None).await.unwrap();
        assert!(second.created);
        assert_eq!(second.revision, 2);
    }

    #[tokio::test]
    async fn definition_version_change_creates_a_revision() {
        let cluster = Arc::new(InMemoryCluster::new());
        let manager = RevisionManager::new(cluster.clone(), 10);

        let mut versions = BTreeMap::new();
        versions.insert("component/webservice".to_string(), "v-1".to_string());

        let mut application = app(1);
        let first = manager
            .ensure(&application, versions.clone(), None)
            .await
            .unwrap();
        application.status = Some(katachi_api::ApplicationStatus {
            latest_revision: Some(RevisionReference {
                name: first.name.clone(),
                revision: first.revision,
                revision_hash: first.hash.clone(),
            }),
            ..Default::default()
        });

        // same versions: reuse
        let second = manager
            .ensure(&application, versions.clone(), None)
            .await
            .unwrap();
        assert!(!second.created);

        // the definition template moved while the spec stayed put
        versions.insert("component/webservice".to_string(), "v-2".to_string());
        let third = manager.ensure(&application, versions, None).await.unwrap();
        assert!(third.created);
        assert_eq!(third.revision, 2);
        assert_ne!(third.hash, first.hash);

        let stored = cluster
            .get(&katachi_keeper::ResourceIdent {
                api_version: "core.oam.dev/v1beta1".to_string(),
                kind: "ApplicationRevision".to_string(),
                namespace: "default".to_string(),
                name: "demo-v2".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored["spec"]["definitionVersions"]["component/webservice"],
            json!("v-2")
        );
    }

    #[tokio::test]
    async fn prunes_beyond_the_retain_window() {
        let cluster = Arc::new(InMemoryCluster::new());
        let manager = RevisionManager::new(cluster.clone(), 2);

        let mut application = app(1);
        for replicas in 1..=4u64 {
            let mut changed = app(replicas);
            changed.status = application.status.clone();
            let ensured = manager.ensure(&changed, BTreeMap::new(), None).await.unwrap();
            application.status = Some(katachi_api::ApplicationStatus {
                latest_revision: Some(RevisionReference {
                    name: ensured.name.clone(),
                    revision: ensured.revision,
                    revision_hash: ensured.hash.clone(),
                }),
                ..Default::default()
            });
        }

        let remaining = cluster
            .list_by_labels(&RevisionManager::owner_labels(&application))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
    }
}
