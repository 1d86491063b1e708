//! Kubernetes-backed stores
//!
//! Definition lookup and Application status write-back against the
//! apiserver.

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use serde_json::json;

use katachi_api::{Application, ComponentDefinition, PolicyDefinition, TraitDefinition};
use katachi_core::{DefinitionError, DefinitionStore};

use crate::error::ControllerError;
use crate::status::StatusWriter;

fn store_error(e: kube::Error) -> DefinitionError {
    DefinitionError::Store(e.to_string())
}

pub struct KubeDefinitionStore {
    client: kube::Client,
}

impl KubeDefinitionStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DefinitionStore for KubeDefinitionStore {
    async fn component_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ComponentDefinition>, DefinitionError> {
        let api: Api<ComponentDefinition> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(store_error)
    }

    async fn trait_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TraitDefinition>, DefinitionError> {
        let api: Api<TraitDefinition> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(store_error)
    }

    async fn policy_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PolicyDefinition>, DefinitionError> {
        let api: Api<PolicyDefinition> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(store_error)
    }

    async fn list_trait_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<TraitDefinition>, DefinitionError> {
        let api: Api<TraitDefinition> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(store_error)?;
        Ok(list.items)
    }

    async fn list_policy_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<PolicyDefinition>, DefinitionError> {
        let api: Api<PolicyDefinition> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(store_error)?;
        Ok(list.items)
    }
}

pub struct KubeStatusWriter {
    client: kube::Client,
    field_manager: String,
}

impl KubeStatusWriter {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api_for(&self, app: &Application) -> Result<(Api<Application>, String), ControllerError> {
        let namespace = app
            .metadata
            .namespace
            .clone()
            .ok_or(ControllerError::MissingMetadata("namespace"))?;
        let name = app
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingMetadata("name"))?;
        Ok((Api::namespaced(self.client.clone(), &namespace), name))
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(&self, app: &Application) -> Result<(), ControllerError> {
        let (api, name) = self.api_for(app)?;
        let patch = json!({ "status": app.status });
        api.patch_status(
            &name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn write_spec(&self, app: &Application) -> Result<(), ControllerError> {
        let (api, name) = self.api_for(app)?;
        let patch = json!({ "spec": app.spec });
        api.patch(
            &name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
