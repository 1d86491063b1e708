//! Runtime capabilities implementation
//!
//! Wires the renderer, dispatcher, and health collector into the
//! `ComponentRuntime` seam the workflow steps see, bound to one
//! reconciliation's owner labels.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use katachi_api::ApplicationComponent;
use katachi_core::ReconcileContext;
use katachi_dispatch::{
    ComponentDispatcher, ComponentRenderer, DispatchReport, HealthCollector, RenderTarget,
};
use katachi_keeper::{ApplyOptions, ClusterClient, ResourceKeeper, ResourceManifest};
use katachi_workflow::{ComponentRuntime, WorkflowError};

pub struct DispatchRuntime {
    renderer: Arc<ComponentRenderer>,
    dispatcher: Arc<ComponentDispatcher>,
    health: Arc<HealthCollector>,
    keeper: Arc<ResourceKeeper>,
    apply_options: ApplyOptions,
}

impl DispatchRuntime {
    pub fn new(
        renderer: Arc<ComponentRenderer>,
        dispatcher: Arc<ComponentDispatcher>,
        health: Arc<HealthCollector>,
        keeper: Arc<ResourceKeeper>,
        apply_options: ApplyOptions,
    ) -> Self {
        Self { renderer, dispatcher, health, keeper, apply_options }
    }

    fn to_manifests(resources: &[Value]) -> Result<Vec<ResourceManifest>, WorkflowError> {
        resources
            .iter()
            .map(|value| {
                ResourceManifest::new(value.clone())
                    .map_err(katachi_dispatch::DispatchError::from)
                    .map_err(WorkflowError::from)
            })
            .collect()
    }
}

#[async_trait]
impl ComponentRuntime for DispatchRuntime {
    async fn apply_component(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<DispatchReport, WorkflowError> {
        let mut manifest = self.renderer.render(component, ctx, target).await?;
        Ok(self.dispatcher.dispatch(&mut manifest, ctx).await?)
    }

    async fn render_component(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<Vec<Value>, WorkflowError> {
        let manifest = self.renderer.render(component, ctx, target).await?;
        let mut rendered = Vec::new();
        if let Some(workload) = &manifest.workload {
            rendered.push(workload.value().clone());
        }
        for resource in &manifest.outputs {
            rendered.push(resource.value().clone());
        }
        for rendered_trait in &manifest.traits {
            for resource in &rendered_trait.resources {
                rendered.push(resource.value().clone());
            }
        }
        Ok(rendered)
    }

    async fn render_workload(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<Value, WorkflowError> {
        let manifest = self.renderer.render(component, ctx, target).await?;
        Ok(manifest
            .workload
            .map(|w| w.into_value())
            .unwrap_or(Value::Null))
    }

    async fn component_health_check(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<bool, WorkflowError> {
        let manifest = self.renderer.render(component, ctx, target).await?;
        let (verdict, _) = self
            .health
            .workload_health(&manifest, ctx)
            .await
            .map_err(WorkflowError::from)?;
        Ok(verdict.healthy)
    }

    async fn apply_resources(
        &self,
        resources: &[Value],
        ctx: &ReconcileContext,
    ) -> Result<(), WorkflowError> {
        let manifests = Self::to_manifests(resources)?;
        self.keeper
            .dispatch(ctx, &manifests, &self.apply_options)
            .await
            .map_err(katachi_dispatch::DispatchError::from)?;
        Ok(())
    }

    async fn delete_resources(
        &self,
        resources: &[Value],
        ctx: &ReconcileContext,
    ) -> Result<(), WorkflowError> {
        let manifests = Self::to_manifests(resources)?;
        self.keeper
            .delete(ctx, &manifests)
            .await
            .map_err(katachi_dispatch::DispatchError::from)?;
        Ok(())
    }

    fn cluster_client(
        &self,
        cluster: Option<&str>,
    ) -> Result<Arc<dyn ClusterClient>, WorkflowError> {
        Ok(self
            .keeper
            .router()
            .client(cluster)
            .map_err(katachi_dispatch::DispatchError::from)?)
    }
}
