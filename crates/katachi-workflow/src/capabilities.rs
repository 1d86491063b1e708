//! Runtime capabilities visible to workflow steps
//!
//! Every step execution sees the component pipeline as a set of callbacks
//! bound to the current reconciliation's owner labels. The controller
//! implements this trait by wiring the renderer, dispatcher, and health
//! collector together.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use katachi_api::ApplicationComponent;
use katachi_core::ReconcileContext;
use katachi_dispatch::{DispatchReport, RenderTarget};
use katachi_keeper::ClusterClient;

use crate::error::WorkflowError;

#[async_trait]
pub trait ComponentRuntime: Send + Sync {
    /// Render a component and run the staged dispatch
    async fn apply_component(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<DispatchReport, WorkflowError>;

    /// Render a component without applying anything; returns the produced
    /// manifests as raw JSON
    async fn render_component(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<Vec<Value>, WorkflowError>;

    /// Render only the workload resource
    async fn render_workload(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<Value, WorkflowError>;

    /// Health of an already-dispatched component
    async fn component_health_check(
        &self,
        component: &ApplicationComponent,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<bool, WorkflowError>;

    /// Apply raw manifests under the reconciliation's owner labels
    async fn apply_resources(
        &self,
        resources: &[Value],
        ctx: &ReconcileContext,
    ) -> Result<(), WorkflowError>;

    /// Delete raw manifests
    async fn delete_resources(
        &self,
        resources: &[Value],
        ctx: &ReconcileContext,
    ) -> Result<(), WorkflowError>;

    /// Direct read access to a cluster; `None` is the local cluster
    fn cluster_client(&self, cluster: Option<&str>) -> Result<Arc<dyn ClusterClient>, WorkflowError>;
}
