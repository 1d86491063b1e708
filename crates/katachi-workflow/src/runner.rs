//! The step-runner contract
//!
//! The outer workflow engine consumes an ordered list of task runners.
//! `apply-component` is the well-known built-in; `suspend` pauses the
//! workflow; other step types are opaque to the built-in engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use katachi_api::{ApplicationComponent, ComponentServiceStatus, StepPhase};
use katachi_core::ReconcileContext;
use katachi_dispatch::RenderTarget;

use crate::capabilities::ComponentRuntime;
use crate::error::WorkflowError;

/// Result of executing one step once
#[derive(Clone, Debug)]
pub struct StepResult {
    pub phase: StepPhase,
    pub message: Option<String>,
    /// Service status produced by component steps
    pub service: Option<ComponentServiceStatus>,
}

impl StepResult {
    pub fn succeeded() -> Self {
        Self { phase: StepPhase::Succeeded, message: None, service: None }
    }

    pub fn running(message: impl Into<String>) -> Self {
        Self {
            phase: StepPhase::Running,
            message: Some(message.into()),
            service: None,
        }
    }
}

/// One runnable workflow step
#[async_trait]
pub trait TaskRunner: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn step_type(&self) -> &str;
    fn depends_on(&self) -> &[String];
    /// The step's resolved properties, as handed to the engine
    fn properties(&self) -> &Value;
    async fn run(&self, ctx: &ReconcileContext) -> Result<StepResult, WorkflowError>;
}

/// Built-in runner for `apply-component`
pub struct ApplyComponentRunner {
    pub(crate) name: String,
    pub(crate) component: ApplicationComponent,
    pub(crate) target: RenderTarget,
    pub(crate) depends_on: Vec<String>,
    pub(crate) properties: Value,
    pub(crate) runtime: Arc<dyn ComponentRuntime>,
}

impl std::fmt::Debug for ApplyComponentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyComponentRunner")
            .field("name", &self.name)
            .field("component", &self.component)
            .field("target", &self.target)
            .field("depends_on", &self.depends_on)
            .field("properties", &self.properties)
            .finish()
    }
}

#[async_trait]
impl TaskRunner for ApplyComponentRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> &str {
        crate::generator::APPLY_COMPONENT_STEP
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn properties(&self) -> &Value {
        &self.properties
    }

    async fn run(&self, ctx: &ReconcileContext) -> Result<StepResult, WorkflowError> {
        ctx.ensure_active()?;
        let report = self
            .runtime
            .apply_component(&self.component, &self.target, ctx)
            .await?;
        let phase = if report.completed && report.status.healthy {
            StepPhase::Succeeded
        } else {
            StepPhase::Running
        };
        Ok(StepResult {
            phase,
            message: report.status.message.clone(),
            service: Some(report.status),
        })
    }
}

/// Built-in runner for `suspend`
#[derive(Debug)]
pub struct SuspendRunner {
    pub(crate) name: String,
    pub(crate) depends_on: Vec<String>,
    pub(crate) properties: Value,
}

#[async_trait]
impl TaskRunner for SuspendRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> &str {
        crate::generator::SUSPEND_STEP
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn properties(&self) -> &Value {
        &self.properties
    }

    async fn run(&self, _ctx: &ReconcileContext) -> Result<StepResult, WorkflowError> {
        Ok(StepResult {
            phase: StepPhase::Suspended,
            message: Some("workflow suspended".to_string()),
            service: None,
        })
    }
}

/// Runner for step types the built-in engine cannot execute
#[derive(Debug)]
pub struct OpaqueStepRunner {
    pub(crate) name: String,
    pub(crate) step_type: String,
    pub(crate) depends_on: Vec<String>,
    pub(crate) properties: Value,
}

#[async_trait]
impl TaskRunner for OpaqueStepRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> &str {
        &self.step_type
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn properties(&self) -> &Value {
        &self.properties
    }

    async fn run(&self, _ctx: &ReconcileContext) -> Result<StepResult, WorkflowError> {
        Ok(StepResult {
            phase: StepPhase::Skipped,
            message: Some(format!("no built-in executor for step type '{}'", self.step_type)),
            service: None,
        })
    }
}
