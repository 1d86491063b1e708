//! Built-in sequential step engine
//!
//! Drives the generated task runners in order and records per-step status
//! into the Application's `WorkflowStatus`. A step that is still waiting
//! stops the pass; the next reconciliation resumes from it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use katachi_api::{ComponentServiceStatus, StepPhase, WorkflowStatus, WorkflowStepStatus};
use katachi_core::ReconcileContext;

use crate::error::WorkflowError;
use crate::runner::TaskRunner;

/// Result of one engine pass
#[derive(Debug, Default)]
pub struct EnginePass {
    /// Service statuses produced by component steps this pass
    pub services: Vec<ComponentServiceStatus>,
}

#[derive(Default)]
pub struct StepEngine;

impl StepEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run runnable steps in order, updating `status` in place
    pub async fn execute(
        &self,
        runners: &[Arc<dyn TaskRunner>],
        status: &mut WorkflowStatus,
        ctx: &ReconcileContext,
    ) -> Result<EnginePass, WorkflowError> {
        let mut pass = EnginePass::default();
        if status.finished || status.terminated {
            return Ok(pass);
        }

        ensure_step_entries(runners, status);
        if status.start_time.is_none() {
            status.start_time = Some(Utc::now().to_rfc3339());
        }
        status.suspended = false;

        for runner in runners {
            ctx.ensure_active()?;
            let entry_phase = step_phase(status, runner.name());
            if entry_phase == Some(StepPhase::Succeeded) {
                continue;
            }
            if !dependencies_met(runner.as_ref(), status) {
                debug!(step = %runner.name(), "dependencies not met, stopping pass");
                break;
            }

            let now = Utc::now().to_rfc3339();
            let result = runner.run(ctx).await?;
            if let Some(entry) = step_entry(status, runner.name()) {
                entry.phase = result.phase;
                entry.message = result.message.clone();
                entry.first_execute_time.get_or_insert(now.clone());
                entry.last_execute_time = Some(now);
            }
            if let Some(service) = result.service {
                pass.services.push(service);
            }

            match result.phase {
                StepPhase::Succeeded | StepPhase::Skipped => continue,
                StepPhase::Running | StepPhase::Pending => {
                    debug!(step = %runner.name(), "step still in progress");
                    return Ok(pass);
                }
                StepPhase::Suspended => {
                    status.suspended = true;
                    return Ok(pass);
                }
                StepPhase::Failed => {
                    status.terminated = true;
                    status.message = result.message;
                    status.end_time = Some(Utc::now().to_rfc3339());
                    return Ok(pass);
                }
            }
        }

        if status
            .steps
            .iter()
            .all(|s| matches!(s.phase, StepPhase::Succeeded | StepPhase::Skipped))
        {
            info!(app = %ctx.app_name, "workflow finished");
            status.finished = true;
            status.end_time = Some(Utc::now().to_rfc3339());
        }
        Ok(pass)
    }
}

fn ensure_step_entries(runners: &[Arc<dyn TaskRunner>], status: &mut WorkflowStatus) {
    for runner in runners {
        if step_entry(status, runner.name()).is_none() {
            status.steps.push(WorkflowStepStatus {
                name: runner.name().to_string(),
                step_type: runner.step_type().to_string(),
                phase: StepPhase::Pending,
                message: None,
                first_execute_time: None,
                last_execute_time: None,
            });
        }
    }
}

fn step_entry<'a>(status: &'a mut WorkflowStatus, name: &str) -> Option<&'a mut WorkflowStepStatus> {
    status.steps.iter_mut().find(|s| s.name == name)
}

fn step_phase(status: &WorkflowStatus, name: &str) -> Option<StepPhase> {
    status.steps.iter().find(|s| s.name == name).map(|s| s.phase)
}

fn dependencies_met(runner: &dyn TaskRunner, status: &WorkflowStatus) -> bool {
    runner.depends_on().iter().all(|dependency| {
        matches!(
            step_phase(status, dependency),
            Some(StepPhase::Succeeded) | Some(StepPhase::Skipped)
        )
    })
}
