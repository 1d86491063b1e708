//! Step generation
//!
//! Converts the Application's workflow into an ordered set of task
//! runners. When no workflow is declared, one `apply-component` step is
//! synthesized per component. Emission order is a stable topological sort
//! over `dependsOn`; declaration order breaks ties.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};

use katachi_api::{Application, ApplicationComponent, WorkflowStepSpec};
use katachi_dispatch::RenderTarget;

use crate::capabilities::ComponentRuntime;
use crate::error::WorkflowError;
use crate::runner::{ApplyComponentRunner, OpaqueStepRunner, SuspendRunner, TaskRunner};

/// Well-known step type applying one component
pub const APPLY_COMPONENT_STEP: &str = "apply-component";
/// Well-known step type pausing the workflow
pub const SUSPEND_STEP: &str = "suspend";

/// Normalize an input-parameter key to address the step properties,
/// unless it already addresses traits
pub fn normalize_input_key(key: &str) -> String {
    if key.starts_with("traits/") || key.starts_with("value.properties.") {
        key.to_string()
    } else {
        format!("value.properties.{}", key)
    }
}

pub struct StepGenerator {
    runtime: Arc<dyn ComponentRuntime>,
}

impl StepGenerator {
    pub fn new(runtime: Arc<dyn ComponentRuntime>) -> Self {
        Self { runtime }
    }

    /// Generate the ordered task runners for one Application
    pub fn generate(&self, app: &Application) -> Result<Vec<Arc<dyn TaskRunner>>, WorkflowError> {
        let steps = match &app.spec.workflow {
            Some(workflow) if !workflow.steps.is_empty() => workflow.steps.clone(),
            _ => synthesize_steps(&app.spec.components),
        };

        let component_names: HashSet<&str> =
            app.spec.components.iter().map(|c| c.name.as_str()).collect();
        let step_names: HashSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();

        let mut runners: Vec<Arc<dyn TaskRunner>> = Vec::new();
        for step in order_steps(&steps)? {
            for dependency in &step.depends_on {
                if !step_names.contains(dependency.as_str()) {
                    return Err(WorkflowError::DependencyNotFound {
                        step: step.name.clone(),
                        missing: dependency.clone(),
                    });
                }
            }
            runners.push(self.build_runner(app, &step, &component_names)?);
        }
        Ok(runners)
    }

    fn build_runner(
        &self,
        app: &Application,
        step: &WorkflowStepSpec,
        component_names: &HashSet<&str>,
    ) -> Result<Arc<dyn TaskRunner>, WorkflowError> {
        match step.step_type.as_str() {
            APPLY_COMPONENT_STEP => {
                let component_name = step
                    .properties
                    .as_ref()
                    .and_then(|p| p.get("component"))
                    .and_then(Value::as_str)
                    .unwrap_or(&step.name)
                    .to_string();
                let component = app
                    .spec
                    .component(&component_name)
                    .cloned()
                    .ok_or_else(|| WorkflowError::DependencyNotFound {
                        step: step.name.clone(),
                        missing: component_name.clone(),
                    })?;

                for dependency in &component.depends_on {
                    if !component_names.contains(dependency.as_str()) {
                        return Err(WorkflowError::DependencyNotFound {
                            step: step.name.clone(),
                            missing: dependency.clone(),
                        });
                    }
                }

                let target = RenderTarget {
                    cluster: step
                        .properties
                        .as_ref()
                        .and_then(|p| p.get("cluster"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    namespace: step
                        .properties
                        .as_ref()
                        .and_then(|p| p.get("namespace"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };

                // built-in step properties embed the full component, its
                // bindings, and the placement target
                let inputs: Vec<Value> = step
                    .inputs
                    .iter()
                    .map(|binding| {
                        json!({
                            "from": binding.from,
                            "parameterKey": normalize_input_key(&binding.parameter_key),
                        })
                    })
                    .collect();
                let properties = json!({
                    "value": serde_json::to_value(&component)?,
                    "inputs": inputs,
                    "outputs": serde_json::to_value(&step.outputs)?,
                    "dependsOn": component.depends_on,
                    "cluster": target.cluster,
                    "namespace": target.namespace,
                });

                Ok(Arc::new(ApplyComponentRunner {
                    name: step.name.clone(),
                    component,
                    target,
                    depends_on: step.depends_on.clone(),
                    properties,
                    runtime: self.runtime.clone(),
                }))
            }
            SUSPEND_STEP => Ok(Arc::new(SuspendRunner {
                name: step.name.clone(),
                depends_on: step.depends_on.clone(),
                properties: step.properties.clone().unwrap_or(Value::Null),
            })),
            other => Ok(Arc::new(OpaqueStepRunner {
                name: step.name.clone(),
                step_type: other.to_string(),
                depends_on: step.depends_on.clone(),
                properties: step.properties.clone().unwrap_or(Value::Null),
            })),
        }
    }
}

/// One synthesized `apply-component` step per component, carrying the
/// component's own dependencies
fn synthesize_steps(components: &[ApplicationComponent]) -> Vec<WorkflowStepSpec> {
    components
        .iter()
        .map(|component| WorkflowStepSpec {
            name: component.name.clone(),
            step_type: APPLY_COMPONENT_STEP.to_string(),
            properties: Some(json!({"component": component.name})),
            inputs: component.inputs.clone(),
            outputs: component.outputs.clone(),
            depends_on: component.depends_on.clone(),
        })
        .collect()
}

/// Stable topological sort: dependencies first, declaration order breaking
/// ties
fn order_steps(steps: &[WorkflowStepSpec]) -> Result<Vec<WorkflowStepSpec>, WorkflowError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut ordered = Vec::with_capacity(steps.len());
    let mut state = vec![VisitState::Unvisited; steps.len()];
    for i in 0..steps.len() {
        visit(i, steps, &index, &mut state, &mut ordered)?;
    }
    Ok(ordered)
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

fn visit(
    i: usize,
    steps: &[WorkflowStepSpec],
    index: &HashMap<&str, usize>,
    state: &mut Vec<VisitState>,
    ordered: &mut Vec<WorkflowStepSpec>,
) -> Result<(), WorkflowError> {
    match state[i] {
        VisitState::Done => return Ok(()),
        VisitState::InProgress => {
            return Err(WorkflowError::DependencyCycle(steps[i].name.clone()))
        }
        VisitState::Unvisited => {}
    }
    state[i] = VisitState::InProgress;
    for dependency in &steps[i].depends_on {
        if let Some(&j) = index.get(dependency.as_str()) {
            visit(j, steps, index, state, ordered)?;
        }
        // unknown dependencies are reported by the generator with the
        // step's name attached
    }
    state[i] = VisitState::Done;
    ordered.push(steps[i].clone());
    Ok(())
}
