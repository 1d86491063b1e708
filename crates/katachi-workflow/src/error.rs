//! Workflow errors

use katachi_core::ContextError;
use katachi_dispatch::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// `dependsOn` names a component that does not exist in the Application
    #[error("dependency not found: step '{step}' depends on unknown target '{missing}'")]
    DependencyNotFound { step: String, missing: String },
    #[error("workflow has a dependency cycle involving '{0}'")]
    DependencyCycle(String),
    #[error("step '{step}' is invalid: {message}")]
    InvalidStep { step: String, message: String },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Cancelled(#[from] ContextError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
