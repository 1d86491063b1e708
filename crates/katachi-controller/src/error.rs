//! Controller errors

use katachi_core::{ContextError, DefinitionError};
use katachi_dispatch::DispatchError;
use katachi_keeper::KeeperError;
use katachi_policy::PolicyError;
use katachi_workflow::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Keeper(#[from] KeeperError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Cancelled(#[from] ContextError),
    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("status write failed: {0}")]
    Status(String),
    #[error("application has no {0}")]
    MissingMetadata(&'static str),
}
