//! Dispatch pipeline errors

use katachi_core::{ContextError, DefinitionError};
use katachi_keeper::KeeperError;
use katachi_template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("rendering component '{name}' failed: {message}")]
    Render { name: String, message: String },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Keeper(#[from] KeeperError),
    #[error("health check failed: {0}")]
    Health(String),
    #[error(transparent)]
    Cancelled(#[from] ContextError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn render(name: impl Into<String>, message: impl ToString) -> Self {
        DispatchError::Render {
            name: name.into(),
            message: message.to_string(),
        }
    }
}
