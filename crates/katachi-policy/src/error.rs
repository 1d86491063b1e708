//! Policy pipeline errors

use katachi_core::{ContextError, DefinitionError};
use katachi_keeper::KeeperError;
use katachi_template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A user-declared policy references a definition marked global
    #[error("invalid policy '{0}': global policies must not be declared explicitly")]
    InvalidPolicy(String),
    /// Render failure on a user-declared policy
    #[error("rendering policy '{name}' failed: {source}")]
    Render {
        name: String,
        #[source]
        source: TemplateError,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    /// Durable-cache failure; callers log and proceed
    #[error("policy cache error: {0}")]
    Cache(String),
    #[error(transparent)]
    Keeper(#[from] KeeperError),
    #[error(transparent)]
    Cancelled(#[from] ContextError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
