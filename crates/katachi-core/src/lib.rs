//! Shared runtime pieces of the Katachi control plane
//!
//! The per-reconciliation context, content hashing, the deep-merge used by
//! the policy pipeline, and definition resolution.

pub mod context;
pub mod definitions;
pub mod hash;
pub mod merge;

pub use context::{ContextError, ReconcileContext};
pub use definitions::{DefinitionError, DefinitionResolver, DefinitionStore, InMemoryDefinitionStore};
pub use hash::{canonical_json, content_hash};
pub use merge::deep_merge;
