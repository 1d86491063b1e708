//! Template evaluator contract
//!
//! The template compiler itself is an external collaborator: it takes a
//! source string and a context, resolves any declarative action nodes, and
//! returns a structured value. This crate defines the value, context, and
//! evaluator types the rest of the control plane programs against.

pub mod context;
pub mod evaluator;
pub mod json;
pub mod value;

pub use context::TemplateContext;
pub use evaluator::{FnEvaluator, TemplateEvaluator};
pub use json::JsonTemplateEvaluator;
pub use value::{TemplateError, TemplateValue};
