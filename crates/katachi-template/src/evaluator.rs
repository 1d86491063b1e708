//! The evaluator seam

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TemplateContext;
use crate::value::{TemplateError, TemplateValue};

/// Compiles a template source against a context and returns the final
/// structured value
///
/// Implementations resolve any declarative action nodes (cluster reads,
/// http calls) before returning, and are deterministic for identical
/// inputs and capabilities.
#[async_trait]
pub trait TemplateEvaluator: Send + Sync {
    async fn eval(
        &self,
        source: &str,
        context: &TemplateContext,
    ) -> Result<TemplateValue, TemplateError>;
}

/// Adapts a closure into an evaluator
///
/// Used by tests and embedders that synthesize template results without a
/// full compiler.
#[derive(Clone)]
pub struct FnEvaluator {
    f: Arc<dyn Fn(&str, &TemplateContext) -> Result<TemplateValue, TemplateError> + Send + Sync>,
}

impl FnEvaluator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &TemplateContext) -> Result<TemplateValue, TemplateError>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl TemplateEvaluator for FnEvaluator {
    async fn eval(
        &self,
        source: &str,
        context: &TemplateContext,
    ) -> Result<TemplateValue, TemplateError> {
        (self.f)(source, context)
    }
}
