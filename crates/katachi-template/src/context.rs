//! Evaluation context handed to templates
//!
//! Templates see `parameter` (their declared parameters) and `context.*`
//! (application identity, filtered metadata, prior outputs, live workload
//! state). Runtime capabilities reach the template as context values
//! supplied by the caller.

use serde_json::{Map, Value};

/// Context key: application name
pub const CONTEXT_APP_NAME: &str = "name";
/// Context key: application namespace
pub const CONTEXT_NAMESPACE: &str = "namespace";
/// Context key: current revision name
pub const CONTEXT_REVISION: &str = "appRevision";
/// Context key: filtered application labels
pub const CONTEXT_LABELS: &str = "labels";
/// Context key: filtered application annotations
pub const CONTEXT_ANNOTATIONS: &str = "annotations";
/// Context key: component entries of the application
pub const CONTEXT_COMPONENTS: &str = "components";
/// Context key: workflow of the application
pub const CONTEXT_WORKFLOW: &str = "workflow";
/// Context key: declared policies of the application
pub const CONTEXT_POLICIES: &str = "policies";
/// Context key: prior cached output of the policy being rendered
pub const CONTEXT_PRIOR: &str = "prior";
/// Context key: live workload of the component being rendered
pub const CONTEXT_OUTPUT: &str = "output";
/// Context key: live output resources of the component being rendered
pub const CONTEXT_OUTPUTS: &str = "outputs";
/// Context key: policy-contributed additional context
pub const CONTEXT_POLICY_CTX: &str = "policy";

/// The context a template source is compiled against
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    parameter: Value,
    context: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `parameter` block
    pub fn with_parameter(mut self, parameter: Value) -> Self {
        self.parameter = parameter;
        self
    }

    /// Set one `context.*` field
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    /// Set one `context.*` field in place
    pub fn set(&mut self, key: &str, value: Value) {
        self.context.insert(key.to_string(), value);
    }

    pub fn parameter(&self) -> &Value {
        &self.parameter
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// The full structure the compiler sees
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("parameter".to_string(), self.parameter.clone());
        root.insert("context".to_string(), Value::Object(self.context.clone()));
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_value_shape() {
        let ctx = TemplateContext::new()
            .with_parameter(json!({"replicas": 2}))
            .with(CONTEXT_APP_NAME, json!("demo"))
            .with(CONTEXT_NAMESPACE, json!("default"));
        assert_eq!(
            ctx.to_value(),
            json!({
                "parameter": {"replicas": 2},
                "context": {"name": "demo", "namespace": "default"}
            })
        );
    }

    #[test]
    fn later_set_overrides() {
        let mut ctx = TemplateContext::new().with(CONTEXT_REVISION, json!("demo-v1"));
        ctx.set(CONTEXT_REVISION, json!("demo-v2"));
        assert_eq!(ctx.get(CONTEXT_REVISION), Some(&json!("demo-v2")));
    }
}
