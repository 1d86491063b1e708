//! JSON template evaluator
//!
//! The default evaluator shipped with the controller binary: the template
//! source is a JSON document whose string values may reference the
//! evaluation context with `$(parameter.x)` / `$(context.y)` expressions.
//! A string that is exactly one reference takes the referenced value with
//! its type; references inside longer strings interpolate as text. A
//! full template compiler plugs in behind the same `TemplateEvaluator`
//! seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::TemplateContext;
use crate::evaluator::TemplateEvaluator;
use crate::value::{TemplateError, TemplateValue};

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonTemplateEvaluator;

impl JsonTemplateEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TemplateEvaluator for JsonTemplateEvaluator {
    async fn eval(
        &self,
        source: &str,
        context: &TemplateContext,
    ) -> Result<TemplateValue, TemplateError> {
        let template: Value =
            serde_json::from_str(source).map_err(|e| TemplateError::Compile(e.to_string()))?;
        let root = context.to_value();
        Ok(TemplateValue::new(substitute(&template, &root)?))
    }
}

fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn substitute(template: &Value, root: &Value) -> Result<Value, TemplateError> {
    match template {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), substitute(value, root)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute(item, root))
                .collect::<Result<_, _>>()?,
        )),
        Value::String(text) => substitute_string(text, root),
        other => Ok(other.clone()),
    }
}

fn substitute_string(text: &str, root: &Value) -> Result<Value, TemplateError> {
    // a string that is exactly one reference keeps the referenced type
    if let Some(path) = exact_reference(text) {
        return Ok(resolve(root, path).cloned().unwrap_or(Value::Null));
    }
    if !text.contains("$(") {
        return Ok(Value::String(text.to_string()));
    }

    let mut out = String::new();
    let mut rest = text;
    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find(')') else {
            return Err(TemplateError::Compile(format!(
                "unterminated reference in '{}'",
                text
            )));
        };
        let path = &tail[..end];
        match resolve(root, path) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => {}
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn exact_reference(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("$(")?.strip_suffix(')')?;
    if inner.contains("$(") || inner.contains(')') {
        return None;
    }
    Some(inner)
}
