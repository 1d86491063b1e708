//! Structured values produced by template evaluation

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Template evaluation errors
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Source failed to compile
    #[error("template compile error: {0}")]
    Compile(String),
    /// Evaluation produced a value that fails validation
    #[error("template validation error at '{field}': {message}")]
    Validate { field: String, message: String },
    /// A field has the wrong shape for the requested type
    #[error("template decode error at '{field}': {message}")]
    Decode { field: String, message: String },
}

impl TemplateError {
    pub fn decode(field: impl Into<String>, message: impl ToString) -> Self {
        TemplateError::Decode {
            field: field.into(),
            message: message.to_string(),
        }
    }

    pub fn validate(field: impl Into<String>, message: impl ToString) -> Self {
        TemplateError::Validate {
            field: field.into(),
            message: message.to_string(),
        }
    }
}

/// The structured result of evaluating a template
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateValue(Value);

impl TemplateValue {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Follow a dotted path into the value
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        if path.is_empty() {
            return Some(current);
        }
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Whether a dotted path resolves to a non-null value
    pub fn exists(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some(v) if !v.is_null())
    }

    /// Decode the value at a dotted path into a typed record
    pub fn decode<T: DeserializeOwned>(&self, path: &str) -> Result<T, TemplateError> {
        let value = self
            .lookup(path)
            .ok_or_else(|| TemplateError::decode(path, "field is absent"))?;
        serde_json::from_value(value.clone()).map_err(|e| TemplateError::decode(path, e))
    }

    /// Boolean at a dotted path, if present
    pub fn as_bool(&self, path: &str) -> Option<bool> {
        self.lookup(path)?.as_bool()
    }

    /// String at a dotted path, if present
    pub fn as_str(&self, path: &str) -> Option<&str> {
        self.lookup(path)?.as_str()
    }

    /// Iterate the top-level fields; empty for non-objects
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.as_object().into_iter().flatten()
    }

    /// Err unless every listed path resolves to a non-null value
    pub fn validate(&self, required: &[&str]) -> Result<(), TemplateError> {
        for path in required {
            if !self.exists(path) {
                return Err(TemplateError::validate(*path, "required field is absent"));
            }
        }
        Ok(())
    }
}

impl From<Value> for TemplateValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
