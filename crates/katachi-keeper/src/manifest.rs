//! Resource manifests
//!
//! A rendered resource is carried as raw JSON plus the cluster it targets.
//! The cluster name is routing state, not part of the object sent to the
//! apiserver.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Map, Value};

use katachi_core::ContextError;

/// Resource Keeper errors
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),
    #[error("manifest is missing required field '{0}'")]
    InvalidManifest(&'static str),
    #[error("apply conflict on {0}: {1}")]
    Conflict(String, String),
    #[error("cluster error: {0}")]
    Cluster(String),
    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

/// Identity of a resource within one cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdent {
    pub api_version: String,
    pub kind: String,
    /// Empty for cluster-scoped resources
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.api_version, self.kind, self.namespace, self.name
        )
    }
}

/// A rendered resource manifest and its routing target
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceManifest {
    value: Value,
    cluster: Option<String>,
}

impl ResourceManifest {
    /// Wrap a raw manifest; `apiVersion` and `kind` must be present
    pub fn new(value: Value) -> Result<Self, KeeperError> {
        if value.get("apiVersion").and_then(Value::as_str).is_none() {
            return Err(KeeperError::InvalidManifest("apiVersion"));
        }
        if value.get("kind").and_then(Value::as_str).is_none() {
            return Err(KeeperError::InvalidManifest("kind"));
        }
        Ok(Self { value, cluster: None })
    }

    pub fn with_cluster(mut self, cluster: Option<String>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn set_cluster(&mut self, cluster: impl Into<String>) {
        self.cluster = Some(cluster.into());
    }

    pub fn api_version(&self) -> &str {
        self.value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn name(&self) -> Option<&str> {
        self.value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.value
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let root = self
            .value
            .as_object_mut()
            .expect("manifest root is validated as an object at construction");
        let metadata = root
            .entry("metadata".to_string())
            .or_insert_with(|| json!({}));
        if !metadata.is_object() {
            *metadata = json!({});
        }
        metadata.as_object_mut().expect("just ensured an object")
    }

    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut()
            .insert("name".to_string(), Value::String(name.to_string()));
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.to_string()));
    }

    /// Namespace fallback: keep what the template set, else use `namespace`
    pub fn default_namespace(&mut self, namespace: &str) {
        if self.namespace().is_none() {
            self.set_namespace(namespace);
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.value
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        let metadata = self.metadata_mut();
        let labels = metadata
            .entry("labels".to_string())
            .or_insert_with(|| json!({}));
        if !labels.is_object() {
            *labels = json!({});
        }
        labels
            .as_object_mut()
            .expect("just ensured an object")
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn set_labels(&mut self, labels: &BTreeMap<String, String>) {
        for (key, value) in labels {
            self.set_label(key, value);
        }
    }

    /// Append an owner reference, replacing any prior reference to the
    /// same owner
    pub fn set_owner_reference(&mut self, owner_ref: Value) {
        let owner_uid = owner_ref.get("uid").cloned();
        let metadata = self.metadata_mut();
        let refs = metadata
            .entry("ownerReferences".to_string())
            .or_insert_with(|| json!([]));
        if !refs.is_array() {
            *refs = json!([]);
        }
        let refs = refs.as_array_mut().expect("just ensured an array");
        refs.retain(|r| r.get("uid") != owner_uid.as_ref());
        refs.push(owner_ref);
    }

    /// Identity of this manifest within its target cluster
    pub fn ident(&self) -> Result<ResourceIdent, KeeperError> {
        let name = self
            .name()
            .ok_or(KeeperError::InvalidManifest("metadata.name"))?;
        Ok(ResourceIdent {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().unwrap_or_default().to_string(),
            name: name.to_string(),
        })
    }
}
