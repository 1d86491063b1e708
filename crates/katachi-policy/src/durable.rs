//! Durable cache tier
//!
//! One key/value blob per Application, stored as a ConfigMap named
//! `application-policies-<namespace>-<name>` and owned by the Application.
//! Each key is `<3-digit sequence>-<policyName>`; the sequence preserves
//! execution order across reloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use katachi_keeper::{ApplyOptions, ClusterClient, ResourceIdent, ResourceManifest};

use crate::error::PolicyError;
use crate::record::PolicyCacheRecord;

/// Durable policy cache over the local cluster
#[derive(Clone)]
pub struct DurablePolicyCache {
    client: Arc<dyn ClusterClient>,
    field_manager: String,
}

impl DurablePolicyCache {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            field_manager: "katachi-policy".to_string(),
        }
    }

    /// Blob name for one Application
    pub fn blob_name(namespace: &str, name: &str) -> String {
        format!("application-policies-{}-{}", namespace, name)
    }

    fn blob_ident(namespace: &str, name: &str) -> ResourceIdent {
        ResourceIdent {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            namespace: namespace.to_string(),
            name: Self::blob_name(namespace, name),
        }
    }

    /// Load all records, keyed by policy name, in stored sequence order
    pub async fn load(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, PolicyCacheRecord>, PolicyError> {
        let ident = Self::blob_ident(namespace, name);
        let Some(blob) = self
            .client
            .get(&ident)
            .await
            .map_err(|e| PolicyError::Cache(e.to_string()))?
        else {
            return Ok(BTreeMap::new());
        };

        let mut records = BTreeMap::new();
        let Some(data) = blob.get("data").and_then(Value::as_object) else {
            return Ok(records);
        };
        for (key, raw) in data {
            let Some((_, policy_name)) = key.split_once('-') else {
                continue;
            };
            let Some(raw) = raw.as_str() else {
                continue;
            };
            let record: PolicyCacheRecord = serde_json::from_str(raw)
                .map_err(|e| PolicyError::Cache(format!("record '{}' is unreadable: {}", key, e)))?;
            records.insert(policy_name.to_string(), record);
        }
        Ok(records)
    }

    /// Persist records in execution order, owning the blob to the
    /// Application when an owner reference is supplied
    pub async fn store(
        &self,
        namespace: &str,
        name: &str,
        records: &[PolicyCacheRecord],
        owner_reference: Option<Value>,
    ) -> Result<String, PolicyError> {
        let blob_name = Self::blob_name(namespace, name);
        let mut data = serde_json::Map::new();
        for record in records {
            let key = format!("{:03}-{}", record.sequence, record.name);
            let encoded = serde_json::to_string(record)?;
            data.insert(key, Value::String(encoded));
        }

        let mut manifest = ResourceManifest::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": blob_name,
                "namespace": namespace,
            },
            "data": Value::Object(data),
        }))
        .map_err(|e| PolicyError::Cache(e.to_string()))?;
        if let Some(owner_ref) = owner_reference {
            manifest.set_owner_reference(owner_ref);
        }

        let options = ApplyOptions {
            field_manager: self.field_manager.clone(),
            force: true,
        };
        self.client
            .apply(&manifest, &options)
            .await
            .map_err(|e| PolicyError::Cache(e.to_string()))?;
        Ok(blob_name)
    }
}
