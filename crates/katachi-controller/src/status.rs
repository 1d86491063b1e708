//! Status write-back

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use katachi_api::{
    Application, ApplicationCondition, ApplicationConditionType, ConditionStatus,
};

use crate::error::ControllerError;

/// Writes Application state back to the control plane
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_status(&self, app: &Application) -> Result<(), ControllerError>;

    /// Persist a policy-mutated spec back (auto-revision annotation)
    async fn write_spec(&self, app: &Application) -> Result<(), ControllerError>;
}

/// Build a condition stamped with the current time
pub fn condition(
    condition_type: ApplicationConditionType,
    status: ConditionStatus,
    reason: &str,
    message: Option<String>,
) -> ApplicationCondition {
    ApplicationCondition {
        condition_type,
        status,
        last_transition_time: Some(Utc::now().to_rfc3339()),
        message,
        reason: Some(reason.to_string()),
    }
}

/// Test and dry-run writer keeping the last written object per Application
#[derive(Default)]
pub struct InMemoryStatusWriter {
    written: RwLock<HashMap<String, Application>>,
}

impl InMemoryStatusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, namespace: &str, name: &str) -> Option<Application> {
        self.written
            .read()
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }
}

#[async_trait]
impl StatusWriter for InMemoryStatusWriter {
    async fn write_status(&self, app: &Application) -> Result<(), ControllerError> {
        let key = format!(
            "{}/{}",
            app.metadata.namespace.clone().unwrap_or_default(),
            app.metadata.name.clone().unwrap_or_default()
        );
        self.written.write().insert(key, app.clone());
        Ok(())
    }

    async fn write_spec(&self, app: &Application) -> Result<(), ControllerError> {
        self.write_status(app).await
    }
}
