//! Definition resolution
//!
//! Lookup of component, trait, and policy definitions with namespace
//! fallback (application namespace first, then the system namespace) and
//! explicit trait-variant resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use katachi_api::{ComponentDefinition, DefinitionScope, PolicyDefinition, TraitDefinition};

/// Definition store errors
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("definition store error: {0}")]
    Store(String),
    #[error("{kind} definition not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("trait type {variant} is claimed by multiple definitions: {first} and {second}")]
    AmbiguousVariant {
        variant: String,
        first: String,
        second: String,
    },
}

/// Read access to the cluster-stored definitions
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn component_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ComponentDefinition>, DefinitionError>;

    async fn trait_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TraitDefinition>, DefinitionError>;

    async fn policy_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PolicyDefinition>, DefinitionError>;

    async fn list_trait_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<TraitDefinition>, DefinitionError>;

    async fn list_policy_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<PolicyDefinition>, DefinitionError>;
}

/// Namespace-aware definition lookup for one Application
#[derive(Clone)]
pub struct DefinitionResolver {
    store: Arc<dyn DefinitionStore>,
    app_namespace: String,
    system_namespace: String,
}

impl DefinitionResolver {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        app_namespace: impl Into<String>,
        system_namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            app_namespace: app_namespace.into(),
            system_namespace: system_namespace.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DefinitionStore> {
        &self.store
    }

    /// Resolve a component type, application namespace first
    pub async fn component(&self, name: &str) -> Result<ComponentDefinition, DefinitionError> {
        if let Some(def) = self
            .store
            .component_definition(&self.app_namespace, name)
            .await?
        {
            return Ok(def);
        }
        self.store
            .component_definition(&self.system_namespace, name)
            .await?
            .ok_or(DefinitionError::NotFound {
                kind: "component",
                name: name.to_string(),
            })
    }

    /// Resolve a trait type: exact definition name first, then a definition
    /// listing the type among its declared variants
    pub async fn trait_type(&self, trait_type: &str) -> Result<TraitDefinition, DefinitionError> {
        for namespace in [&self.app_namespace, &self.system_namespace] {
            if let Some(def) = self.store.trait_definition(namespace, trait_type).await? {
                return Ok(def);
            }
        }
        for namespace in [&self.app_namespace, &self.system_namespace] {
            let mut claimed: Option<TraitDefinition> = None;
            for def in self.store.list_trait_definitions(namespace).await? {
                if def.spec.variants.iter().any(|v| v == trait_type) {
                    if let Some(prior) = &claimed {
                        return Err(DefinitionError::AmbiguousVariant {
                            variant: trait_type.to_string(),
                            first: prior.metadata.name.clone().unwrap_or_default(),
                            second: def.metadata.name.clone().unwrap_or_default(),
                        });
                    }
                    claimed = Some(def);
                }
            }
            if let Some(def) = claimed {
                return Ok(def);
            }
        }
        Err(DefinitionError::NotFound {
            kind: "trait",
            name: trait_type.to_string(),
        })
    }

    /// Resolve a policy type, application namespace first
    pub async fn policy(&self, name: &str) -> Result<PolicyDefinition, DefinitionError> {
        for namespace in [&self.app_namespace, &self.system_namespace] {
            if let Some(def) = self.store.policy_definition(namespace, name).await? {
                return Ok(def);
            }
        }
        Err(DefinitionError::NotFound {
            kind: "policy",
            name: name.to_string(),
        })
    }

    /// Global policies visible to this Application: Application-scoped,
    /// from the system namespace plus the application namespace, per-name
    /// dedup with the application namespace overriding
    pub async fn global_policies(&self) -> Result<Vec<PolicyDefinition>, DefinitionError> {
        let mut by_name: HashMap<String, PolicyDefinition> = HashMap::new();
        for namespace in [&self.system_namespace, &self.app_namespace] {
            for def in self.store.list_policy_definitions(namespace).await? {
                if !def.spec.global || def.spec.scope != DefinitionScope::Application {
                    continue;
                }
                if let Some(name) = def.metadata.name.clone() {
                    by_name.insert(name, def);
                }
            }
        }
        let mut policies: Vec<PolicyDefinition> = by_name.into_values().collect();
        policies.sort_by(|a, b| {
            b.spec
                .priority
                .cmp(&a.spec.priority)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        Ok(policies)
    }
}

/// In-memory definition store used by tests and local development
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    components: RwLock<HashMap<(String, String), ComponentDefinition>>,
    traits: RwLock<HashMap<(String, String), TraitDefinition>>,
    policies: RwLock<HashMap<(String, String), PolicyDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_component(&self, namespace: &str, def: ComponentDefinition) {
        let name = def.metadata.name.clone().unwrap_or_default();
        self.components
            .write()
            .insert((namespace.to_string(), name), def);
    }

    pub fn insert_trait(&self, namespace: &str, def: TraitDefinition) {
        let name = def.metadata.name.clone().unwrap_or_default();
        self.traits
            .write()
            .insert((namespace.to_string(), name), def);
    }

    pub fn insert_policy(&self, namespace: &str, def: PolicyDefinition) {
        let name = def.metadata.name.clone().unwrap_or_default();
        self.policies
            .write()
            .insert((namespace.to_string(), name), def);
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn component_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ComponentDefinition>, DefinitionError> {
        Ok(self
            .components
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn trait_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TraitDefinition>, DefinitionError> {
        Ok(self
            .traits
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn policy_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PolicyDefinition>, DefinitionError> {
        Ok(self
            .policies
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_trait_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<TraitDefinition>, DefinitionError> {
        let mut defs: Vec<TraitDefinition> = self
            .traits
            .read()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, def)| def.clone())
            .collect();
        defs.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(defs)
    }

    async fn list_policy_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<PolicyDefinition>, DefinitionError> {
        let mut defs: Vec<PolicyDefinition> = self
            .policies
            .read()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, def)| def.clone())
            .collect();
        defs.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katachi_api::{PolicyDefinitionSpec, Schematic, TraitDefinitionSpec};
    use kube::core::ObjectMeta;

    fn trait_def(name: &str, variants: &[&str]) -> TraitDefinition {
        TraitDefinition {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: TraitDefinitionSpec {
                variants: variants.iter().map(|v| v.to_string()).collect(),
                schematic: Schematic::from_template("outputs: {}"),
                ..Default::default()
            },
        }
    }

    fn policy_def(name: &str, global: bool, priority: i32) -> PolicyDefinition {
        PolicyDefinition {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: PolicyDefinitionSpec {
                global,
                priority,
                schematic: Schematic::from_template("output: {}"),
                ..Default::default()
            },
        }
    }

    fn resolver(store: Arc<InMemoryDefinitionStore>) -> DefinitionResolver {
        DefinitionResolver::new(store, "default", "katachi-system")
    }

    #[tokio::test]
    async fn exact_name_wins_over_variant() {
        let store = Arc::new(InMemoryDefinitionStore::new());
        store.insert_trait("default", trait_def("ingress", &["ingress-v2"]));
        store.insert_trait("default", trait_def("ingress-v2", &[]));
        let resolver = resolver(store);
        let def = resolver.trait_type("ingress-v2").await.unwrap();
        assert_eq!(def.metadata.name.as_deref(), Some("ingress-v2"));
    }

    #[tokio::test]
    async fn variant_resolves_to_base_definition() {
        let store = Arc::new(InMemoryDefinitionStore::new());
        store.insert_trait("katachi-system", trait_def("ingress", &["ingress-v2"]));
        let resolver = resolver(store);
        let def = resolver.trait_type("ingress-v2").await.unwrap();
        assert_eq!(def.metadata.name.as_deref(), Some("ingress"));
    }

    #[tokio::test]
    async fn ambiguous_variant_is_an_error() {
        let store = Arc::new(InMemoryDefinitionStore::new());
        store.insert_trait("default", trait_def("a", &["shared"]));
        store.insert_trait("default", trait_def("b", &["shared"]));
        let resolver = resolver(store);
        assert!(matches!(
            resolver.trait_type("shared").await,
            Err(DefinitionError::AmbiguousVariant { .. })
        ));
    }

    #[tokio::test]
    async fn global_policies_sorted_and_deduped() {
        let store = Arc::new(InMemoryDefinitionStore::new());
        store.insert_policy("katachi-system", policy_def("quota", true, 10));
        store.insert_policy("katachi-system", policy_def("audit", true, 10));
        store.insert_policy("katachi-system", policy_def("owner", true, 5));
        store.insert_policy("katachi-system", policy_def("plain", false, 99));
        // namespace-local override of the system-scoped policy
        store.insert_policy("default", policy_def("quota", true, 1));

        let resolver = resolver(store);
        let globals = resolver.global_policies().await.unwrap();
        let names: Vec<_> = globals
            .iter()
            .map(|p| p.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["audit", "owner", "quota"]);
        // the override from the app namespace carried its priority
        assert_eq!(globals[2].spec.priority, 1);
    }
}
