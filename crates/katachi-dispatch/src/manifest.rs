//! Component manifests
//!
//! The rendering result of one component: the workload resource, the
//! rendered immediate traits, and the deferred traits as a per-trait
//! state machine (`Parked → Rendering → Applied`).

use serde_json::Value;

use katachi_api::{ApplicationComponent, ComponentDefinition, DispatchStage, TraitDefinition};
use katachi_keeper::ResourceManifest;

use crate::renderer::RenderTarget;

/// Lifecycle of one deferred trait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraitState {
    /// Withheld until the workload and outputs are observable
    Parked,
    /// Rendered against the live workload, resources not yet applied
    Rendering,
    /// Resources applied to the target cluster
    Applied,
}

/// A Post-stage trait withheld from rendering
#[derive(Clone, Debug)]
pub struct DeferredTrait {
    pub trait_type: String,
    pub properties: Option<Value>,
    pub definition: TraitDefinition,
    pub state: TraitState,
    /// Filled once the trait leaves `Parked`
    pub resources: Vec<ResourceManifest>,
}

impl DeferredTrait {
    pub fn parked(trait_type: &str, properties: Option<Value>, definition: TraitDefinition) -> Self {
        Self {
            trait_type: trait_type.to_string(),
            properties,
            definition,
            state: TraitState::Parked,
            resources: Vec::new(),
        }
    }
}

/// An immediate trait rendered into resources
#[derive(Clone, Debug)]
pub struct RenderedTrait {
    pub trait_type: String,
    pub stage: DispatchStage,
    pub properties: Option<Value>,
    pub definition: TraitDefinition,
    pub resources: Vec<ResourceManifest>,
}

/// Rendering result of one component
#[derive(Clone, Debug)]
pub struct ComponentManifest {
    /// Component name
    pub name: String,
    /// Resolved target namespace
    pub namespace: String,
    /// Resolved target cluster; `None` is the local cluster
    pub cluster: Option<String>,
    /// The caller-supplied placement overrides the component was rendered
    /// with, reused when deferred traits are rendered later
    pub target: RenderTarget,
    /// The workload resource
    pub workload: Option<ResourceManifest>,
    /// Type of the trait managing the workload, when one is declared
    pub manage_workload_trait: Option<String>,
    /// Rendered Pre- and Default-stage traits
    pub traits: Vec<RenderedTrait>,
    /// Auxiliary resources produced by the workload template
    pub outputs: Vec<ResourceManifest>,
    /// Post-stage traits and their state
    pub deferred: Vec<DeferredTrait>,
    /// The component entry this manifest was rendered from
    pub component: ApplicationComponent,
    /// The definition the workload template came from
    pub definition: ComponentDefinition,
}

impl ComponentManifest {
    /// Resources belonging to one stage, in render order
    ///
    /// The workload is part of the Default stage unless a trait manages it.
    /// Post-stage resources only exist once deferred traits have been
    /// rendered.
    pub fn stage_resources(&self, stage: DispatchStage) -> Vec<ResourceManifest> {
        let mut resources = Vec::new();
        if stage == DispatchStage::DefaultDispatch {
            if self.manage_workload_trait.is_none() {
                if let Some(workload) = &self.workload {
                    resources.push(workload.clone());
                }
            }
            resources.extend(self.outputs.iter().cloned());
        }
        for rendered in &self.traits {
            if rendered.stage == stage {
                resources.extend(rendered.resources.iter().cloned());
            }
        }
        if stage == DispatchStage::PostDispatch {
            for deferred in &self.deferred {
                if deferred.state != TraitState::Parked {
                    resources.extend(deferred.resources.iter().cloned());
                }
            }
        }
        resources
    }

    /// Deferred traits still waiting on the workload
    pub fn deferred_traits(&self) -> impl Iterator<Item = &DeferredTrait> {
        self.deferred
            .iter()
            .filter(|t| t.state == TraitState::Parked)
    }

    /// Deferred traits rendered after the workload came up
    pub fn processed_deferred_traits(&self) -> impl Iterator<Item = &DeferredTrait> {
        self.deferred
            .iter()
            .filter(|t| t.state != TraitState::Parked)
    }

    /// Named output resources next to the workload, keyed by resource name
    pub fn output_resources(&self) -> Vec<(String, &ResourceManifest)> {
        let mut named = Vec::new();
        for resource in &self.outputs {
            if let Some(name) = resource.name() {
                named.push((name.to_string(), resource));
            }
        }
        for rendered in &self.traits {
            for resource in &rendered.resources {
                if let Some(name) = resource.name() {
                    named.push((name.to_string(), resource));
                }
            }
        }
        named
    }
}
