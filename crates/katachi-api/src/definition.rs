//! Definition custom resources
//!
//! Definitions carry the templates the renderer evaluates: a
//! `ComponentDefinition` per workload type, a `TraitDefinition` per trait
//! type, and a `PolicyDefinition` per policy type.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ComponentDefinition custom resource
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1beta1",
    kind = "ComponentDefinition",
    plural = "componentdefinitions",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinitionSpec {
    /// Hint naming the workload resource the template produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadDescriptor>,
    /// Workload template
    pub schematic: Schematic,
    /// Health template evaluated against the live workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_policy: Option<String>,
    /// Status-message template evaluated against the live workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
}

/// TraitDefinition custom resource
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1beta1",
    kind = "TraitDefinition",
    plural = "traitdefinitions",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct TraitDefinitionSpec {
    /// Dispatch stage this trait's resources are applied in
    #[serde(default)]
    pub stage: DispatchStage,
    /// Trait resources always land on the local cluster in the revision's
    /// namespace, regardless of the component's target
    #[serde(default)]
    pub control_plane_only: bool,
    /// The trait takes over applying the component workload
    #[serde(default)]
    pub manage_workload: bool,
    /// Applying this trait may restart workload pods
    #[serde(default)]
    pub pod_disruptive: bool,
    /// Trait type names that resolve to this definition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    /// Trait template
    pub schematic: Schematic,
    /// Health template evaluated against the trait's output resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_policy: Option<String>,
    /// Status-message template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
}

/// PolicyDefinition custom resource
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1beta1",
    kind = "PolicyDefinition",
    plural = "policydefinitions",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinitionSpec {
    /// What the policy applies to
    #[serde(default)]
    pub scope: DefinitionScope,
    /// Global policies apply to every Application in scope without being
    /// listed in its spec
    #[serde(default)]
    pub global: bool,
    /// Execution priority among global policies, higher first
    #[serde(default)]
    pub priority: i32,
    /// Policy template
    pub schematic: Schematic,
}

/// Workload resource hint
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDescriptor {
    pub api_version: String,
    pub kind: String,
}

/// Template container
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Schematic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cue: Option<CueSchematic>,
}

/// A CUE template source
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CueSchematic {
    pub template: String,
}

impl Schematic {
    /// Build a schematic from a template source string
    pub fn from_template(template: impl Into<String>) -> Self {
        Self {
            cue: Some(CueSchematic { template: template.into() }),
        }
    }

    /// The template source, if one is present
    pub fn template(&self) -> Option<&str> {
        self.cue.as_ref().map(|c| c.template.as_str())
    }
}

/// Definition scope
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum DefinitionScope {
    /// Applies to a whole Application
    #[default]
    Application,
    /// Applies to a single component
    Component,
}

/// Dispatch stage a trait's resources are applied in
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DispatchStage {
    /// Applied before the workload
    PreDispatch,
    /// Applied together with the workload
    #[default]
    DefaultDispatch,
    /// Deferred until the workload is healthy and its outputs observable
    PostDispatch,
}

impl DispatchStage {
    /// Stages in dispatch order
    pub const ORDERED: [DispatchStage; 3] = [
        DispatchStage::PreDispatch,
        DispatchStage::DefaultDispatch,
        DispatchStage::PostDispatch,
    ];

    /// Parse a stage name as it appears on a definition
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PreDispatch" => Some(DispatchStage::PreDispatch),
            "DefaultDispatch" => Some(DispatchStage::DefaultDispatch),
            "PostDispatch" => Some(DispatchStage::PostDispatch),
            _ => None,
        }
    }
}
