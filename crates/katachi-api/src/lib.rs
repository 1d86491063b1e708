//! API types for the Katachi application delivery control plane
//!
//! Defines the cluster-stored custom resources (`Application`,
//! `ApplicationRevision`, `ComponentDefinition`, `TraitDefinition`,
//! `PolicyDefinition`), their status types, and the behavioral
//! annotations understood by the controller.

pub mod application;
pub mod definition;
pub mod metadata;
pub mod revision;
pub mod status;

pub use application::{
    Application, ApplicationComponent, ApplicationPolicy, ApplicationSpec, ApplicationTrait,
    InputBinding, OutputBinding, Workflow, WorkflowStepSpec,
};
pub use definition::{
    ComponentDefinition, ComponentDefinitionSpec, CueSchematic, DefinitionScope, DispatchStage,
    PolicyDefinition, PolicyDefinitionSpec, Schematic, TraitDefinition, TraitDefinitionSpec,
    WorkloadDescriptor,
};
pub use metadata::{
    filter_exposed_metadata, ANNOTATION_AUTO_REVISION, ANNOTATION_AUTO_UPDATE,
    ANNOTATION_PUBLISH_VERSION, ANNOTATION_RESOURCE_CLUSTER, ANNOTATION_SKIP_GLOBAL_POLICIES,
    ANNOTATION_WORKFLOW_RESTART, API_GROUP, FILTERED_METADATA_PREFIXES, LABEL_APP_COMPONENT,
    LABEL_APP_NAME, LABEL_APP_NAMESPACE, LABEL_APP_REVISION, LABEL_MANAGED_RESOURCE,
};
pub use revision::{ApplicationRevision, ApplicationRevisionSpec};
pub use status::{
    AppliedApplicationPolicy, AppliedResource, ApplicationCondition, ApplicationConditionType,
    ApplicationPhase, ApplicationStatus, ComponentServiceStatus, ConditionStatus,
    RevisionReference, StepPhase, TraitPhase, TraitStatus, WorkflowStatus, WorkflowStepStatus,
};
