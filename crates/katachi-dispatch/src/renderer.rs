//! Component renderer
//!
//! Parses a component entry into a workload plus traits, splits traits by
//! stage, and evaluates the workload and immediate-trait templates into
//! resource manifests. Post-stage traits are parked on the manifest for
//! the dispatcher's Post stage.
//!
//! Template protocol: a workload template returns the workload under
//! `output` and optional named auxiliary resources under `outputs`; a
//! trait template returns named resources under `outputs`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use katachi_api::{
    ApplicationComponent, DispatchStage, TraitDefinition, ANNOTATION_RESOURCE_CLUSTER,
};
use katachi_core::{DefinitionResolver, ReconcileContext};
use katachi_template::{
    context::{
        CONTEXT_APP_NAME, CONTEXT_NAMESPACE, CONTEXT_OUTPUT, CONTEXT_OUTPUTS, CONTEXT_POLICY_CTX,
        CONTEXT_REVISION,
    },
    TemplateContext, TemplateEvaluator,
};
use katachi_keeper::ResourceManifest;

use crate::error::DispatchError;
use crate::manifest::{ComponentManifest, DeferredTrait, RenderedTrait, TraitState};

/// Context key: the component being rendered
pub const CONTEXT_COMPONENT_NAME: &str = "componentName";

/// Caller-supplied placement overrides; these win over template output
#[derive(Clone, Debug, Default)]
pub struct RenderTarget {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
}

pub struct ComponentRenderer {
    evaluator: Arc<dyn TemplateEvaluator>,
    resolver: DefinitionResolver,
}

impl ComponentRenderer {
    pub fn new(evaluator: Arc<dyn TemplateEvaluator>, resolver: DefinitionResolver) -> Self {
        Self { evaluator, resolver }
    }

    /// Render a component into its manifest; Post-stage traits are parked
    pub async fn render(
        &self,
        component: &ApplicationComponent,
        ctx: &ReconcileContext,
        target: &RenderTarget,
    ) -> Result<ComponentManifest, DispatchError> {
        ctx.ensure_active()?;
        let definition = self.resolver.component(&component.component_type).await?;

        let mut trait_defs: Vec<(&katachi_api::ApplicationTrait, TraitDefinition)> = Vec::new();
        for entry in &component.traits {
            let def = self.resolver.trait_type(&entry.trait_type).await?;
            trait_defs.push((entry, def));
        }

        let managing: Vec<&str> = trait_defs
            .iter()
            .filter(|(_, def)| def.spec.manage_workload)
            .map(|(entry, _)| entry.trait_type.as_str())
            .collect();
        if managing.len() > 1 {
            return Err(DispatchError::render(
                &component.name,
                format!("multiple manageWorkload traits: {}", managing.join(", ")),
            ));
        }

        let base_ctx = self.base_context(component, ctx);
        let template = definition.spec.schematic.template().ok_or_else(|| {
            DispatchError::render(&component.name, "component definition has no template")
        })?;
        let value = self
            .evaluator
            .eval(template, &base_ctx.clone().with_parameter(parameter_of(component)))
            .await?;

        if !value.exists("output") {
            return Err(DispatchError::render(
                &component.name,
                "workload template produced no 'output'",
            ));
        }
        let workload_value = value
            .lookup("output")
            .cloned()
            .unwrap_or(Value::Null);
        let mut workload =
            self.finalize_resource(workload_value, &component.name, false, target, ctx)?;
        workload.set_label(katachi_api::LABEL_APP_COMPONENT, &component.name);

        let mut outputs = Vec::new();
        if let Some(aux) = value.lookup("outputs").and_then(Value::as_object) {
            for (key, resource) in aux {
                let default_name = format!("{}-{}", component.name, key);
                let mut resource =
                    self.finalize_resource(resource.clone(), &default_name, false, target, ctx)?;
                resource.set_label(katachi_api::LABEL_APP_COMPONENT, &component.name);
                outputs.push(resource);
            }
        }

        let mut traits = Vec::new();
        let mut deferred = Vec::new();
        for (entry, def) in trait_defs {
            if def.spec.stage == DispatchStage::PostDispatch {
                deferred.push(DeferredTrait::parked(
                    &entry.trait_type,
                    entry.properties.clone(),
                    def,
                ));
                continue;
            }
            let resources = self
                .render_trait_resources(
                    &entry.trait_type,
                    entry.properties.clone(),
                    &def,
                    &base_ctx,
                    &component.name,
                    target,
                    ctx,
                )
                .await?;
            traits.push(RenderedTrait {
                trait_type: entry.trait_type.clone(),
                stage: def.spec.stage,
                properties: entry.properties.clone(),
                definition: def,
                resources,
            });
        }

        Ok(ComponentManifest {
            name: component.name.clone(),
            namespace: target
                .namespace
                .clone()
                .unwrap_or_else(|| ctx.app_namespace.clone()),
            cluster: target.cluster.clone(),
            target: target.clone(),
            workload: Some(workload),
            manage_workload_trait: managing.first().map(|s| s.to_string()),
            traits,
            outputs,
            deferred,
            component: component.clone(),
            definition,
        })
    }

    /// Render parked traits against the observed workload state
    ///
    /// `workload_status` becomes `context.output.status`; `outputs` becomes
    /// `context.outputs`, keyed by resource name. Rendered traits move to
    /// the `Rendering` state.
    pub async fn render_deferred(
        &self,
        manifest: &mut ComponentManifest,
        workload_status: Value,
        outputs: &BTreeMap<String, Value>,
        ctx: &ReconcileContext,
    ) -> Result<(), DispatchError> {
        ctx.ensure_active()?;
        let mut enriched = self.base_context(&manifest.component, ctx);
        enriched.set(
            CONTEXT_OUTPUT,
            serde_json::json!({ "status": workload_status }),
        );
        let output_map: Map<String, Value> = outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        enriched.set(CONTEXT_OUTPUTS, Value::Object(output_map));

        let target = manifest.target.clone();
        let component_name = manifest.component.name.clone();
        for parked in &mut manifest.deferred {
            if parked.state != TraitState::Parked {
                continue;
            }
            let resources = self
                .render_trait_resources(
                    &parked.trait_type,
                    parked.properties.clone(),
                    &parked.definition.clone(),
                    &enriched,
                    &component_name,
                    &target,
                    ctx,
                )
                .await?;
            parked.resources = resources;
            parked.state = TraitState::Rendering;
        }
        Ok(())
    }

    async fn render_trait_resources(
        &self,
        trait_type: &str,
        properties: Option<Value>,
        def: &TraitDefinition,
        base_ctx: &TemplateContext,
        component_name: &str,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<Vec<ResourceManifest>, DispatchError> {
        let template = def.spec.schematic.template().ok_or_else(|| {
            DispatchError::render(
                component_name,
                format!("trait '{}' definition has no template", trait_type),
            )
        })?;
        let value = self
            .evaluator
            .eval(
                template,
                &base_ctx
                    .clone()
                    .with_parameter(properties.unwrap_or(Value::Null)),
            )
            .await?;

        let mut resources = Vec::new();
        if let Some(produced) = value.lookup("outputs").and_then(Value::as_object) {
            for (key, resource) in produced {
                let default_name = format!("{}-{}", component_name, key);
                let mut resource = self.finalize_resource(
                    resource.clone(),
                    &default_name,
                    def.spec.control_plane_only,
                    target,
                    ctx,
                )?;
                resource.set_label(katachi_api::LABEL_APP_COMPONENT, component_name);
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    fn base_context(&self, component: &ApplicationComponent, ctx: &ReconcileContext) -> TemplateContext {
        TemplateContext::new()
            .with(CONTEXT_APP_NAME, Value::String(ctx.app_name.clone()))
            .with(
                CONTEXT_COMPONENT_NAME,
                Value::String(component.name.clone()),
            )
            .with(CONTEXT_NAMESPACE, Value::String(ctx.app_namespace.clone()))
            .with(CONTEXT_REVISION, Value::String(ctx.revision_name.clone()))
            .with(
                CONTEXT_POLICY_CTX,
                Value::Object(ctx.policy_context().clone()),
            )
    }

    /// Placement: caller override > template output > application
    /// namespace and local cluster. Control-plane-only traits always land
    /// on the local cluster in the revision's namespace.
    fn finalize_resource(
        &self,
        value: Value,
        default_name: &str,
        control_plane_only: bool,
        target: &RenderTarget,
        ctx: &ReconcileContext,
    ) -> Result<ResourceManifest, DispatchError> {
        let mut manifest = ResourceManifest::new(value)?;
        if manifest.name().is_none() {
            manifest.set_name(default_name);
        }

        if control_plane_only {
            manifest.set_namespace(&ctx.app_namespace);
            return Ok(manifest.with_cluster(None));
        }

        match &target.namespace {
            Some(namespace) => manifest.set_namespace(namespace),
            None => manifest.default_namespace(&ctx.app_namespace),
        }

        let template_cluster = manifest
            .value()
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(ANNOTATION_RESOURCE_CLUSTER))
            .and_then(Value::as_str)
            .map(str::to_string);
        let cluster = target.cluster.clone().or(template_cluster);
        Ok(manifest.with_cluster(cluster))
    }
}

fn parameter_of(component: &ApplicationComponent) -> Value {
    component.properties.clone().unwrap_or(Value::Null)
}
