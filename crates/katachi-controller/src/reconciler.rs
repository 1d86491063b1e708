//! The reconciliation pipeline
//!
//! One pass: policy pre-pass mutates the in-memory Application, a revision
//! snapshots the result, the workflow steps drive component dispatch, and
//! the observed state is written back to status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use katachi_api::{
    Application, ApplicationConditionType, ApplicationPhase, ApplicationStatus, AppliedResource,
    ConditionStatus, RevisionReference, WorkflowStatus,
};
use katachi_core::{
    content_hash, DefinitionError, DefinitionResolver, DefinitionStore, ReconcileContext,
};
use katachi_dispatch::{ComponentDispatcher, ComponentRenderer, HealthCollector};
use katachi_keeper::{
    ApplyOptions, ClusterRouter, ResourceKeeper, ResourceManifest, LOCAL_CLUSTER,
};
use katachi_policy::{DurablePolicyCache, PolicyPrePass, PolicyResultCache};
use katachi_template::TemplateEvaluator;
use katachi_workflow::{StepEngine, StepGenerator};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::restart::{resolve_scheduled_restart, restart_due};
use crate::revision::RevisionManager;
use crate::runtime::DispatchRuntime;
use crate::status::{condition, StatusWriter};

/// What the caller should do next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Requeue(Duration),
    Done,
}

pub struct Reconciler {
    config: ControllerConfig,
    evaluator: Arc<dyn TemplateEvaluator>,
    definitions: Arc<dyn DefinitionStore>,
    router: Arc<ClusterRouter>,
    policy_cache: Arc<PolicyResultCache>,
    status_writer: Arc<dyn StatusWriter>,
}

impl Reconciler {
    pub fn new(
        config: ControllerConfig,
        evaluator: Arc<dyn TemplateEvaluator>,
        definitions: Arc<dyn DefinitionStore>,
        router: Arc<ClusterRouter>,
        status_writer: Arc<dyn StatusWriter>,
    ) -> Self {
        let policy_cache = Arc::new(PolicyResultCache::new(config.policy_cache_ttl));
        Self {
            config,
            evaluator,
            definitions,
            router,
            policy_cache,
            status_writer,
        }
    }

    pub fn policy_cache(&self) -> &Arc<PolicyResultCache> {
        &self.policy_cache
    }

    /// Run one reconciliation of one Application
    pub async fn reconcile(
        &self,
        observed: &Application,
        cancellation: CancellationToken,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let mut app = observed.clone();
        let name = app
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingMetadata("name"))?;
        let namespace = app
            .metadata
            .namespace
            .clone()
            .ok_or(ControllerError::MissingMetadata("namespace"))?;
        info!(app = %name, namespace = %namespace, "reconciling application");

        if app.metadata.deletion_timestamp.is_some() {
            return self.handle_deletion(&namespace, &name, cancellation).await;
        }

        let mut status = app.status.clone().unwrap_or_default();
        let mut ctx = ReconcileContext::new(namespace.clone(), name.clone())
            .with_system_namespace(&self.config.system_namespace)
            .with_cancellation(cancellation);
        ctx.auto_update = app.auto_update();
        ctx.publish_version = app.publish_version().map(str::to_string);

        let owner_ref = owner_reference(&app);
        let local = self.router.client(None)?;
        let resolver = DefinitionResolver::new(
            self.definitions.clone(),
            namespace.clone(),
            self.config.system_namespace.clone(),
        );

        // policy pre-pass, mutating the in-memory Application
        let prepass = PolicyPrePass::new(
            self.evaluator.clone(),
            self.policy_cache.clone(),
            DurablePolicyCache::new(local.clone()),
        )
        .with_global_policies(self.config.global_policies_enabled);
        let prepass_outcome = match prepass
            .run(&mut app, &resolver, &mut ctx, Some(owner_ref.clone()))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(app = %name, error = %e, "policy pre-pass failed");
                status.phase = ApplicationPhase::Rendering;
                status.message = Some(e.to_string());
                status.set_condition(condition(
                    ApplicationConditionType::PoliciesApplied,
                    ConditionStatus::False,
                    "PolicyError",
                    Some(e.to_string()),
                ));
                return self
                    .finish(&mut app, status, self.config.requeue_error)
                    .await;
            }
        };
        let spec_mutated = prepass_outcome.applied.iter().any(|p| p.spec_modified);
        status.applied_application_policies = prepass_outcome.applied;
        status.application_policies_config_map = prepass_outcome.config_map_name;
        status.set_condition(condition(
            ApplicationConditionType::PoliciesApplied,
            ConditionStatus::True,
            "PoliciesApplied",
            None,
        ));

        if spec_mutated && app.auto_revision() {
            self.status_writer.write_spec(&app).await?;
        }

        // revision snapshot of the pre-pass result; the versions of the
        // definitions the spec references are part of the revision identity
        let definition_versions = collect_definition_versions(&app, &resolver).await?;
        let revisions = RevisionManager::new(local.clone(), self.config.revision_limit);
        let mut app_for_revision = app.clone();
        app_for_revision.status = Some(status.clone());
        let ensured = revisions
            .ensure(&app_for_revision, definition_versions, Some(owner_ref.clone()))
            .await?;
        ctx = ctx.with_revision(&ensured.name, &ensured.hash);
        status.latest_revision = Some(RevisionReference {
            name: ensured.name.clone(),
            revision: ensured.revision,
            revision_hash: ensured.hash.clone(),
        });

        // workflow restart: material change, elapsed restart time, or both
        resolve_scheduled_restart(&app, &mut status);
        let mut reset = ensured.created && status.workflow.is_some();
        if restart_due(&status, Utc::now()) && status.workflow_done() {
            reset = true;
            status.workflow_restart_scheduled_at = None;
        }
        if reset {
            info!(app = %name, "resetting workflow");
            status.workflow = None;
            status.services.clear();
            status.applied_resources.clear();
        }

        let mut workflow_status = status.workflow.take().unwrap_or_else(|| WorkflowStatus {
            app_revision: Some(ensured.name.clone()),
            ..Default::default()
        });

        // component pipeline bound to this reconciliation
        let apply_options = ApplyOptions {
            field_manager: self.config.field_manager.clone(),
            force: true,
        };
        let keeper = Arc::new(
            ResourceKeeper::new(self.router.clone(), ctx.owner_labels())
                .with_owner_reference(owner_ref.clone()),
        );
        // resources recorded by earlier passes of this revision stay claimed
        keeper.track(&prior_manifests(&status.applied_resources))?;

        let renderer = Arc::new(ComponentRenderer::new(
            self.evaluator.clone(),
            resolver.clone(),
        ));
        let health = Arc::new(HealthCollector::new(
            self.evaluator.clone(),
            self.router.clone(),
        ));
        let dispatcher = Arc::new(
            ComponentDispatcher::new(keeper.clone(), renderer.clone(), health.clone())
                .with_apply_options(apply_options.clone()),
        );
        let runtime = Arc::new(DispatchRuntime::new(
            renderer,
            dispatcher,
            health,
            keeper.clone(),
            apply_options,
        ));

        let runners = match StepGenerator::new(runtime).generate(&app) {
            Ok(runners) => runners,
            Err(e) => {
                warn!(app = %name, error = %e, "step generation failed");
                status.workflow = Some(workflow_status);
                status.phase = ApplicationPhase::Rendering;
                status.message = Some(e.to_string());
                status.set_condition(condition(
                    ApplicationConditionType::Parsed,
                    ConditionStatus::False,
                    "StepGenerationFailed",
                    Some(e.to_string()),
                ));
                return self
                    .finish(&mut app, status, self.config.requeue_error)
                    .await;
            }
        };
        status.set_condition(condition(
            ApplicationConditionType::Parsed,
            ConditionStatus::True,
            "Parsed",
            None,
        ));

        let pass = match StepEngine::new()
            .execute(&runners, &mut workflow_status, &ctx)
            .await
        {
            Ok(pass) => pass,
            Err(katachi_workflow::WorkflowError::Cancelled(e)) => return Err(e.into()),
            Err(e) => {
                warn!(app = %name, error = %e, "workflow execution failed");
                status.workflow = Some(workflow_status);
                status.phase = ApplicationPhase::Running;
                status.message = Some(e.to_string());
                return self
                    .finish(&mut app, status, self.config.requeue_error)
                    .await;
            }
        };

        for service in pass.services {
            match status.services.iter_mut().find(|s| s.name == service.name) {
                Some(existing) => *existing = service,
                None => status.services.push(service),
            }
        }
        status.applied_resources = applied_resources(&keeper);

        if workflow_status.finished {
            keeper.gc(&ctx).await?;
            status.set_condition(condition(
                ApplicationConditionType::WorkflowFinished,
                ConditionStatus::True,
                "WorkflowFinished",
                None,
            ));
        }

        let all_healthy = status.services.iter().all(|s| s.healthy);
        status.phase = if workflow_status.terminated {
            ApplicationPhase::Terminated
        } else if workflow_status.suspended {
            ApplicationPhase::Suspending
        } else if workflow_status.finished && all_healthy {
            ApplicationPhase::Succeeded
        } else {
            ApplicationPhase::Running
        };
        if status.phase == ApplicationPhase::Succeeded {
            status.set_condition(condition(
                ApplicationConditionType::Ready,
                ConditionStatus::True,
                "AllComponentsHealthy",
                None,
            ));
        }
        status.message = workflow_status.message.clone();
        status.workflow = Some(workflow_status);

        let requeue = match status.phase {
            ApplicationPhase::Succeeded => self.config.requeue_steady,
            _ => self.config.requeue_running,
        };
        self.finish(&mut app, status, requeue).await
    }

    async fn finish(
        &self,
        app: &mut Application,
        mut status: ApplicationStatus,
        requeue: Duration,
    ) -> Result<ReconcileOutcome, ControllerError> {
        status.observed_generation = app.metadata.generation;
        app.status = Some(status);
        self.status_writer.write_status(app).await?;
        Ok(ReconcileOutcome::Requeue(requeue))
    }

    /// Cascade delete: everything carrying this Application's owner labels
    async fn handle_deletion(
        &self,
        namespace: &str,
        name: &str,
        cancellation: CancellationToken,
    ) -> Result<ReconcileOutcome, ControllerError> {
        info!(app = %name, namespace = %namespace, "application deleted, collecting resources");
        self.policy_cache.invalidate(namespace, name);
        let ctx = ReconcileContext::new(namespace, name).with_cancellation(cancellation);
        let keeper = ResourceKeeper::new(self.router.clone(), ctx.owner_labels());
        keeper.purge(&ctx).await?;
        Ok(ReconcileOutcome::Done)
    }
}

/// Versions of every definition the spec references, keyed by
/// `<kind>/<type>`; the apiserver's resource version when present, else a
/// content hash of the definition spec. Unresolvable types are left out
/// here and surface later as render or step-generation errors.
async fn collect_definition_versions(
    app: &Application,
    resolver: &DefinitionResolver,
) -> Result<BTreeMap<String, String>, ControllerError> {
    let mut versions = BTreeMap::new();
    for component in &app.spec.components {
        match resolver.component(&component.component_type).await {
            Ok(def) => {
                versions.insert(
                    format!("component/{}", component.component_type),
                    definition_version(def.metadata.resource_version.as_ref(), &def.spec)?,
                );
            }
            Err(DefinitionError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        for entry in &component.traits {
            match resolver.trait_type(&entry.trait_type).await {
                Ok(def) => {
                    versions.insert(
                        format!("trait/{}", entry.trait_type),
                        definition_version(def.metadata.resource_version.as_ref(), &def.spec)?,
                    );
                }
                Err(DefinitionError::NotFound { .. })
                | Err(DefinitionError::AmbiguousVariant { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    for policy in &app.spec.policies {
        match resolver.policy(&policy.policy_type).await {
            Ok(def) => {
                versions.insert(
                    format!("policy/{}", policy.policy_type),
                    definition_version(def.metadata.resource_version.as_ref(), &def.spec)?,
                );
            }
            Err(DefinitionError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(versions)
}

fn definition_version<S: serde::Serialize>(
    resource_version: Option<&String>,
    spec: &S,
) -> Result<String, ControllerError> {
    match resource_version {
        Some(version) => Ok(version.clone()),
        None => Ok(content_hash(spec)?),
    }
}

/// Owner reference pointing at the Application
fn owner_reference(app: &Application) -> Value {
    json!({
        "apiVersion": "core.oam.dev/v1beta1",
        "kind": "Application",
        "name": app.metadata.name.clone().unwrap_or_default(),
        "uid": app.metadata.uid.clone().unwrap_or_default(),
        "controller": true,
        "blockOwnerDeletion": true,
    })
}

fn prior_manifests(applied: &[AppliedResource]) -> Vec<ResourceManifest> {
    applied
        .iter()
        .filter_map(|resource| {
            ResourceManifest::new(json!({
                "apiVersion": resource.api_version,
                "kind": resource.kind,
                "metadata": {
                    "name": resource.name,
                    "namespace": resource.namespace,
                }
            }))
            .ok()
            .map(|manifest| manifest.with_cluster(resource.cluster.clone()))
        })
        .collect()
}

fn applied_resources(keeper: &ResourceKeeper) -> Vec<AppliedResource> {
    keeper
        .applied_resources()
        .into_iter()
        .map(|(cluster, ident)| AppliedResource {
            cluster: (cluster != LOCAL_CLUSTER).then_some(cluster),
            api_version: ident.api_version,
            kind: ident.kind,
            namespace: (!ident.namespace.is_empty()).then_some(ident.namespace),
            name: ident.name,
        })
        .collect()
}
