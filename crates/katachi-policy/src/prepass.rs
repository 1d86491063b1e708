//! The policy pre-pass
//!
//! Runs before the Application is parsed into its rendered form: discovers
//! global policies, renders each global and user-declared policy through
//! the template evaluator, merges enabled outputs into the in-memory
//! Application in order, and maintains both cache tiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use katachi_api::{
    filter_exposed_metadata, Application, ApplicationPolicy, AppliedApplicationPolicy,
    PolicyDefinition,
};
use katachi_core::{DefinitionResolver, ReconcileContext};
use katachi_template::{
    context::{
        CONTEXT_ANNOTATIONS, CONTEXT_APP_NAME, CONTEXT_COMPONENTS, CONTEXT_LABELS,
        CONTEXT_NAMESPACE, CONTEXT_POLICIES, CONTEXT_PRIOR, CONTEXT_REVISION, CONTEXT_WORKFLOW,
    },
    TemplateContext, TemplateError, TemplateEvaluator,
};

use crate::cache::PolicyResultCache;
use crate::config::{OutputKind, PolicyConfig};
use crate::durable::DurablePolicyCache;
use crate::error::PolicyError;
use crate::hashing::{application_hash, cascade_id};
use crate::output::{PolicyArtifact, PolicyOutput};
use crate::record::{PolicyCacheRecord, RenderedPolicyResult};

/// Result of one pre-pass run
#[derive(Debug, Default)]
pub struct PrePassOutcome {
    /// One entry per policy considered, in execution order
    pub applied: Vec<AppliedApplicationPolicy>,
    /// The rendered results the entries were derived from
    pub results: Vec<RenderedPolicyResult>,
    /// Name of the durable cache blob, when one exists
    pub config_map_name: Option<String>,
}

/// The pre-pass pipeline
pub struct PolicyPrePass {
    evaluator: Arc<dyn TemplateEvaluator>,
    local_cache: Arc<PolicyResultCache>,
    durable: DurablePolicyCache,
    global_policies_enabled: bool,
}

struct PolicyInput {
    name: String,
    namespace: String,
    priority: i32,
    properties: Option<Value>,
    global: bool,
    template: String,
}

impl PolicyPrePass {
    pub fn new(
        evaluator: Arc<dyn TemplateEvaluator>,
        local_cache: Arc<PolicyResultCache>,
        durable: DurablePolicyCache,
    ) -> Self {
        Self {
            evaluator,
            local_cache,
            durable,
            global_policies_enabled: true,
        }
    }

    pub fn with_global_policies(mut self, enabled: bool) -> Self {
        self.global_policies_enabled = enabled;
        self
    }

    /// Run the pre-pass, mutating the in-memory Application
    pub async fn run(
        &self,
        app: &mut Application,
        resolver: &DefinitionResolver,
        ctx: &mut ReconcileContext,
        owner_reference: Option<Value>,
    ) -> Result<PrePassOutcome, PolicyError> {
        ctx.ensure_active()?;
        let app_hash = application_hash(&app.spec)?;

        // user-declared policies must not reference global definitions
        let mut user_inputs = Vec::new();
        for policy in app.spec.policies.clone() {
            let def = resolver.policy(&policy.policy_type).await?;
            if def.spec.global {
                return Err(PolicyError::InvalidPolicy(policy.name));
            }
            user_inputs.push(self.user_input(&policy, &def, ctx));
        }

        let mut inputs = Vec::new();
        if self.global_policies_enabled && !app.skip_global_policies() {
            for def in resolver.global_policies().await? {
                inputs.push(self.global_input(&def, ctx));
            }
        }
        inputs.extend(user_inputs);

        if inputs.is_empty() {
            return Ok(PrePassOutcome::default());
        }

        let results = match self
            .local_cache
            .get(&ctx.app_namespace, &ctx.app_name, &app_hash)
        {
            Some(cached) => {
                debug!(app = %ctx.app_name, "policy results served from local cache");
                cached
            }
            None => {
                let results = self
                    .render_all(app, &inputs, &app_hash, ctx, owner_reference)
                    .await?;
                self.local_cache.put(
                    &ctx.app_namespace,
                    &ctx.app_name,
                    &app_hash,
                    results.clone(),
                );
                results
            }
        };

        let applied = self.apply_all(app, &results, ctx)?;
        Ok(PrePassOutcome {
            applied,
            results,
            config_map_name: Some(DurablePolicyCache::blob_name(
                &ctx.app_namespace,
                &ctx.app_name,
            )),
        })
    }

    fn global_input(&self, def: &PolicyDefinition, ctx: &ReconcileContext) -> PolicyInput {
        PolicyInput {
            name: def.metadata.name.clone().unwrap_or_default(),
            namespace: def
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| ctx.system_namespace.clone()),
            priority: def.spec.priority,
            properties: None,
            global: true,
            template: def
                .spec
                .schematic
                .template()
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn user_input(
        &self,
        policy: &ApplicationPolicy,
        def: &PolicyDefinition,
        ctx: &ReconcileContext,
    ) -> PolicyInput {
        PolicyInput {
            name: policy.name.clone(),
            namespace: ctx.app_namespace.clone(),
            priority: def.spec.priority,
            properties: policy.properties.clone(),
            global: false,
            template: def
                .spec
                .schematic
                .template()
                .unwrap_or_default()
                .to_string(),
        }
    }

    async fn render_all(
        &self,
        app: &Application,
        inputs: &[PolicyInput],
        app_hash: &str,
        ctx: &ReconcileContext,
        owner_reference: Option<Value>,
    ) -> Result<Vec<RenderedPolicyResult>, PolicyError> {
        let prior_records = match self.durable.load(&ctx.app_namespace, &ctx.app_name).await {
            Ok(records) => records,
            Err(e) => {
                warn!(app = %ctx.app_name, error = %e, "durable policy cache unreadable, rendering from scratch");
                BTreeMap::new()
            }
        };

        let now = Utc::now();
        let mut upstream: Vec<PolicyArtifact> = Vec::new();
        let mut results = Vec::new();
        let mut records = Vec::new();

        for input in inputs {
            ctx.ensure_active()?;
            let cascade = cascade_id(&upstream)?;
            let prior = prior_records.get(&input.name);

            match self
                .render_one(app, input, app_hash, &cascade, prior, now, ctx)
                .await
            {
                Ok((result, record)) => {
                    if result.enabled {
                        upstream.push(result.transforms.clone());
                    }
                    if let Some(mut record) = record {
                        record.sequence = records.len() as u32;
                        records.push(record);
                    }
                    results.push(result);
                }
                Err(e) if input.global => {
                    warn!(policy = %input.name, error = %e, "global policy render failed, skipping");
                    results.push(RenderedPolicyResult::skipped(
                        &input.name,
                        &input.namespace,
                        input.priority,
                        format!("render error: {}", e),
                    ));
                }
                Err(e) => {
                    return Err(PolicyError::Render {
                        name: input.name.clone(),
                        source: e,
                    })
                }
            }
        }

        if let Err(e) = self
            .durable
            .store(&ctx.app_namespace, &ctx.app_name, &records, owner_reference)
            .await
        {
            warn!(app = %ctx.app_name, error = %e, "durable policy cache write failed");
        }

        Ok(results)
    }

    async fn render_one(
        &self,
        app: &Application,
        input: &PolicyInput,
        app_hash: &str,
        cascade: &str,
        prior: Option<&PolicyCacheRecord>,
        now: DateTime<Utc>,
        ctx: &ReconcileContext,
    ) -> Result<(RenderedPolicyResult, Option<PolicyCacheRecord>), TemplateError> {
        if input.template.is_empty() {
            return Err(TemplateError::Compile(
                "policy definition has no template".to_string(),
            ));
        }

        let template_ctx = self.policy_context(app, input, prior, ctx);
        let value = self.evaluator.eval(&input.template, &template_ctx).await?;

        let config: PolicyConfig = if value.exists("config") {
            value.decode("config")?
        } else {
            PolicyConfig::default()
        };
        config.validate()?;

        let enabled = value
            .as_bool("enabled")
            .or(config.enabled)
            .unwrap_or(true);
        if !enabled {
            let mut result =
                RenderedPolicyResult::skipped(&input.name, &input.namespace, input.priority, "enabled=false");
            result.config = config;
            return Ok((result, None));
        }

        if !value.exists("output") {
            return Err(TemplateError::validate(
                "output",
                "policy must specify 'output' field",
            ));
        }
        let fresh: PolicyOutput = value.decode("output")?;

        let (effective, rendered_at) = self.merge_with_cache(fresh, &config, prior, app_hash, cascade, now);

        let record = PolicyCacheRecord::build(
            &input.name,
            &input.namespace,
            input.priority,
            0, // sequence assigned by the caller
            app_hash,
            cascade,
            &effective,
            &config,
            &rendered_at,
            now,
        );

        let result = RenderedPolicyResult {
            name: input.name.clone(),
            namespace: input.namespace.clone(),
            priority: input.priority,
            enabled: true,
            skip_reason: None,
            additional_context: effective.ctx.clone(),
            transforms: PolicyArtifact::NewApi(effective),
            config,
        };
        Ok((result, Some(record)))
    }

    /// Per output type: keep the cached slice when the record is valid and
    /// its refresh rule does not signal stale, else take the fresh slice
    fn merge_with_cache(
        &self,
        fresh: PolicyOutput,
        config: &PolicyConfig,
        prior: Option<&PolicyCacheRecord>,
        app_hash: &str,
        cascade: &str,
        now: DateTime<Utc>,
    ) -> (PolicyOutput, BTreeMap<OutputKind, DateTime<Utc>>) {
        let mut rendered_at = BTreeMap::new();
        let Some(prior) = prior else {
            return (fresh, rendered_at);
        };
        if !prior.matches(app_hash, cascade) {
            return (fresh, rendered_at);
        }
        let Ok(PolicyArtifact::NewApi(cached)) = prior.artifact() else {
            // legacy blobs are never reused as slices
            return (fresh, rendered_at);
        };

        let mut effective = fresh;
        for kind in OutputKind::ALL {
            let Some(cached_data) = prior.cached(kind) else {
                continue;
            };
            if prior.legacy_refresh_always() {
                continue;
            }
            if config.rule(kind).should_refresh(cached_data.rendered_at, now) {
                continue;
            }
            copy_slice(&mut effective, &cached, kind);
            rendered_at.insert(kind, cached_data.rendered_at);
        }
        (effective, rendered_at)
    }

    fn policy_context(
        &self,
        app: &Application,
        input: &PolicyInput,
        prior: Option<&PolicyCacheRecord>,
        ctx: &ReconcileContext,
    ) -> TemplateContext {
        let labels = app
            .metadata
            .labels
            .as_ref()
            .map(filter_exposed_metadata)
            .unwrap_or_default();
        let annotations = app
            .metadata
            .annotations
            .as_ref()
            .map(filter_exposed_metadata)
            .unwrap_or_default();

        let mut template_ctx = TemplateContext::new()
            .with_parameter(input.properties.clone().unwrap_or(Value::Null))
            .with(CONTEXT_APP_NAME, Value::String(ctx.app_name.clone()))
            .with(CONTEXT_NAMESPACE, Value::String(ctx.app_namespace.clone()))
            .with(CONTEXT_REVISION, Value::String(ctx.revision_name.clone()))
            .with(
                CONTEXT_LABELS,
                serde_json::to_value(labels).unwrap_or(Value::Null),
            )
            .with(
                CONTEXT_ANNOTATIONS,
                serde_json::to_value(annotations).unwrap_or(Value::Null),
            )
            .with(
                CONTEXT_COMPONENTS,
                serde_json::to_value(&app.spec.components).unwrap_or(Value::Null),
            )
            .with(
                CONTEXT_WORKFLOW,
                serde_json::to_value(&app.spec.workflow).unwrap_or(Value::Null),
            )
            .with(
                CONTEXT_POLICIES,
                serde_json::to_value(&app.spec.policies).unwrap_or(Value::Null),
            );

        // prior cached output, loaded regardless of refresh mode
        if let Some(record) = prior {
            if let Ok(artifact) = record.artifact() {
                template_ctx.set(
                    CONTEXT_PRIOR,
                    serde_json::to_value(&artifact).unwrap_or(Value::Null),
                );
            }
        }
        template_ctx
    }

    fn apply_all(
        &self,
        app: &mut Application,
        results: &[RenderedPolicyResult],
        ctx: &mut ReconcileContext,
    ) -> Result<Vec<AppliedApplicationPolicy>, PolicyError> {
        let mut applied = Vec::new();
        for result in results {
            ctx.ensure_active()?;
            if !result.enabled {
                applied.push(AppliedApplicationPolicy {
                    name: result.name.clone(),
                    namespace: Some(result.namespace.clone()),
                    enabled: false,
                    skip_reason: result.skip_reason.clone(),
                    added_labels: Vec::new(),
                    added_annotations: Vec::new(),
                    spec_modified: false,
                    context_keys: Vec::new(),
                });
                continue;
            }
            let diff = result.transforms.apply(app, ctx)?;
            applied.push(AppliedApplicationPolicy {
                name: result.name.clone(),
                namespace: Some(result.namespace.clone()),
                enabled: true,
                skip_reason: None,
                added_labels: diff.added_labels,
                added_annotations: diff.added_annotations,
                spec_modified: diff.spec_modified,
                context_keys: diff.context_keys,
            });
        }
        Ok(applied)
    }
}

fn copy_slice(dst: &mut PolicyOutput, src: &PolicyOutput, kind: OutputKind) {
    match kind {
        OutputKind::Spec => {
            dst.components = src.components.clone();
            dst.workflow = src.workflow.clone();
            dst.policies = src.policies.clone();
        }
        OutputKind::Labels => dst.labels = src.labels.clone(),
        OutputKind::Annotations => dst.annotations = src.annotations.clone(),
        OutputKind::Ctx => dst.ctx = src.ctx.clone(),
    }
}
