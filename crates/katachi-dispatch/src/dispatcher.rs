//! Staged dispatcher
//!
//! Applies a component manifest in stage order (Pre, Default, Post) with a
//! health probe before each apply and early termination when a stage
//! reports unhealthy. The Post stage owns the deferred-trait lifecycle:
//! parked traits are rendered against the observed workload, applied, and
//! probed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use katachi_api::{ComponentServiceStatus, DispatchStage, TraitPhase, TraitStatus};
use katachi_core::ReconcileContext;
use katachi_keeper::{ApplyOptions, ResourceKeeper};
use katachi_template::context::{CONTEXT_OUTPUT, CONTEXT_OUTPUTS};

use crate::error::DispatchError;
use crate::health::HealthCollector;
use crate::manifest::{ComponentManifest, TraitState};
use crate::renderer::ComponentRenderer;

/// Message shown on deferred traits waiting for their workload
pub const WAITING_MESSAGE: &str = "Waiting for component to be healthy.";

/// Outcome of dispatching one component
#[derive(Clone, Debug)]
pub struct DispatchReport {
    pub status: ComponentServiceStatus,
    /// All stages ran and reported healthy
    pub completed: bool,
}

pub struct ComponentDispatcher {
    keeper: Arc<ResourceKeeper>,
    renderer: Arc<ComponentRenderer>,
    health: Arc<HealthCollector>,
    apply_options: ApplyOptions,
}

impl ComponentDispatcher {
    pub fn new(
        keeper: Arc<ResourceKeeper>,
        renderer: Arc<ComponentRenderer>,
        health: Arc<HealthCollector>,
    ) -> Self {
        Self {
            keeper,
            renderer,
            health,
            apply_options: ApplyOptions::default(),
        }
    }

    pub fn with_apply_options(mut self, options: ApplyOptions) -> Self {
        self.apply_options = options;
        self
    }

    /// Run the staged dispatch for one component
    ///
    /// A failing stage blocks later stages for this reconciliation; the
    /// next reconciliation retries from the first stage.
    pub async fn dispatch(
        &self,
        manifest: &mut ComponentManifest,
        ctx: &ReconcileContext,
    ) -> Result<DispatchReport, DispatchError> {
        let mut trait_statuses: Vec<TraitStatus> = Vec::new();
        let mut overall_healthy = true;
        let mut message: Option<String> = None;
        let mut completed = true;
        let mut live_workload: Option<Value> = None;

        for stage in DispatchStage::ORDERED {
            ctx.ensure_active()?;

            if stage == DispatchStage::PostDispatch {
                if manifest.deferred.is_empty() {
                    continue;
                }
                match self
                    .run_post_stage(manifest, live_workload.as_ref(), &mut trait_statuses, ctx)
                    .await
                {
                    Ok(stage_healthy) => {
                        if !stage_healthy {
                            overall_healthy = false;
                            completed = false;
                        }
                    }
                    Err(e) if fatal(&e) => return Err(e),
                    Err(e) => {
                        warn!(component = %manifest.name, error = %e, "post stage failed");
                        overall_healthy = false;
                        completed = false;
                        message = Some(e.to_string());
                        break;
                    }
                }
                continue;
            }

            let resources = manifest.stage_resources(stage);
            if resources.is_empty() {
                continue;
            }

            // probe before apply: present and healthy means no-op
            let present = self.keeper.contains_resources(&resources).await?;
            if present && !ctx.auto_update {
                let stage_health = self.collect_stage_health(stage, manifest, ctx).await?;
                if stage_health.healthy {
                    debug!(component = %manifest.name, stage = ?stage, "stage already satisfied");
                    self.keeper.track(&resources)?;
                    trait_statuses.extend(stage_health.traits);
                    if stage == DispatchStage::DefaultDispatch {
                        live_workload = stage_health.live_workload;
                        message = message.or(stage_health.message);
                    }
                    continue;
                }
            }

            if let Err(e) = self
                .keeper
                .dispatch(ctx, &resources, &self.apply_options)
                .await
            {
                if fatal_keeper(&e) {
                    return Err(e.into());
                }
                warn!(component = %manifest.name, stage = ?stage, error = %e, "stage apply failed");
                overall_healthy = false;
                completed = false;
                message = Some(e.to_string());
                break;
            }

            let stage_health = self.collect_stage_health(stage, manifest, ctx).await?;
            trait_statuses.extend(stage_health.traits);
            if stage == DispatchStage::DefaultDispatch {
                live_workload = stage_health.live_workload;
                message = message.or(stage_health.message.clone());
            }
            if !stage_health.healthy {
                overall_healthy = false;
                completed = false;
                if let Some(stage_message) = stage_health.message {
                    message = Some(stage_message);
                }
                break;
            }
        }

        // traits whose stage never ran surface as waiting; parked deferred
        // traits surface as pending
        let reported: HashSet<String> = trait_statuses
            .iter()
            .map(|t| t.trait_type.clone())
            .collect();
        for rendered in &manifest.traits {
            if !reported.contains(&rendered.trait_type) {
                trait_statuses.push(TraitStatus {
                    trait_type: rendered.trait_type.clone(),
                    healthy: false,
                    message: Some("waiting for an earlier stage".to_string()),
                    state: TraitPhase::Waiting,
                });
            }
        }
        for deferred in &manifest.deferred {
            if !reported.contains(&deferred.trait_type) {
                trait_statuses.push(TraitStatus {
                    trait_type: deferred.trait_type.clone(),
                    healthy: false,
                    message: Some(WAITING_MESSAGE.to_string()),
                    state: TraitPhase::Pending,
                });
                overall_healthy = false;
                completed = false;
            }
        }

        Ok(DispatchReport {
            status: ComponentServiceStatus {
                name: manifest.name.clone(),
                namespace: Some(manifest.namespace.clone()),
                cluster: manifest.cluster.clone(),
                healthy: overall_healthy,
                message,
                traits: trait_statuses,
            },
            completed,
        })
    }

    /// Deferred-trait lifecycle: fetch observed state, render parked
    /// traits, apply, probe. Returns stage health.
    async fn run_post_stage(
        &self,
        manifest: &mut ComponentManifest,
        live_workload: Option<&Value>,
        trait_statuses: &mut Vec<TraitStatus>,
        ctx: &ReconcileContext,
    ) -> Result<bool, DispatchError> {
        let live = match live_workload {
            Some(live) => Some(live.clone()),
            None => self.health.workload_health(manifest, ctx).await?.1,
        };
        let workload_status = live
            .as_ref()
            .and_then(|w| w.get("status"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let mut outputs_live: BTreeMap<String, Value> = BTreeMap::new();
        for (name, resource) in manifest.output_resources() {
            let client = self.keeper.router().client(resource.cluster())?;
            let observed = client
                .get(&resource.ident()?)
                .await?
                .unwrap_or_else(|| resource.value().clone());
            outputs_live.insert(name, observed);
        }

        self.renderer
            .render_deferred(manifest, workload_status.clone(), &outputs_live, ctx)
            .await?;

        let resources = manifest.stage_resources(DispatchStage::PostDispatch);
        let present = resources.is_empty()
            || (self.keeper.contains_resources(&resources).await? && !ctx.auto_update);
        if present {
            self.keeper.track(&resources)?;
        } else {
            self.keeper
                .dispatch(ctx, &resources, &self.apply_options)
                .await?;
        }
        for deferred in &mut manifest.deferred {
            if deferred.state == TraitState::Rendering {
                deferred.state = TraitState::Applied;
            }
        }

        let enrichment = [
            (CONTEXT_OUTPUT, json!({ "status": workload_status })),
            (CONTEXT_OUTPUTS, json!(outputs_live)),
        ];
        let mut stage_healthy = true;
        for deferred in &manifest.deferred {
            let verdict = self
                .health
                .trait_health(
                    &deferred.definition,
                    deferred.properties.clone(),
                    &deferred.resources,
                    &enrichment,
                    ctx,
                )
                .await?;
            if !verdict.healthy {
                stage_healthy = false;
            }
            trait_statuses.push(TraitStatus {
                trait_type: deferred.trait_type.clone(),
                healthy: verdict.healthy,
                message: verdict.message,
                state: TraitPhase::Dispatched,
            });
        }
        Ok(stage_healthy)
    }

    async fn collect_stage_health(
        &self,
        stage: DispatchStage,
        manifest: &ComponentManifest,
        ctx: &ReconcileContext,
    ) -> Result<StageHealth, DispatchError> {
        let mut health = StageHealth {
            healthy: true,
            message: None,
            traits: Vec::new(),
            live_workload: None,
        };

        if stage == DispatchStage::DefaultDispatch && manifest.manage_workload_trait.is_none() {
            let (verdict, live) = self.health.workload_health(manifest, ctx).await?;
            health.healthy &= verdict.healthy;
            health.message = verdict.message;
            health.live_workload = live;
        }

        for rendered in &manifest.traits {
            if rendered.stage != stage {
                continue;
            }
            let verdict = self
                .health
                .trait_health(
                    &rendered.definition,
                    rendered.properties.clone(),
                    &rendered.resources,
                    &[],
                    ctx,
                )
                .await?;
            if !verdict.healthy {
                health.healthy = false;
            }
            health.traits.push(TraitStatus {
                trait_type: rendered.trait_type.clone(),
                healthy: verdict.healthy,
                message: verdict.message,
                state: TraitPhase::Dispatched,
            });
        }
        Ok(health)
    }
}

struct StageHealth {
    healthy: bool,
    message: Option<String>,
    traits: Vec<TraitStatus>,
    live_workload: Option<Value>,
}

fn fatal(err: &DispatchError) -> bool {
    matches!(err, DispatchError::Cancelled(_))
}

fn fatal_keeper(err: &katachi_keeper::KeeperError) -> bool {
    matches!(err, katachi_keeper::KeeperError::Cancelled(_))
}
