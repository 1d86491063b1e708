//! End-to-end reconciliation against in-memory fakes

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use katachi_api::{
    Application, ApplicationPhase, ComponentDefinition, ComponentDefinitionSpec,
    PolicyDefinition, PolicyDefinitionSpec, Schematic, ANNOTATION_WORKFLOW_RESTART,
};
use katachi_controller::{ControllerConfig, InMemoryStatusWriter, Reconciler};
use katachi_core::{DefinitionStore, InMemoryDefinitionStore};
use katachi_keeper::{ClusterClient, ClusterRouter, InMemoryCluster, ResourceIdent, LOCAL_CLUSTER};
use katachi_template::JsonTemplateEvaluator;
use kube::core::ObjectMeta;

const SYSTEM_NS: &str = "katachi-system";

struct World {
    reconciler: Reconciler,
    cluster: Arc<InMemoryCluster>,
    store: Arc<InMemoryDefinitionStore>,
    writer: Arc<InMemoryStatusWriter>,
}

fn world() -> World {
    let cluster = Arc::new(InMemoryCluster::new());
    let router = Arc::new(ClusterRouter::new());
    router.register(LOCAL_CLUSTER, cluster.clone());
    let store = Arc::new(InMemoryDefinitionStore::new());
    let writer = Arc::new(InMemoryStatusWriter::new());

    // health gate: the workload must report status.ready
    store.insert_component(
        SYSTEM_NS,
        ComponentDefinition {
            metadata: ObjectMeta {
                name: Some("webservice".to_string()),
                namespace: Some(SYSTEM_NS.to_string()),
                ..Default::default()
            },
            spec: ComponentDefinitionSpec {
                schematic: Schematic::from_template(
                    r#"{"output": {"apiVersion": "apps/v1", "kind": "Deployment", "spec": {"image": "$(parameter.image)"}}}"#,
                ),
                health_policy: Some(r#"{"isHealth": "$(context.output.status.ready)"}"#.to_string()),
                ..Default::default()
            },
        },
    );

    let config = ControllerConfig {
        system_namespace: SYSTEM_NS.to_string(),
        // reconciliations in these tests are back-to-back; always render
        policy_cache_ttl: std::time::Duration::from_millis(0),
        ..Default::default()
    };
    let definitions: Arc<dyn DefinitionStore> = store.clone();
    let reconciler = Reconciler::new(
        config,
        Arc::new(JsonTemplateEvaluator::new()),
        definitions,
        router,
        writer.clone(),
    );

    World { reconciler, cluster, store, writer }
}

fn app() -> Application {
    let mut app = Application::new(
        "demo",
        serde_json::from_value(json!({
            "components": [{"name": "web", "type": "webservice", "properties": {"image": "nginx:1.25"}}]
        }))
        .unwrap(),
    );
    app.metadata.namespace = Some("default".to_string());
    app.metadata.uid = Some("uid-demo".to_string());
    app
}

fn workload_ident() -> ResourceIdent {
    ResourceIdent {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        namespace: "default".to_string(),
        name: "web".to_string(),
    }
}

async fn set_workload_ready(cluster: &InMemoryCluster, ready: bool) {
    let mut live = cluster.get(&workload_ident()).await.unwrap().unwrap();
    live["status"] = json!({"ready": ready});
    cluster.put_raw(workload_ident(), live);
}

/// Re-observe: the user's spec with the controller's last written status
fn observed(world: &World, base: &Application) -> Application {
    let mut app = base.clone();
    app.status = world
        .writer
        .last("default", "demo")
        .and_then(|written| written.status);
    app
}

async fn reconcile(world: &World, app: &Application) {
    world
        .reconciler
        .reconcile(app, CancellationToken::new())
        .await
        .unwrap();
}

fn last_status(world: &World) -> katachi_api::ApplicationStatus {
    world
        .writer
        .last("default", "demo")
        .and_then(|app| app.status)
        .expect("status written")
}

#[tokio::test]
async fn unhealthy_workload_keeps_the_workflow_running() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;

    let status = last_status(&world);
    assert_eq!(status.phase, ApplicationPhase::Running);
    let workflow = status.workflow.as_ref().unwrap();
    assert!(!workflow.finished);
    assert_eq!(status.services.len(), 1);
    assert!(!status.services[0].healthy);
    assert_eq!(status.latest_revision.as_ref().unwrap().name, "demo-v1");
    // the workload itself was applied
    assert!(world.cluster.get(&workload_ident()).await.unwrap().is_some());
}

#[tokio::test]
async fn healthy_workload_finishes_and_stays_steady() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;
    set_workload_ready(&world.cluster, true).await;

    let second = observed(&world, &app);
    reconcile(&world, &second).await;
    let status = last_status(&world);
    assert_eq!(status.phase, ApplicationPhase::Succeeded);
    assert!(status.workflow.as_ref().unwrap().finished);
    assert!(status.services[0].healthy);
    assert!(!status.applied_resources.is_empty());

    // steady state: another reconciliation reports the same services and
    // resources
    let third = observed(&world, &app);
    reconcile(&world, &third).await;
    let after = last_status(&world);
    assert_eq!(after.phase, ApplicationPhase::Succeeded);
    assert_eq!(after.services, status.services);
    assert_eq!(after.applied_resources, status.applied_resources);
    // the probe's no-op path did not clobber the live status
    let live = world.cluster.get(&workload_ident()).await.unwrap().unwrap();
    assert_eq!(live["status"]["ready"], json!(true));
}

#[tokio::test]
async fn past_restart_annotation_resets_the_workflow() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;
    set_workload_ready(&world.cluster, true).await;
    let second = observed(&world, &app);
    reconcile(&world, &second).await;
    assert_eq!(last_status(&world).phase, ApplicationPhase::Succeeded);

    // the workload regresses, and a past restart timestamp arrives
    set_workload_ready(&world.cluster, false).await;
    let mut restarted = observed(&world, &app);
    restarted
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            ANNOTATION_WORKFLOW_RESTART.to_string(),
            (Utc::now() - Duration::hours(1)).to_rfc3339(),
        );
    reconcile(&world, &restarted).await;

    let status = last_status(&world);
    // reset happened on the same reconciliation: the workflow is running
    // again and the schedule field is cleared
    assert!(status.workflow_restart_scheduled_at.is_none());
    let workflow = status.workflow.as_ref().unwrap();
    assert!(!workflow.finished);
    assert_eq!(status.phase, ApplicationPhase::Running);
    assert!(!status.services[0].healthy);
}

#[tokio::test]
async fn future_restart_annotation_only_schedules() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;
    set_workload_ready(&world.cluster, true).await;
    let second = observed(&world, &app);
    reconcile(&world, &second).await;

    let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let mut scheduled = observed(&world, &app);
    scheduled
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_WORKFLOW_RESTART.to_string(), future.clone());
    reconcile(&world, &scheduled).await;

    let status = last_status(&world);
    assert_eq!(
        status.workflow_restart_scheduled_at.as_deref(),
        Some(future.as_str())
    );
    assert!(status.workflow.as_ref().unwrap().finished);
    assert_eq!(status.phase, ApplicationPhase::Succeeded);

    // the field persists until the time is reached
    let mut again = observed(&world, &app);
    again
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_WORKFLOW_RESTART.to_string(), future.clone());
    reconcile(&world, &again).await;
    let after = last_status(&world);
    assert_eq!(
        after.workflow_restart_scheduled_at.as_deref(),
        Some(future.as_str())
    );
    assert!(after.workflow.as_ref().unwrap().finished);
}

#[tokio::test]
async fn global_policy_lands_in_status_and_labels() {
    let world = world();
    world.store.insert_policy(
        SYSTEM_NS,
        PolicyDefinition {
            metadata: ObjectMeta {
                name: Some("owner".to_string()),
                namespace: Some(SYSTEM_NS.to_string()),
                ..Default::default()
            },
            spec: PolicyDefinitionSpec {
                global: true,
                priority: 1,
                schematic: Schematic::from_template(
                    r#"{"output": {"labels": {"owner": "team-x"}}}"#,
                ),
                ..Default::default()
            },
        },
    );

    let app = app();
    reconcile(&world, &app).await;
    let status = last_status(&world);
    assert_eq!(status.applied_application_policies.len(), 1);
    let applied = &status.applied_application_policies[0];
    assert_eq!(applied.name, "owner");
    assert!(applied.enabled);
    assert_eq!(applied.added_labels, vec!["owner"]);
    assert!(!applied.spec_modified);
    assert_eq!(
        status.application_policies_config_map.as_deref(),
        Some("application-policies-default-demo")
    );
    // the durable cache blob exists and is owned by the application
    let blob = world
        .cluster
        .get(&ResourceIdent {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            namespace: "default".to_string(),
            name: "application-policies-default-demo".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob["metadata"]["ownerReferences"][0]["name"], json!("demo"));
}

#[tokio::test]
async fn spec_change_creates_a_revision_and_resets_services() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;
    set_workload_ready(&world.cluster, true).await;
    let second = observed(&world, &app);
    reconcile(&world, &second).await;
    assert_eq!(last_status(&world).latest_revision.as_ref().unwrap().revision, 1);

    let mut changed = observed(&world, &app);
    changed.spec.components[0].properties = Some(json!({"image": "nginx:1.26"}));
    reconcile(&world, &changed).await;
    let status = last_status(&world);
    assert_eq!(status.latest_revision.as_ref().unwrap().revision, 2);
    assert_eq!(status.latest_revision.as_ref().unwrap().name, "demo-v2");
    // the workflow restarted for the new revision
    assert_eq!(
        status.workflow.as_ref().unwrap().app_revision.as_deref(),
        Some("demo-v2")
    );
}

#[tokio::test]
async fn definition_change_creates_a_revision_with_unchanged_spec() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;
    set_workload_ready(&world.cluster, true).await;
    let second = observed(&world, &app);
    reconcile(&world, &second).await;
    assert_eq!(last_status(&world).latest_revision.as_ref().unwrap().revision, 1);

    // the definition template moves; the Application spec does not
    world.store.insert_component(
        SYSTEM_NS,
        ComponentDefinition {
            metadata: ObjectMeta {
                name: Some("webservice".to_string()),
                namespace: Some(SYSTEM_NS.to_string()),
                ..Default::default()
            },
            spec: ComponentDefinitionSpec {
                schematic: Schematic::from_template(
                    r#"{"output": {"apiVersion": "apps/v1", "kind": "Deployment", "spec": {"image": "$(parameter.image)"}}}"#,
                ),
                health_policy: Some(r#"{"isHealth": "$(context.output.status.ready)"}"#.to_string()),
                custom_status: Some(r#"{"message": "serving"}"#.to_string()),
                ..Default::default()
            },
        },
    );

    let third = observed(&world, &app);
    reconcile(&world, &third).await;
    let status = last_status(&world);
    assert_eq!(status.latest_revision.as_ref().unwrap().revision, 2);
    assert_eq!(
        status.workflow.as_ref().unwrap().app_revision.as_deref(),
        Some("demo-v2")
    );
}

#[tokio::test]
async fn deletion_cascades_to_owned_resources() {
    let world = world();
    let app = app();
    reconcile(&world, &app).await;
    assert!(world.cluster.get(&workload_ident()).await.unwrap().is_some());

    let mut deleted = observed(&world, &app);
    deleted.metadata.deletion_timestamp =
        Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()));
    reconcile(&world, &deleted).await;

    assert!(world.cluster.get(&workload_ident()).await.unwrap().is_none());
    // the revision snapshot went with it
    let revision_ident = ResourceIdent {
        api_version: "core.oam.dev/v1beta1".to_string(),
        kind: "ApplicationRevision".to_string(),
        namespace: "default".to_string(),
        name: "demo-v1".to_string(),
    };
    assert!(world.cluster.get(&revision_ident).await.unwrap().is_none());
}
