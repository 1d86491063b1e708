//! Pre-pass behavior against in-memory fakes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use katachi_api::{Application, PolicyDefinition, PolicyDefinitionSpec, Schematic};
use katachi_core::{DefinitionResolver, InMemoryDefinitionStore, ReconcileContext};
use katachi_keeper::InMemoryCluster;
use katachi_policy::{
    DurablePolicyCache, PolicyError, PolicyPrePass, PolicyResultCache,
};
use katachi_template::{FnEvaluator, TemplateValue};
use kube::core::ObjectMeta;

const SYSTEM_NS: &str = "katachi-system";

fn policy_def(name: &str, global: bool, priority: i32, template: &str) -> PolicyDefinition {
    PolicyDefinition {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(SYSTEM_NS.to_string()),
            ..Default::default()
        },
        spec: PolicyDefinitionSpec {
            global,
            priority,
            schematic: Schematic::from_template(template),
            ..Default::default()
        },
    }
}

fn app(policies: Value) -> Application {
    let mut app = Application::new(
        "demo",
        serde_json::from_value(json!({
            "components": [{"name": "web", "type": "webservice"}],
            "policies": policies
        }))
        .unwrap(),
    );
    app.metadata.namespace = Some("default".to_string());
    app
}

fn harness(
    evaluator: FnEvaluator,
    local_ttl: Duration,
) -> (PolicyPrePass, Arc<InMemoryDefinitionStore>, Arc<InMemoryCluster>) {
    let store = Arc::new(InMemoryDefinitionStore::new());
    let cluster = Arc::new(InMemoryCluster::new());
    let prepass = PolicyPrePass::new(
        Arc::new(evaluator),
        Arc::new(PolicyResultCache::new(local_ttl)),
        DurablePolicyCache::new(cluster.clone()),
    );
    (prepass, store, cluster)
}

fn resolver(store: &Arc<InMemoryDefinitionStore>) -> DefinitionResolver {
    DefinitionResolver::new(store.clone(), "default", SYSTEM_NS)
}

fn ctx() -> ReconcileContext {
    ReconcileContext::new("default", "demo")
        .with_revision("demo-v1", "rev-hash")
        .with_system_namespace(SYSTEM_NS)
}

#[tokio::test]
async fn local_cache_hit_skips_the_evaluator() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_eval = calls.clone();
    let evaluator = FnEvaluator::new(move |_, _| {
        calls_in_eval.fetch_add(1, Ordering::SeqCst);
        Ok(TemplateValue::new(json!({
            "output": {"labels": {"owner": "team-x"}},
            "config": {"refresh": {"labels": {"mode": "never"}}}
        })))
    });
    let (prepass, store, cluster) = harness(evaluator, Duration::from_secs(60));
    store.insert_policy(SYSTEM_NS, policy_def("owner", true, 0, "owner-template"));
    let resolver = resolver(&store);
    let durable = DurablePolicyCache::new(cluster.clone());

    let mut app1 = app(json!([]));
    let mut ctx1 = ctx();
    let outcome1 = prepass
        .run(&mut app1, &resolver, &mut ctx1, None)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome1.applied.len(), 1);
    assert!(outcome1.applied[0].enabled);
    assert_eq!(outcome1.applied[0].added_labels, vec!["owner"]);

    let records1 = durable.load("default", "demo").await.unwrap();
    let rendered_at = records1.get("owner").unwrap().cached(katachi_policy::OutputKind::Labels).unwrap().rendered_at;

    // unchanged spec: served from the process-local tier, no re-render
    let mut app2 = app(json!([]));
    let mut ctx2 = ctx();
    let outcome2 = prepass
        .run(&mut app2, &resolver, &mut ctx2, None)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcome2.applied[0].enabled);
    assert_eq!(
        app2.metadata.labels.as_ref().unwrap().get("owner").map(String::as_str),
        Some("team-x")
    );

    let records2 = durable.load("default", "demo").await.unwrap();
    let rendered_at2 = records2.get("owner").unwrap().cached(katachi_policy::OutputKind::Labels).unwrap().rendered_at;
    assert_eq!(rendered_at, rendered_at2);
}

#[tokio::test]
async fn never_mode_keeps_cached_slice_across_renders() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_in_eval = counter.clone();
    let evaluator = FnEvaluator::new(move |_, _| {
        let n = counter_in_eval.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TemplateValue::new(json!({
            "output": {"ctx": {"n": n}},
            "config": {"refresh": {"ctx": {"mode": "never"}}}
        })))
    });
    // zero-TTL local tier: every reconciliation renders
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_millis(0));
    store.insert_policy(SYSTEM_NS, policy_def("counter", true, 0, "counter-template"));
    let resolver = resolver(&store);

    let mut app1 = app(json!([]));
    let mut ctx1 = ctx();
    prepass.run(&mut app1, &resolver, &mut ctx1, None).await.unwrap();
    assert_eq!(ctx1.policy_context().get("n"), Some(&json!(1)));

    // second render: the evaluator runs again but the ctx slice is cached
    let mut app2 = app(json!([]));
    let mut ctx2 = ctx();
    prepass.run(&mut app2, &resolver, &mut ctx2, None).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(ctx2.policy_context().get("n"), Some(&json!(1)));
}

#[tokio::test]
async fn upstream_spec_change_cascades_into_downstream_cache() {
    let flip = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(AtomicUsize::new(0));
    let flip_in_eval = flip.clone();
    let counter_in_eval = counter.clone();
    let evaluator = FnEvaluator::new(move |source, _| match source {
        "p1-template" => {
            let component = if flip_in_eval.load(Ordering::SeqCst) { "b" } else { "a" };
            Ok(TemplateValue::new(json!({
                "output": {"components": [{"name": component, "type": "worker"}]}
            })))
        }
        _ => {
            let n = counter_in_eval.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TemplateValue::new(json!({
                "output": {"ctx": {"n": n}},
                "config": {"refresh": {"ctx": {"mode": "never"}}}
            })))
        }
    });
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_millis(0));
    store.insert_policy(SYSTEM_NS, policy_def("p1", true, 10, "p1-template"));
    store.insert_policy(SYSTEM_NS, policy_def("p2", true, 0, "p2-template"));
    let resolver = resolver(&store);

    let mut app1 = app(json!([]));
    let mut ctx1 = ctx();
    prepass.run(&mut app1, &resolver, &mut ctx1, None).await.unwrap();
    assert_eq!(ctx1.policy_context().get("n"), Some(&json!(1)));

    // stable upstream: p2's ctx slice stays cached
    let mut app2 = app(json!([]));
    let mut ctx2 = ctx();
    prepass.run(&mut app2, &resolver, &mut ctx2, None).await.unwrap();
    assert_eq!(ctx2.policy_context().get("n"), Some(&json!(1)));

    // p1's spec-affecting output changes: p2's cascade id moves, cache falls
    flip.store(true, Ordering::SeqCst);
    let mut app3 = app(json!([]));
    let mut ctx3 = ctx();
    prepass.run(&mut app3, &resolver, &mut ctx3, None).await.unwrap();
    assert_ne!(ctx3.policy_context().get("n"), Some(&json!(1)));
    assert_eq!(app3.spec.components[0].name, "b");
}

#[tokio::test]
async fn metadata_only_upstream_change_does_not_cascade() {
    let flip = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(AtomicUsize::new(0));
    let flip_in_eval = flip.clone();
    let counter_in_eval = counter.clone();
    let evaluator = FnEvaluator::new(move |source, _| match source {
        "p1-template" => {
            let label = if flip_in_eval.load(Ordering::SeqCst) { "after" } else { "before" };
            Ok(TemplateValue::new(json!({
                "output": {"labels": {"phase": label}}
            })))
        }
        _ => {
            let n = counter_in_eval.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TemplateValue::new(json!({
                "output": {"ctx": {"n": n}},
                "config": {"refresh": {"ctx": {"mode": "never"}}}
            })))
        }
    });
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_millis(0));
    store.insert_policy(SYSTEM_NS, policy_def("p1", true, 10, "p1-template"));
    store.insert_policy(SYSTEM_NS, policy_def("p2", true, 0, "p2-template"));
    let resolver = resolver(&store);

    let mut app1 = app(json!([]));
    let mut ctx1 = ctx();
    prepass.run(&mut app1, &resolver, &mut ctx1, None).await.unwrap();

    flip.store(true, Ordering::SeqCst);
    let mut app2 = app(json!([]));
    let mut ctx2 = ctx();
    prepass.run(&mut app2, &resolver, &mut ctx2, None).await.unwrap();
    // labels changed upstream, but p2's ctx slice survived
    assert_eq!(ctx2.policy_context().get("n"), Some(&json!(1)));
    assert_eq!(
        app2.metadata.labels.as_ref().unwrap().get("phase").map(String::as_str),
        Some("after")
    );
}

#[tokio::test]
async fn disabled_policy_is_skipped_without_mutation() {
    let evaluator = FnEvaluator::new(|_, _| {
        Ok(TemplateValue::new(json!({
            "enabled": false,
            "output": {"labels": {"should": "never-land"}}
        })))
    });
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_secs(60));
    store.insert_policy(SYSTEM_NS, policy_def("toggle", true, 0, "toggle-template"));
    let resolver = resolver(&store);

    let mut application = app(json!([]));
    let mut rctx = ctx();
    let outcome = prepass
        .run(&mut application, &resolver, &mut rctx, None)
        .await
        .unwrap();

    assert_eq!(outcome.applied.len(), 1);
    assert!(!outcome.applied[0].enabled);
    assert_eq!(outcome.applied[0].skip_reason.as_deref(), Some("enabled=false"));
    assert!(application.metadata.labels.is_none());
}

#[tokio::test]
async fn user_declared_global_policy_is_rejected() {
    let evaluator = FnEvaluator::new(|_, _| Ok(TemplateValue::new(json!({"output": {}}))));
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_secs(60));
    store.insert_policy(SYSTEM_NS, policy_def("sneaky", true, 0, "t"));
    let resolver = resolver(&store);

    let mut application = app(json!([{"name": "mine", "type": "sneaky"}]));
    let mut rctx = ctx();
    let err = prepass
        .run(&mut application, &resolver, &mut rctx, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PolicyError::InvalidPolicy(name) if name == "mine"));
}

#[tokio::test]
async fn global_render_error_is_skipped_user_render_error_is_fatal() {
    let evaluator = FnEvaluator::new(|source, _| match source {
        "broken-template" => Err(katachi_template::TemplateError::Compile("boom".to_string())),
        _ => Ok(TemplateValue::new(json!({"output": {}}))),
    });
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_millis(0));
    store.insert_policy(SYSTEM_NS, policy_def("broken", true, 0, "broken-template"));
    store.insert_policy(SYSTEM_NS, policy_def("fine", false, 0, "fine-template"));
    let resolver = resolver(&store);

    let mut application = app(json!([{"name": "ok", "type": "fine"}]));
    let mut rctx = ctx();
    let outcome = prepass
        .run(&mut application, &resolver, &mut rctx, None)
        .await
        .unwrap();
    assert_eq!(outcome.applied.len(), 2);
    assert!(!outcome.applied[0].enabled);
    assert!(outcome.applied[0]
        .skip_reason
        .as_deref()
        .unwrap()
        .contains("render error"));
    assert!(outcome.applied[1].enabled);

    // the same failure on a user-declared policy aborts the pre-pass
    let evaluator = FnEvaluator::new(|_, _| {
        Err(katachi_template::TemplateError::Compile("boom".to_string()))
    });
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_millis(0));
    store.insert_policy(SYSTEM_NS, policy_def("fine", false, 0, "fine-template"));
    let resolver2 = DefinitionResolver::new(store.clone(), "default", SYSTEM_NS);
    let mut application = app(json!([{"name": "mine", "type": "fine"}]));
    let mut rctx = ctx();
    let err = prepass
        .run(&mut application, &resolver2, &mut rctx, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PolicyError::Render { name, .. } if name == "mine"));
}

#[tokio::test]
async fn output_absent_is_an_error_naming_it() {
    let evaluator = FnEvaluator::new(|_, _| Ok(TemplateValue::new(json!({"enabled": true}))));
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_millis(0));
    store.insert_policy(SYSTEM_NS, policy_def("fine", false, 0, "t"));
    let resolver = resolver(&store);

    let mut application = app(json!([{"name": "mine", "type": "fine"}]));
    let mut rctx = ctx();
    let err = prepass
        .run(&mut application, &resolver, &mut rctx, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("policy must specify 'output' field"));
}

#[tokio::test]
async fn skip_global_annotation_opts_out() {
    let evaluator = FnEvaluator::new(|_, _| {
        Ok(TemplateValue::new(json!({"output": {"labels": {"g": "1"}}})))
    });
    let (prepass, store, _cluster) = harness(evaluator, Duration::from_secs(60));
    store.insert_policy(SYSTEM_NS, policy_def("global-one", true, 0, "t"));
    let resolver = resolver(&store);

    let mut application = app(json!([]));
    application
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            katachi_api::ANNOTATION_SKIP_GLOBAL_POLICIES.to_string(),
            "true".to_string(),
        );
    let mut rctx = ctx();
    let outcome = prepass
        .run(&mut application, &resolver, &mut rctx, None)
        .await
        .unwrap();
    assert!(outcome.applied.is_empty());
    assert!(application.metadata.labels.is_none());
}
