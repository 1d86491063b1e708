//! Kubernetes controller wiring
//!
//! Watches Applications and hands each event to the reconciler. The
//! runtime guarantees one worker per object at a time; deduplication is
//! the work queue's. A process-wide cancellation token, fired by ctrl-c
//! or SIGTERM, is the outer cancel signal every reconciliation propagates
//! through its suspension points; each reconciliation additionally runs
//! under the configured deadline.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use katachi_api::Application;
use katachi_core::DefinitionStore;
use katachi_keeper::{ClusterRouter, KubeCluster, LOCAL_CLUSTER};
use katachi_template::TemplateEvaluator;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kube_stores::{KubeDefinitionStore, KubeStatusWriter};
use crate::reconciler::{ReconcileOutcome, Reconciler};

struct Context {
    reconciler: Reconciler,
    shutdown: CancellationToken,
    reconcile_timeout: Duration,
}

async fn reconcile(app: Arc<Application>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    // child of the process shutdown token, cancelled early if the
    // per-reconcile deadline elapses first
    let cancellation = ctx.shutdown.child_token();
    let deadline = {
        let token = cancellation.clone();
        let timeout = ctx.reconcile_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        })
    };
    let outcome = ctx.reconciler.reconcile(&app, cancellation).await;
    deadline.abort();

    Ok(match outcome? {
        ReconcileOutcome::Requeue(after) => Action::requeue(after),
        ReconcileOutcome::Done => Action::await_change(),
    })
}

fn error_policy(_app: Arc<Application>, error: &ControllerError, _ctx: Arc<Context>) -> Action {
    error!(error = %error, "reconciliation failed");
    Action::requeue(Duration::from_secs(30))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Run the Application controller until the watch stream ends or a
/// shutdown signal arrives
pub async fn run(
    client: kube::Client,
    config: ControllerConfig,
    evaluator: Arc<dyn TemplateEvaluator>,
) -> Result<(), ControllerError> {
    info!("starting application controller");

    let router = Arc::new(ClusterRouter::new());
    router.register(LOCAL_CLUSTER, Arc::new(KubeCluster::new(client.clone())));
    let definitions: Arc<dyn DefinitionStore> = Arc::new(KubeDefinitionStore::new(client.clone()));
    let status_writer = Arc::new(KubeStatusWriter::new(
        client.clone(),
        config.field_manager.clone(),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received, cancelling in-flight reconciliations");
            shutdown.cancel();
        });
    }

    let reconcile_timeout = config.reconcile_timeout;
    let context = Arc::new(Context {
        reconciler: Reconciler::new(config, evaluator, definitions, router, status_writer),
        shutdown,
        reconcile_timeout,
    });

    let applications: Api<Application> = Api::all(client);
    Controller::new(applications, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object.name, "reconciled"),
                Err(e) => error!(error = %e, "reconcile stream error"),
            }
        })
        .await;

    Ok(())
}
