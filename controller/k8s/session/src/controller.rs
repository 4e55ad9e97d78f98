use crate::reconcile::{ReconcileError, Reconciler};
use futures::prelude::*;
use ike_controller_k8s_api::{session::Session, Api, Client, ObjectStore, ResourceExt};
use kube::runtime::{controller::Action, watcher, Controller};
use std::{sync::Arc, time::Duration};

struct Context<S> {
    reconciler: Reconciler<S>,
    error_backoff: Duration,
}

/// Watches sessions in all namespaces and reconciles each change until the
/// runtime begins to drain.
pub async fn run<S: ObjectStore>(
    client: Client,
    reconciler: Reconciler<S>,
    error_backoff: Duration,
    drain: drain::Watch,
) {
    let ctx = Arc::new(Context {
        reconciler,
        error_backoff,
    });

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let controller = Controller::new(Api::<Session>::all(client), watcher::Config::default())
        .graceful_shutdown_on(close_rx.map(|_| {}))
        .run(reconcile::<S>, error_policy::<S>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => {
                    tracing::trace!(namespace = ?obj.namespace, name = %obj.name, "Reconciled")
                }
                Err(error) => tracing::warn!(%error, "Reconcile failed"),
            }
        });
    tokio::pin!(controller);

    tracing::info!("Session controller running");
    tokio::select! {
        _ = (&mut controller) => {}
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(controller).await;
        }
    }
    tracing::info!("Session controller stopped");
}

async fn reconcile<S: ObjectStore>(
    session: Arc<Session>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcileError> {
    let Some(namespace) = session.namespace() else {
        return Ok(Action::await_change());
    };
    ctx.reconciler
        .reconcile(&namespace, &session.name_any())
        .await
}

fn error_policy<S>(session: Arc<Session>, error: &ReconcileError, ctx: Arc<Context<S>>) -> Action {
    tracing::error!(
        namespace = ?session.namespace(),
        name = %session.name_any(),
        %error,
        "Failed to reconcile session",
    );
    Action::requeue(ctx.error_backoff)
}
