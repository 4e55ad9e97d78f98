use crate::{
    convert,
    locate::{self, Locator, WorkloadLocator},
    metrics::ReconcileMetrics,
    mutation::{DestinationRuleMutator, Mutator, VirtualServiceMutator, WorkloadMutator},
};
use ike_controller_core::{Condition, Ref, ResourceAction, ResourceStatus, SessionContext};
use ike_controller_k8s_api::{
    openshift::DeploymentConfig,
    session::{Session, SessionState, SessionStatus, FINALIZER},
    Deployment, ObjectStore, ResourceExt, StoreError,
};
use kube::runtime::controller::Action;
use std::time::Duration;

/// How long a session with failing refs waits before it is retried.
const FAILED_REQUEUE: Duration = Duration::from_secs(10);

/// How long a deleted session waits before its remaining refs are reverted
/// again.
const DELETING_REQUEUE: Duration = Duration::from_secs(1);

/// Condition kind for refs that no locator resolves.
const REF_KIND: &str = "Ref";

/// The ordered locator chain and mutator list applied to each ref.
///
/// Mutators run in order and revert in reverse order, so routing is removed
/// before the objects it routes to.
pub struct Manipulators<S> {
    pub locators: Vec<Box<dyn Locator<S>>>,
    pub mutators: Vec<Box<dyn Mutator<S>>>,
}

/// Converges a session's status with its spec.
pub struct Reconciler<S> {
    store: S,
    manipulators: Manipulators<S>,
    metrics: ReconcileMetrics,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to read session: {0}")]
    Read(#[source] StoreError),

    #[error("failed to update session finalizers: {0}")]
    Finalizer(#[source] StoreError),

    #[error("failed to write session status: {0}")]
    Status(#[source] StoreError),
}

// === impl Manipulators ===

impl<S: ObjectStore> Manipulators<S> {
    /// Locates Deployments, then DeploymentConfigs; clones the workload, then
    /// adds the subset and the session route.
    pub fn standard() -> Self {
        Self {
            locators: vec![
                Box::new(WorkloadLocator::<Deployment>::new()),
                Box::new(WorkloadLocator::<DeploymentConfig>::new()),
            ],
            mutators: vec![
                Box::new(WorkloadMutator::<Deployment>::new()),
                Box::new(WorkloadMutator::<DeploymentConfig>::new()),
                Box::new(DestinationRuleMutator::new()),
                Box::new(VirtualServiceMutator::new()),
            ],
        }
    }
}

// === impl Reconciler ===

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: S, manipulators: Manipulators<S>, metrics: ReconcileMetrics) -> Self {
        Self {
            store,
            manipulators,
            metrics,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ReconcileError> {
        let result = self.reconcile_session(namespace, name).await;
        self.metrics
            .reconciled(if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn reconcile_session(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Action, ReconcileError> {
        let mut session = match self.store.get::<Session>(namespace, name).await {
            Ok(session) => session,
            Err(error) if error.is_not_found() => {
                tracing::debug!("Session not found");
                return Ok(Action::await_change());
            }
            Err(error) => return Err(ReconcileError::Read(error)),
        };

        let ctx = SessionContext {
            name: name.to_string(),
            namespace: namespace.to_string(),
            route: session.effective_route(),
        };

        if session.is_deleted() {
            return self.finalize(session, &ctx).await;
        }

        if !session.has_finalizer() {
            session.finalizers_mut().push(FINALIZER.to_string());
            session = self
                .store
                .update(namespace, &session)
                .await
                .map_err(ReconcileError::Finalizer)?;
            tracing::debug!("Added finalizer");
        }

        self.converge(session, &ctx).await
    }

    async fn converge(
        &self,
        mut session: Session,
        ctx: &SessionContext,
    ) -> Result<Action, ReconcileError> {
        let mut status = session.status.clone().unwrap_or_default();

        let orphans = status
            .refs
            .iter()
            .filter(|r| session.ref_spec(&r.name).is_none())
            .map(|r| r.name.clone())
            .collect::<Vec<_>>();
        let changed = !orphans.is_empty()
            || session.spec.refs.iter().any(|spec| {
                session.ref_status(&spec.name).map_or(true, |s| {
                    s.strategy != spec.strategy
                        || s.args != spec.args
                        || convert::to_ref(&ctx.namespace, s).is_rerouted(&ctx.route)
                })
            });

        // Announce the pass before touching the cluster when the spec moved.
        // Retries of failing refs do not, so they settle without writes.
        if changed {
            let mut processing = status.clone();
            convert::summarize(&mut processing, &ctx.route, SessionState::Processing);
            session = self.write_status(session, processing).await?;
        }

        let mut failed = false;

        for name in orphans {
            let Some(entry) = session.ref_status(&name) else {
                continue;
            };
            let mut r = convert::to_ref(&ctx.namespace, entry);
            tracing::info!(ref_name = %r.name, "Reverting removed ref");
            failed |= !self.revert(ctx, &mut r).await;
            convert::project(&mut status, &r);
        }

        for spec in &session.spec.refs {
            let previous = session
                .ref_status(&spec.name)
                .map(|s| convert::to_ref(&ctx.namespace, s));

            let mut r = match previous {
                Some(r)
                    if !r.is_updated(&spec.strategy, &spec.args)
                        && !r.is_rerouted(&ctx.route) =>
                {
                    if r.target.is_some() && !r.has_failures() && r.conditions.is_empty() {
                        continue;
                    }
                    r
                }
                Some(mut stale) => {
                    tracing::info!(
                        ref_name = %stale.name,
                        strategy = %spec.strategy,
                        route = %ctx.route,
                        "Ref changed"
                    );
                    if !self.revert(ctx, &mut stale).await {
                        failed = true;
                        convert::project(&mut status, &stale);
                        continue;
                    }
                    Ref::new(&spec.name, &ctx.namespace, &spec.strategy, spec.args.clone())
                }
                None => Ref::new(&spec.name, &ctx.namespace, &spec.strategy, spec.args.clone()),
            };

            if r.target.is_none() {
                if locate::locate(&self.manipulators.locators, &self.store, &mut r).await {
                    r.clear_conditions(REF_KIND);
                } else {
                    tracing::warn!(ref_name = %r.name, "No workload found for ref");
                    r.add_condition(Condition {
                        kind: REF_KIND.to_string(),
                        name: r.name.clone(),
                        reason: "NotLocated".to_string(),
                        message: format!("no workload named {}", r.name),
                    });
                    failed = true;
                }
            }

            self.mutate(ctx, &mut r).await;
            failed |= r.has_failures();
            convert::project(&mut status, &r);
        }

        let state = if failed {
            SessionState::Failed
        } else {
            SessionState::Success
        };
        convert::summarize(&mut status, &ctx.route, state);
        self.write_status(session, status).await?;

        if failed {
            return Ok(Action::requeue(FAILED_REQUEUE));
        }
        Ok(Action::await_change())
    }

    async fn finalize(
        &self,
        mut session: Session,
        ctx: &SessionContext,
    ) -> Result<Action, ReconcileError> {
        let mut status = session.status.clone().unwrap_or_default();
        let entries = status.refs.clone();
        for entry in &entries {
            let mut r = convert::to_ref(&ctx.namespace, entry);
            self.revert(ctx, &mut r).await;
            convert::project(&mut status, &r);
        }

        if !status.refs.is_empty() {
            convert::summarize(&mut status, &ctx.route, SessionState::Failed);
            self.write_status(session, status).await?;
            return Ok(Action::requeue(DELETING_REQUEUE));
        }

        if session.has_finalizer() {
            session.finalizers_mut().retain(|f| f != FINALIZER);
            match self.store.update(&ctx.namespace, &session).await {
                Ok(_) => tracing::info!("Removed finalizer"),
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(ReconcileError::Finalizer(error)),
            }
        }
        Ok(Action::await_change())
    }

    /// Runs every mutator over the ref. Failures are recorded in the ref's
    /// ledger and conditions; they never stop the remaining mutators.
    async fn mutate(&self, ctx: &SessionContext, r: &mut Ref) {
        for mutator in &self.manipulators.mutators {
            if let Err(error) = mutator.mutate(&self.store, ctx, r).await {
                tracing::warn!(ref_name = %r.name, kind = %error.kind, name = %error.name, %error, "Failed to mutate");
                r.add_resource_status(ResourceStatus::new(
                    &error.kind,
                    &error.name,
                    ResourceAction::Failed,
                ));
                r.add_condition(Condition {
                    kind: error.kind,
                    name: error.name,
                    reason: "MutationFailed".to_string(),
                    message: error.cause.to_string(),
                });
            }
        }
        self.metrics.ref_operation("mutate", !r.has_failures());
    }

    /// Runs every mutator's revert over the ref in reverse order. Returns true
    /// when the ledger was drained completely.
    async fn revert(&self, ctx: &SessionContext, r: &mut Ref) -> bool {
        let mut complete = true;
        for mutator in self.manipulators.mutators.iter().rev() {
            if let Err(error) = mutator.revert(&self.store, ctx, r).await {
                tracing::warn!(ref_name = %r.name, kind = %error.kind, name = %error.name, %error, "Failed to revert");
                r.add_condition(Condition {
                    kind: error.kind,
                    name: error.name,
                    reason: "RevertFailed".to_string(),
                    message: error.cause.to_string(),
                });
                complete = false;
            }
        }

        if complete {
            // Entries of kinds no mutator owns have nothing left to undo.
            r.resources.clear();
            r.conditions.clear();
            r.target = None;
        }
        self.metrics.ref_operation("revert", complete);
        complete
    }

    // Unchanged statuses are not written, so converged sessions produce no
    // further watch events.
    async fn write_status(
        &self,
        mut session: Session,
        status: SessionStatus,
    ) -> Result<Session, ReconcileError> {
        if session.status.as_ref() == Some(&status) {
            return Ok(session);
        }
        session.status = Some(status);
        let namespace = session.namespace().unwrap_or_default();
        self.store
            .update_status(&namespace, &session)
            .await
            .map_err(ReconcileError::Status)
    }
}
