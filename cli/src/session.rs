//! The client side of the session lifecycle.
//!
//! A developer creates a session, or joins an existing one, by declaring a
//! ref on it. The controller prepares the ref's workload variant and reports
//! it in the session status, which [`create_or_join`] waits for. [`leave`]
//! withdraws the ref again.

use ike_controller_core::{naming, route::Route, strategy, ParseRouteError};
use ike_controller_k8s_api::{
    session::{RefSpec, RefStatus, ResourceAction, Session, SessionSpec, SessionState},
    ObjectStore, StoreError,
};
use std::{collections::BTreeMap, time::Duration};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Read-modify-write cycles give up after this many optimistic-concurrency
/// conflicts.
const MAX_ATTEMPTS: usize = 5;

const WORKLOAD_KINDS: [&str; 2] = ["Deployment", "DeploymentConfig"];

#[derive(Clone, Debug)]
pub struct Options {
    pub namespace: String,
    /// Generated from the local user name when absent.
    pub session_name: Option<String>,
    pub deployment_name: String,
    pub strategy: String,
    pub args: BTreeMap<String, String>,
    /// A `type:name=value` route expression.
    pub route: Option<String>,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

/// What the controller prepared for a ref.
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    /// The workload to drive traffic to.
    pub deployment_name: String,
    pub ref_status: RefStatus,
    pub route: Route,
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Joined {
    pub session_name: String,
    pub state: State,
    /// The ref this join replaced, to be restored by [`leave`].
    pub previous: Option<RefSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidName(#[from] naming::InvalidName),

    #[error(transparent)]
    InvalidRoute(#[from] ParseRouteError),

    #[error("no Deployment or DeploymentConfig found for {ref_name} in session {session}")]
    DeploymentNotFound { session: String, ref_name: String },

    #[error("session {0} kept changing concurrently")]
    Contended(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// === impl Options ===

impl Options {
    pub fn new(
        namespace: impl ToString,
        deployment_name: impl ToString,
        strategy: impl ToString,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            session_name: None,
            deployment_name: deployment_name.to_string(),
            strategy: strategy.to_string(),
            args: BTreeMap::new(),
            route: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Options for running `image` in place of the deployment.
    pub fn prepared_image(
        namespace: impl ToString,
        deployment_name: impl ToString,
        image: impl ToString,
    ) -> Self {
        let mut options = Self::new(namespace, deployment_name, strategy::PREPARED_IMAGE);
        options
            .args
            .insert(strategy::ARG_IMAGE.to_string(), image.to_string());
        options
    }

    fn ref_spec(&self) -> RefSpec {
        RefSpec::new(&self.deployment_name, &self.strategy, self.args.clone())
    }
}

/// Declares the ref described by `options` on its session, creating the
/// session when it does not exist, and waits until the controller has
/// prepared it.
///
/// When the ref does not become ready within the poll timeout, or `cancel`
/// fires first, the ref is withdrawn again before
/// [`Error::DeploymentNotFound`] is returned.
pub async fn create_or_join<S: ObjectStore>(
    store: &S,
    options: &Options,
    cancel: &CancellationToken,
) -> Result<Joined, Error> {
    let session_name = match &options.session_name {
        Some(name) => {
            naming::validate(name)?;
            name.clone()
        }
        None => naming::generate(current_user().as_deref()),
    };
    let route = Route::parse(options.route.as_deref().unwrap_or_default())?;
    let ref_spec = options.ref_spec();

    let previous = join(store, &options.namespace, &session_name, &ref_spec, route).await?;

    let ready = wait_for_ref(store, options, &session_name, &ref_spec, cancel).await;
    match ready {
        Some(state) => {
            tracing::info!(session = %session_name, deployment = %state.deployment_name, "Ref ready");
            Ok(Joined {
                session_name,
                state,
                previous,
            })
        }
        None => {
            tracing::warn!(session = %session_name, ref_name = %ref_spec.name, "Ref not ready; leaving");
            if let Err(error) = leave(
                store,
                &options.namespace,
                &session_name,
                &ref_spec.name,
                true,
                previous.as_ref(),
            )
            .await
            {
                tracing::warn!(session = %session_name, %error, "Failed to leave session");
            }
            Err(Error::DeploymentNotFound {
                session: session_name,
                ref_name: ref_spec.name,
            })
        }
    }
}

/// Withdraws `ref_name` from the session: the `previous` ref is restored when
/// `revert` is set, otherwise the ref is removed. A session left without refs
/// is deleted. A session that cannot be read is assumed to be gone already.
pub async fn leave<S: ObjectStore>(
    store: &S,
    namespace: &str,
    session_name: &str,
    ref_name: &str,
    revert: bool,
    previous: Option<&RefSpec>,
) -> Result<(), Error> {
    for _ in 0..MAX_ATTEMPTS {
        let mut session = match store.get::<Session>(namespace, session_name).await {
            Ok(session) => session,
            Err(error) => {
                tracing::debug!(session = %session_name, %error, "Nothing to leave");
                return Ok(());
            }
        };

        let Some(i) = session.spec.refs.iter().position(|r| r.name == ref_name) else {
            tracing::debug!(session = %session_name, %ref_name, "Ref not in session");
            return Ok(());
        };
        match previous.filter(|_| revert) {
            Some(previous) => session.spec.refs[i] = previous.clone(),
            None => {
                session.spec.refs.remove(i);
            }
        }

        let result = if session.spec.refs.is_empty() {
            store.delete::<Session>(namespace, session_name).await
        } else {
            store.update(namespace, &session).await.map(drop)
        };
        match result {
            Ok(()) => {
                tracing::info!(session = %session_name, %ref_name, revert, "Left session");
                return Ok(());
            }
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) if error.is_conflict() => {
                tracing::debug!(session = %session_name, "Session changed; retrying");
            }
            Err(error) => return Err(error.into()),
        }
    }
    Err(Error::Contended(session_name.to_string()))
}

/// Adds or replaces the ref on the session, creating the session when
/// needed. Returns the replaced ref.
async fn join<S: ObjectStore>(
    store: &S,
    namespace: &str,
    session_name: &str,
    ref_spec: &RefSpec,
    route: Option<Route>,
) -> Result<Option<RefSpec>, Error> {
    for _ in 0..MAX_ATTEMPTS {
        let mut session = match store.get::<Session>(namespace, session_name).await {
            Ok(session) => session,
            Err(error) if error.is_not_found() => {
                let session = Session::new(
                    session_name,
                    SessionSpec {
                        refs: vec![ref_spec.clone()],
                        route: route.clone().map(Into::into),
                    },
                );
                match store.create(namespace, &session).await {
                    Ok(_) => {
                        tracing::info!(session = %session_name, "Created session");
                        return Ok(None);
                    }
                    // Someone else created it first; join theirs.
                    Err(error) if error.is_already_exists() => continue,
                    Err(error) => return Err(error.into()),
                }
            }
            Err(error) => return Err(error.into()),
        };

        let previous = match session.spec.refs.iter_mut().find(|r| r.name == ref_spec.name) {
            Some(existing) => Some(std::mem::replace(existing, ref_spec.clone())),
            None => {
                session.spec.refs.push(ref_spec.clone());
                None
            }
        };
        match store.update(namespace, &session).await {
            Ok(_) => {
                tracing::info!(session = %session_name, ref_name = %ref_spec.name, replaced = previous.is_some(), "Joined session");
                return Ok(previous);
            }
            Err(error) if error.is_conflict() => {
                tracing::debug!(session = %session_name, "Session changed; retrying");
            }
            Err(error) => return Err(error.into()),
        }
    }
    Err(Error::Contended(session_name.to_string()))
}

async fn wait_for_ref<S: ObjectStore>(
    store: &S,
    options: &Options,
    session_name: &str,
    ref_spec: &RefSpec,
    cancel: &CancellationToken,
) -> Option<State> {
    let poll = async {
        loop {
            match store.get::<Session>(&options.namespace, session_name).await {
                Ok(session) => {
                    if let Some(state) = ready_state(&session, ref_spec) {
                        return state;
                    }
                }
                Err(error) => tracing::debug!(session = %session_name, %error, "Failed to read session"),
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    };

    tokio::select! {
        res = tokio::time::timeout(options.poll_timeout, poll) => res.ok(),
        _ = cancel.cancelled() => {
            tracing::debug!(session = %session_name, "Cancelled");
            None
        }
    }
}

/// Returns the prepared state once the session has converged on `ref_spec`
/// and recorded a workload for it.
fn ready_state(session: &Session, ref_spec: &RefSpec) -> Option<State> {
    let status = session.status.as_ref()?;
    if status.state != Some(SessionState::Success) {
        return None;
    }
    let ref_status = status.refs.iter().find(|r| {
        r.name == ref_spec.name && r.strategy == ref_spec.strategy && r.args == ref_spec.args
    })?;
    let workload = ref_status.resources.iter().find(|res| {
        WORKLOAD_KINDS.contains(&res.kind.as_str()) && res.action != ResourceAction::Failed
    })?;

    Some(State {
        deployment_name: workload.name.clone(),
        ref_status: ref_status.clone(),
        route: status
            .route
            .clone()
            .map(Into::into)
            .unwrap_or_else(|| session.effective_route()),
        hosts: status.hosts.clone(),
    })
}

fn current_user() -> Option<String> {
    whoami::fallible::username().ok()
}
