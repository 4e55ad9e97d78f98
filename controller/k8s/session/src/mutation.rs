//! Mutators bring the cluster objects a ref depends on to the session's
//! desired state, and revert them again.
//!
//! Each mutator owns the ledger entries of one resource kind. `mutate` is a
//! no-op when the ledger already holds a live entry of that kind, so passes
//! may be repeated freely. `revert` consumes every entry of the kind.

use ike_controller_core::{LocatedResource, Ref, ResourceAction, SessionContext};
use ike_controller_k8s_api::StoreError;

pub mod destination_rule;
pub mod virtual_service;
mod workload;

pub use self::{
    destination_rule::DestinationRuleMutator, virtual_service::VirtualServiceMutator,
    workload::WorkloadMutator,
};

#[async_trait::async_trait]
pub trait Mutator<S>: Send + Sync {
    /// The kind of the ledger entries this mutator owns.
    fn kind(&self) -> &str;

    async fn mutate(&self, store: &S, session: &SessionContext, r: &mut Ref) -> Result<(), Error>;

    async fn revert(&self, store: &S, session: &SessionContext, r: &mut Ref) -> Result<(), Error>;
}

/// A mutation or revert that failed for one object.
#[derive(Debug, thiserror::Error)]
#[error("{kind} {name}: {cause}")]
pub struct Error {
    pub kind: String,
    pub name: String,
    #[source]
    pub cause: Cause,
}

#[derive(Debug, thiserror::Error)]
pub enum Cause {
    #[error("not found")]
    NotFound,

    #[error("missing argument {0:?}")]
    MissingArgument(&'static str),

    #[error("unknown strategy {0:?}")]
    UnknownStrategy(String),

    #[error("unsupported route type {0:?}")]
    UnsupportedRoute(String),

    #[error("no HTTP route to use as a template")]
    NoTemplateRoute,

    #[error("pod template has no containers")]
    NoContainer,

    #[error("variant is prepared differently for session {0:?}")]
    VariantInUse(String),

    #[error(transparent)]
    Store(StoreError),
}

// === impl Error ===

impl Error {
    pub fn new(kind: impl ToString, name: impl ToString, cause: Cause) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            cause,
        }
    }

    pub(crate) fn store(kind: impl ToString, name: impl ToString, error: StoreError) -> Self {
        let cause = if error.is_not_found() {
            Cause::NotFound
        } else {
            Cause::Store(error)
        };
        Self::new(kind, name, cause)
    }
}

/// Returns true when the ref failed to prepare its variant of `target`.
/// Routing is withheld until the variant exists.
pub(crate) fn variant_failed(r: &Ref, target: &LocatedResource) -> bool {
    r.resource_statuses(&target.kind).any(|s| s.action == ResourceAction::Failed)
}
