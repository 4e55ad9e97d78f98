use crate::workload::Workload;
use ike_controller_core::{LocatedResource, Ref};
use ike_controller_k8s_api::{ObjectStore, ResourceExt};
use std::marker::PhantomData;

/// Resolves a ref's name to the workload it stands for.
#[async_trait::async_trait]
pub trait Locator<S>: Send + Sync {
    /// Sets `r.target` and returns true when the ref names a workload this
    /// locator knows about.
    async fn try_locate(&self, store: &S, r: &mut Ref) -> bool;
}

/// Locates refs naming a workload of kind `W` in the ref's namespace.
pub struct WorkloadLocator<W>(PhantomData<fn() -> W>);

/// Tries each locator in order until one resolves the ref.
pub(crate) async fn locate<S>(locators: &[Box<dyn Locator<S>>], store: &S, r: &mut Ref) -> bool {
    for locator in locators {
        if locator.try_locate(store, r).await {
            return true;
        }
    }
    false
}

// === impl WorkloadLocator ===

impl<W> WorkloadLocator<W> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<W> Default for WorkloadLocator<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<S, W> Locator<S> for WorkloadLocator<W>
where
    S: ObjectStore,
    W: Workload,
{
    async fn try_locate(&self, store: &S, r: &mut Ref) -> bool {
        let kind = W::KIND_NAME;
        match store.get::<W>(&r.namespace, &r.name).await {
            Ok(workload) => {
                tracing::debug!(%kind, name = %r.name, "Located workload");
                r.target = Some(LocatedResource::new(
                    kind,
                    workload.name_any(),
                    workload.template_labels(),
                ));
                true
            }
            Err(error) if error.is_not_found() => false,
            Err(error) => {
                tracing::warn!(%kind, name = %r.name, %error, "Failed to look up workload");
                false
            }
        }
    }
}
