use super::{variant_failed, virtual_service, Error, Mutator};
use ike_controller_core::{
    model::{VARIANT_SUFFIX, VERSION_LABEL},
    LocatedResource, Ref, ResourceAction, ResourceStatus, SessionContext,
};
use ike_controller_k8s_api::{
    istio::{DestinationRule, DestinationRuleSpec, Subset, VirtualService, VirtualServiceSpec},
    ObjectStore,
};

pub const KIND: &str = "DestinationRule";

/// Adds the variant subset to the destination rule of the ref's host.
#[derive(Clone, Debug, Default)]
pub struct DestinationRuleMutator(());

/// Appends the subset selecting `target`'s session variant. Existing subsets
/// are left untouched; returns false when the subset is already present.
pub fn add_subset(rule: &mut DestinationRuleSpec, target: &LocatedResource) -> bool {
    let version = target.new_version();
    if rule.subsets.iter().any(|s| s.name == version) {
        return false;
    }

    rule.subsets.push(Subset {
        name: version.clone(),
        labels: std::iter::once((VERSION_LABEL.to_string(), version)).collect(),
        other: Default::default(),
    });
    true
}

/// Removes the subset named `subset`. Returns false when there is no such
/// subset, which means it was already removed.
pub fn remove_subset(rule: &mut DestinationRuleSpec, subset: &str) -> bool {
    match rule.subsets.iter().position(|s| s.name == subset) {
        Some(i) => {
            rule.subsets.remove(i);
            true
        }
        None => false,
    }
}

/// Names the first variant subset that no route of `vs` sends traffic to.
pub fn unrouted_variant<'r>(
    rule: &'r DestinationRuleSpec,
    vs: Option<&VirtualServiceSpec>,
) -> Option<&'r str> {
    rule.subsets
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| name.contains(VARIANT_SUFFIX))
        .find(|name| !vs.is_some_and(|vs| virtual_service::routes_to_subset(vs, name)))
}

// === impl DestinationRuleMutator ===

impl DestinationRuleMutator {
    pub fn new() -> Self {
        Self(())
    }
}

#[async_trait::async_trait]
impl<S: ObjectStore> Mutator<S> for DestinationRuleMutator {
    fn kind(&self) -> &str {
        KIND
    }

    async fn mutate(&self, store: &S, _: &SessionContext, r: &mut Ref) -> Result<(), Error> {
        let Some(target) = r.target.clone() else {
            return Ok(());
        };
        if r.has_live(KIND) || variant_failed(r, &target) {
            return Ok(());
        }

        let name = target.host_name().to_string();
        let mut rule = store
            .get::<DestinationRule>(&r.namespace, &name)
            .await
            .map_err(|e| Error::store(KIND, &name, e))?;

        let action = if add_subset(&mut rule.spec, &target) {
            store
                .update(&r.namespace, &rule)
                .await
                .map_err(|e| Error::store(KIND, &name, e))?;
            tracing::info!(ref_name = %r.name, %name, subset = %target.new_version(), "Added subset");
            ResourceAction::Modified
        } else {
            ResourceAction::Located
        };

        r.clear_failures(KIND);
        r.clear_conditions(KIND);
        r.add_resource_status(ResourceStatus::new(KIND, name, action));
        Ok(())
    }

    async fn revert(&self, store: &S, _: &SessionContext, r: &mut Ref) -> Result<(), Error> {
        let subset = r.target.as_ref().map(LocatedResource::new_version);

        let statuses = r.resource_statuses(KIND).cloned().collect::<Vec<_>>();
        for status in statuses {
            if status.action != ResourceAction::Failed {
                remove(store, &r.namespace, &status.name, subset.as_deref()).await?;
            }
            r.remove_resource_status(KIND, &status.name);
        }
        r.clear_conditions(KIND);
        Ok(())
    }
}

async fn remove<S: ObjectStore>(
    store: &S,
    namespace: &str,
    name: &str,
    subset: Option<&str>,
) -> Result<(), Error> {
    let vs = match store.get::<VirtualService>(namespace, name).await {
        Ok(vs) => Some(vs.spec),
        Err(error) if error.is_not_found() => None,
        Err(error) => return Err(Error::store(virtual_service::KIND, name, error)),
    };
    let mut rule = match store.get::<DestinationRule>(namespace, name).await {
        Ok(rule) => rule,
        Err(error) if error.is_not_found() => return Ok(()),
        Err(error) => return Err(Error::store(KIND, name, error)),
    };

    // Without a target only an unrouted variant subset can be ours.
    let subset = match subset {
        Some(subset) => subset.to_string(),
        None => match unrouted_variant(&rule.spec, vs.as_ref()) {
            Some(subset) => subset.to_string(),
            None => return Ok(()),
        },
    };
    // Another session may still route to the shared subset.
    if vs
        .as_ref()
        .is_some_and(|vs| virtual_service::routes_to_subset(vs, &subset))
    {
        tracing::debug!(%name, %subset, "Subset still routed");
        return Ok(());
    }

    if remove_subset(&mut rule.spec, &subset) {
        store
            .update(namespace, &rule)
            .await
            .map_err(|e| Error::store(KIND, name, e))?;
        tracing::info!(%name, %subset, "Removed subset");
    }
    Ok(())
}
