use super::{destination_rule, Cause, Error, Mutator};
use crate::workload::Workload;
use ike_controller_core::{
    model::{VARIANT_SUFFIX, VERSION_LABEL},
    strategy, LocatedResource, Ref, ResourceAction, ResourceStatus, SessionContext,
};
use ike_controller_k8s_api::{
    istio::DestinationRule, session::SESSION_LABEL, ObjectMeta, ObjectStore, ResourceExt,
};
use std::marker::PhantomData;

/// Records on a variant the strategy and arguments it was prepared with.
pub const PREPARED_ANNOTATION: &str = "maistra.io/prepared";

/// Clones the ref's target workload of kind `W` into the session variant
/// that the routing mutators send session traffic to.
pub struct WorkloadMutator<W>(PhantomData<fn() -> W>);

// === impl WorkloadMutator ===

impl<W> WorkloadMutator<W> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<W> Default for WorkloadMutator<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<S, W> Mutator<S> for WorkloadMutator<W>
where
    S: ObjectStore,
    W: Workload,
{
    fn kind(&self) -> &str {
        W::KIND_NAME
    }

    async fn mutate(&self, store: &S, session: &SessionContext, r: &mut Ref) -> Result<(), Error> {
        let kind = W::KIND_NAME;
        let Some(target) = r.target.clone().filter(|t| t.kind == kind) else {
            return Ok(());
        };
        if r.has_live(kind) {
            return Ok(());
        }

        let variant_name = target.variant_name();
        let (image, proxy) = match r.strategy.as_str() {
            strategy::EXISTING => {
                // The developer drives the target itself; record it so that
                // clients find the workload to attach to.
                r.clear_failures(kind);
                r.clear_conditions(kind);
                r.add_resource_status(ResourceStatus::new(
                    kind,
                    &target.name,
                    ResourceAction::Located,
                ));
                return Ok(());
            }
            strategy::PREPARED_IMAGE => {
                let image = r.arg(strategy::ARG_IMAGE).ok_or_else(|| {
                    Error::new(
                        kind,
                        &variant_name,
                        Cause::MissingArgument(strategy::ARG_IMAGE),
                    )
                })?;
                (image.to_string(), false)
            }
            strategy::TELEPRESENCE => {
                let version = r
                    .arg(strategy::ARG_VERSION)
                    .unwrap_or(strategy::DEFAULT_TELEPRESENCE_VERSION);
                (format!("{}:{version}", strategy::TELEPRESENCE_IMAGE), true)
            }
            other => {
                return Err(Error::new(
                    kind,
                    &variant_name,
                    Cause::UnknownStrategy(other.to_string()),
                ))
            }
        };

        let original = store
            .get::<W>(&r.namespace, &target.name)
            .await
            .map_err(|e| Error::store(kind, &target.name, e))?;
        let prepared = prepared(r);
        let mut variant = variant_of(&original, session, &target, &image, proxy)
            .map_err(|cause| Error::new(kind, &variant_name, cause))?;
        variant
            .meta_mut()
            .annotations
            .get_or_insert_with(Default::default)
            .insert(PREPARED_ANNOTATION.to_string(), prepared.clone());

        let action = match store.create(&r.namespace, &variant).await {
            Ok(_) => ResourceAction::Created,
            Err(error) if error.is_already_exists() => {
                // Sessions share a variant only when they prepare it the same
                // way. A variant is never rewritten under another session.
                let existing = store
                    .get::<W>(&r.namespace, &variant_name)
                    .await
                    .map_err(|e| Error::store(kind, &variant_name, e))?;
                if existing.annotations().get(PREPARED_ANNOTATION) != Some(&prepared) {
                    let owner = existing
                        .labels()
                        .get(SESSION_LABEL)
                        .cloned()
                        .unwrap_or_default();
                    return Err(Error::new(
                        kind,
                        &variant_name,
                        Cause::VariantInUse(owner),
                    ));
                }
                ResourceAction::Located
            }
            Err(error) => return Err(Error::store(kind, &variant_name, error)),
        };
        tracing::info!(ref_name = %r.name, %kind, name = %variant_name, %image, %action, "Cloned workload");

        r.clear_failures(kind);
        r.clear_conditions(kind);
        r.add_resource_status(ResourceStatus::new(kind, variant_name, action));
        Ok(())
    }

    async fn revert(&self, store: &S, _: &SessionContext, r: &mut Ref) -> Result<(), Error> {
        let kind = W::KIND_NAME;
        let statuses = r.resource_statuses(kind).cloned().collect::<Vec<_>>();
        for status in statuses {
            // Variants this session created or shares are deleted once no
            // session routes to them; the target itself never is.
            let is_variant = status.name.ends_with(VARIANT_SUFFIX)
                && r.target.as_ref().map_or(true, |t| t.name != status.name);
            if status.action != ResourceAction::Failed
                && is_variant
                && !still_routed(store, &r.namespace, r.target.as_ref()).await?
            {
                match store.delete::<W>(&r.namespace, &status.name).await {
                    Ok(()) => tracing::info!(%kind, name = %status.name, "Deleted workload"),
                    Err(error) if error.is_not_found() => {}
                    Err(error) => return Err(Error::store(kind, &status.name, error)),
                }
            }
            r.remove_resource_status(kind, &status.name);
        }
        r.clear_conditions(kind);
        Ok(())
    }
}

// Strategy and arguments, in a stable order.
fn prepared(r: &Ref) -> String {
    let mut prepared = r.strategy.clone();
    for (key, value) in &r.args {
        prepared.push_str(&format!(";{key}={value}"));
    }
    prepared
}

/// Builds the session variant of `original`: renamed, labeled with the
/// variant version and the session, scaled to one replica and running
/// `image` in its first container.
fn variant_of<W: Workload>(
    original: &W,
    session: &SessionContext,
    target: &LocatedResource,
    image: &str,
    proxy: bool,
) -> Result<W, Cause> {
    let version = target.new_version();
    let mut variant = original.clone();

    let meta = variant.meta_mut();
    let mut labels = meta.labels.clone().unwrap_or_default();
    labels.insert(VERSION_LABEL.to_string(), version.clone());
    labels.insert(SESSION_LABEL.to_string(), session.name.clone());
    *meta = ObjectMeta {
        name: Some(target.variant_name()),
        namespace: meta.namespace.clone(),
        labels: Some(labels),
        ..ObjectMeta::default()
    };

    variant.clear_status();
    variant.set_replicas(1);
    variant.set_selector_label(VERSION_LABEL, &version);

    let template = variant.template_mut();
    let labels = template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(Default::default);
    labels.insert(VERSION_LABEL.to_string(), version);
    labels.insert(SESSION_LABEL.to_string(), session.name.clone());

    let container = template
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
        .ok_or(Cause::NoContainer)?;
    container.image = Some(image.to_string());
    if proxy {
        // The proxy does not serve the application's probes.
        container.liveness_probe = None;
        container.readiness_probe = None;
        container.startup_probe = None;
    }

    Ok(variant)
}

// A variant shared with another session stays while its subset is routed.
async fn still_routed<S: ObjectStore>(
    store: &S,
    namespace: &str,
    target: Option<&LocatedResource>,
) -> Result<bool, Error> {
    let Some(target) = target else {
        return Ok(false);
    };
    let host = target.host_name();
    match store.get::<DestinationRule>(namespace, host).await {
        Ok(rule) => {
            let subset = target.new_version();
            Ok(rule.spec.subsets.iter().any(|s| s.name == subset))
        }
        Err(error) if error.is_not_found() => Ok(false),
        Err(error) => Err(Error::store(destination_rule::KIND, host, error)),
    }
}
