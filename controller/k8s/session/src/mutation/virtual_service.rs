use super::{variant_failed, Cause, Error, Mutator};
use ike_controller_core::{
    model::{PROP_HOSTS, PROP_ROUTE, VARIANT_SUFFIX},
    LocatedResource, Ref, ResourceAction, ResourceStatus, Route, SessionContext,
};
use ike_controller_k8s_api::{
    istio::{HttpMatchRequest, HttpRoute, HttpRouteDestination, VirtualService, VirtualServiceSpec},
    ObjectStore,
};

pub const KIND: &str = "VirtualService";

/// Routes the session's traffic to the variant subset through the virtual
/// service of the ref's host.
#[derive(Clone, Debug, Default)]
pub struct VirtualServiceMutator(());

/// Prepends an HTTP route that sends requests matching `route` to the session
/// variant of `target`.
///
/// The first route that is not itself a session route serves as a template:
/// its destinations are cloned onto variant subsets and its remaining settings
/// are copied verbatim. Returns false when the session route already exists.
pub fn add_route(
    vs: &mut VirtualServiceSpec,
    target: &LocatedResource,
    route: &Route,
) -> Result<bool, Cause> {
    let matcher = session_match(route)?;
    if vs
        .http
        .iter()
        .any(|http| is_variant_route(http) && http.matches.contains(&matcher))
    {
        return Ok(false);
    }

    let template = vs
        .http
        .iter()
        .find(|http| !is_variant_route(http))
        .ok_or(Cause::NoTemplateRoute)?;

    let mut destinations = Vec::<HttpRouteDestination>::with_capacity(template.route.len());
    for dst in &template.route {
        let mut dst = dst.clone();
        let subset = if is_target_host(&dst.destination.host, target) {
            Some(target.new_version())
        } else {
            dst.destination
                .subset
                .as_ref()
                .map(|s| format!("{s}{VARIANT_SUFFIX}"))
        };
        dst.destination.subset = subset;

        // Weighted destinations that collapse onto the same variant subset
        // are merged so that weights still add up.
        match destinations
            .iter_mut()
            .find(|d| d.destination == dst.destination)
        {
            Some(existing) => {
                existing.weight = match (existing.weight, dst.weight) {
                    (Some(a), Some(b)) => Some(a.saturating_add(b)),
                    _ => None,
                };
            }
            None => destinations.push(dst),
        }
    }
    if let [only] = destinations.as_mut_slice() {
        only.weight = None;
    }

    let variant = HttpRoute {
        name: None,
        matches: vec![matcher],
        route: destinations,
        redirect: template.redirect.clone(),
        rewrite: template.rewrite.clone(),
        timeout: template.timeout.clone(),
        retries: template.retries.clone(),
        fault: template.fault.clone(),
        mirror: template.mirror.clone(),
        cors_policy: template.cors_policy.clone(),
        headers: template.headers.clone(),
        websocket_upgrade: template.websocket_upgrade,
        other: Default::default(),
    };
    vs.http.insert(0, variant);
    Ok(true)
}

/// Removes the session route matching `route`. Returns false when there is
/// none.
pub fn remove_route(vs: &mut VirtualServiceSpec, route: &Route) -> bool {
    let Ok(matcher) = session_match(route) else {
        return false;
    };
    match vs
        .http
        .iter()
        .position(|http| is_variant_route(http) && http.matches.contains(&matcher))
    {
        Some(i) => {
            vs.http.remove(i);
            true
        }
        None => false,
    }
}

/// Returns true when any route sends traffic to `subset`.
pub fn routes_to_subset(vs: &VirtualServiceSpec, subset: &str) -> bool {
    vs.http
        .iter()
        .flat_map(|http| http.route.iter())
        .any(|d| d.destination.subset.as_deref() == Some(subset))
}

fn session_match(route: &Route) -> Result<HttpMatchRequest, Cause> {
    if !route.is_header() {
        return Err(Cause::UnsupportedRoute(route.kind.clone()));
    }
    Ok(HttpMatchRequest::exact_header(&route.name, &route.value))
}

fn is_variant_route(http: &HttpRoute) -> bool {
    http.route
        .first()
        .and_then(|d| d.destination.subset.as_deref())
        .is_some_and(|s| s.contains(VARIANT_SUFFIX))
}

// Destination hosts may be short names or fully qualified.
fn is_target_host(host: &str, target: &LocatedResource) -> bool {
    let name = target.host_name();
    host == name
        || host
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with('.'))
}

// === impl VirtualServiceMutator ===

impl VirtualServiceMutator {
    pub fn new() -> Self {
        Self(())
    }
}

#[async_trait::async_trait]
impl<S: ObjectStore> Mutator<S> for VirtualServiceMutator {
    fn kind(&self) -> &str {
        KIND
    }

    async fn mutate(&self, store: &S, session: &SessionContext, r: &mut Ref) -> Result<(), Error> {
        let Some(target) = r.target.clone() else {
            return Ok(());
        };
        if r.has_live(KIND) {
            return Ok(());
        }
        if variant_failed(r, &target) {
            tracing::debug!(ref_name = %r.name, "Variant unavailable; not routing");
            return Ok(());
        }

        let name = target.host_name().to_string();
        let mut vs = store
            .get::<VirtualService>(&r.namespace, &name)
            .await
            .map_err(|e| Error::store(KIND, &name, e))?;

        let added = add_route(&mut vs.spec, &target, &session.route)
            .map_err(|cause| Error::new(KIND, &name, cause))?;
        let action = if added {
            store
                .update(&r.namespace, &vs)
                .await
                .map_err(|e| Error::store(KIND, &name, e))?;
            tracing::info!(ref_name = %r.name, %name, route = %session.route, "Added session route");
            ResourceAction::Modified
        } else {
            ResourceAction::Located
        };

        let mut status = ResourceStatus::new(KIND, &name, action)
            .with_prop(PROP_ROUTE, session.route.to_string());
        if vs.spec.is_exposed() {
            status = status.with_prop(PROP_HOSTS, vs.spec.hosts.join(","));
        }
        r.clear_failures(KIND);
        r.clear_conditions(KIND);
        r.add_resource_status(status);
        Ok(())
    }

    async fn revert(&self, store: &S, session: &SessionContext, r: &mut Ref) -> Result<(), Error> {
        let statuses = r.resource_statuses(KIND).cloned().collect::<Vec<_>>();
        for status in statuses {
            if status.action != ResourceAction::Failed {
                // Remove the route that was applied, even if the session's
                // route has changed since.
                let route = status
                    .prop
                    .get(PROP_ROUTE)
                    .and_then(|route| Route::parse(route).ok().flatten())
                    .unwrap_or_else(|| session.route.clone());
                remove(store, &r.namespace, &status.name, &route).await?;
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
    route: &Route,
) -> Result<(), Error> {
    let mut vs = match store.get::<VirtualService>(namespace, name).await {
        Ok(vs) => vs,
        Err(error) if error.is_not_found() => return Ok(()),
        Err(error) => return Err(Error::store(KIND, name, error)),
    };
    if remove_route(&mut vs.spec, route) {
        store
            .update(namespace, &vs)
            .await
            .map_err(|e| Error::store(KIND, name, e))?;
        tracing::info!(%name, %route, "Removed session route");
    }
    Ok(())
}
