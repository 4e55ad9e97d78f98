//! Projection between the session status and the in-memory ref model.

use ike_controller_core::{
    self as core, model::PROP_HOSTS, Condition, LocatedResource, Ref, ResourceStatus,
};
use ike_controller_k8s_api::session::{
    self, ConditionSource, RefResource, RefStatus, SessionState, SessionStatus, TargetResource,
};

const CONDITION_TYPE: &str = "Ready";
const CONDITION_FALSE: &str = "False";

/// Rebuilds the ref recorded by `status`.
pub fn to_ref(namespace: &str, status: &RefStatus) -> Ref {
    let mut r = Ref::new(
        &status.name,
        namespace,
        &status.strategy,
        status.args.clone(),
    );
    r.target = status
        .target
        .as_ref()
        .map(|t| LocatedResource::new(&t.kind, &t.name, t.labels.clone()));
    r.resources = status
        .resources
        .iter()
        .map(|res| ResourceStatus {
            kind: res.kind.clone(),
            name: res.name.clone(),
            action: res.action.into(),
            prop: res.prop.clone(),
        })
        .collect();
    r.conditions = status
        .conditions
        .iter()
        .map(|c| Condition {
            kind: c.source.kind.clone(),
            name: c.source.name.clone(),
            reason: c.reason.clone(),
            message: c.message.clone(),
        })
        .collect();
    r
}

/// Records `r` in `status`: its entry is replaced, removed when it has
/// neither ledger entries nor conditions, or appended when it is new.
pub fn project(status: &mut SessionStatus, r: &Ref) {
    let position = status.refs.iter().position(|s| s.name == r.name);

    if r.resources.is_empty() && r.conditions.is_empty() {
        if let Some(i) = position {
            status.refs.remove(i);
        }
        return;
    }

    let previous = position.map(|i| &status.refs[i]);
    let ref_status = to_status(r, previous);
    match position {
        Some(i) => status.refs[i] = ref_status,
        None => status.refs.push(ref_status),
    }
}

/// Sets the session-wide fields derived from the refs.
pub fn summarize(status: &mut SessionStatus, route: &core::Route, state: SessionState) {
    let mut hosts = Vec::<String>::new();
    let recorded = status
        .refs
        .iter()
        .flat_map(|r| r.resources.iter())
        .filter_map(|res| res.prop.get(PROP_HOSTS))
        .flat_map(|h| h.split(','))
        .filter(|h| !h.is_empty());
    for host in recorded {
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }

    status.state = Some(state);
    status.route = Some(route.clone().into());
    status.route_expression = Some(route.to_string());
    status.hosts = hosts;
}

fn to_status(r: &Ref, previous: Option<&RefStatus>) -> RefStatus {
    RefStatus {
        name: r.name.clone(),
        strategy: r.strategy.clone(),
        args: r.args.clone(),
        target: r.target.as_ref().map(|t| TargetResource {
            kind: t.kind.clone(),
            name: t.name.clone(),
            action: session::ResourceAction::Located,
            labels: t.labels.clone(),
        }),
        resources: r
            .resources
            .iter()
            .map(|res| RefResource {
                kind: res.kind.clone(),
                name: res.name.clone(),
                action: res.action.into(),
                prop: res.prop.clone(),
            })
            .collect(),
        conditions: r
            .conditions
            .iter()
            .map(|c| to_condition(c, previous))
            .collect(),
    }
}

// An unchanged condition keeps its transition time so that repeated passes
// over a failing ref produce an identical status.
fn to_condition(c: &Condition, previous: Option<&RefStatus>) -> session::Condition {
    let source = ConditionSource {
        kind: c.kind.clone(),
        name: c.name.clone(),
    };
    let last_transition_time = previous
        .into_iter()
        .flat_map(|p| p.conditions.iter())
        .find(|p| p.source == source && p.reason == c.reason && p.message == c.message)
        .and_then(|p| p.last_transition_time.clone())
        .unwrap_or_else(now);

    session::Condition {
        source,
        kind: CONDITION_TYPE.to_string(),
        status: CONDITION_FALSE.to_string(),
        reason: c.reason.clone(),
        message: c.message.clone(),
        last_transition_time: Some(last_transition_time),
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
