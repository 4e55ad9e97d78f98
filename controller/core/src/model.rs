use crate::route::Route;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Appended to versions and workload names to mark the session variant.
pub const VARIANT_SUFFIX: &str = "-test";

pub const VERSION_LABEL: &str = "version";
pub const APP_LABEL: &str = "app";

/// The version assumed for a target that carries no `version` label.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Ledger key under which resources record externally reachable hosts.
pub const PROP_HOSTS: &str = "hosts";

/// Ledger key under which routing resources record the route they apply.
pub const PROP_ROUTE: &str = "route";

/// The session a ref is processed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub name: String,
    pub namespace: String,
    /// The effective route: the declared one, or the session default.
    pub route: Route,
}

/// The transient, in-memory form of a session ref.
///
/// Rebuilt from the session status at the start of every operation and
/// projected back once the operation completes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub namespace: String,
    pub strategy: String,
    pub args: BTreeMap<String, String>,
    pub target: Option<LocatedResource>,
    pub resources: Vec<ResourceStatus>,
    pub conditions: Vec<Condition>,
}

/// The workload a ref resolved to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocatedResource {
    pub kind: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// A ledger entry: what was done to which cluster object on a ref's behalf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceStatus {
    pub kind: String,
    pub name: String,
    pub action: ResourceAction,
    pub prop: BTreeMap<String, String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Created,
    Modified,
    Failed,
    Located,
}

/// Explains why a resource could not be brought to the desired state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub kind: String,
    pub name: String,
    pub reason: String,
    pub message: String,
}

// === impl Ref ===

impl Ref {
    pub fn new(
        name: impl ToString,
        namespace: impl ToString,
        strategy: impl ToString,
        args: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            strategy: strategy.to_string(),
            args,
            ..Self::default()
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Returns true when the declared strategy or arguments differ from the
    /// ones this ref was processed with.
    pub fn is_updated(&self, strategy: &str, args: &BTreeMap<String, String>) -> bool {
        self.strategy != strategy || self.args != *args
    }

    /// Records a ledger entry, replacing any entry for the same object.
    pub fn add_resource_status(&mut self, status: ResourceStatus) {
        match self
            .resources
            .iter_mut()
            .find(|s| s.kind == status.kind && s.name == status.name)
        {
            Some(existing) => *existing = status,
            None => self.resources.push(status),
        }
    }

    pub fn remove_resource_status(&mut self, kind: &str, name: &str) {
        self.resources.retain(|s| !(s.kind == kind && s.name == name));
    }

    pub fn resource_statuses<'r>(
        &'r self,
        kind: &'r str,
    ) -> impl Iterator<Item = &'r ResourceStatus> + 'r {
        self.resources.iter().filter(move |s| s.kind == kind)
    }

    /// Returns true when the ledger holds an entry of `kind` that is not a
    /// failure, i.e. when that kind needs no further work.
    pub fn has_live(&self, kind: &str) -> bool {
        self.resource_statuses(kind)
            .any(|s| s.action != ResourceAction::Failed)
    }

    pub fn clear_failures(&mut self, kind: &str) {
        self.resources
            .retain(|s| !(s.kind == kind && s.action == ResourceAction::Failed));
    }

    pub fn has_failures(&self) -> bool {
        self.resources
            .iter()
            .any(|s| s.action == ResourceAction::Failed)
    }

    /// Records a condition, replacing any condition for the same object.
    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions
            .retain(|c| !(c.kind == condition.kind && c.name == condition.name));
        self.conditions.push(condition);
    }

    pub fn clear_conditions(&mut self, kind: &str) {
        self.conditions.retain(|c| c.kind != kind);
    }

    /// Returns true when a ledger entry was applied for a route other than
    /// `route`.
    pub fn is_rerouted(&self, route: &Route) -> bool {
        let route = route.to_string();
        self.resources
            .iter()
            .filter_map(|s| s.prop.get(PROP_ROUTE))
            .any(|applied| *applied != route)
    }
}

// === impl LocatedResource ===

impl LocatedResource {
    pub fn new(kind: impl ToString, name: impl ToString, labels: BTreeMap<String, String>) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            labels,
        }
    }

    pub fn version(&self) -> &str {
        self.labels
            .get(VERSION_LABEL)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_VERSION)
    }

    /// The version label carried by the session variant of this workload.
    pub fn new_version(&self) -> String {
        format!("{}{}", self.version(), VARIANT_SUFFIX)
    }

    /// The name of the session variant of this workload.
    pub fn variant_name(&self) -> String {
        format!("{}{}", self.name, VARIANT_SUFFIX)
    }

    /// The service host the workload is reached through: its `app` label, or
    /// the name up to the first `-`.
    pub fn host_name(&self) -> &str {
        match self.labels.get(APP_LABEL) {
            Some(app) => app,
            None => self.name.split('-').next().unwrap_or(&self.name),
        }
    }
}

// === impl ResourceStatus ===

impl ResourceStatus {
    pub fn new(kind: impl ToString, name: impl ToString, action: ResourceAction) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            action,
            prop: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.prop.insert(key.to_string(), value.to_string());
        self
    }
}

// === impl ResourceAction ===

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Modified => f.write_str("modified"),
            Self::Failed => f.write_str("failed"),
            Self::Located => f.write_str("located"),
        }
    }
}
