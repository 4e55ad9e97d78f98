use ike_controller_core as core;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Held by every session between its first mutation and its last revert.
pub const FINALIZER: &str = "finalizers.istio.workspace.session";

/// Set on workloads created on a session's behalf.
pub const SESSION_LABEL: &str = "maistra.io/session";

/// A shared routing context that redirects a slice of traffic to developer
/// controlled variants of one or more workloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "maistra.io",
    version = "v1alpha1",
    kind = "Session",
    status = "SessionStatus",
    shortname = "sess",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    #[serde(default)]
    pub refs: Vec<RefSpec>,

    /// Selects the traffic sent to the session's variants. Defaults to the
    /// `x-workspace-route` header carrying the session name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
}

/// A workload taking part in a session, and how its variant is produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefSpec {
    pub name: String,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub struct Route {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub value: String,
}

// Status fields are always serialized so that a merge patch clears what is no
// longer reported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    #[serde(default)]
    pub state: Option<SessionState>,
    #[serde(default)]
    pub route: Option<Route>,
    #[serde(default)]
    pub route_expression: Option<String>,
    #[serde(default)]
    pub refs: Vec<RefStatus>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum SessionState {
    Processing,
    Success,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefStatus {
    pub name: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub target: Option<TargetResource>,
    #[serde(default)]
    pub resources: Vec<RefResource>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The workload a ref was located as.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    pub kind: String,
    pub name: String,
    pub action: ResourceAction,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefResource {
    pub kind: String,
    pub name: String,
    pub action: ResourceAction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prop: BTreeMap<String, String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Created,
    Modified,
    Failed,
    #[default]
    Located,
}

/// Reports a resource that could not be brought to, or back from, the
/// session's desired state.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub source: ConditionSource,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ConditionSource {
    pub kind: String,
    pub name: String,
}

// === impl Session ===

impl Session {
    /// The route the session's traffic is selected by.
    pub fn effective_route(&self) -> core::Route {
        match &self.spec.route {
            Some(route) => route.clone().into(),
            None => core::Route::session_default(&self.name_any()),
        }
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn ref_spec(&self, name: &str) -> Option<&RefSpec> {
        self.spec.refs.iter().find(|r| r.name == name)
    }

    pub fn ref_status(&self, name: &str) -> Option<&RefStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.refs.iter().find(|r| r.name == name))
    }

    pub fn is_success(&self) -> bool {
        self.status.as_ref().and_then(|s| s.state) == Some(SessionState::Success)
    }
}

// === impl RefSpec ===

impl RefSpec {
    pub fn new(name: impl ToString, strategy: impl ToString, args: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            strategy: strategy.to_string(),
            args,
        }
    }
}

// === impl Route ===

impl From<core::Route> for Route {
    fn from(core::Route { kind, name, value }: core::Route) -> Self {
        Self { kind, name, value }
    }
}

impl From<Route> for core::Route {
    fn from(Route { kind, name, value }: Route) -> Self {
        Self { kind, name, value }
    }
}

// === impl ResourceAction ===

impl From<core::ResourceAction> for ResourceAction {
    fn from(action: core::ResourceAction) -> Self {
        match action {
            core::ResourceAction::Created => Self::Created,
            core::ResourceAction::Modified => Self::Modified,
            core::ResourceAction::Failed => Self::Failed,
            core::ResourceAction::Located => Self::Located,
        }
    }
}

impl From<ResourceAction> for core::ResourceAction {
    fn from(action: ResourceAction) -> Self {
        match action {
            ResourceAction::Created => Self::Created,
            ResourceAction::Modified => Self::Modified,
            ResourceAction::Failed => Self::Failed,
            ResourceAction::Located => Self::Located,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => f.write_str("Processing"),
            Self::Success => f.write_str("Success"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}
