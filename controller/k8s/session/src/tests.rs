use crate::{
    mutation::{self, Mutator},
    Manipulators, ReconcileError, ReconcileMetrics, Reconciler,
};
use ike_controller_core::{Ref, ResourceAction, ResourceStatus, Route, SessionContext};
use ike_controller_k8s_api::{
    istio::{DestinationRule, DestinationRuleSpec, VirtualService, VirtualServiceSpec},
    session::{ResourceAction as Action, Session, SessionSpec, SessionState, FINALIZER},
    Container, Deployment, DeploymentSpec, LabelSelector, MemoryStore, Object, ObjectMeta,
    ObjectStore, PodSpec, PodTemplateSpec, ResourceExt, StoreError,
};
use kube::runtime::controller;
use maplit::btreemap;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

pub(crate) const NS: &str = "bookinfo";

pub(crate) fn deployment(name: &str, app: &str, version: &str) -> Deployment {
    let labels = btreemap! {
        "app".to_string() => app.to_string(),
        "version".to_string() => version.to_string(),
    };
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: app.to_string(),
                        image: Some(format!("docker.io/istio/examples-bookinfo-{app}-{version}:1.16")),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn destination_rule(host: &str) -> DestinationRule {
    let spec: DestinationRuleSpec = serde_json::from_value(serde_json::json!({
        "host": host,
        "subsets": [
            { "name": "v1", "labels": { "version": "v1" } },
            { "name": "v2", "labels": { "version": "v2" } },
        ]
    }))
    .unwrap();
    DestinationRule::new(host, spec)
}

fn virtual_service(host: &str) -> VirtualService {
    let spec: VirtualServiceSpec = serde_json::from_value(serde_json::json!({
        "hosts": [host],
        "http": [{
            "route": [{ "destination": { "host": host, "subset": "v1" } }]
        }]
    }))
    .unwrap();
    VirtualService::new(host, spec)
}

async fn bookinfo() -> MemoryStore {
    let store = MemoryStore::new();
    for (name, app) in [("reviews-v1", "reviews"), ("ratings-v1", "ratings")] {
        store.create(NS, &deployment(name, app, "v1")).await.unwrap();
    }
    store.create(NS, &destination_rule("reviews")).await.unwrap();
    store.create(NS, &virtual_service("reviews")).await.unwrap();
    store
}

fn prepared_image(name: &str, image: &str) -> ike_controller_k8s_api::session::RefSpec {
    ike_controller_k8s_api::session::RefSpec::new(
        name,
        "prepared-image",
        btreemap! { "image".to_string() => image.to_string() },
    )
}

async fn create_session(
    store: &MemoryStore,
    name: &str,
    refs: Vec<ike_controller_k8s_api::session::RefSpec>,
) {
    let session = Session::new(name, SessionSpec { refs, route: None });
    store.create(NS, &session).await.unwrap();
}

async fn edit_session(store: &MemoryStore, name: &str, f: impl FnOnce(&mut SessionSpec)) {
    let mut session = store.get::<Session>(NS, name).await.unwrap();
    f(&mut session.spec);
    store.update(NS, &session).await.unwrap();
}

fn reconciler(store: &MemoryStore) -> Reconciler<MemoryStore> {
    Reconciler::new(
        store.clone(),
        Manipulators::standard(),
        ReconcileMetrics::default(),
    )
}

fn ledger(session: &Session, ref_name: &str) -> Vec<(String, String, Action)> {
    session
        .ref_status(ref_name)
        .map(|r| {
            r.resources
                .iter()
                .map(|res| (res.kind.clone(), res.name.clone(), res.action))
                .collect()
        })
        .unwrap_or_default()
}

fn entry(kind: &str, name: &str, action: Action) -> (String, String, Action) {
    (kind.to_string(), name.to_string(), action)
}

async fn subsets(store: &MemoryStore) -> Vec<String> {
    let rule = store.get::<DestinationRule>(NS, "reviews").await.unwrap();
    rule.spec.subsets.into_iter().map(|s| s.name).collect()
}

async fn route_count(store: &MemoryStore) -> usize {
    let vs = store.get::<VirtualService>(NS, "reviews").await.unwrap();
    vs.spec.http.len()
}

fn versions<K: Object>(obj: &K) -> Option<String> {
    obj.resource_version()
}

/// Delegates to a [`MemoryStore`], letting another writer touch an object
/// right before a chosen status write so that the write is stale.
#[derive(Clone)]
struct Interfering {
    inner: MemoryStore,
    skip: Arc<Mutex<Option<usize>>>,
}

impl Interfering {
    fn new(inner: &MemoryStore) -> Self {
        Self {
            inner: inner.clone(),
            skip: Default::default(),
        }
    }

    /// The status write after the next `skip` ones conflicts.
    fn conflict_after(&self, skip: usize) {
        *self.skip.lock() = Some(skip);
    }
}

#[async_trait::async_trait]
impl ObjectStore for Interfering {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.inner.get(namespace, name).await
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        self.inner.create(namespace, obj).await
    }

    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        self.inner.update(namespace, obj).await
    }

    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let interfere = {
            let mut skip = self.skip.lock();
            match *skip {
                Some(0) => {
                    *skip = None;
                    true
                }
                Some(n) => {
                    *skip = Some(n - 1);
                    false
                }
                None => false,
            }
        };
        if interfere {
            let current = self.inner.get::<K>(namespace, &obj.name_any()).await?;
            self.inner.update(namespace, &current).await?;
        }
        self.inner.update_status(namespace, obj).await
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.inner.delete::<K>(namespace, name).await
    }
}

/// Records the strategy of every mutate and revert it sees.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[async_trait::async_trait]
impl<S: Send + Sync> Mutator<S> for Recorder {
    fn kind(&self) -> &str {
        "Recorder"
    }

    async fn mutate(
        &self,
        _: &S,
        _: &SessionContext,
        r: &mut Ref,
    ) -> Result<(), mutation::Error> {
        if r.has_live("Recorder") {
            return Ok(());
        }
        self.0.lock().push(format!("mutate {}", r.strategy));
        r.add_resource_status(ResourceStatus::new(
            "Recorder",
            &r.strategy,
            ResourceAction::Located,
        ));
        Ok(())
    }

    async fn revert(
        &self,
        _: &S,
        _: &SessionContext,
        r: &mut Ref,
    ) -> Result<(), mutation::Error> {
        let names = r
            .resource_statuses("Recorder")
            .map(|s| s.name.clone())
            .collect::<Vec<_>>();
        for name in names {
            self.0.lock().push(format!("revert {name}"));
            r.remove_resource_status("Recorder", &name);
        }
        Ok(())
    }
}

fn recording(store: &MemoryStore) -> (Reconciler<MemoryStore>, Recorder) {
    let recorder = Recorder::default();
    let mut manipulators = Manipulators::standard();
    manipulators.mutators.push(Box::new(recorder.clone()));
    let reconciler = Reconciler::new(store.clone(), manipulators, ReconcileMetrics::default());
    (reconciler, recorder)
}

#[tokio::test]
async fn converges_and_settles() {
    let store = bookinfo().await;
    create_session(
        &store,
        "alice",
        vec![prepared_image("reviews-v1", "quay.io/alice/reviews:dev")],
    )
    .await;
    let (reconciler, recorder) = recording(&store);

    let action = reconciler.reconcile(NS, "alice").await.unwrap();
    assert_eq!(action, controller::Action::await_change());

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert_eq!(session.finalizers(), &[FINALIZER.to_string()]);
    let status = session.status.clone().unwrap();
    assert_eq!(status.state, Some(SessionState::Success));
    assert_eq!(
        status.route_expression.as_deref(),
        Some("header:x-workspace-route=alice")
    );
    assert_eq!(
        ledger(&session, "reviews-v1"),
        vec![
            entry("Deployment", "reviews-v1-test", Action::Created),
            entry("DestinationRule", "reviews", Action::Modified),
            entry("VirtualService", "reviews", Action::Modified),
            entry("Recorder", "prepared-image", Action::Located),
        ]
    );
    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v1-test"]);
    assert_eq!(route_count(&store).await, 2);

    let clone = store.get::<Deployment>(NS, "reviews-v1-test").await.unwrap();
    let container = &clone.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some("quay.io/alice/reviews:dev"));

    // A second pass over a converged session touches nothing.
    let rule = store.get::<DestinationRule>(NS, "reviews").await.unwrap();
    let action = reconciler.reconcile(NS, "alice").await.unwrap();
    assert_eq!(action, controller::Action::await_change());
    let after = store.get::<Session>(NS, "alice").await.unwrap();
    assert_eq!(versions(&after), versions(&session));
    assert_eq!(
        versions(&store.get::<DestinationRule>(NS, "reviews").await.unwrap()),
        versions(&rule)
    );
    assert_eq!(recorder.events(), vec!["mutate prepared-image"]);
}

#[tokio::test]
async fn deletion_drains_every_ref() {
    let store = bookinfo().await;
    create_session(
        &store,
        "alice",
        vec![
            prepared_image("reviews-v1", "quay.io/alice/reviews:dev"),
            ike_controller_k8s_api::session::RefSpec::new("ratings-v1", "existing", BTreeMap::new()),
        ],
    )
    .await;
    let reconciler = reconciler(&store);
    reconciler.reconcile(NS, "alice").await.unwrap();

    store.delete::<Session>(NS, "alice").await.unwrap();
    assert!(store.contains::<Session>(NS, "alice"));

    let action = reconciler.reconcile(NS, "alice").await.unwrap();
    assert_eq!(action, controller::Action::await_change());
    assert!(!store.contains::<Session>(NS, "alice"));
    assert!(!store.contains::<Deployment>(NS, "reviews-v1-test"));
    assert!(store.contains::<Deployment>(NS, "ratings-v1"));
    assert_eq!(subsets(&store).await, vec!["v1", "v2"]);
    assert_eq!(route_count(&store).await, 1);
}

#[tokio::test]
async fn strategy_swap_reverts_before_mutating() {
    let store = bookinfo().await;
    create_session(
        &store,
        "alice",
        vec![prepared_image("reviews-v1", "quay.io/alice/reviews:dev")],
    )
    .await;
    let (reconciler, recorder) = recording(&store);
    reconciler.reconcile(NS, "alice").await.unwrap();

    edit_session(&store, "alice", |spec| {
        spec.refs[0] = ike_controller_k8s_api::session::RefSpec::new(
            "reviews-v1",
            "telepresence",
            btreemap! { "version".to_string() => "0.105".to_string() },
        );
    })
    .await;
    reconciler.reconcile(NS, "alice").await.unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            "mutate prepared-image",
            "revert prepared-image",
            "mutate telepresence",
        ]
    );

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    let status = session.ref_status("reviews-v1").unwrap();
    assert_eq!(status.strategy, "telepresence");
    assert_eq!(
        ledger(&session, "reviews-v1")[0],
        entry("Deployment", "reviews-v1-test", Action::Created)
    );
    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v1-test"]);
    assert_eq!(route_count(&store).await, 2);

    let clone = store.get::<Deployment>(NS, "reviews-v1-test").await.unwrap();
    let container = &clone.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(
        container.image.as_deref(),
        Some("datawire/telepresence-k8s:0.105")
    );
}

#[tokio::test]
async fn failing_ref_does_not_block_siblings() {
    let store = bookinfo().await;
    // There is no destination rule or virtual service for ratings.
    create_session(
        &store,
        "alice",
        vec![
            prepared_image("ratings-v1", "quay.io/alice/ratings:dev"),
            prepared_image("reviews-v1", "quay.io/alice/reviews:dev"),
        ],
    )
    .await;
    let reconciler = reconciler(&store);

    let action = reconciler.reconcile(NS, "alice").await.unwrap();
    assert_eq!(action, controller::Action::requeue(Duration::from_secs(10)));

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert_eq!(
        session.status.as_ref().and_then(|s| s.state),
        Some(SessionState::Failed)
    );
    assert_eq!(
        ledger(&session, "ratings-v1"),
        vec![
            entry("Deployment", "ratings-v1-test", Action::Created),
            entry("DestinationRule", "ratings", Action::Failed),
            entry("VirtualService", "ratings", Action::Failed),
        ]
    );
    let conditions = &session.ref_status("ratings-v1").unwrap().conditions;
    assert_eq!(conditions.len(), 2);
    assert_eq!(conditions[0].reason, "MutationFailed");
    assert_eq!(conditions[0].message, "not found");

    assert_eq!(ledger(&session, "reviews-v1").len(), 3);
    assert_eq!(route_count(&store).await, 2);

    // Once the missing objects appear, the retry completes the failed ref
    // without recreating its clone.
    store.create(NS, &destination_rule("ratings")).await.unwrap();
    store.create(NS, &virtual_service("ratings")).await.unwrap();
    let action = reconciler.reconcile(NS, "alice").await.unwrap();
    assert_eq!(action, controller::Action::await_change());

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert!(session.is_success());
    assert_eq!(
        ledger(&session, "ratings-v1"),
        vec![
            entry("Deployment", "ratings-v1-test", Action::Created),
            entry("DestinationRule", "ratings", Action::Modified),
            entry("VirtualService", "ratings", Action::Modified),
        ]
    );
    assert!(session.ref_status("ratings-v1").unwrap().conditions.is_empty());
}

#[tokio::test]
async fn unlocated_refs_fail_until_the_workload_appears() {
    let store = bookinfo().await;
    create_session(
        &store,
        "alice",
        vec![prepared_image("details-v1", "quay.io/alice/details:dev")],
    )
    .await;
    let reconciler = reconciler(&store);

    reconciler.reconcile(NS, "alice").await.unwrap();
    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert_eq!(
        session.status.as_ref().and_then(|s| s.state),
        Some(SessionState::Failed)
    );
    let status = session.ref_status("details-v1").unwrap();
    assert_eq!(status.target, None);
    assert_eq!(status.conditions[0].reason, "NotLocated");

    // Retrying an unchanged failure leaves the status alone.
    reconciler.reconcile(NS, "alice").await.unwrap();
    let after = store.get::<Session>(NS, "alice").await.unwrap();
    assert_eq!(versions(&after), versions(&session));

    store
        .create(NS, &deployment("details-v1", "reviews", "v1"))
        .await
        .unwrap();
    reconciler.reconcile(NS, "alice").await.unwrap();
    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert!(session.is_success());
    let status = session.ref_status("details-v1").unwrap();
    assert_eq!(status.target.as_ref().map(|t| t.name.as_str()), Some("details-v1"));
    assert!(status.conditions.is_empty());
}

#[tokio::test]
async fn removed_refs_are_reverted() {
    let store = bookinfo().await;
    create_session(
        &store,
        "alice",
        vec![
            prepared_image("reviews-v1", "quay.io/alice/reviews:dev"),
            ike_controller_k8s_api::session::RefSpec::new("ratings-v1", "existing", BTreeMap::new()),
        ],
    )
    .await;
    let reconciler = reconciler(&store);
    reconciler.reconcile(NS, "alice").await.unwrap();

    edit_session(&store, "alice", |spec| spec.refs.truncate(1)).await;
    reconciler.reconcile(NS, "alice").await.unwrap();

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    let names = session
        .status
        .as_ref()
        .map(|s| s.refs.iter().map(|r| r.name.clone()).collect::<Vec<_>>())
        .unwrap_or_default();
    assert_eq!(names, vec!["reviews-v1"]);
    assert!(session.is_success());

    edit_session(&store, "alice", |spec| spec.refs.clear()).await;
    reconciler.reconcile(NS, "alice").await.unwrap();

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert!(session.status.unwrap().refs.is_empty());
    assert!(!store.contains::<Deployment>(NS, "reviews-v1-test"));
    assert_eq!(subsets(&store).await, vec!["v1", "v2"]);
    assert_eq!(route_count(&store).await, 1);
}

#[tokio::test]
async fn sessions_share_a_workload_variant() {
    let store = bookinfo().await;
    for name in ["alice", "bob"] {
        create_session(
            &store,
            name,
            vec![prepared_image("reviews-v1", "quay.io/team/reviews:dev")],
        )
        .await;
    }
    let reconciler = reconciler(&store);
    reconciler.reconcile(NS, "alice").await.unwrap();
    reconciler.reconcile(NS, "bob").await.unwrap();

    let bob = store.get::<Session>(NS, "bob").await.unwrap();
    assert!(bob.is_success());
    assert_eq!(
        ledger(&bob, "reviews-v1"),
        vec![
            entry("Deployment", "reviews-v1-test", Action::Located),
            entry("DestinationRule", "reviews", Action::Located),
            entry("VirtualService", "reviews", Action::Modified),
        ]
    );
    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v1-test"]);
    assert_eq!(route_count(&store).await, 3);

    // Alice leaves; bob's route still needs the subset and the clone.
    store.delete::<Session>(NS, "alice").await.unwrap();
    reconciler.reconcile(NS, "alice").await.unwrap();
    assert!(!store.contains::<Session>(NS, "alice"));
    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v1-test"]);
    assert_eq!(route_count(&store).await, 2);
    assert!(store.contains::<Deployment>(NS, "reviews-v1-test"));

    store.delete::<Session>(NS, "bob").await.unwrap();
    reconciler.reconcile(NS, "bob").await.unwrap();
    assert_eq!(subsets(&store).await, vec!["v1", "v2"]);
    assert_eq!(route_count(&store).await, 1);
    assert!(!store.contains::<Deployment>(NS, "reviews-v1-test"));
}

#[tokio::test]
async fn differently_prepared_variants_are_not_shared() {
    let store = bookinfo().await;
    for name in ["alice", "bob"] {
        create_session(
            &store,
            name,
            vec![prepared_image("reviews-v1", &format!("quay.io/{name}/reviews:dev"))],
        )
        .await;
    }
    let reconciler = reconciler(&store);
    reconciler.reconcile(NS, "alice").await.unwrap();
    let action = reconciler.reconcile(NS, "bob").await.unwrap();
    assert_eq!(action, controller::Action::requeue(Duration::from_secs(10)));

    let bob = store.get::<Session>(NS, "bob").await.unwrap();
    assert_eq!(
        bob.status.as_ref().and_then(|s| s.state),
        Some(SessionState::Failed)
    );
    // Bob gets no route to alice's build.
    assert_eq!(
        ledger(&bob, "reviews-v1"),
        vec![entry("Deployment", "reviews-v1-test", Action::Failed)]
    );
    let conditions = &bob.ref_status("reviews-v1").unwrap().conditions;
    assert_eq!(conditions[0].reason, "MutationFailed");
    assert_eq!(
        conditions[0].message,
        "variant is prepared differently for session \"alice\""
    );
    assert_eq!(route_count(&store).await, 2);

    let clone = store.get::<Deployment>(NS, "reviews-v1-test").await.unwrap();
    let container = &clone.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some("quay.io/alice/reviews:dev"));

    // Once alice is gone, bob's retry prepares a variant of its own.
    store.delete::<Session>(NS, "alice").await.unwrap();
    reconciler.reconcile(NS, "alice").await.unwrap();
    assert!(!store.contains::<Deployment>(NS, "reviews-v1-test"));

    reconciler.reconcile(NS, "bob").await.unwrap();
    let bob = store.get::<Session>(NS, "bob").await.unwrap();
    assert!(bob.is_success());
    assert_eq!(
        ledger(&bob, "reviews-v1"),
        vec![
            entry("Deployment", "reviews-v1-test", Action::Created),
            entry("DestinationRule", "reviews", Action::Modified),
            entry("VirtualService", "reviews", Action::Modified),
        ]
    );
    let clone = store.get::<Deployment>(NS, "reviews-v1-test").await.unwrap();
    let container = &clone.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some("quay.io/bob/reviews:dev"));
}

#[tokio::test]
async fn route_changes_move_the_session_route() {
    let store = bookinfo().await;
    create_session(
        &store,
        "alice",
        vec![prepared_image("reviews-v1", "quay.io/alice/reviews:dev")],
    )
    .await;
    let reconciler = reconciler(&store);
    reconciler.reconcile(NS, "alice").await.unwrap();

    edit_session(&store, "alice", |spec| {
        spec.route = Some(Route::header("x-user", "alice").into());
    })
    .await;
    reconciler.reconcile(NS, "alice").await.unwrap();

    let session = store.get::<Session>(NS, "alice").await.unwrap();
    assert!(session.is_success());
    assert_eq!(
        session.status.as_ref().and_then(|s| s.route_expression.as_deref()),
        Some("header:x-user=alice")
    );
    let vs = store.get::<VirtualService>(NS, "reviews").await.unwrap();
    assert_eq!(vs.spec.http.len(), 2);
    let headers = vs.spec.http[0].matches[0].headers.keys().collect::<Vec<_>>();
    assert_eq!(headers, vec!["x-user"]);
    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v1-test"]);

    // Deletion removes the route that was applied, not the default one.
    store.delete::<Session>(NS, "alice").await.unwrap();
    reconciler.reconcile(NS, "alice").await.unwrap();
    assert!(!store.contains::<Session>(NS, "alice"));
    assert_eq!(route_count(&store).await, 1);
    assert_eq!(subsets(&store).await, vec!["v1", "v2"]);
    assert!(!store.contains::<Deployment>(NS, "reviews-v1-test"));
}

#[tokio::test]
async fn replayed_reverts_leave_other_sessions_alone() {
    let store = bookinfo().await;
    store
        .create(NS, &deployment("reviews-v2", "reviews", "v2"))
        .await
        .unwrap();
    create_session(
        &store,
        "alice",
        vec![prepared_image("reviews-v1", "quay.io/alice/reviews:dev")],
    )
    .await;
    create_session(
        &store,
        "bob",
        vec![prepared_image("reviews-v2", "quay.io/bob/reviews:dev")],
    )
    .await;
    let interfering = Interfering::new(&store);
    let reconciler = Reconciler::new(
        interfering.clone(),
        Manipulators::standard(),
        ReconcileMetrics::default(),
    );
    reconciler.reconcile(NS, "alice").await.unwrap();
    reconciler.reconcile(NS, "bob").await.unwrap();
    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v1-test", "v2-test"]);

    // Alice drops her ref and the closing status write loses a race, so the
    // retry reverts again from the old ledger.
    edit_session(&store, "alice", |spec| spec.refs.clear()).await;
    interfering.conflict_after(1);
    let err = reconciler.reconcile(NS, "alice").await.unwrap_err();
    assert!(
        matches!(&err, ReconcileError::Status(e) if e.is_conflict()),
        "unexpected error: {err}"
    );
    let alice = store.get::<Session>(NS, "alice").await.unwrap();
    assert_eq!(ledger(&alice, "reviews-v1").len(), 3);

    reconciler.reconcile(NS, "alice").await.unwrap();
    let alice = store.get::<Session>(NS, "alice").await.unwrap();
    assert!(alice.status.unwrap().refs.is_empty());
    assert!(!store.contains::<Deployment>(NS, "reviews-v1-test"));

    assert_eq!(subsets(&store).await, vec!["v1", "v2", "v2-test"]);
    assert_eq!(route_count(&store).await, 2);
    assert!(store.contains::<Deployment>(NS, "reviews-v2-test"));
    let bob = store.get::<Session>(NS, "bob").await.unwrap();
    assert!(bob.is_success());
}

#[tokio::test]
async fn missing_sessions_are_ignored() {
    let store = MemoryStore::new();
    let action = reconciler(&store).reconcile(NS, "nobody").await.unwrap();
    assert_eq!(action, controller::Action::await_change());
}
