//! End-to-end reconciliation against an in-memory adapter

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terraflow_cloud::{
    AdapterError, AdapterRegistry, AdapterResult, AttributeDiff, CloudError, Engine,
    EngineSettings, ExecutorSettings, FileStateStore, MemoryStateStore, NodeOutcome,
    ResourceAdapter, RetryPolicy, StateStore,
};
use terraflow_core::{
    Action, AttrType, AttributeSchema, Attributes, ConfigError, DesiredConfig, FlowError,
    NodeKey, NodeState, ResourceAddress, ResourceConfig, ResourceObject, ResourceSchema,
    StateEntry, Step, Timeouts, Value,
};
use tokio_util::sync::CancellationToken;

/// Adapter keeping its objects in a map, with knobs for failure injection
struct MockAdapter {
    schema: ResourceSchema,
    objects: Mutex<BTreeMap<String, Attributes>>,
    next_id: AtomicU32,
    revision: AtomicU32,
    calls: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
    transient_failures: AtomicU32,
    delay: Duration,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl MockAdapter {
    fn new(schema: ResourceSchema) -> Self {
        Self {
            schema,
            objects: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            revision: AtomicU32::new(1),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(BTreeSet::new()),
            transient_failures: AtomicU32::new(0),
            delay: Duration::ZERO,
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn position(&self, call: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("call '{}' not made: {:?}", call, self.calls()))
    }

    fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn fail_transiently(&self, times: u32) {
        self.transient_failures.store(times, Ordering::SeqCst);
    }

    fn object_ids(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn forget_all(&self) {
        self.objects.lock().unwrap().clear();
    }

    fn set_attribute(&self, id: &str, name: &str, value: serde_json::Value) {
        if let Some(attrs) = self.objects.lock().unwrap().get_mut(id) {
            attrs.insert(name.to_string(), value);
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceAdapter for MockAdapter {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    async fn create(&self, attributes: &Attributes) -> AdapterResult<ResourceObject> {
        self.enter().await;
        let name = attributes
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.record(format!("create {}", name));

        let result = if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(AdapterError::Transient("throttled".into()))
        } else if self.failing.lock().unwrap().contains(&name) {
            Err(AdapterError::Failed(format!("cannot create {}", name)))
        } else {
            let id = format!("{}-{}", name, self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut stored: Attributes = attributes
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            stored.insert("arn".to_string(), json!(format!("arn:mock:{}", id)));
            self.objects
                .lock()
                .unwrap()
                .insert(id.clone(), stored.clone());
            Ok(ResourceObject::new(id, stored))
        };
        self.leave();
        result
    }

    async fn read(&self, id: &str) -> AdapterResult<Option<Attributes>> {
        Ok(self.objects.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, id: &str, diff: &AttributeDiff) -> AdapterResult<Attributes> {
        self.enter().await;
        self.record(format!("update {}", id));
        let result = {
            let mut objects = self.objects.lock().unwrap();
            match objects.get_mut(id) {
                Some(attrs) => {
                    for name in &diff.changed {
                        match diff.after.get(name) {
                            Some(value) if !value.is_null() => {
                                attrs.insert(name.clone(), value.clone());
                            }
                            _ => {
                                attrs.remove(name);
                            }
                        }
                    }
                    let revision = self.revision.fetch_add(1, Ordering::SeqCst);
                    attrs.insert("arn".to_string(), json!(format!("arn:mock:{}:r{}", id, revision)));
                    Ok(attrs.clone())
                }
                None => Err(AdapterError::NotFound(id.to_string())),
            }
        };
        self.leave();
        result
    }

    async fn delete(&self, id: &str) -> AdapterResult<()> {
        self.enter().await;
        self.record(format!("delete {}", id));
        let removed = self.objects.lock().unwrap().remove(id);
        self.leave();
        match removed {
            Some(_) => Ok(()),
            None => Err(AdapterError::NotFound(id.to_string())),
        }
    }
}

fn schema(kind: &str) -> ResourceSchema {
    ResourceSchema::new(kind)
        .attribute(
            "name",
            AttributeSchema::required(AttrType::String).force_new(),
        )
        .attribute("input", AttributeSchema::optional(AttrType::Any))
        .attribute("tag", AttributeSchema::optional(AttrType::String))
        .attribute("arn", AttributeSchema::computed(AttrType::String))
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        executor: ExecutorSettings {
            retry: RetryPolicy {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                max_elapsed: Duration::from_secs(10),
            },
            ..ExecutorSettings::default()
        },
        refresh: true,
    }
}

struct Harness {
    nodes: Arc<MockAdapter>,
    lbs: Arc<MockAdapter>,
    store: Arc<MemoryStateStore>,
    engine: Engine,
}

fn harness_with(nodes: MockAdapter, settings: EngineSettings) -> Harness {
    let nodes = Arc::new(nodes);
    let lbs = Arc::new(MockAdapter::new(
        schema("lb").create_before_destroy(true),
    ));
    let store = Arc::new(MemoryStateStore::new());
    let registry = AdapterRegistry::new()
        .with(nodes.clone())
        .and_then(|r| r.with(lbs.clone()))
        .unwrap();
    let engine = Engine::new(registry, store.clone()).with_settings(settings);
    Harness {
        nodes,
        lbs,
        store,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(MockAdapter::new(schema("node")), fast_settings())
}

fn addr(name: &str) -> ResourceAddress {
    ResourceAddress::new("node", name)
}

fn res(name: &str) -> ResourceConfig {
    ResourceConfig::new().with_attribute("name", name)
}

fn referencing(name: &str, target: &str) -> ResourceConfig {
    res(name).with_attribute("input", Value::reference(addr(target), "id"))
}

#[tokio::test]
async fn test_dependent_resource_waits_for_its_dependency() {
    let h = harness();
    let desired = DesiredConfig::new()
        .with(addr("a"), res("a"))
        .with(addr("b"), referencing("b", "a"));

    let plan = h.engine.plan(&desired).await.unwrap();
    assert_eq!(
        plan.waves,
        vec![vec![NodeKey::apply(addr("a"))], vec![NodeKey::apply(addr("b"))]]
    );

    let report = h.engine.apply_plan(&plan).await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.nodes.calls(), vec!["create a", "create b"]);

    let state = h.store.snapshot().await.unwrap();
    let a = state.get(&addr("a")).unwrap();
    let b = state.get(&addr("b")).unwrap();
    assert_eq!(b.attributes["input"], json!(a.id));
    assert_eq!(b.dependencies, BTreeSet::from([addr("a")]));
    assert!(a.dependencies.is_empty());
}

#[tokio::test]
async fn test_second_apply_is_a_no_op() {
    let h = harness();
    let desired = DesiredConfig::new()
        .with(addr("a"), res("a").with_attribute("tag", "v1"))
        .with(addr("b"), referencing("b", "a"));

    assert!(h.engine.apply(&desired).await.unwrap().is_success());
    let calls = h.nodes.calls().len();

    let plan = h.engine.plan(&desired).await.unwrap();
    assert!(!plan.has_changes());
    assert!(plan.nodes.values().all(|n| n.step == Step::NoOp));

    let report = h.engine.apply_plan(&plan).await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.nodes.calls().len(), calls);
}

#[tokio::test]
async fn test_replace_destroys_before_creating_by_default() {
    let h = harness();
    h.engine
        .apply(&DesiredConfig::new().with(addr("a"), res("a")))
        .await
        .unwrap();

    let desired = DesiredConfig::new().with(addr("a"), res("a2"));
    let plan = h.engine.plan(&desired).await.unwrap();
    assert_eq!(plan.diff(&addr("a")).unwrap().action, Action::Replace);

    let report = h.engine.apply_plan(&plan).await.unwrap();
    assert!(report.is_success());
    assert!(h.nodes.position("delete a-1") < h.nodes.position("create a2"));

    let state = h.store.snapshot().await.unwrap();
    assert_eq!(state.get(&addr("a")).unwrap().id, "a2-2");
    assert_eq!(h.nodes.object_ids(), vec!["a2-2"]);
}

#[tokio::test]
async fn test_create_before_destroy_replacement() {
    let h = harness();
    let front = ResourceAddress::new("lb", "front");
    h.engine
        .apply(&DesiredConfig::new().with(front.clone(), res("f1")))
        .await
        .unwrap();

    let report = h
        .engine
        .apply(&DesiredConfig::new().with(front.clone(), res("f2")))
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(h.lbs.position("create f2") < h.lbs.position("delete f1-1"));

    let state = h.store.snapshot().await.unwrap();
    let entry = state.get(&front).unwrap();
    assert_eq!(entry.id, "f2-2");
    assert!(entry.deposed.is_empty());
    assert_eq!(h.lbs.object_ids(), vec!["f2-2"]);
}

#[tokio::test]
async fn test_failed_node_skips_dependents_and_resume_finishes_the_rest() {
    let h = harness();
    h.nodes.fail_on("b");
    let desired = DesiredConfig::new()
        .with(addr("a"), res("a"))
        .with(addr("b"), referencing("b", "a"))
        .with(addr("c"), res("c"))
        .with(addr("d"), referencing("d", "b"));

    let report = h.engine.apply(&desired).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.state_of(&NodeKey::apply(addr("a"))), NodeState::Done);
    assert_eq!(report.state_of(&NodeKey::apply(addr("b"))), NodeState::Failed);
    assert_eq!(report.state_of(&NodeKey::apply(addr("c"))), NodeState::Done);
    assert_eq!(
        report.get(&NodeKey::apply(addr("d"))).unwrap().outcome,
        NodeOutcome::Skipped {
            blocked_by: vec![NodeKey::apply(addr("b"))]
        }
    );

    let state = h.store.snapshot().await.unwrap();
    assert!(state.contains(&addr("a")));
    assert!(state.contains(&addr("c")));
    assert!(!state.contains(&addr("b")));
    assert!(!state.contains(&addr("d")));

    h.nodes.clear_failures();
    let made = h.nodes.calls().len();
    let plan = h.engine.plan(&desired).await.unwrap();
    assert_eq!(plan.diff(&addr("a")).unwrap().action, Action::NoOp);
    assert_eq!(plan.diff(&addr("c")).unwrap().action, Action::NoOp);
    assert_eq!(plan.diff(&addr("b")).unwrap().action, Action::Create);
    assert_eq!(plan.diff(&addr("d")).unwrap().action, Action::Create);

    let report = h.engine.apply_plan(&plan).await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.nodes.calls()[made..], ["create b", "create d"]);
    assert_eq!(h.store.snapshot().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_delete_of_missing_object_counts_as_done() {
    let mut settings = fast_settings();
    settings.refresh = false;
    let h = harness_with(MockAdapter::new(schema("node")), settings);
    h.store
        .upsert(
            &addr("ghost"),
            StateEntry::new(
                "node",
                ResourceObject::new("ghost-9", Attributes::from([("name".into(), json!("ghost"))])),
            ),
        )
        .await
        .unwrap();

    let report = h.engine.destroy().await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.nodes.calls(), vec!["delete ghost-9"]);
    assert!(h.store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let h = harness();
    h.nodes.fail_transiently(2);

    let report = h
        .engine
        .apply(&DesiredConfig::new().with(addr("a"), res("a")))
        .await
        .unwrap();

    assert!(report.is_success());
    match &report.get(&NodeKey::apply(addr("a"))).unwrap().outcome {
        NodeOutcome::Succeeded { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_run_starts_nothing() {
    let token = CancellationToken::new();
    token.cancel();
    let h = harness();
    let engine = h.engine.with_cancellation(token);

    let report = engine
        .apply(
            &DesiredConfig::new()
                .with(addr("a"), res("a"))
                .with(addr("b"), referencing("b", "a")),
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.incomplete().len(), 2);
    assert!(h.nodes.calls().is_empty());
    assert!(h.store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_timeout_lets_running_nodes_finish() {
    let mut settings = fast_settings();
    settings.executor.run_timeout = Some(Duration::from_millis(30));
    let h = harness_with(
        MockAdapter::new(schema("node")).with_delay(Duration::from_millis(150)),
        settings,
    );

    let report = h
        .engine
        .apply(
            &DesiredConfig::new()
                .with(addr("a"), res("a"))
                .with(addr("b"), referencing("b", "a")),
        )
        .await
        .unwrap();

    assert!(report.timed_out);
    assert_eq!(report.state_of(&NodeKey::apply(addr("a"))), NodeState::Done);
    assert_eq!(
        report.state_of(&NodeKey::apply(addr("b"))),
        NodeState::Incomplete
    );
    let state = h.store.snapshot().await.unwrap();
    assert!(state.contains(&addr("a")));
    assert!(!state.contains(&addr("b")));
}

#[tokio::test]
async fn test_call_timeout_fails_the_node() {
    let slow = MockAdapter::new(schema("node").timeouts(Timeouts {
        create: Some(Duration::from_millis(20)),
        ..Timeouts::default()
    }))
    .with_delay(Duration::from_millis(500));
    let h = harness_with(slow, fast_settings());

    let report = h
        .engine
        .apply(&DesiredConfig::new().with(addr("a"), res("a")))
        .await
        .unwrap();

    match &report.get(&NodeKey::apply(addr("a"))).unwrap().outcome {
        NodeOutcome::Failed { error, attempts } => {
            assert!(error.contains("Timed out"), "{}", error);
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(h.store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_parallelism_bounds_in_flight_calls() {
    let mut settings = fast_settings();
    settings.executor.parallelism = 2;
    let h = harness_with(
        MockAdapter::new(schema("node")).with_delay(Duration::from_millis(20)),
        settings,
    );

    let desired = (0..6).fold(DesiredConfig::new(), |d, i| {
        let name = format!("n{}", i);
        d.with(addr(&name), res(&name))
    });
    let report = h.engine.apply(&desired).await.unwrap();

    assert!(report.is_success());
    assert!(h.nodes.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.store.snapshot().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_stale_plan_is_rejected() {
    let h = harness();
    let plan = h
        .engine
        .plan(&DesiredConfig::new().with(addr("a"), res("a")))
        .await
        .unwrap();

    h.store
        .upsert(
            &addr("other"),
            StateEntry::new("node", ResourceObject::new("other-1", Attributes::new())),
        )
        .await
        .unwrap();

    let err = h.engine.apply_plan(&plan).await.unwrap_err();
    assert!(matches!(err, CloudError::StalePlan { planned: 0, .. }));
    assert!(h.nodes.calls().is_empty());
}

#[tokio::test]
async fn test_refresh_recreates_vanished_resource() {
    let h = harness();
    let desired = DesiredConfig::new().with(addr("a"), res("a"));
    h.engine.apply(&desired).await.unwrap();
    h.nodes.forget_all();

    let plan = h.engine.plan(&desired).await.unwrap();
    assert_eq!(plan.diff(&addr("a")).unwrap().action, Action::Create);

    assert!(h.engine.apply_plan(&plan).await.unwrap().is_success());
    let state = h.store.snapshot().await.unwrap();
    assert_eq!(state.get(&addr("a")).unwrap().id, "a-2");
}

#[tokio::test]
async fn test_vanished_undeclared_resource_is_cleared_from_state() {
    let h = harness();
    h.engine
        .apply(&DesiredConfig::new().with(addr("a"), res("a")))
        .await
        .unwrap();
    h.nodes.forget_all();

    let report = h.engine.destroy().await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.nodes.calls(), vec!["create a", "delete a-1"]);
    assert!(h.store.snapshot().await.unwrap().is_empty());
    assert!(!h.engine.plan_destroy().await.unwrap().has_changes());
}

/// An interrupted create-before-destroy replace whose new object vanished
async fn interrupted_replacement(h: &Harness, front: &ResourceAddress) {
    h.engine
        .apply(&DesiredConfig::new().with(front.clone(), res("f1")))
        .await
        .unwrap();
    let mut entry = h.store.get(front).await.unwrap().unwrap();
    let old = entry.object();
    entry.deposed.push(old);
    entry.id = "f2-9".to_string();
    h.store.upsert(front, entry).await.unwrap();
}

#[tokio::test]
async fn test_vanished_resource_still_removes_deposed_objects() {
    let h = harness();
    let front = ResourceAddress::new("lb", "front");
    interrupted_replacement(&h, &front).await;

    let desired = DesiredConfig::new().with(front.clone(), res("f2"));
    let plan = h.engine.plan(&desired).await.unwrap();
    assert_eq!(plan.diff(&front).unwrap().action, Action::Create);
    assert!(plan.nodes.contains_key(&NodeKey::deposed(front.clone(), "f1-1")));

    assert!(h.engine.apply_plan(&plan).await.unwrap().is_success());
    assert!(h.lbs.position("delete f1-1") < h.lbs.position("create f2"));
    let entry = h.store.get(&front).await.unwrap().unwrap();
    assert_eq!(entry.id, "f2-2");
    assert!(entry.deposed.is_empty());
    assert_eq!(h.lbs.object_ids(), vec!["f2-2"]);
}

#[tokio::test]
async fn test_destroy_of_vanished_resource_removes_deposed_objects() {
    let h = harness();
    let front = ResourceAddress::new("lb", "front");
    interrupted_replacement(&h, &front).await;

    assert!(h.engine.destroy().await.unwrap().is_success());
    assert!(h.lbs.calls().contains(&"delete f1-1".to_string()));
    assert!(h.lbs.calls().contains(&"delete f2-9".to_string()));
    assert!(h.store.snapshot().await.unwrap().is_empty());
    assert!(h.lbs.object_ids().is_empty());
}

#[tokio::test]
async fn test_computed_attribute_changed_by_update_reaches_dependents() {
    let h = harness();
    let desired = |tag: &str| {
        DesiredConfig::new()
            .with(addr("a"), res("a").with_attribute("tag", tag))
            .with(
                addr("b"),
                res("b").with_attribute("input", Value::reference(addr("a"), "arn")),
            )
    };
    h.engine.apply(&desired("v1")).await.unwrap();

    let plan = h.engine.plan(&desired("v2")).await.unwrap();
    assert_eq!(plan.diff(&addr("a")).unwrap().action, Action::Update);
    assert_eq!(plan.diff(&addr("b")).unwrap().action, Action::Update);
    assert!(h.engine.apply_plan(&plan).await.unwrap().is_success());

    let state = h.store.snapshot().await.unwrap();
    let a = state.get(&addr("a")).unwrap();
    assert_eq!(a.attributes["arn"], json!("arn:mock:a-1:r1"));
    assert_eq!(state.get(&addr("b")).unwrap().attributes["input"], a.attributes["arn"]);
    assert!(!h.engine.plan(&desired("v2")).await.unwrap().has_changes());
}

#[tokio::test]
async fn test_drifted_attribute_is_updated_in_place() {
    let h = harness();
    let desired = DesiredConfig::new().with(addr("a"), res("a").with_attribute("tag", "v1"));
    h.engine.apply(&desired).await.unwrap();
    h.nodes.set_attribute("a-1", "tag", json!("manual"));

    let plan = h.engine.plan(&desired).await.unwrap();
    assert_eq!(plan.diff(&addr("a")).unwrap().action, Action::Update);

    assert!(h.engine.apply_plan(&plan).await.unwrap().is_success());
    assert!(h.nodes.calls().contains(&"update a-1".to_string()));
    let state = h.store.snapshot().await.unwrap();
    assert_eq!(state.get(&addr("a")).unwrap().attributes["tag"], json!("v1"));
}

#[tokio::test]
async fn test_cycle_is_reported_before_any_call() {
    let h = harness();
    let desired = DesiredConfig::new()
        .with(addr("a"), referencing("a", "b"))
        .with(addr("b"), referencing("b", "a"));

    let err = h.engine.apply(&desired).await.unwrap_err();
    assert!(matches!(
        err,
        CloudError::Flow(FlowError::Config(ConfigError::Cycle(_)))
    ));
    assert!(h.nodes.calls().is_empty());
}

#[tokio::test]
async fn test_state_survives_in_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = Arc::new(MockAdapter::new(schema("node")));
    let registry = || AdapterRegistry::new().with(nodes.clone()).unwrap();
    let desired = DesiredConfig::new()
        .with(addr("a"), res("a"))
        .with(addr("b"), referencing("b", "a"));

    let store = Arc::new(FileStateStore::in_project(dir.path()));
    let engine = Engine::new(registry(), store).with_settings(fast_settings());
    assert!(engine.apply(&desired).await.unwrap().is_success());

    let reopened = Arc::new(FileStateStore::in_project(dir.path()));
    let engine = Engine::new(registry(), reopened.clone()).with_settings(fast_settings());
    let plan = engine.plan(&desired).await.unwrap();
    assert!(!plan.has_changes());

    let report = engine.destroy().await.unwrap();
    assert!(report.is_success());
    assert!(reopened.snapshot().await.unwrap().is_empty());
    assert!(nodes.object_ids().is_empty());
}
