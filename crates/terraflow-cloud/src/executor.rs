//! Executor
//!
//! Runs a [`Plan`] wave by wave. Nodes of one wave run as independent tokio
//! tasks bounded by a semaphore; the next wave starts only after every task
//! of the current one has finished. State is committed per node as soon as
//! that node succeeds.

use crate::adapter::{AdapterResult, AttributeDiff, ResourceAdapter};
use crate::error::{AdapterError, CloudError};
use crate::registry::AdapterRegistry;
use crate::report::{ApplyReport, NodeOutcome, NodeReport};
use crate::retry::{RetryError, RetryPolicy};
use crate::state::StateStore;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use terraflow_core::{
    Attributes, NodeKey, NodeState, Phase, Plan, PlanNode, ResourceAddress, ResourceObject,
    StateEntry, Step,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Default maximum number of in-flight adapter calls
pub const DEFAULT_PARALLELISM: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    /// Maximum number of nodes running at once
    pub parallelism: usize,

    pub retry: RetryPolicy,

    /// Nodes not started within this time are reported as incomplete
    pub run_timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryPolicy::default(),
            run_timeout: None,
        }
    }
}

/// Outputs of applied resources, by address
type Outputs = BTreeMap<ResourceAddress, Attributes>;

pub struct Executor {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn StateStore>,
    settings: ExecutorSettings,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(registry: Arc<AdapterRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            settings: ExecutorSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Cancelling `token` stops new adapter calls; running ones finish
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute every wave of the plan
    ///
    /// Node failures do not abort the run; they are collected in the
    /// returned report. Errors are only returned when the plan references a
    /// kind no adapter is registered for.
    #[instrument(skip_all, fields(waves = plan.waves.len(), steps = plan.len()))]
    pub async fn execute(&self, plan: &Plan) -> crate::Result<ApplyReport> {
        for node in plan.nodes.values() {
            self.registry.get(node.kind())?;
        }

        let started = Instant::now();
        let run = self.cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.settings.run_timeout.map(|limit| {
            let run = run.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run.cancelled() => {}
                    _ = sleep(limit) => {
                        warn!(timeout_secs = limit.as_secs(), "Run timeout reached, no further nodes will start");
                        timed_out.store(true, Ordering::SeqCst);
                        run.cancel();
                    }
                }
            })
        });

        let mut report = ApplyReport::new();
        let mut states: BTreeMap<NodeKey, NodeState> = plan
            .nodes
            .keys()
            .map(|key| (key.clone(), NodeState::Pending))
            .collect();
        let mut outputs = Outputs::new();
        let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));

        for (index, wave) in plan.waves.iter().enumerate() {
            let mut runnable: Vec<&PlanNode> = Vec::new();

            for key in wave {
                let Some(node) = plan.node(key) else {
                    continue;
                };
                let blocked_by: Vec<NodeKey> = node
                    .after
                    .iter()
                    .filter(|p| states.get(*p) != Some(&NodeState::Done))
                    .cloned()
                    .collect();

                let outcome = if run.is_cancelled() {
                    NodeOutcome::Incomplete
                } else if !blocked_by.is_empty() {
                    warn!(node = %key, blocked_by = ?blocked_by.iter().map(ToString::to_string).collect::<Vec<_>>(), "Skipping node, dependency did not complete");
                    NodeOutcome::Skipped { blocked_by }
                } else {
                    states.insert(key.clone(), NodeState::Ready);
                    runnable.push(node);
                    continue;
                };

                states.insert(key.clone(), outcome.state());
                report.push(NodeReport {
                    key: key.clone(),
                    step: node.step,
                    outcome,
                    duration_ms: 0,
                });
            }

            if runnable.is_empty() {
                continue;
            }

            info!(wave = index, nodes = runnable.len(), "Starting wave");
            let wave_outputs = Arc::new(outputs.clone());
            let mut tasks = JoinSet::new();
            let mut spawned: HashMap<tokio::task::Id, (NodeKey, Step)> = HashMap::new();

            for node in runnable {
                let task = NodeTask {
                    node: node.clone(),
                    adapter: self.registry.get(node.kind())?,
                    store: self.store.clone(),
                    retry: self.settings.retry.clone(),
                    cancel: run.clone(),
                    outputs: wave_outputs.clone(),
                };
                let semaphore = semaphore.clone();
                states.insert(node.key.clone(), NodeState::Running);
                let handle = tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    task.run().await
                });
                spawned.insert(handle.id(), (node.key.clone(), node.step));
            }

            while let Some(joined) = tasks.join_next_with_id().await {
                let finished = match joined {
                    Ok((_, finished)) => finished,
                    Err(err) => {
                        let Some((key, step)) = spawned.get(&err.id()).cloned() else {
                            continue;
                        };
                        error!(node = %key, error = %err, "Node task aborted");
                        Finished {
                            report: NodeReport {
                                key,
                                step,
                                outcome: NodeOutcome::Failed {
                                    error: format!("task aborted: {}", err),
                                    attempts: 0,
                                },
                                duration_ms: 0,
                            },
                            output: None,
                        }
                    }
                };

                if let Some(output) = finished.output {
                    outputs.insert(finished.report.key.address.clone(), output);
                }
                states.insert(
                    finished.report.key.clone(),
                    finished.report.outcome.state(),
                );
                report.push(finished.report);
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        report.timed_out = timed_out.load(Ordering::SeqCst);
        report.cancelled = self.cancel.is_cancelled();

        let summary = report.summary();
        if report.is_success() {
            info!(%summary, duration_ms = report.duration_ms, "Apply finished");
        } else {
            warn!(%summary, duration_ms = report.duration_ms, "Apply finished with problems");
        }
        Ok(report)
    }
}

/// Result of one node task
struct Finished {
    report: NodeReport,
    /// Attributes other nodes may reference
    output: Option<Attributes>,
}

enum NodeError {
    Adapter {
        operation: &'static str,
        error: AdapterError,
        attempts: u32,
    },
    Invalid(String),
    State(CloudError),
    Cancelled,
}

impl From<CloudError> for NodeError {
    fn from(err: CloudError) -> Self {
        NodeError::State(err)
    }
}

struct NodeTask {
    node: PlanNode,
    adapter: Arc<dyn ResourceAdapter>,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    outputs: Arc<Outputs>,
}

impl NodeTask {
    async fn run(self) -> Finished {
        let started = Instant::now();
        let key = self.node.key.clone();
        let step = self.node.step;

        let (outcome, output) = if self.cancel.is_cancelled() {
            (NodeOutcome::Incomplete, None)
        } else {
            info!(node = %key, %step, "Starting node");
            match self.execute().await {
                Ok((object, attempts)) => {
                    info!(node = %key, %step, attempts, "Node done");
                    let output = match key.phase {
                        Phase::Apply => object.as_ref().map(ResourceObject::outputs),
                        _ => None,
                    };
                    (NodeOutcome::Succeeded { object, attempts }, output)
                }
                Err(NodeError::Cancelled) => {
                    warn!(node = %key, "Run cancelled before the node could finish");
                    (NodeOutcome::Incomplete, None)
                }
                Err(err) => {
                    let (error, attempts) = self.describe(err);
                    error!(node = %key, %step, attempts, error = %error, "Node failed");
                    (NodeOutcome::Failed { error, attempts }, None)
                }
            }
        };

        Finished {
            report: NodeReport {
                key,
                step,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            output,
        }
    }

    fn describe(&self, err: NodeError) -> (String, u32) {
        match err {
            NodeError::Adapter {
                operation,
                error,
                attempts,
            } => {
                let err = CloudError::Adapter {
                    address: self.node.address().clone(),
                    operation,
                    source: error,
                };
                (err.to_string(), attempts)
            }
            NodeError::Invalid(message) => (format!("{}: {}", self.node.address(), message), 0),
            NodeError::State(err) => (err.to_string(), 0),
            NodeError::Cancelled => ("cancelled".to_string(), 0),
        }
    }

    async fn execute(&self) -> Result<(Option<ResourceObject>, u32), NodeError> {
        let timeouts = self.adapter.schema().timeouts;
        let adapter = self.adapter.as_ref();

        match (self.node.step, &self.node.key.phase) {
            (Step::NoOp, _) => {
                let prior = self.prior()?;
                self.commit_dependencies().await?;
                Ok((Some(prior.clone()), 0))
            }
            (Step::Create, _) => {
                let attributes = self.resolve()?;
                let attributes = &attributes;
                let (object, attempts) = self
                    .call("create", timeouts.create, move || adapter.create(attributes))
                    .await?;
                self.commit_create(&object).await?;
                Ok((Some(object), attempts))
            }
            (Step::Update, _) => {
                let prior = self.prior()?;
                let diff = AttributeDiff::new(
                    prior.attributes.clone(),
                    self.resolve()?,
                    self.node.changes.iter().map(|c| c.name.clone()),
                );
                let (id, diff) = (prior.id.as_str(), &diff);
                let (attributes, attempts) = self
                    .call("update", timeouts.update, move || adapter.update(id, diff))
                    .await?;
                let object = ResourceObject::new(prior.id.clone(), attributes);
                self.commit_update(&object).await?;
                Ok((Some(object), attempts))
            }
            (Step::Delete, phase) => {
                let prior = self.prior()?;
                let id = prior.id.as_str();
                let attempts = match self
                    .call("delete", timeouts.delete, move || adapter.delete(id))
                    .await
                {
                    Ok(((), attempts)) => attempts,
                    Err(NodeError::Adapter {
                        error: AdapterError::NotFound(_),
                        attempts,
                        ..
                    }) => {
                        warn!(node = %self.node.key, id, "Already absent, treating delete as done");
                        attempts
                    }
                    Err(err) => return Err(err),
                };
                match phase {
                    Phase::Deposed(id) => self.commit_forget_deposed(id).await?,
                    _ => self.commit_remove().await?,
                }
                Ok((None, attempts))
            }
        }
    }

    /// One adapter operation under the retry policy and call timeout
    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        limit: Option<Duration>,
        mut op: F,
    ) -> Result<(T, u32), NodeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let adapter = self.adapter.as_ref();
        self.retry
            .retry(&self.cancel, |e| adapter.is_transient(e), || with_timeout(limit, op()))
            .await
            .map_err(|e| match e {
                RetryError::Cancelled { .. } => NodeError::Cancelled,
                RetryError::Failed { error, attempts } => NodeError::Adapter {
                    operation,
                    error,
                    attempts,
                },
            })
    }

    fn prior(&self) -> Result<&ResourceObject, NodeError> {
        self.node
            .prior
            .as_ref()
            .ok_or_else(|| NodeError::Invalid(format!("{} step has no prior object", self.node.step)))
    }

    /// Desired attributes with references substituted and defaults applied
    fn resolve(&self) -> Result<Attributes, NodeError> {
        let config = self
            .node
            .config
            .as_ref()
            .ok_or_else(|| NodeError::Invalid("missing desired configuration".to_string()))?;

        let mut resolved = Attributes::new();
        for (name, value) in &config.attributes {
            let value = value
                .resolve_with(&mut |reference| {
                    self.outputs.get(&reference.target).map(|out| {
                        out.get(&reference.attribute)
                            .cloned()
                            .unwrap_or(serde_json::Value::Null)
                    })
                })
                .ok_or_else(|| {
                    NodeError::Invalid(format!(
                        "attribute '{}' references a resource that has not been applied",
                        name
                    ))
                })?;
            resolved.insert(name.clone(), value);
        }

        for (name, attr) in &self.adapter.schema().attributes {
            if attr.is_settable() && !resolved.contains_key(name) {
                if let Some(default) = &attr.default {
                    resolved.insert(name.clone(), default.clone());
                }
            }
        }

        Ok(resolved)
    }

    async fn commit_create(&self, object: &ResourceObject) -> Result<(), NodeError> {
        let address = self.node.address();
        let mut entry = StateEntry::new(self.node.kind(), object.clone())
            .with_dependencies(self.node.dependencies());

        if let Some(current) = self.store.get(address).await? {
            entry.deposed = current.deposed.clone();
            if self.node.create_before_destroy && current.id != object.id {
                entry.deposed.push(current.object());
            }
        }

        self.store.upsert(address, entry).await?;
        Ok(())
    }

    async fn commit_update(&self, object: &ResourceObject) -> Result<(), NodeError> {
        let address = self.node.address();
        let mut entry = match self.store.get(address).await? {
            Some(entry) => entry,
            None => StateEntry::new(self.node.kind(), object.clone()),
        };
        entry.id = object.id.clone();
        entry.attributes = object.attributes.clone();
        entry.dependencies = self.node.dependencies();
        entry.updated_at = Utc::now();

        self.store.upsert(address, entry).await?;
        Ok(())
    }

    /// Keep recorded dependencies current for unchanged resources
    async fn commit_dependencies(&self) -> Result<(), NodeError> {
        let address = self.node.address();
        let dependencies = self.node.dependencies();
        if let Some(mut entry) = self.store.get(address).await? {
            if entry.dependencies != dependencies {
                entry.dependencies = dependencies;
                self.store.upsert(address, entry).await?;
            }
        }
        Ok(())
    }

    async fn commit_remove(&self) -> Result<(), NodeError> {
        self.store.remove(self.node.address()).await?;
        Ok(())
    }

    async fn commit_forget_deposed(&self, id: &str) -> Result<(), NodeError> {
        let address = self.node.address();
        if let Some(mut entry) = self.store.get(address).await? {
            let before = entry.deposed.len();
            entry.deposed.retain(|object| object.id != id);
            if entry.deposed.len() != before {
                self.store.upsert(address, entry).await?;
            }
        }
        Ok(())
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    call: impl Future<Output = AdapterResult<T>>,
) -> AdapterResult<T> {
    match limit {
        Some(limit) => timeout(limit, call)
            .await
            .unwrap_or(Err(AdapterError::Timeout(limit))),
        None => call.await,
    }
}
