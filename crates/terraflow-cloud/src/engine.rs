//! Plan/apply engine
//!
//! Thin orchestration over the pipeline:
//! Graph Builder → Differ → Planner → (optionally) Executor.

use crate::error::{AdapterError, CloudError, Result};
use crate::executor::{Executor, ExecutorSettings};
use crate::registry::AdapterRegistry;
use crate::report::ApplyReport;
use crate::retry::RetryError;
use crate::state::StateStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use terraflow_core::{
    DesiredConfig, Differ, GraphBuilder, Plan, Planner, ResourceAddress, StateSnapshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub executor: ExecutorSettings,

    /// Read every recorded resource before planning
    pub refresh: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            refresh: true,
        }
    }
}

pub struct Engine {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn StateStore>,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(registry: AdapterRegistry, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            settings: EngineSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Compute a plan without executing it
    #[instrument(skip_all, fields(resources = desired.len()))]
    pub async fn plan(&self, desired: &DesiredConfig) -> Result<Plan> {
        let mut snapshot = self.store.snapshot().await?;
        let absent = if self.settings.refresh {
            self.refresh(&mut snapshot).await?
        } else {
            BTreeSet::new()
        };

        let mut graph = GraphBuilder::new(self.registry.as_ref())
            .with_absent(absent)
            .build(desired, &snapshot)?;
        Differ::new(self.registry.as_ref()).annotate(&mut graph)?;
        let plan = Planner::new(self.registry.as_ref()).plan(&graph)?;
        Ok(plan)
    }

    /// Plan the removal of every recorded resource
    pub async fn plan_destroy(&self) -> Result<Plan> {
        self.plan(&DesiredConfig::new()).await
    }

    /// Plan and execute in one go
    pub async fn apply(&self, desired: &DesiredConfig) -> Result<ApplyReport> {
        let lock = self.store.acquire_lock().await?;
        let result = match self.plan(desired).await {
            Ok(plan) => self.execute(&plan).await,
            Err(e) => Err(e),
        };
        if let Some(lock) = lock {
            lock.release().await?;
        }
        result
    }

    /// Execute a previously computed plan
    ///
    /// Fails if the state changed since the plan was computed.
    pub async fn apply_plan(&self, plan: &Plan) -> Result<ApplyReport> {
        let lock = self.store.acquire_lock().await?;
        let result = self.execute_checked(plan).await;
        if let Some(lock) = lock {
            lock.release().await?;
        }
        result
    }

    /// Destroy every recorded resource
    pub async fn destroy(&self) -> Result<ApplyReport> {
        self.apply(&DesiredConfig::new()).await
    }

    async fn execute_checked(&self, plan: &Plan) -> Result<ApplyReport> {
        let current = self.store.snapshot().await?.serial;
        if current != plan.state_serial {
            return Err(CloudError::StalePlan {
                planned: plan.state_serial,
                current,
            });
        }
        self.execute(plan).await
    }

    async fn execute(&self, plan: &Plan) -> Result<ApplyReport> {
        if !plan.has_changes() {
            info!("No changes. Infrastructure is up-to-date");
        }
        Executor::new(self.registry.clone(), self.store.clone())
            .with_settings(self.settings.executor.clone())
            .with_cancellation(self.cancel.clone())
            .execute(plan)
            .await
    }

    /// Replace recorded attributes with what the adapters report
    ///
    /// Returns the addresses whose current object no longer exists. Their
    /// entries stay in `snapshot` so deposed objects and undeclared
    /// resources are still cleaned up. The durable store is not modified.
    #[instrument(skip_all, fields(resources = snapshot.len()))]
    pub async fn refresh(&self, snapshot: &mut StateSnapshot) -> Result<BTreeSet<ResourceAddress>> {
        let retry = &self.settings.executor.retry;
        let addresses: Vec<_> = snapshot.resources.keys().cloned().collect();
        let mut absent = BTreeSet::new();

        for address in addresses {
            let Some(entry) = snapshot.get(&address) else {
                continue;
            };
            let adapter = self.registry.get(&entry.kind)?;
            let id = entry.id.clone();
            let limit = adapter.schema().timeouts.read;

            let adapter_ref = adapter.as_ref();
            let id_ref = id.as_str();
            let read = retry
                .retry(
                    &self.cancel,
                    |e| adapter_ref.is_transient(e),
                    move || async move {
                        match limit {
                            Some(limit) => tokio::time::timeout(limit, adapter_ref.read(id_ref))
                                .await
                                .unwrap_or(Err(AdapterError::Timeout(limit))),
                            None => adapter_ref.read(id_ref).await,
                        }
                    },
                )
                .await;

            match read {
                Ok((Some(attributes), _)) => {
                    debug!(address = %address, "Refreshed");
                    if let Some(entry) = snapshot.resources.get_mut(&address) {
                        entry.attributes = attributes;
                    }
                }
                Ok((None, _))
                | Err(RetryError::Failed {
                    error: AdapterError::NotFound(_),
                    ..
                }) => {
                    warn!(address = %address, id = %id, "Resource no longer exists");
                    absent.insert(address);
                }
                Err(e) => {
                    return Err(CloudError::Adapter {
                        address,
                        operation: "read",
                        source: e.error().clone(),
                    });
                }
            }
        }

        Ok(absent)
    }
}
