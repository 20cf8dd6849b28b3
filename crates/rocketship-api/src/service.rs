// Engine service wiring
//
// Owns the run store, the in-process substrate, and the plugin registry;
// turns a CreateRun request into a persisted run plus a launched suite
// coordinator. The reporters write back through StoreSink, so every step
// transition lands in the store the moment the interpreter emits it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rocketship_contracts::{LogEntry, Run, RunContext, StepRecord, TestExecution};
use rocketship_dsl::{validate, Suite, ValidationErrors};
use rocketship_durable::{ActivityRegistry, LocalRuntime};
use rocketship_engine::{register_reporters, ReportSink, RunConfig, SinkError, SuiteCoordinator};
use rocketship_plugins::PluginRegistry;
use rocketship_store::{NewRun, RunStore, StoreError};
use tracing::{error, info};
use uuid::Uuid;

/// Error from run submission
#[derive(Debug, thiserror::Error)]
pub enum CreateRunError {
    /// Suite failed validation; no run was created
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reporter sink writing straight to the run store
struct StoreSink {
    store: Arc<dyn RunStore>,
}

#[async_trait]
impl ReportSink for StoreSink {
    async fn upsert_step(&self, record: StepRecord) -> Result<(), SinkError> {
        self.store
            .upsert_step(record)
            .await
            .map(|_| ())
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), SinkError> {
        self.store
            .append_log(entry)
            .await
            .map(|_| ())
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn upsert_test(&self, execution: TestExecution) -> Result<(), SinkError> {
        self.store
            .upsert_test(execution)
            .await
            .map(|_| ())
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// The engine facade behind the HTTP surface
pub struct EngineService {
    store: Arc<dyn RunStore>,
    runtime: Arc<LocalRuntime>,
    plugins: Arc<PluginRegistry>,
    env: BTreeMap<String, String>,
}

impl EngineService {
    pub fn new(
        store: Arc<dyn RunStore>,
        plugins: PluginRegistry,
        env: BTreeMap<String, String>,
    ) -> Arc<Self> {
        let mut activities = ActivityRegistry::new();
        plugins.install(&mut activities);
        register_reporters(
            &mut activities,
            Arc::new(StoreSink {
                store: store.clone(),
            }),
        );

        Arc::new(Self {
            store,
            runtime: LocalRuntime::new(activities),
            plugins: Arc::new(plugins),
            env,
        })
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Validate a suite, persist a run, and launch its coordinator
    ///
    /// Returns as soon as the run exists; execution proceeds in the
    /// background and transitions the run to its terminal status.
    pub async fn create_run(
        self: &Arc<Self>,
        suite: Suite,
        context: RunContext,
        config: RunConfig,
    ) -> Result<Run, CreateRunError> {
        validate(&suite, self.plugins.as_ref())?;

        let run = self
            .store
            .create_run(NewRun {
                project_id: context.project_id.unwrap_or_else(|| "default".to_string()),
                source: context.source.unwrap_or_else(|| "cli-local".to_string()),
                branch: context.branch,
                trigger: context.trigger,
                metadata: context.metadata.unwrap_or(serde_json::Value::Null),
            })
            .await?;

        self.store
            .update_run_status(run.id, rocketship_contracts::RunStatus::Running, None)
            .await?;

        info!(run_id = %run.id, suite = %suite.name, "run created, launching coordinator");

        let service = self.clone();
        tokio::spawn(async move {
            let coordinator =
                SuiteCoordinator::new(service.runtime.clone(), service.plugins.clone());
            let summary = coordinator
                .execute(run.id, &suite, service.env.clone(), config)
                .await;

            if let Err(e) = service
                .store
                .update_run_status(run.id, summary.status, Some(Utc::now()))
                .await
            {
                error!(run_id = %run.id, error = %e, "failed to persist terminal run status");
            }
        });

        Ok(run)
    }

    /// Cancel a run: signal every workflow in its family
    ///
    /// Main phases abort with canceled errors; cleanup phases run on
    /// their disconnected contexts regardless.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<usize, StoreError> {
        // Ensure the run exists before signaling
        self.store.get_run(run_id).await?;
        let signaled = self.runtime.cancel_prefix(&run_id.to_string());
        info!(%run_id, signaled, "cancellation requested");
        Ok(signaled)
    }
}
