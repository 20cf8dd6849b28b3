// In-memory implementation of RunStore
// Backs tests and embedded single-process deployments with the same
// semantics as the PostgreSQL implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rocketship_contracts::{
    LogEntry, Run, RunFilter, RunOrder, RunOrderBy, RunStatus, StepRecord, TestExecution,
};
use uuid::Uuid;

use crate::store::{
    resolve_prefix, NewRun, RunStore, StoreError, StoredLog, StoredStep, MIN_PREFIX_LEN,
};

struct RunRow {
    run: Run,
}

/// In-memory run store
pub struct MemoryRunStore {
    runs: RwLock<HashMap<Uuid, RunRow>>,
    tests: RwLock<HashMap<(Uuid, String), TestExecution>>,
    steps: RwLock<HashMap<(Uuid, String, i32), StoredStep>>,
    logs: RwLock<Vec<StoredLog>>,
    step_seq: AtomicI64,
    log_seq: AtomicI64,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            tests: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            logs: RwLock::new(Vec::new()),
            step_seq: AtomicI64::new(0),
            log_seq: AtomicI64::new(0),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    fn assemble(&self, run_id: Uuid) -> Result<Run, StoreError> {
        let runs = self.runs.read();
        let row = runs
            .get(&run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        let mut run = row.run.clone();

        let mut tests: Vec<TestExecution> = self
            .tests
            .read()
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        tests.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));

        let steps = self.steps.read();
        for test in &mut tests {
            let mut records: Vec<StepRecord> = steps
                .values()
                .filter(|s| s.record.run_id == run_id && s.record.workflow_id == test.workflow_id)
                .map(|s| s.record.clone())
                .collect();
            records.sort_by_key(|r| r.step_index);
            test.steps = records;
        }

        run.tests = tests;
        Ok(run)
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, input: NewRun) -> Result<Run, StoreError> {
        let run = Run {
            id: Uuid::now_v7(),
            project_id: input.project_id,
            source: input.source,
            branch: input.branch,
            trigger: input.trigger,
            metadata: input.metadata,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            tests: vec![],
        };
        self.runs
            .write()
            .insert(run.id, RunRow { run: run.clone() });
        Ok(run)
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let row = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        row.run.status = status;
        if ended_at.is_some() {
            row.run.ended_at = ended_at;
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Run, StoreError> {
        self.assemble(run_id)
    }

    async fn find_run(&self, id_or_prefix: &str) -> Result<Run, StoreError> {
        if let Ok(id) = Uuid::parse_str(id_or_prefix) {
            return self.assemble(id);
        }

        let needle = id_or_prefix.to_lowercase();
        if needle.len() < MIN_PREFIX_LEN {
            return Err(StoreError::InvalidIdentifier(id_or_prefix.to_string()));
        }

        let candidates: Vec<Uuid> = self
            .runs
            .read()
            .keys()
            .filter(|id| id.to_string().starts_with(&needle))
            .copied()
            .collect();

        let id = resolve_prefix(id_or_prefix, &candidates)?;
        self.assemble(id)
    }

    async fn list_runs(
        &self,
        filter: &RunFilter,
        order: RunOrder,
        limit: Option<i64>,
    ) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.read();
        let mut matches: Vec<Run> = runs
            .values()
            .map(|row| row.run.clone())
            .filter(|run| {
                filter
                    .project_id
                    .as_ref()
                    .is_none_or(|p| &run.project_id == p)
                    && filter.source.as_ref().is_none_or(|s| &run.source == s)
                    && filter
                        .branch
                        .as_ref()
                        .is_none_or(|b| run.branch.as_ref() == Some(b))
                    && filter.status.is_none_or(|s| run.status == s)
                    && filter.since.is_none_or(|t| run.started_at >= t)
                    && filter.until.is_none_or(|t| run.started_at <= t)
            })
            .collect();

        matches.sort_by(|a, b| {
            let ordering = match order.order_by {
                RunOrderBy::StartedAt => a.started_at.cmp(&b.started_at),
                RunOrderBy::Duration => duration_of(a).cmp(&duration_of(b)),
            };
            if order.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        if let Some(limit) = limit {
            matches.truncate(limit.max(0) as usize);
        }
        Ok(matches)
    }

    async fn upsert_test(&self, execution: TestExecution) -> Result<Uuid, StoreError> {
        let key = (execution.run_id, execution.workflow_id.clone());
        let mut tests = self.tests.write();
        match tests.get_mut(&key) {
            Some(existing) => {
                existing.status = execution.status;
                existing.ended_at = execution.ended_at;
                Ok(existing.id)
            }
            None => {
                let id = execution.id;
                tests.insert(key, execution);
                Ok(id)
            }
        }
    }

    async fn upsert_step(&self, record: StepRecord) -> Result<Uuid, StoreError> {
        let key = (
            record.run_id,
            record.workflow_id.clone(),
            record.step_index,
        );
        let seq = self.step_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut steps = self.steps.write();
        match steps.get_mut(&key) {
            Some(existing) => {
                existing.record = record;
                existing.update_seq = seq;
                Ok(existing.id)
            }
            None => {
                let id = Uuid::now_v7();
                steps.insert(
                    key,
                    StoredStep {
                        id,
                        update_seq: seq,
                        record,
                    },
                );
                Ok(id)
            }
        }
    }

    async fn append_log(&self, entry: LogEntry) -> Result<i64, StoreError> {
        let id = self.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.logs.write().push(StoredLog { id, entry });
        Ok(id)
    }

    async fn list_steps_since(
        &self,
        run_id: Uuid,
        after_seq: i64,
    ) -> Result<Vec<StoredStep>, StoreError> {
        let mut out: Vec<StoredStep> = self
            .steps
            .read()
            .values()
            .filter(|s| s.record.run_id == run_id && s.update_seq > after_seq)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.update_seq);
        Ok(out)
    }

    async fn list_logs_since(
        &self,
        run_id: Uuid,
        after_id: i64,
    ) -> Result<Vec<StoredLog>, StoreError> {
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|l| l.entry.run_id == run_id && l.id > after_id)
            .cloned()
            .collect())
    }
}

fn duration_of(run: &Run) -> chrono::Duration {
    match run.ended_at {
        Some(ended) => ended - run.started_at,
        None => chrono::Duration::zero(),
    }
}
