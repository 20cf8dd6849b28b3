// PostgreSQL implementation of RunStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocketship_contracts::{
    LogEntry, Run, RunFilter, RunOrder, RunOrderBy, RunStatus, StepRecord, StepStatus,
    TestExecution,
};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::store::{
    resolve_prefix, NewRun, RunStore, StoreError, StoredLog, StoredStep, MIN_PREFIX_LEN,
};

/// Run row from database
#[derive(Debug, Clone, FromRow)]
struct RunRow {
    id: Uuid,
    project_id: String,
    source: String,
    branch: Option<String>,
    trigger: Option<String>,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    metadata_json: Option<serde_json::Value>,
}

impl RunRow {
    fn into_run(self) -> Run {
        Run {
            id: self.id,
            project_id: self.project_id,
            source: self.source,
            branch: self.branch,
            trigger: self.trigger,
            metadata: self.metadata_json.unwrap_or(serde_json::Value::Null),
            status: self.status.parse().unwrap_or(RunStatus::Pending),
            started_at: self.started_at,
            ended_at: self.ended_at,
            tests: vec![],
        }
    }
}

/// Test execution row from database
#[derive(Debug, Clone, FromRow)]
struct TestRow {
    id: Uuid,
    run_id: Uuid,
    workflow_id: String,
    name: String,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TestRow {
    fn into_execution(self) -> TestExecution {
        TestExecution {
            id: self.id,
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            name: self.name,
            status: self.status.parse().unwrap_or(RunStatus::Pending),
            started_at: self.started_at,
            ended_at: self.ended_at,
            steps: vec![],
        }
    }
}

/// Step row from database
#[derive(Debug, Clone, FromRow)]
struct StepRow {
    id: Uuid,
    run_id: Uuid,
    workflow_id: String,
    step_index: i32,
    name: String,
    plugin: String,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    assertions_passed: i32,
    assertions_failed: i32,
    error: Option<String>,
    request_json: Option<String>,
    response_json: Option<String>,
    assertions_json: Option<String>,
    variables_json: Option<String>,
    step_config_json: Option<String>,
    update_seq: i64,
}

impl StepRow {
    fn into_stored(self) -> StoredStep {
        StoredStep {
            id: self.id,
            update_seq: self.update_seq,
            record: StepRecord {
                run_id: self.run_id,
                workflow_id: self.workflow_id,
                step_index: self.step_index,
                name: self.name,
                plugin: self.plugin,
                status: self.status.parse().unwrap_or(StepStatus::Pending),
                started_at: self.started_at,
                ended_at: self.ended_at,
                duration_ms: self.duration_ms,
                error_message: self.error,
                assertions_passed: self.assertions_passed,
                assertions_failed: self.assertions_failed,
                request: self.request_json,
                response: self.response_json,
                assertions: self.assertions_json,
                variables: self.variables_json,
                step_config: self.step_config_json,
            },
        }
    }
}

/// Log row from database
#[derive(Debug, Clone, FromRow)]
struct LogRow {
    id: i64,
    run_id: Uuid,
    workflow_id: String,
    test_name: Option<String>,
    step_name: Option<String>,
    message: String,
    color: Option<String>,
    bold: bool,
    ts: DateTime<Utc>,
}

impl LogRow {
    fn into_stored(self) -> StoredLog {
        StoredLog {
            id: self.id,
            entry: LogEntry {
                run_id: self.run_id,
                workflow_id: self.workflow_id,
                test_name: self.test_name,
                step_name: self.step_name,
                message: self.message,
                color: self.color,
                bold: self.bold,
                timestamp: self.ts,
            },
        }
    }
}

const RUN_COLUMNS: &str =
    r#"id, project_id, source, branch, "trigger", status, started_at, ended_at, metadata_json"#;

/// PostgreSQL-backed run store
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations (forward-only)
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn assemble(&self, run_id: Uuid) -> Result<Run, StoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

        let mut run = row.into_run();

        let tests = sqlx::query_as::<_, TestRow>(
            r#"
            SELECT id, run_id, workflow_id, name, status, started_at, ended_at
            FROM test_executions
            WHERE run_id = $1
            ORDER BY workflow_id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let steps = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, run_id, workflow_id, step_index, name, plugin, status,
                   started_at, ended_at, duration_ms, assertions_passed,
                   assertions_failed, error, request_json, response_json,
                   assertions_json, variables_json, step_config_json, update_seq
            FROM steps
            WHERE run_id = $1
            ORDER BY workflow_id, step_index
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut executions: Vec<TestExecution> =
            tests.into_iter().map(TestRow::into_execution).collect();
        for step in steps {
            let stored = step.into_stored();
            if let Some(test) = executions
                .iter_mut()
                .find(|t| t.workflow_id == stored.record.workflow_id)
            {
                test.steps.push(stored.record);
            }
        }

        run.tests = executions;
        Ok(run)
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn create_run(&self, input: NewRun) -> Result<Run, StoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO runs (id, project_id, source, branch, "trigger", status, metadata_json)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6)
            RETURNING {}
            "#,
            RUN_COLUMNS
        ))
        .bind(Uuid::now_v7())
        .bind(&input.project_id)
        .bind(&input.source)
        .bind(&input.branch)
        .bind(&input.trigger)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_run())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $2, ended_at = COALESCE($3, ended_at)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.to_string())
        .bind(ended_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Run, StoreError> {
        self.assemble(run_id).await
    }

    async fn find_run(&self, id_or_prefix: &str) -> Result<Run, StoreError> {
        if let Ok(id) = Uuid::parse_str(id_or_prefix) {
            return self.assemble(id).await;
        }

        let needle = id_or_prefix.to_lowercase();
        if needle.len() < MIN_PREFIX_LEN {
            return Err(StoreError::InvalidIdentifier(id_or_prefix.to_string()));
        }

        let candidates: Vec<Uuid> = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM runs WHERE id::text LIKE $1 LIMIT 2",
        )
        .bind(format!("{}%", needle))
        .fetch_all(&self.pool)
        .await?;

        let id = resolve_prefix(id_or_prefix, &candidates)?;
        self.assemble(id).await
    }

    async fn list_runs(
        &self,
        filter: &RunFilter,
        order: RunOrder,
        limit: Option<i64>,
    ) -> Result<Vec<Run>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM runs WHERE TRUE",
            RUN_COLUMNS
        ));

        if let Some(project_id) = &filter.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(source) = &filter.source {
            builder.push(" AND source = ").push_bind(source);
        }
        if let Some(branch) = &filter.branch {
            builder.push(" AND branch = ").push_bind(branch);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        if let Some(since) = filter.since {
            builder.push(" AND started_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            builder.push(" AND started_at <= ").push_bind(until);
        }

        builder.push(match (order.order_by, order.ascending) {
            (RunOrderBy::StartedAt, false) => " ORDER BY started_at DESC",
            (RunOrderBy::StartedAt, true) => " ORDER BY started_at ASC",
            (RunOrderBy::Duration, false) => {
                " ORDER BY COALESCE(ended_at - started_at, INTERVAL '0') DESC"
            }
            (RunOrderBy::Duration, true) => {
                " ORDER BY COALESCE(ended_at - started_at, INTERVAL '0') ASC"
            }
        });

        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows: Vec<RunRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RunRow::into_run).collect())
    }

    async fn upsert_test(&self, execution: TestExecution) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO test_executions (id, run_id, workflow_id, name, status, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_id, workflow_id) DO UPDATE
            SET status = EXCLUDED.status,
                ended_at = EXCLUDED.ended_at
            RETURNING id
            "#,
        )
        .bind(execution.id)
        .bind(execution.run_id)
        .bind(&execution.workflow_id)
        .bind(&execution.name)
        .bind(execution.status.to_string())
        .bind(execution.started_at)
        .bind(execution.ended_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn upsert_step(&self, record: StepRecord) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO steps (
                id, run_id, workflow_id, step_index, name, plugin, status,
                started_at, ended_at, duration_ms, assertions_passed,
                assertions_failed, error, request_json, response_json,
                assertions_json, variables_json, step_config_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (run_id, workflow_id, step_index) DO UPDATE
            SET status = EXCLUDED.status,
                ended_at = EXCLUDED.ended_at,
                duration_ms = EXCLUDED.duration_ms,
                assertions_passed = EXCLUDED.assertions_passed,
                assertions_failed = EXCLUDED.assertions_failed,
                error = EXCLUDED.error,
                request_json = COALESCE(EXCLUDED.request_json, steps.request_json),
                response_json = COALESCE(EXCLUDED.response_json, steps.response_json),
                assertions_json = COALESCE(EXCLUDED.assertions_json, steps.assertions_json),
                variables_json = COALESCE(EXCLUDED.variables_json, steps.variables_json),
                step_config_json = COALESCE(EXCLUDED.step_config_json, steps.step_config_json),
                update_seq = nextval('step_update_seq')
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(record.run_id)
        .bind(&record.workflow_id)
        .bind(record.step_index)
        .bind(&record.name)
        .bind(&record.plugin)
        .bind(record.status.to_string())
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(record.duration_ms)
        .bind(record.assertions_passed)
        .bind(record.assertions_failed)
        .bind(&record.error_message)
        .bind(&record.request)
        .bind(&record.response)
        .bind(&record.assertions)
        .bind(&record.variables)
        .bind(&record.step_config)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn append_log(&self, entry: LogEntry) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO logs (run_id, workflow_id, test_name, step_name, message, color, bold, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(entry.run_id)
        .bind(&entry.workflow_id)
        .bind(&entry.test_name)
        .bind(&entry.step_name)
        .bind(&entry.message)
        .bind(&entry.color)
        .bind(entry.bold)
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list_steps_since(
        &self,
        run_id: Uuid,
        after_seq: i64,
    ) -> Result<Vec<StoredStep>, StoreError> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, run_id, workflow_id, step_index, name, plugin, status,
                   started_at, ended_at, duration_ms, assertions_passed,
                   assertions_failed, error, request_json, response_json,
                   assertions_json, variables_json, step_config_json, update_seq
            FROM steps
            WHERE run_id = $1 AND update_seq > $2
            ORDER BY update_seq
            "#,
        )
        .bind(run_id)
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StepRow::into_stored).collect())
    }

    async fn list_logs_since(
        &self,
        run_id: Uuid,
        after_id: i64,
    ) -> Result<Vec<StoredLog>, StoreError> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, run_id, workflow_id, test_name, step_name, message, color, bold, ts
            FROM logs
            WHERE run_id = $1 AND id > $2
            ORDER BY id
            "#,
        )
        .bind(run_id)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(LogRow::into_stored).collect())
    }
}
