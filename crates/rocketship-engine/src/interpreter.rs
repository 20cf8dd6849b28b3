// Test workflow interpreter
//
// Executes one test as a deterministic sequence: init steps, main steps,
// then cleanup (on_failure iff the test failed, always unconditionally)
// on a disconnected context. Each step follows the same algorithm
// regardless of phase: snapshot state, report RUNNING, resolve templates,
// dispatch under timeout/retry, merge saved values, report the terminal
// record with full snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rocketship_contracts::{
    LogEntry, RunStatus, SavedValue, StepRecord, StepStatus, VariablesSnapshot,
};
use rocketship_dsl::{parse_duration, RetryConfig, Step, TemplateContext, Test};
use rocketship_durable::{
    deterministic_json, ActivityError, ActivityOptions, FailureKind, RetryPolicy,
    WorkflowContext,
};
use rocketship_plugins::{
    apply_save_specs, plugin_activity_type, PluginInput, PluginOutput, PluginRegistry, RunRef,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clean_error::clean_error_message;
use crate::reporters::{forward_log, report_step};
use crate::state::RuntimeState;

/// Input for one test execution; serializable so the substrate can
/// journal it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestWorkflowInput {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub test: Test,
    /// Flattened suite vars (stringified)
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Environment mapping for `{{ .env.* }}`
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Suite globals snapshot copied into fresh runtime state
    #[serde(default)]
    pub globals: BTreeMap<String, String>,
    #[serde(default)]
    pub suite_openapi: Option<Value>,
}

/// Terminal result of one test execution
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub status: RunStatus,
    /// Clean message of the failure that ended init/main, if any
    pub error: Option<String>,
    /// First cleanup failure, recorded but never status-affecting
    pub cleanup_error: Option<String>,
}

#[derive(Debug)]
struct StepFailure {
    message: String,
    canceled: bool,
}

/// Result of a successful dispatch, before record assembly
#[derive(Debug, Default)]
struct StepSuccess {
    output: PluginOutput,
    saved: Vec<SavedValue>,
}

/// One interpreter instance per test execution
///
/// Owns the test's runtime state exclusively; there is no concurrent
/// mutation by design.
pub struct TestWorkflow {
    plugins: Arc<PluginRegistry>,
    input: TestWorkflowInput,
    state: RuntimeState,
    next_step_index: i32,
}

impl TestWorkflow {
    pub fn new(plugins: Arc<PluginRegistry>, input: TestWorkflowInput) -> Self {
        let mut state = RuntimeState::new();
        state.merge(input.globals.clone());
        Self {
            plugins,
            input,
            state,
            next_step_index: 0,
        }
    }

    /// Current runtime state, for coordinator-level hooks that seal globals
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Drive the test to completion
    pub async fn run(&mut self, ctx: Arc<dyn WorkflowContext>) -> TestOutcome {
        info!(
            workflow_id = %self.input.workflow_id,
            test = %self.input.test.name,
            "test execution starting"
        );

        let mut failure: Option<StepFailure> = None;

        let init_steps = self.input.test.init.clone();
        for step in &init_steps {
            if let Err(f) = self.execute_step(&ctx, step).await {
                failure = Some(f);
                break;
            }
        }

        if failure.is_none() {
            let main_steps = self.input.test.steps.clone();
            for step in &main_steps {
                if let Err(f) = self.execute_step(&ctx, step).await {
                    failure = Some(f);
                    break;
                }
            }
        }

        // Cleanup runs on a disconnected context: cancellation or timeout
        // of the test must not skip it
        let cleanup_ctx = ctx.new_disconnected();
        let mut cleanup_error: Option<String> = None;

        if let Some(cleanup) = self.input.test.cleanup.clone() {
            if failure.is_some() {
                for step in &cleanup.on_failure {
                    if let Err(f) = self.execute_step(&cleanup_ctx, step).await {
                        cleanup_error.get_or_insert(f.message);
                    }
                }
            }
            for step in &cleanup.always {
                if let Err(f) = self.execute_step(&cleanup_ctx, step).await {
                    cleanup_error.get_or_insert(f.message);
                }
            }
        }

        let status = match &failure {
            None => RunStatus::Passed,
            Some(f) if f.canceled => RunStatus::Canceled,
            Some(_) => RunStatus::Failed,
        };

        info!(
            workflow_id = %self.input.workflow_id,
            test = %self.input.test.name,
            %status,
            "test execution finished"
        );

        TestOutcome {
            status,
            error: failure.map(|f| f.message),
            cleanup_error,
        }
    }

    /// Run a step sequence outside the normal phase schedule
    ///
    /// Used by the coordinator for suite-level hooks: init aborts on the
    /// first failure, cleanup keeps going and memoizes the first error.
    pub async fn run_hook_steps(
        &mut self,
        ctx: &Arc<dyn WorkflowContext>,
        steps: &[Step],
        abort_on_failure: bool,
    ) -> Option<String> {
        let mut first_error: Option<String> = None;
        for step in steps {
            if let Err(failure) = self.execute_step(ctx, step).await {
                first_error.get_or_insert(failure.message);
                if abort_on_failure {
                    break;
                }
            }
        }
        first_error
    }

    /// The phase-agnostic per-step algorithm
    async fn execute_step(
        &mut self,
        ctx: &Arc<dyn WorkflowContext>,
        step: &Step,
    ) -> Result<(), StepFailure> {
        let step_index = self.next_step_index;
        self.next_step_index += 1;

        let started_at = ctx.now();
        let pre_state = self.state.snapshot();
        let step_config = deterministic_json(&Value::Object(
            step.config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ));

        let mut record = StepRecord {
            run_id: self.input.run_id,
            workflow_id: self.input.workflow_id.clone(),
            step_index,
            name: step.name.clone(),
            plugin: step.plugin.clone(),
            status: StepStatus::Running,
            started_at,
            ended_at: None,
            duration_ms: None,
            error_message: None,
            assertions_passed: 0,
            assertions_failed: 0,
            request: None,
            response: None,
            assertions: None,
            variables: None,
            step_config: Some(step_config),
        };
        report_step(ctx.as_ref(), &record).await;

        debug!(
            workflow_id = %self.input.workflow_id,
            step = %step.name,
            step_index,
            "dispatching step"
        );

        let outcome = self.dispatch(ctx, step, &pre_state).await;

        let ended_at = ctx.now();
        record.ended_at = Some(ended_at);
        record.duration_ms = Some((ended_at - started_at).num_milliseconds());

        match outcome {
            Ok(success) => {
                record.status = StepStatus::Passed;
                self.fill_success_record(&mut record, &success, &pre_state);

                self.state.merge(
                    success
                        .saved
                        .iter()
                        .map(|s| (s.name.clone(), s.value.clone())),
                );

                if let Some(message) = &success.output.log_message {
                    let entry = LogEntry {
                        run_id: self.input.run_id,
                        workflow_id: self.input.workflow_id.clone(),
                        test_name: Some(self.input.test.name.clone()),
                        step_name: Some(step.name.clone()),
                        message: message.clone(),
                        color: success.output.log_color.clone(),
                        bold: success.output.log_bold,
                        timestamp: ctx.now(),
                    };
                    forward_log(ctx.as_ref(), &entry).await;
                }

                report_step(ctx.as_ref(), &record).await;
                Ok(())
            }
            Err(error) => {
                let clean = clean_error_message(&error.message);
                record.status = StepStatus::Failed;
                record.error_message = Some(clean.clone());
                self.fill_failure_record(&mut record, &error, &pre_state);

                report_step(ctx.as_ref(), &record).await;
                Err(StepFailure {
                    message: clean,
                    canceled: error.kind == FailureKind::Canceled,
                })
            }
        }
    }

    /// Resolve templates and dispatch to the plugin (or sleep natively)
    async fn dispatch(
        &self,
        ctx: &Arc<dyn WorkflowContext>,
        step: &Step,
        pre_state: &BTreeMap<String, String>,
    ) -> Result<StepSuccess, ActivityError> {
        let template_ctx = TemplateContext::new()
            .with_vars(self.input.vars.clone())
            .with_env(self.input.env.clone())
            .with_runtime(pre_state.clone());

        let raw_config = Value::Object(
            step.config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let resolved = template_ctx
            .resolve_value(&raw_config)
            .map_err(|e| ActivityError::permanent(e.to_string()))?;
        let resolved_config: BTreeMap<String, Value> = resolved
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        // The delay built-in sleeps on the durable clock; a long wait must
        // not occupy a worker
        if self.plugins.is_workflow_native(&step.plugin) {
            return self.run_native(ctx, step, &resolved_config).await;
        }

        let plugin_input = PluginInput {
            name: step.name.clone(),
            plugin: step.plugin.clone(),
            config: resolved_config,
            state: pre_state.clone(),
            vars: self.input.vars.clone(),
            run: RunRef {
                id: self.input.run_id.to_string(),
            },
            assertions: step.assertions.clone(),
            save: step.save.clone(),
            suite_openapi: self.input.suite_openapi.clone(),
        };

        let timeout = match &step.timeout {
            Some(raw) => parse_duration(raw)
                .map_err(|e| ActivityError::permanent(e.to_string()))?,
            None => rocketship_durable::context::DEFAULT_ACTIVITY_TIMEOUT,
        };
        let options = ActivityOptions::default()
            .with_retry(derive_retry_policy(step.retry.as_ref())?)
            .with_start_to_close_timeout(timeout);

        let result = ctx
            .execute_activity(
                &plugin_activity_type(&step.plugin),
                serde_json::to_value(&plugin_input)
                    .map_err(|e| ActivityError::permanent(e.to_string()))?,
                options,
            )
            .await?;

        let output: PluginOutput = serde_json::from_value(result).map_err(|e| {
            ActivityError::permanent(format!(
                "plugin '{}' returned an invalid envelope: {}",
                step.plugin, e
            ))
        })?;

        let saved = self.collect_saved(step, &output)?;
        Ok(StepSuccess { output, saved })
    }

    /// Run a workflow-native plugin (delay)
    async fn run_native(
        &self,
        ctx: &Arc<dyn WorkflowContext>,
        step: &Step,
        config: &BTreeMap<String, Value>,
    ) -> Result<StepSuccess, ActivityError> {
        let raw = config
            .get("duration")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ActivityError::permanent(format!(
                    "{}: config requires a string 'duration'",
                    step.plugin
                ))
            })?;
        let duration = parse_duration(raw)
            .map_err(|e| ActivityError::permanent(e.to_string()))?;

        ctx.sleep(duration).await?;
        Ok(StepSuccess::default())
    }

    /// Assemble the saved-value list with extractor provenance
    ///
    /// Plugins that extracted for themselves return `saved` directly and
    /// we annotate from their save specs; otherwise the save specs are
    /// applied here against the response snapshot.
    fn collect_saved(
        &self,
        step: &Step,
        output: &PluginOutput,
    ) -> Result<Vec<SavedValue>, ActivityError> {
        if !output.saved.is_empty() {
            return Ok(output
                .saved
                .iter()
                .map(|(key, value)| SavedValue {
                    name: key.clone(),
                    value: value.clone(),
                    extractor: extractor_for(step, key).to_string(),
                })
                .collect());
        }

        if step.save.is_empty() {
            return Ok(vec![]);
        }

        let (body, headers) = split_response_snapshot(
            output
                .ui_payload
                .as_ref()
                .and_then(|payload| payload.response.as_ref()),
        );

        let extractions = apply_save_specs(&step.save, body.as_ref(), headers.as_ref())
            .map_err(|e| e.into_activity_error())?;

        Ok(extractions
            .into_iter()
            .map(|extraction| SavedValue {
                name: extraction.key,
                value: extraction.value,
                extractor: extraction.extractor.to_string(),
            })
            .collect())
    }

    fn variables_snapshot(
        &self,
        pre_state: &BTreeMap<String, String>,
        saved: &[SavedValue],
    ) -> String {
        let snapshot = VariablesSnapshot {
            config: self.input.vars.clone(),
            runtime: pre_state.clone(),
            saved: saved.to_vec(),
        };
        deterministic_json(&serde_json::to_value(&snapshot).unwrap_or(Value::Null))
    }

    fn fill_success_record(
        &self,
        record: &mut StepRecord,
        success: &StepSuccess,
        pre_state: &BTreeMap<String, String>,
    ) {
        let results = &success.output.assertion_results;
        record.assertions_passed = results.iter().filter(|r| r.passed).count() as i32;
        record.assertions_failed = results.iter().filter(|r| !r.passed).count() as i32;

        if let Some(payload) = &success.output.ui_payload {
            record.request = payload.request.as_ref().map(deterministic_json);
            record.response = payload.response.as_ref().map(deterministic_json);
        }
        if !results.is_empty() {
            record.assertions = serde_json::to_value(results)
                .ok()
                .map(|v| deterministic_json(&v));
        }
        record.variables = Some(self.variables_snapshot(pre_state, &success.saved));
    }

    /// Pull application-error details so assertion failures still carry
    /// their request/response snapshots
    fn fill_failure_record(
        &self,
        record: &mut StepRecord,
        error: &ActivityError,
        pre_state: &BTreeMap<String, String>,
    ) {
        if let Some(details) = &error.details {
            record.request = details.get("request").map(deterministic_json);
            record.response = details.get("response").map(deterministic_json);
            if let Some(results) = details.get("assertion_results") {
                record.assertions = Some(deterministic_json(results));
                if let Some(items) = results.as_array() {
                    for item in items {
                        let passed = item.get("passed").and_then(|p| p.as_bool()).unwrap_or(false);
                        if passed {
                            record.assertions_passed += 1;
                        } else {
                            record.assertions_failed += 1;
                        }
                    }
                }
            }
        }
        record.variables = Some(self.variables_snapshot(pre_state, &[]));
    }
}

/// Map the DSL retry block onto a substrate policy
///
/// No block means exactly one attempt. Jitter stays at zero so replayed
/// executions observe identical scheduling decisions.
fn derive_retry_policy(config: Option<&RetryConfig>) -> Result<RetryPolicy, ActivityError> {
    let Some(config) = config else {
        return Ok(RetryPolicy::single_attempt());
    };

    let first_delay = match &config.initial_interval {
        Some(raw) => parse_duration(raw)
            .map_err(|e| ActivityError::permanent(e.to_string()))?,
        None => Duration::from_secs(1),
    };
    let cap = match &config.maximum_interval {
        Some(raw) => parse_duration(raw)
            .map_err(|e| ActivityError::permanent(e.to_string()))?,
        None => first_delay * 100,
    };

    let mut policy = RetryPolicy::geometric(first_delay)
        .with_attempts(config.maximum_attempts.unwrap_or(1).max(1))
        .with_delay_cap(cap)
        .with_growth(config.backoff_coefficient.unwrap_or(2.0));
    policy.blocked_error_types = config.non_retryable_errors.iter().cloned().collect();

    Ok(policy)
}

/// Split a response snapshot `{status, headers, body}` into the parts
/// save extraction needs; a bare value is treated as the body itself
fn split_response_snapshot(
    response: Option<&Value>,
) -> (Option<Value>, Option<BTreeMap<String, String>>) {
    let Some(response) = response else {
        return (None, None);
    };

    match response.as_object() {
        Some(map) if map.contains_key("body") || map.contains_key("headers") => {
            let body = map.get("body").cloned();
            let headers = map.get("headers").and_then(|h| h.as_object()).map(|h| {
                h.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            });
            (body, headers)
        }
        _ => (Some(response.clone()), None),
    }
}

/// Extractor annotation for a plugin-returned saved key
fn extractor_for(step: &Step, key: &str) -> &'static str {
    match step.save.iter().find(|spec| spec.save_as == key) {
        Some(spec) if spec.json_path.is_some() => "json_path",
        Some(spec) if spec.header.is_some() => "header",
        _ => "auto",
    }
}
