// Suite coordinator
//
// The outer workflow: resolves suite vars once at load, runs suite init
// once and seals the result into the write-once SuiteGlobals, launches one
// interpreter execution per test (parallel or sequential), then drives
// suite cleanup on a disconnected context. Each test receives an
// immutable copy of the globals, so nothing a test saves is observable to
// its siblings.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use rocketship_contracts::{RunStatus, TestExecution};
use rocketship_dsl::{Suite, TemplateContext, TemplateError, Test};
use rocketship_durable::LocalRuntime;
use rocketship_plugins::PluginRegistry;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::interpreter::{TestOutcome, TestWorkflow, TestWorkflowInput};
use crate::reporters::report_test;
use crate::state::SuiteGlobals;

/// Execution configuration for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Run tests concurrently; each owns its state so ordering across
    /// tests is unobservable
    pub parallel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// Result of one test launch
#[derive(Debug, Clone)]
pub struct TestResult {
    pub workflow_id: String,
    pub name: String,
    pub outcome: TestOutcome,
}

/// Terminal summary of a suite run
#[derive(Debug, Clone)]
pub struct SuiteRunSummary {
    pub status: RunStatus,
    pub tests: Vec<TestResult>,
    /// Suite-level failure (vars resolution or suite init), if any
    pub error: Option<String>,
}

/// Workflow id of the coordinator itself
pub fn coordinator_workflow_id(run_id: Uuid) -> String {
    format!("{}-suite", run_id)
}

/// Workflow id of one test execution
pub fn test_workflow_id(run_id: Uuid, index: usize) -> String {
    format!("{}-test-{}", run_id, index)
}

/// Drives suite executions over the substrate
pub struct SuiteCoordinator {
    runtime: Arc<LocalRuntime>,
    plugins: Arc<PluginRegistry>,
}

impl SuiteCoordinator {
    pub fn new(runtime: Arc<LocalRuntime>, plugins: Arc<PluginRegistry>) -> Self {
        Self { runtime, plugins }
    }

    /// Execute a suite as one run
    pub async fn execute(
        &self,
        run_id: Uuid,
        suite: &Suite,
        env: BTreeMap<String, String>,
        config: RunConfig,
    ) -> SuiteRunSummary {
        let vars = suite.flattened_vars();

        // Config vars are resolved once at suite load; env and runtime
        // references survive for per-step resolution
        let suite = match resolve_config_vars(suite, &vars) {
            Ok(suite) => suite,
            Err(e) => {
                error!(%run_id, error = %e, "suite vars resolution failed");
                return SuiteRunSummary {
                    status: RunStatus::Failed,
                    tests: vec![],
                    error: Some(e.to_string()),
                };
            }
        };

        let coordinator_id = coordinator_workflow_id(run_id);
        let ctx = self.runtime.start_workflow(
            &coordinator_id,
            json!({ "run_id": run_id, "suite": suite.name }),
        );

        info!(%run_id, suite = %suite.name, tests = suite.tests.len(), "run starting");

        // One workflow carries both suite hook phases so step indexing and
        // runtime state stay continuous from init through cleanup
        let mut hooks_workflow = TestWorkflow::new(
            self.plugins.clone(),
            TestWorkflowInput {
                run_id,
                workflow_id: coordinator_id.clone(),
                test: empty_test("suite hooks"),
                vars: vars.clone(),
                env: env.clone(),
                globals: BTreeMap::new(),
                suite_openapi: suite.openapi.clone(),
            },
        );

        // Suite init runs exactly once, here; SuiteGlobals is write-once
        let mut globals = SuiteGlobals::empty();
        let mut suite_error: Option<String> = None;

        if !suite.init.is_empty() {
            suite_error = hooks_workflow
                .run_hook_steps(&ctx, &suite.init, true)
                .await;
            if suite_error.is_none() {
                globals = SuiteGlobals::from_state(hooks_workflow.state());
            }
        }

        let mut tests = Vec::new();
        if suite_error.is_none() {
            let launches = suite.tests.iter().enumerate().map(|(index, test)| {
                self.launch_test(run_id, index, test, &vars, &env, &globals, &suite)
            });

            if config.parallel {
                tests = join_all(launches).await;
            } else {
                for launch in launches {
                    tests.push(launch.await);
                }
            }
        }

        let any_failed = suite_error.is_some()
            || tests
                .iter()
                .any(|t| t.outcome.status != RunStatus::Passed);

        // Suite cleanup mirrors the per-test schedule, disconnected so a
        // canceled run still tears down what suite init created
        if let Some(cleanup) = &suite.cleanup {
            let cleanup_ctx = ctx.new_disconnected();
            if any_failed {
                hooks_workflow
                    .run_hook_steps(&cleanup_ctx, &cleanup.on_failure, false)
                    .await;
            }
            hooks_workflow
                .run_hook_steps(&cleanup_ctx, &cleanup.always, false)
                .await;
        }

        let status = aggregate_status(&suite_error, &tests);
        self.runtime.finish_workflow(
            &coordinator_id,
            match status {
                RunStatus::Passed => Ok(json!({ "status": status.to_string() })),
                RunStatus::Canceled => Err(rocketship_durable::ActivityError::canceled(
                    "run canceled".to_string(),
                )),
                _ => Err(rocketship_durable::ActivityError::permanent(
                    suite_error
                        .clone()
                        .unwrap_or_else(|| format!("run finished {}", status)),
                )),
            },
        );

        info!(%run_id, %status, "run finished");

        SuiteRunSummary {
            status,
            tests,
            error: suite_error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch_test(
        &self,
        run_id: Uuid,
        index: usize,
        test: &Test,
        vars: &BTreeMap<String, String>,
        env: &BTreeMap<String, String>,
        globals: &SuiteGlobals,
        suite: &Suite,
    ) -> TestResult {
        let workflow_id = test_workflow_id(run_id, index);
        let input = TestWorkflowInput {
            run_id,
            workflow_id: workflow_id.clone(),
            test: test.clone(),
            vars: vars.clone(),
            env: env.clone(),
            globals: globals.as_map().clone(),
            suite_openapi: suite.openapi.clone(),
        };

        let ctx = self.runtime.start_workflow(
            &workflow_id,
            serde_json::to_value(&input).unwrap_or(serde_json::Value::Null),
        );

        let mut execution = TestExecution {
            id: Uuid::now_v7(),
            run_id,
            workflow_id: workflow_id.clone(),
            name: test.name.clone(),
            status: RunStatus::Running,
            started_at: ctx.now(),
            ended_at: None,
            steps: vec![],
        };
        report_test(ctx.as_ref(), &execution).await;

        let mut workflow = TestWorkflow::new(self.plugins.clone(), input);
        let outcome = workflow.run(ctx.clone()).await;

        execution.status = outcome.status;
        execution.ended_at = Some(ctx.now());
        report_test(ctx.as_ref(), &execution).await;

        self.runtime.finish_workflow(
            &workflow_id,
            match outcome.status {
                RunStatus::Passed => Ok(json!({ "status": "PASSED" })),
                RunStatus::Canceled => Err(rocketship_durable::ActivityError::canceled(
                    outcome.error.clone().unwrap_or_default(),
                )),
                _ => Err(rocketship_durable::ActivityError::permanent(
                    outcome.error.clone().unwrap_or_default(),
                )),
            },
        );

        TestResult {
            workflow_id,
            name: test.name.clone(),
            outcome,
        }
    }
}

fn empty_test(name: &str) -> Test {
    Test {
        name: name.to_string(),
        init: vec![],
        steps: vec![],
        cleanup: None,
    }
}

/// Resolve `.vars` references in every step config, leaving env/runtime
/// references and escapes for dispatch time
fn resolve_config_vars(
    suite: &Suite,
    vars: &BTreeMap<String, String>,
) -> Result<Suite, TemplateError> {
    let ctx = TemplateContext::new().with_vars(vars.clone());
    let mut resolved = suite.clone();

    for step in resolved
        .init
        .iter_mut()
        .chain(resolved.tests.iter_mut().flat_map(|t| {
            t.init
                .iter_mut()
                .chain(t.steps.iter_mut())
                .chain(t.cleanup.iter_mut().flat_map(|c| {
                    c.on_failure.iter_mut().chain(c.always.iter_mut())
                }))
        }))
        .chain(resolved.cleanup.iter_mut().flat_map(|c| {
            c.on_failure.iter_mut().chain(c.always.iter_mut())
        }))
    {
        let raw = serde_json::Value::Object(
            step.config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let resolved_config = ctx.resolve_value_partial(&raw)?;
        if let Some(map) = resolved_config.as_object() {
            step.config = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
    }

    Ok(resolved)
}

fn aggregate_status(suite_error: &Option<String>, tests: &[TestResult]) -> RunStatus {
    if tests
        .iter()
        .any(|t| t.outcome.status == RunStatus::Canceled)
    {
        return RunStatus::Canceled;
    }
    if suite_error.is_some()
        || tests.iter().any(|t| t.outcome.status == RunStatus::Failed)
    {
        return RunStatus::Failed;
    }
    RunStatus::Passed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_ids() {
        let run_id = Uuid::now_v7();
        assert_eq!(
            coordinator_workflow_id(run_id),
            format!("{}-suite", run_id)
        );
        assert_eq!(
            test_workflow_id(run_id, 2),
            format!("{}-test-2", run_id)
        );
    }

    #[test]
    fn test_resolve_config_vars_load_time() {
        let yaml = r#"
name: x
vars:
  api: "https://x"
tests:
  - name: t
    steps:
      - name: s
        plugin: http
        config:
          url: "{{ .vars.api }}/users/{{ uid }}"
"#;
        let suite = Suite::from_yaml(yaml.as_bytes()).unwrap();
        let resolved = resolve_config_vars(&suite, &suite.flattened_vars()).unwrap();

        // vars substituted, runtime reference kept for dispatch
        assert_eq!(
            resolved.tests[0].steps[0].config.get("url").unwrap(),
            "https://x/users/{{ uid }}"
        );
    }

    #[test]
    fn test_resolve_config_vars_missing_fails() {
        let yaml = r#"
name: x
tests:
  - name: t
    steps:
      - name: s
        plugin: http
        config:
          url: "{{ .vars.absent }}"
"#;
        let suite = Suite::from_yaml(yaml.as_bytes()).unwrap();
        let err = resolve_config_vars(&suite, &suite.flattened_vars()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable { .. }));
    }

    #[test]
    fn test_aggregate_status() {
        let passed = TestResult {
            workflow_id: "w".to_string(),
            name: "t".to_string(),
            outcome: TestOutcome {
                status: RunStatus::Passed,
                error: None,
                cleanup_error: None,
            },
        };
        let failed = TestResult {
            outcome: TestOutcome {
                status: RunStatus::Failed,
                error: Some("boom".to_string()),
                cleanup_error: None,
            },
            ..passed.clone()
        };
        let canceled = TestResult {
            outcome: TestOutcome {
                status: RunStatus::Canceled,
                error: Some("canceled".to_string()),
                cleanup_error: None,
            },
            ..passed.clone()
        };

        assert_eq!(
            aggregate_status(&None, &[passed.clone()]),
            RunStatus::Passed
        );
        assert_eq!(
            aggregate_status(&None, &[passed.clone(), failed.clone()]),
            RunStatus::Failed
        );
        assert_eq!(
            aggregate_status(&None, &[failed, canceled]),
            RunStatus::Canceled
        );
        assert_eq!(
            aggregate_status(&Some("init failed".to_string()), &[]),
            RunStatus::Failed
        );
    }
}
