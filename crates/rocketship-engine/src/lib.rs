//! # Workflow Interpreter
//!
//! The durable per-test state machine and its suite-level coordinator.
//!
//! One [`TestWorkflow`] instance executes one test: it copies the suite
//! globals into fresh [`RuntimeState`], runs init, main, and cleanup
//! phases in strict order, resolves templates against the pre-step state
//! snapshot, dispatches each step to its plugin activity under a
//! timeout/retry envelope, threads saved values into subsequent steps, and
//! surfaces every transition through the event reporters.
//!
//! The [`SuiteCoordinator`] owns suite-level hooks and `SuiteGlobals`,
//! launches per-test executions, and aggregates the run status. Cleanup
//! phases run on disconnected contexts so cancellation never skips them.

pub mod clean_error;
pub mod coordinator;
pub mod interpreter;
pub mod reporters;
pub mod state;

pub use clean_error::clean_error_message;
pub use coordinator::{
    coordinator_workflow_id, test_workflow_id, RunConfig, SuiteCoordinator, SuiteRunSummary,
    TestResult,
};
pub use interpreter::{TestOutcome, TestWorkflow, TestWorkflowInput};
pub use reporters::{
    forward_log, register_reporters, report_step, report_test, ReportSink, SinkError,
};
pub use state::{RuntimeState, SuiteGlobals};
