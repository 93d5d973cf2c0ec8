//! Failure handling and retry tests.
//!
//! These tests verify failure pruning under the best-effort policy, the
//! fail-fast abort, and orchestrator-level retries.

use std::sync::Arc;

use agentflow::config::OrchestratorConfig;
use agentflow::core::NodeError;
use agentflow::orchestration::{AbortReason, AgentDirectory, Orchestrator, RunOutcome};
use agentflow::workflow::{FailurePolicy, RunPhase, TaskInput, TaskList};
use agentflow::Error;

use crate::fixtures::{fan_out, orchestrator, task, trip_planner, ScriptedAgent, Trace};

/// T1 -> T2 -> T4, plus an unrelated root T3.
fn branch_with_bystander() -> TaskList {
    TaskList::new(vec![
        TaskInput::root(task("T1")),
        TaskInput::after(task("T2"), ["T1"]),
        TaskInput::root(task("T3")),
        TaskInput::after(task("T4"), ["T2"]),
    ])
}

/// Test: Best-effort failure pruning
/// Given T1 -> T2 -> T4 and an unrelated T3, where T1 fails
/// When the workflow runs under best-effort
/// Then T3 completes, T2 and T4 never run, and the run is partial
#[tokio::test]
async fn test_best_effort_prunes_failed_branch() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace).fail("T1").into_arc();
    let mut orch = orchestrator(Arc::clone(&agent), OrchestratorConfig::default());

    let report = orch.run(&branch_with_bystander()).await.unwrap();

    let graph = orch.graph();
    let t1 = graph.find_by_key("T1").unwrap();
    let t2 = graph.find_by_key("T2").unwrap();
    let t4 = graph.find_by_key("T4").unwrap();

    assert_eq!(report.outcome, RunOutcome::Partial);
    assert_eq!(report.results.len(), 1);
    assert!(report.result_for("T3").is_some());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].node, t1);
    assert!(matches!(
        report.failed[0].error,
        NodeError::AgentInvocationFailed { .. }
    ));
    assert_eq!(report.unresolved, vec![t2, t4]);
    assert_eq!(report.affected_nodes(), vec![t1, t2, t4]);
    assert_eq!(agent.calls("T2"), 0);
    assert_eq!(agent.calls("T4"), 0);
    assert_eq!(orch.phase(), RunPhase::Failed);
    assert!(graph.running_nodes().is_empty());

    assert!(matches!(
        report.into_result(),
        Err(Error::AgentInvocationFailed { node, .. }) if node == t1
    ));
}

/// Test: Failure in one branch of a fan-out
/// Given the fan-out workflow where T2 fails
/// When the workflow runs under best-effort
/// Then T3 still completes
#[tokio::test]
async fn test_sibling_failure_does_not_stop_branch() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace).fail("T2").into_arc();
    let mut orch = orchestrator(agent, OrchestratorConfig::default());

    let report = orch.run(&fan_out()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Partial);
    assert!(report.result_for("T1").is_some());
    assert!(report.result_for("T3").is_some());
    assert_eq!(report.failed[0].key, "T2");
    assert!(report.unresolved.is_empty());
}

/// Test: Fail-fast abort
/// Given a failing search in the trip planner
/// When the workflow runs under fail-fast
/// Then the run aborts after that batch and the aggregator never runs
#[tokio::test]
async fn test_fail_fast_aborts_after_failure() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace).fail("hotel").into_arc();
    let config = OrchestratorConfig::default().with_failure_policy(FailurePolicy::FailFast);
    let mut orch = orchestrator(Arc::clone(&agent), config);

    let report = orch.run(&trip_planner()).await.unwrap();

    let hotel = orch.graph().find_by_key("hotel").unwrap();
    let aggregator = orch.graph().find_by_key("aggregator").unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Aborted(AbortReason::FailFast { node: hotel })
    );
    assert_eq!(report.batches.len(), 2);
    assert!(report.unresolved.contains(&aggregator));
    assert_eq!(agent.calls("aggregator"), 0);
    assert!(orch.graph().running_nodes().is_empty());
    assert_eq!(orch.phase(), RunPhase::Failed);
}

/// Test: Fail-fast cancels in-flight siblings
/// Given a failing root and a slow sibling in the same batch
/// When the workflow runs under fail-fast
/// Then the sibling is interrupted and reported as cancelled
#[tokio::test(start_paused = true)]
async fn test_fail_fast_cancels_siblings() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace)
        .fail("broken")
        .delay("slow", 60_000)
        .into_arc();
    let config = OrchestratorConfig::default().with_failure_policy(FailurePolicy::FailFast);
    let mut orch = orchestrator(agent, config);
    let tasks = TaskList::new(vec![TaskInput::root(task("broken")), TaskInput::root(task("slow"))]);

    let report = orch.run(&tasks).await.unwrap();

    let broken = orch.graph().find_by_key("broken").unwrap();
    let slow = orch.graph().find_by_key("slow").unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Aborted(AbortReason::FailFast { node: broken })
    );
    assert_eq!(report.failure_for(&slow).unwrap().error, NodeError::Cancelled);
    assert!(!trace.ends().contains(&"slow".to_string()));
}

/// Test: Retry recovers a transient failure
/// Given a task that fails once and max_attempts = 2
/// When the workflow runs
/// Then the task is retried, its dependents run, and the run completes
#[tokio::test]
async fn test_retry_recovers_transient_failure() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace)
        .fail_times("T1", 1)
        .into_arc();
    let config = OrchestratorConfig::default().with_max_attempts(2);
    let mut orch = orchestrator(Arc::clone(&agent), config);

    let report = orch.run(&fan_out()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(agent.calls("T1"), 2);
    assert_eq!(report.retried.len(), 1);
    assert_eq!(report.batches.len(), 3);
    let t1 = report.results.iter().find(|r| r.key == "T1").unwrap();
    assert_eq!(t1.attempt, 2);
    // Both dependents hang off the retry node.
    let graph = orch.graph();
    let t2 = graph.find_by_key("T2").unwrap();
    assert_eq!(graph.dependencies(&t2), vec![t1.node]);
    assert_eq!(graph.node(&report.retried[0]).unwrap().superseded_by, Some(t1.node));
}

/// Test: Retry gives up after max_attempts
/// Given a task that always fails and max_attempts = 3
/// When the workflow runs
/// Then it is attempted 3 times and the run is partial
#[tokio::test]
async fn test_retry_exhausted() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace).fail("T1").into_arc();
    let config = OrchestratorConfig::default().with_max_attempts(3);
    let mut orch = orchestrator(Arc::clone(&agent), config);

    let report = orch.run(&fan_out()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Partial);
    assert_eq!(agent.calls("T1"), 3);
    assert_eq!(report.retried.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].attempt, 3);
    assert_eq!(report.unresolved.len(), 2);
}

/// Test: Retry under fail-fast
/// Given a transient failure, fail-fast and max_attempts = 2
/// When the workflow runs
/// Then the retry succeeds instead of aborting
#[tokio::test]
async fn test_fail_fast_waits_for_retries() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace)
        .fail_times("T2", 1)
        .into_arc();
    let config = OrchestratorConfig::default()
        .with_failure_policy(FailurePolicy::FailFast)
        .with_max_attempts(2);
    let mut orch = orchestrator(agent, config);

    let report = orch.run(&fan_out()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.retried.len(), 1);
}

/// Test: Task with no available agent
/// Given a directory without a default agent
/// When a task without a matching hint runs
/// Then that node fails with "no agent available" and others complete
#[tokio::test]
async fn test_missing_agent_fails_only_that_node() {
    let trace = Trace::new();
    let directory = AgentDirectory::new().with_agent("air", ScriptedAgent::new("air", &trace));
    let mut orch = Orchestrator::new(Arc::new(directory), OrchestratorConfig::default());
    let tasks = TaskList::new(vec![
        TaskInput::root(task("flights").with_agent("air")),
        TaskInput::root(task("hotel")),
    ]);

    let report = orch.run(&tasks).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Partial);
    assert!(report.result_for("flights").is_some());
    match &report.failed[0].error {
        NodeError::AgentInvocationFailed { message } => {
            assert!(message.contains("no agent available"));
            assert!(message.contains("hotel"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
