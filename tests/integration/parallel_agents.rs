//! Parallel execution correctness tests.
//!
//! These tests verify that batches respect the concurrency cap, that
//! excess ready nodes wait for a later batch, and that a batch behaves as a
//! barrier.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agentflow::config::OrchestratorConfig;
use agentflow::core::WorkflowGraph;
use agentflow::orchestration::ParallelExecutor;
use agentflow::workflow::{TaskInput, TaskList};

use crate::fixtures::{fan_out, independent_tasks, orchestrator, task, ScriptedAgent, Trace, TraceEvent};

/// Test: Concurrency cap of one
/// Given the fan-out workflow and a cap of 1
/// When the workflow runs
/// Then T2 and T3 run in two sequential single-node batches
#[tokio::test]
async fn test_cap_one_serialises_siblings() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace)
        .delay("T2", 20)
        .delay("T3", 5)
        .into_arc();
    let config = OrchestratorConfig::default().with_max_concurrency(1);
    let mut orch = orchestrator(agent, config);

    let report = orch.run(&fan_out()).await.unwrap();

    let graph = orch.graph();
    let t1 = graph.find_by_key("T1").unwrap();
    let t2 = graph.find_by_key("T2").unwrap();
    let t3 = graph.find_by_key("T3").unwrap();

    assert!(report.is_success());
    assert_eq!(report.batches, vec![vec![t1], vec![t2], vec![t3]]);
    assert_eq!(
        trace.events(),
        vec![
            TraceEvent::Start("T1".into()),
            TraceEvent::End("T1".into()),
            TraceEvent::Start("T2".into()),
            TraceEvent::End("T2".into()),
            TraceEvent::Start("T3".into()),
            TraceEvent::End("T3".into()),
        ]
    );
    assert_eq!(trace.peak_concurrency(), 1);
}

/// Test: Parallel execution of independent tasks
/// Given 4 independent tasks and a cap of 4
/// When the workflow runs
/// Then all 4 invocations are in flight at once, in one batch
#[tokio::test(start_paused = true)]
async fn test_four_independent_tasks_run_together() {
    let trace = Trace::new();
    let mut agent = ScriptedAgent::new("worker", &trace);
    for i in 0..4 {
        agent = agent.delay(&format!("t{}", i), 50);
    }
    let mut orch = orchestrator(agent.into_arc(), OrchestratorConfig::default());

    let report = orch.run(&independent_tasks(4)).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.batches.len(), 1);
    assert_eq!(trace.peak_concurrency(), 4);
    let mut started = trace.starts();
    started.sort();
    assert_eq!(started, vec!["t0", "t1", "t2", "t3"]);
}

/// Test: Parallel execution respects capacity
/// Given 6 independent tasks and a cap of 4
/// When the workflow runs
/// Then the first batch takes the first 4 tasks and the rest follow
#[tokio::test(start_paused = true)]
async fn test_cap_limits_batch_size() {
    let trace = Trace::new();
    let mut agent = ScriptedAgent::new("worker", &trace);
    for i in 0..6 {
        agent = agent.delay(&format!("t{}", i), 10);
    }
    let mut orch = orchestrator(agent.into_arc(), OrchestratorConfig::default());

    let report = orch.run(&independent_tasks(6)).await.unwrap();

    assert!(report.is_success());
    let sizes: Vec<usize> = report.batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 2]);
    assert_eq!(trace.peak_concurrency(), 4);

    let graph = orch.graph();
    let first_four: Vec<_> = (0..4)
        .map(|i| graph.find_by_key(&format!("t{}", i)).unwrap())
        .collect();
    assert_eq!(report.batches[0], first_four);
}

/// Test: Batch barrier
/// Given a fast and a slow root, and a dependent of the fast root
/// When the workflow runs
/// Then the dependent is not dispatched until the slow root also settled
#[tokio::test(start_paused = true)]
async fn test_batch_waits_for_slowest_node() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace)
        .delay("fast", 1)
        .delay("slow", 500)
        .into_arc();
    let mut orch = orchestrator(agent, OrchestratorConfig::default());
    let tasks = TaskList::new(vec![
        TaskInput::root(task("fast")),
        TaskInput::root(task("slow")),
        TaskInput::after(task("next"), ["fast"]),
    ]);

    let report = orch.run(&tasks).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.batches.len(), 2);
    let events = trace.events();
    let slow_end = events
        .iter()
        .position(|e| *e == TraceEvent::End("slow".into()))
        .unwrap();
    let next_start = events
        .iter()
        .position(|e| *e == TraceEvent::Start("next".into()))
        .unwrap();
    assert!(slow_end < next_start);
}

/// Test: Executor leaves excess ready nodes pending
/// Given 5 ready nodes and an executor with cap 2
/// When one batch runs
/// Then exactly the first 2 nodes ran and the remaining 3 are still ready
#[tokio::test]
async fn test_executor_excess_nodes_stay_pending() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace).into_arc();
    let mut graph = WorkflowGraph::new();
    let ids: Vec<_> = (0..5)
        .map(|i| graph.add_task(task(&format!("n{}", i)), &[]).unwrap())
        .collect();

    let report = ParallelExecutor::new(2)
        .run_batch(&mut graph, agent.as_ref(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.dispatched, ids[..2].to_vec());
    assert_eq!(graph.ready_nodes(), ids[2..].to_vec());
    assert_eq!(agent.calls("n0"), 1);
    assert_eq!(agent.calls("n4"), 0);
}

/// Test: Ready set is recomputed after every batch
/// Given a diamond with one slow branch
/// When batches run one at a time
/// Then the join only becomes ready once both branches completed
#[tokio::test(start_paused = true)]
async fn test_join_ready_after_both_branches() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace)
        .delay("left", 100)
        .into_arc();
    let mut graph = WorkflowGraph::new();
    let root = graph.add_task(task("root"), &[]).unwrap();
    let left = graph.add_task(task("left"), &[root]).unwrap();
    let right = graph.add_task(task("right"), &[root]).unwrap();
    let join = graph.add_task(task("join"), &[left, right]).unwrap();
    let executor = ParallelExecutor::new(4);
    let cancel = CancellationToken::new();

    executor.run_batch(&mut graph, agent.as_ref(), &cancel).await.unwrap();
    assert_eq!(graph.ready_nodes(), vec![left, right]);

    let start = tokio::time::Instant::now();
    let second = executor.run_batch(&mut graph, agent.as_ref(), &cancel).await.unwrap();
    assert_eq!(second.completed.len(), 2);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(graph.ready_nodes(), vec![join]);
}
