//! Performance tests for agentflow.
//!
//! These tests verify that scheduling overhead stays small next to agent
//! latency:
//! - Ready-set computation < 10ms for a 50-node graph
//! - Level computation < 10ms for a 50-node graph
//! - Orchestrating 200 instant tasks < 2s end to end
//!
//! Use `cargo test --test integration performance -- --nocapture` to see metrics.

use std::time::{Duration, Instant};

use agentflow::config::OrchestratorConfig;
use agentflow::core::{NodeId, WorkflowGraph};
use agentflow::orchestration::Orchestrator;
use agentflow::workflow::{EdgeInference, TaskInput, TaskList};

use crate::fixtures::{independent_tasks, orchestrator, task, ScriptedAgent, Trace};

/// Performance thresholds
const MAX_SCHEDULER_OVERHEAD_MS: u128 = 10;
const MAX_RUN_TIME: Duration = Duration::from_secs(2);

/// Layered graph: `width` roots, then each further layer depends on every
/// node of the previous one.
fn layered_graph(layers: usize, width: usize) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    let mut previous: Vec<NodeId> = Vec::new();
    for layer in 0..layers {
        let current: Vec<NodeId> = (0..width)
            .map(|i| {
                graph
                    .add_task(task(&format!("l{}-{}", layer, i)), &previous)
                    .unwrap()
            })
            .collect();
        previous = current;
    }
    graph
}

// ============================================================================
// Graph Query Performance Tests
// ============================================================================

/// Test that ready-set computation is cheap.
#[test]
fn test_ready_nodes_overhead_50_nodes() {
    const ITERATIONS: usize = 100;
    let graph = layered_graph(10, 5);

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let ready = graph.ready_nodes();
        assert_eq!(ready.len(), 5);
    }
    let avg_us = start.elapsed().as_micros() / ITERATIONS as u128;

    println!("ready_nodes (50 nodes): {}µs", avg_us);
    assert!(
        avg_us < MAX_SCHEDULER_OVERHEAD_MS * 1000,
        "ready_nodes took {}µs, exceeds {}ms threshold",
        avg_us,
        MAX_SCHEDULER_OVERHEAD_MS
    );
}

/// Test execution level computation performance.
#[test]
fn test_execution_levels_performance() {
    const ITERATIONS: usize = 100;
    let graph = layered_graph(10, 5);

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let levels = graph.execution_levels().unwrap();
        assert_eq!(levels.len(), 10);
    }
    let avg_us = start.elapsed().as_micros() / ITERATIONS as u128;

    println!("execution_levels (50 nodes): {}µs", avg_us);
    assert!(
        avg_us < MAX_SCHEDULER_OVERHEAD_MS * 1000,
        "execution_levels took {}µs, exceeds {}ms threshold",
        avg_us,
        MAX_SCHEDULER_OVERHEAD_MS
    );
}

/// Test that building a long sequential chain stays fast.
#[test]
fn test_build_long_chain() {
    let tasks: TaskList = (0..500)
        .map(|i| TaskInput::new(task(&format!("c{}", i))))
        .collect();

    let start = Instant::now();
    let graph = Orchestrator::build_graph(&tasks, EdgeInference::Sequential).unwrap();
    let elapsed = start.elapsed();

    println!("build_graph (500-node chain): {:?}", elapsed);
    assert_eq!(graph.edge_count(), 499);
    assert!(elapsed < MAX_RUN_TIME);
}

// ============================================================================
// Orchestration Throughput Tests
// ============================================================================

/// Test orchestrating many instant tasks.
#[tokio::test]
async fn test_run_200_independent_tasks() {
    let trace = Trace::new();
    let agent = ScriptedAgent::new("worker", &trace).into_arc();
    let config = OrchestratorConfig::default().with_max_concurrency(8);
    let mut orch = orchestrator(agent, config);

    let start = Instant::now();
    let report = orch.run(&independent_tasks(200)).await.unwrap();
    let elapsed = start.elapsed();

    println!("200 tasks, cap 8: {:?} over {} batches", elapsed, report.batches.len());
    assert!(report.is_success());
    assert_eq!(report.batches.len(), 25);
    assert!(elapsed < MAX_RUN_TIME, "run took {:?}", elapsed);
}
