#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end orchestration scenarios with in-memory workers and checkpoints.
//!
//! Workers echo their name and the prompt they received, so each test can see
//! which worker answered and what context it was given.

use async_trait::async_trait;
use maestro_core::{
    CheckpointChannel, CheckpointKind, LiveWorker, MaestroError, MaestroResult, RosterProvider,
    WorkerDescriptor, WorkerFactory,
};
use maestro_orchestrator::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Behavior {
    fail_init: bool,
    fail_run: bool,
    delay: Duration,
}

struct EchoWorker {
    name: String,
    behavior: Behavior,
}

#[async_trait]
impl LiveWorker for EchoWorker {
    async fn run(&self, prompt: &str) -> MaestroResult<String> {
        tokio::time::sleep(self.behavior.delay).await;
        if self.behavior.fail_run {
            return Err(MaestroError::ExecutionError {
                worker: self.name.clone(),
                reason: "model returned garbage".into(),
            });
        }
        Ok(format!("[{}] {}", self.name, prompt))
    }
}

#[derive(Default)]
struct EchoFactory {
    behaviors: HashMap<String, Behavior>,
}

impl EchoFactory {
    fn with(mut self, name: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }
}

#[async_trait]
impl WorkerFactory for EchoFactory {
    async fn instantiate(&self, descriptor: &WorkerDescriptor) -> MaestroResult<Arc<dyn LiveWorker>> {
        let behavior = self.behaviors.get(&descriptor.name).cloned().unwrap_or_default();
        if behavior.fail_init {
            return Err(MaestroError::InitFailed {
                worker: descriptor.name.clone(),
                reason: "missing credentials".into(),
            });
        }
        Ok(Arc::new(EchoWorker {
            name: descriptor.name.clone(),
            behavior,
        }))
    }
}

// ---------------------------------------------------------------------------
// Rosters
// ---------------------------------------------------------------------------

/// director + writer (code) + reviewer (review).
fn review_team() -> Vec<WorkerDescriptor> {
    vec![
        WorkerDescriptor::new("director", "You coordinate the team."),
        WorkerDescriptor::new("writer", "You implement functions."),
        WorkerDescriptor::new("reviewer", "You review for bugs and quality issues."),
    ]
}

/// A writer strong on code and a reviewer strong on review.
fn dev_team() -> Vec<WorkerDescriptor> {
    vec![
        WorkerDescriptor::new("director", "You coordinate the team."),
        WorkerDescriptor::new("writer", "You implement functions, write code, refactor and debug programs."),
        WorkerDescriptor::new(
            "reviewer",
            "You review work, audit for bugs and quality issues, and give feedback.",
        ),
    ]
}

fn research_team() -> Vec<WorkerDescriptor> {
    vec![
        WorkerDescriptor::new("director", "Coordinates"),
        WorkerDescriptor::new("researcher", "You research and investigate sources, then summarize."),
        WorkerDescriptor::new("author", "You draft an article or essay and document findings."),
    ]
}

struct Harness {
    orchestrator: Orchestrator,
    roster: Arc<StaticRoster>,
}

fn harness(
    workers: Vec<WorkerDescriptor>,
    factory: EchoFactory,
    channel: Arc<dyn CheckpointChannel>,
    config: OrchestratorConfig,
) -> Harness {
    harness_with_store(workers, factory, channel, config, Arc::new(MemoryCheckpointStore::new()))
}

fn harness_with_store(
    workers: Vec<WorkerDescriptor>,
    factory: EchoFactory,
    channel: Arc<dyn CheckpointChannel>,
    config: OrchestratorConfig,
    store: Arc<dyn CheckpointStore>,
) -> Harness {
    let roster = Arc::new(StaticRoster::new(workers));
    let orchestrator = Orchestrator::new(
        config,
        RoutingConfig::default(),
        Arc::clone(&roster) as Arc<dyn RosterProvider>,
        Arc::new(factory),
        Arc::new(CapabilityIndex::new()),
        channel,
        store,
    )
    .unwrap();
    Harness {
        orchestrator,
        roster,
    }
}

// ---------------------------------------------------------------------------
// Routing scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_review_task_routes_to_reviewer() {
    let channel = Arc::new(ScriptedChannel::new(["satisfied"]));
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        OrchestratorConfig::default(),
    );

    let outcome = h.orchestrator.start("Review this code for bugs").await.unwrap();
    let thread_id = outcome.thread_id().to_string();
    match outcome {
        RunOutcome::Completed { response, .. } => {
            assert_eq!(response, "[reviewer] Review this code for bugs");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let requests = channel.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, CheckpointKind::Satisfaction);
    assert!(requests[0].context.starts_with("[reviewer]"));

    let state = h.orchestrator.thread(&thread_id).await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Complete);
    let decision = state.routing.unwrap();
    assert_eq!(decision.primary(), Some("reviewer"));
    assert!(decision.confidence > 0.1);
    assert!(state.node_timings.contains_key("routing"));
    assert!(state.node_timings.contains_key("reviewer"));
}

#[tokio::test]
async fn test_director_only_roster_answers_directly() {
    let channel = Arc::new(ScriptedChannel::new(Vec::<String>::new()));
    let h = harness(
        vec![WorkerDescriptor::new("director", "You coordinate the team.")],
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        OrchestratorConfig::default(),
    );

    let response = h
        .orchestrator
        .process_request("Review this code for bugs")
        .await
        .unwrap();
    assert_eq!(response, "[director] Review this code for bugs");
    assert!(channel.requests().is_empty());
    assert_eq!(h.orchestrator.router().metrics().total_decisions, 0);
}

#[tokio::test]
async fn test_unmatched_task_answers_directly() {
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::new(ScriptedChannel::default()),
        OrchestratorConfig::default(),
    );

    let outcome = h.orchestrator.start("What's the weather like?").await.unwrap();
    let thread_id = outcome.thread_id().to_string();
    assert_eq!(
        outcome.into_result().unwrap(),
        "[director] What's the weather like?"
    );
    let state = h.orchestrator.thread(&thread_id).await.unwrap().unwrap();
    assert!(state.routing.unwrap().is_direct());
    assert!(state.results.is_empty());
}

#[tokio::test]
async fn test_follow_up_request_triggers_synthesis() {
    let channel = Arc::new(ScriptedChannel::new([
        "Now review it and audit for bugs and quality",
        "satisfied",
    ]));
    let h = harness(
        dev_team(),
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        OrchestratorConfig::default(),
    );

    let response = h
        .orchestrator
        .process_request("Implement a parser function in code")
        .await
        .unwrap();

    assert!(response.starts_with("## Combined report"));
    assert!(response.contains("### writer\n[writer] Implement a parser function in code"));
    assert!(response.contains("### reviewer\n[reviewer] Now review it and audit for bugs and quality"));

    let requests = channel.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].context.starts_with("[writer]"));
    assert!(requests[1].context.starts_with("## Combined report"));
}

#[tokio::test]
async fn test_repeat_worker_after_synthesis_is_merged_again() {
    let channel = Arc::new(ScriptedChannel::new([
        "Now review it and audit for bugs and quality",
        "Implement a second lexer function in code",
        "satisfied",
    ]));
    let h = harness(
        dev_team(),
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        OrchestratorConfig::default(),
    );

    let outcome = h
        .orchestrator
        .start("Implement a parser function in code")
        .await
        .unwrap();
    let thread_id = outcome.thread_id().to_string();
    let response = outcome.into_result().unwrap();

    let requests = channel.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].context.starts_with("## Combined report"));
    assert!(requests[2].context.starts_with("## Combined report"));
    assert!(requests[2]
        .context
        .contains("### writer\n[writer] Implement a second lexer function in code"));
    assert_ne!(requests[1].context, requests[2].context);

    assert_eq!(response, requests[2].context);
    let state = h.orchestrator.thread(&thread_id).await.unwrap().unwrap();
    assert!(state.results["writer"].starts_with("[writer] Implement a second lexer function"));
    assert!(!state.results_dirty);
    assert_eq!(state.stage, Stage::Complete);
}

#[tokio::test]
async fn test_collaborative_strategy_runs_both_and_merges() {
    let channel = Arc::new(ScriptedChannel::new(["looks good"]));
    let config = OrchestratorConfig {
        strategy: RoutingStrategy::Collaborative,
        ..OrchestratorConfig::default()
    };
    let h = harness(
        research_team(),
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        config,
    );

    let task = "Research the topic and do the writing: draft an article summarizing sources";
    let outcome = h.orchestrator.start(task).await.unwrap();
    let thread_id = outcome.thread_id().to_string();
    let response = outcome.into_result().unwrap();
    assert!(response.starts_with("## Combined report"));

    let state = h.orchestrator.thread(&thread_id).await.unwrap().unwrap();
    assert_eq!(
        state.routing.as_ref().unwrap().selected_workers,
        vec!["researcher".to_string(), "author".to_string()]
    );
    assert!(state.results["author"].contains("### researcher"));
    assert_eq!(state.synthesized, 2);
    assert_eq!(channel.requests().len(), 1);
}

// ---------------------------------------------------------------------------
// Checkpoints and resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_detached_resume_is_idempotent() {
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::new(DetachedChannel),
        OrchestratorConfig::default(),
    );

    let outcome = h.orchestrator.start("Review this code for bugs").await.unwrap();
    let thread_id = match outcome {
        RunOutcome::Suspended {
            thread_id,
            checkpoint,
        } => {
            assert_eq!(checkpoint.kind, CheckpointKind::Satisfaction);
            thread_id
        }
        other => panic!("expected suspension, got {other:?}"),
    };

    let first = h.orchestrator.resume(&thread_id, "satisfied").await.unwrap();
    let second = h.orchestrator.resume(&thread_id, "satisfied").await.unwrap();
    assert_eq!(first, second);
    assert!(matches!(first, RunOutcome::Completed { .. }));

    let state = h.orchestrator.thread(&thread_id).await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.human_response.as_deref(), Some("satisfied"));
}

#[tokio::test]
async fn test_reentered_checkpoint_does_not_prompt_again() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let channel = Arc::new(ScriptedChannel::default());
    let h = harness_with_store(
        review_team(),
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        OrchestratorConfig::default(),
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
    );

    let outcome = h.orchestrator.start("Review this code for bugs").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Suspended { .. }));
    let thread_id = outcome.thread_id().to_string();
    assert_eq!(channel.requests().len(), 1);

    // The answer already landed in the state before the stage ran again.
    let mut state = store.load(&thread_id).await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::AwaitingSatisfaction);
    state.human_response = Some("satisfied".into());
    store.save(&state).await.unwrap();

    let outcome = h.orchestrator.resume(&thread_id, "please redo everything").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(channel.requests().len(), 1);
}

#[tokio::test]
async fn test_missing_input_suspends_at_director() {
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::new(DetachedChannel),
        OrchestratorConfig::default(),
    );

    let outcome = h.orchestrator.start_thread("t-input", None).await.unwrap();
    match &outcome {
        RunOutcome::Suspended { checkpoint, .. } => assert_eq!(checkpoint.kind, CheckpointKind::Input),
        other => panic!("expected input checkpoint, got {other:?}"),
    }

    let outcome = h
        .orchestrator
        .resume("t-input", "Review this code for bugs")
        .await
        .unwrap();
    match &outcome {
        RunOutcome::Suspended { checkpoint, .. } => {
            assert_eq!(checkpoint.kind, CheckpointKind::Satisfaction);
        }
        other => panic!("expected satisfaction checkpoint, got {other:?}"),
    }

    let response = h
        .orchestrator
        .resume("t-input", "yes")
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(response, "[reviewer] Review this code for bugs");

    let err = h.orchestrator.start_thread("t-input", Some("again")).await.unwrap_err();
    assert!(matches!(err, MaestroError::Checkpoint(_)));
}

#[tokio::test]
async fn test_process_request_reports_suspension() {
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::new(DetachedChannel),
        OrchestratorConfig::default(),
    );
    let err = h
        .orchestrator
        .process_request("Review this code for bugs")
        .await
        .unwrap_err();
    assert!(matches!(err, MaestroError::Suspended { .. }));
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("threads");

    let store = Arc::new(FileCheckpointStore::new(dir.clone()).await.unwrap());
    let first = harness_with_store(
        review_team(),
        EchoFactory::default(),
        Arc::new(DetachedChannel),
        OrchestratorConfig::default(),
        store,
    );
    let outcome = first.orchestrator.start("Review this code for bugs").await.unwrap();
    let thread_id = outcome.thread_id().to_string();
    drop(first);

    let store = Arc::new(FileCheckpointStore::new(dir).await.unwrap());
    let second = harness_with_store(
        review_team(),
        EchoFactory::default(),
        Arc::new(DetachedChannel),
        OrchestratorConfig::default(),
        store,
    );
    let response = second
        .orchestrator
        .resume(&thread_id, "lgtm")
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(response, "[reviewer] Review this code for bugs");
}

#[tokio::test]
async fn test_unknown_thread_resume_fails() {
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::new(DetachedChannel),
        OrchestratorConfig::default(),
    );
    let err = h.orchestrator.resume("nope", "satisfied").await.unwrap_err();
    assert!(matches!(err, MaestroError::Checkpoint(_)));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_init_failure_ends_in_error() {
    let h = harness(
        review_team(),
        EchoFactory::default().with(
            "reviewer",
            Behavior {
                fail_init: true,
                ..Behavior::default()
            },
        ),
        Arc::new(ScriptedChannel::default()),
        OrchestratorConfig::default(),
    );

    match h.orchestrator.start("Review this code for bugs").await.unwrap() {
        RunOutcome::Failed { error, .. } => {
            assert_eq!(error.kind, ErrorKind::InitFailed);
            assert_eq!(error.worker.as_deref(), Some("reviewer"));
            assert!(error.message.contains("missing credentials"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.orchestrator.loader().error_count("reviewer"), 1);

    let err = h
        .orchestrator
        .process_request("Review this code for bugs")
        .await
        .unwrap_err();
    assert!(matches!(err, MaestroError::InitFailed { .. }));
    assert_eq!(
        err.to_string(),
        "Worker 'reviewer' failed to initialize: missing credentials"
    );
}

#[tokio::test]
async fn test_repeated_init_failures_penalize_score() {
    let mut workers = review_team();
    workers.push(WorkerDescriptor::new("writer_twin", "You implement functions."));
    let h = harness(
        workers,
        EchoFactory::default().with(
            "writer",
            Behavior {
                fail_init: true,
                ..Behavior::default()
            },
        ),
        Arc::new(ScriptedChannel::default()),
        OrchestratorConfig::default(),
    );

    let loader = h.orchestrator.loader();
    for _ in 0..3 {
        assert!(loader.get("writer").await.is_err());
    }
    assert_eq!(loader.error_count("writer"), 3);

    let task = "Implement a parser function in code";
    let router = h.orchestrator.router();
    let failing = router.score_worker("writer", task).unwrap().score;
    let healthy = router.score_worker("writer_twin", task).unwrap().score;
    assert!(healthy > 0.0);
    assert!((failing - healthy * 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_timeout_fails_request_but_keeps_worker_ready() {
    let config = OrchestratorConfig {
        worker_timeout_secs: 1,
        ..OrchestratorConfig::default()
    };
    let h = harness(
        review_team(),
        EchoFactory::default().with(
            "reviewer",
            Behavior {
                delay: Duration::from_secs(3),
                ..Behavior::default()
            },
        ),
        Arc::new(ScriptedChannel::default()),
        config,
    );

    match h.orchestrator.start("Review this code for bugs").await.unwrap() {
        RunOutcome::Failed { error, .. } => {
            assert_eq!(error.kind, ErrorKind::ExecutionTimeout);
            assert_eq!(error.reason, "timeout");
            assert_eq!(error.worker.as_deref(), Some("reviewer"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let loader = h.orchestrator.loader();
    assert_eq!(loader.status("reviewer"), WorkerStatus::Ready);
    assert_eq!(loader.error_count("reviewer"), 1);

    let routing = h.orchestrator.router().metrics();
    assert_eq!(routing.per_worker_success_rate["reviewer"], 0.0);
}

#[tokio::test]
async fn test_execution_error_is_reported() {
    let h = harness(
        review_team(),
        EchoFactory::default().with(
            "reviewer",
            Behavior {
                fail_run: true,
                ..Behavior::default()
            },
        ),
        Arc::new(ScriptedChannel::default()),
        OrchestratorConfig::default(),
    );

    let err = h
        .orchestrator
        .process_request("Review this code for bugs")
        .await
        .unwrap_err();
    match err {
        MaestroError::ExecutionError { worker, reason } => {
            assert_eq!(worker, "reviewer");
            assert!(reason.contains("model returned garbage"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_execution_is_force_failed() {
    let config = OrchestratorConfig {
        stale_ceiling_secs: 1,
        monitor_interval_secs: 1,
        ..OrchestratorConfig::default()
    };
    let h = harness(
        review_team(),
        EchoFactory::default().with(
            "reviewer",
            Behavior {
                delay: Duration::from_secs(10),
                ..Behavior::default()
            },
        ),
        Arc::new(ScriptedChannel::default()),
        config,
    );
    let sweeper = h.orchestrator.spawn_monitor();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.orchestrator.start("Review this code for bugs"),
    )
    .await
    .unwrap()
    .unwrap();
    sweeper.abort();

    match outcome {
        RunOutcome::Failed { error, .. } => assert_eq!(error.kind, ErrorKind::StaleExecution),
        other => panic!("expected stale failure, got {other:?}"),
    }
    assert_eq!(h.orchestrator.monitor().stale_total(), 1);
    assert!(h.orchestrator.monitor().in_flight().await.is_empty());
}

#[tokio::test]
async fn test_iteration_guard_stops_endless_follow_ups() {
    let config = OrchestratorConfig {
        max_iterations: 2,
        ..OrchestratorConfig::default()
    };
    let channel = Arc::new(ScriptedChannel::new([
        "Implement more code",
        "Implement more code",
        "Implement more code",
    ]));
    let h = harness(
        dev_team(),
        EchoFactory::default(),
        Arc::clone(&channel) as Arc<dyn CheckpointChannel>,
        config,
    );

    match h.orchestrator.start("Implement a parser function in code").await.unwrap() {
        RunOutcome::Failed { error, .. } => {
            assert_eq!(error.kind, ErrorKind::Internal);
            assert!(error.message.contains("routing passes"));
        }
        other => panic!("expected iteration failure, got {other:?}"),
    }
    assert_eq!(channel.requests().len(), 2);
}

// ---------------------------------------------------------------------------
// Metrics and rebuild
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_metrics_and_rebuild() {
    let h = harness(
        review_team(),
        EchoFactory::default(),
        Arc::new(ScriptedChannel::new(["satisfied"])),
        OrchestratorConfig::default(),
    );
    h.orchestrator
        .process_request("Review this code for bugs")
        .await
        .unwrap();

    let metrics = h.orchestrator.execution_metrics().await;
    assert_eq!(metrics.loader.total_loads, 1);
    assert_eq!(metrics.routing.total_decisions, 1);
    assert_eq!(metrics.executions.len(), 1);
    assert_eq!(metrics.executions[0].outcome, "completed");
    assert_eq!(metrics.executions[0].workers, vec!["reviewer".to_string()]);
    assert!(metrics.in_flight.is_empty());
    assert_eq!(metrics.workers.len(), 1);

    h.roster.upsert(WorkerDescriptor::new("reviewer", "You plan roadmaps."));
    assert_eq!(h.orchestrator.rebuild(), 1);
    assert_eq!(h.orchestrator.loader().status("reviewer"), WorkerStatus::NotLoaded);
    let caps = h
        .orchestrator
        .loader()
        .capability_index()
        .capabilities_for(&h.roster.get("reviewer").unwrap());
    assert!(caps.iter().any(|c| c.name == "planning"));
}
