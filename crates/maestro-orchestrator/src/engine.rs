use crate::capability::CapabilityIndex;
use crate::checkpoint::CheckpointStore;
use crate::config::{OrchestratorConfig, RoutingConfig};
use crate::loader::{LoaderMetrics, WorkerLoader, WorkerSnapshot};
use crate::monitor::{ExecutionMonitor, ExecutionSummary, InFlightExecution};
use crate::routing::{RoutingMetrics, RoutingOptimizer};
use crate::types::{
    ErrorContext, ErrorKind, OrchestrationState, RunOutcome, Stage, Verdict, SYNTHESIS_KEY,
};
use chrono::Utc;
use maestro_core::{
    CheckpointChannel, CheckpointKind, CheckpointRequest, MaestroError, MaestroResult,
    Resumption, RosterProvider, WorkerFactory,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything `execution_metrics` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub loader: LoaderMetrics,
    pub routing: RoutingMetrics,
    pub workers: Vec<WorkerSnapshot>,
    pub executions: Vec<ExecutionSummary>,
    pub in_flight: Vec<InFlightExecution>,
    pub stale_total: u64,
}

enum Step {
    Next,
    Checkpoint(CheckpointRequest),
}

/// The director/specialist/synthesis state machine.
///
/// Each request owns its [`OrchestrationState`]; the loader, optimizer and
/// monitor are shared by every request in flight. Human checkpoints go through
/// the [`CheckpointChannel`]: an immediate answer continues in place, a detach
/// parks the state in the [`CheckpointStore`] until [`Orchestrator::resume`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    roster: Arc<dyn RosterProvider>,
    loader: Arc<WorkerLoader>,
    router: Arc<RoutingOptimizer>,
    channel: Arc<dyn CheckpointChannel>,
    store: Arc<dyn CheckpointStore>,
    monitor: Arc<ExecutionMonitor>,
}

impl Orchestrator {
    /// Wire the engine from its collaborators.
    pub fn new(
        config: OrchestratorConfig,
        routing: RoutingConfig,
        roster: Arc<dyn RosterProvider>,
        factory: Arc<dyn WorkerFactory>,
        index: Arc<CapabilityIndex>,
        channel: Arc<dyn CheckpointChannel>,
        store: Arc<dyn CheckpointStore>,
    ) -> MaestroResult<Self> {
        config.validate()?;
        routing.validate()?;

        let loader = Arc::new(WorkerLoader::new(Arc::clone(&roster), factory, index));
        let router = Arc::new(
            RoutingOptimizer::new(Arc::clone(&roster), Arc::clone(&loader), routing)
                .with_director(config.director.clone())
                .with_max_collaborators(config.max_collaborators),
        );
        let monitor = Arc::new(ExecutionMonitor::new(
            config.stale_ceiling(),
            config.summary_history,
        ));

        Ok(Self {
            config,
            roster,
            loader,
            router,
            channel,
            store,
            monitor,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<WorkerLoader> {
        &self.loader
    }

    pub fn router(&self) -> &Arc<RoutingOptimizer> {
        &self.router
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    /// Start the stale-execution sweeper on the configured interval.
    pub fn spawn_monitor(&self) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.monitor).spawn(self.config.monitor_interval())
    }

    /// Run a request to completion and return the final text.
    ///
    /// A request parked at a detached checkpoint yields
    /// [`MaestroError::Suspended`]; continue it with [`Orchestrator::resume`].
    pub async fn process_request(&self, input: &str) -> MaestroResult<String> {
        self.start(input).await?.into_result()
    }

    /// Start a request on a fresh thread.
    pub async fn start(&self, input: &str) -> MaestroResult<RunOutcome> {
        self.start_thread(Uuid::new_v4().to_string(), Some(input))
            .await
    }

    /// Start a request on a caller-chosen thread id.
    ///
    /// Without input (or with blank input) the director suspends for it.
    pub async fn start_thread(
        &self,
        thread_id: impl Into<String>,
        input: Option<&str>,
    ) -> MaestroResult<RunOutcome> {
        let thread_id = thread_id.into();
        if self.store.load(&thread_id).await?.is_some() {
            return Err(MaestroError::Checkpoint(format!(
                "thread '{thread_id}' already exists"
            )));
        }

        let mut state = OrchestrationState::new(thread_id);
        if let Some(text) = input.map(str::trim).filter(|t| !t.is_empty()) {
            state.user_input = Some(text.to_string());
        }
        info!(
            thread_id = %state.thread_id,
            execution_id = %state.execution_id,
            "Orchestration started"
        );
        self.drive(state).await
    }

    /// Continue a parked thread with the human's answer.
    ///
    /// Resuming a thread that already finished returns its stored outcome.
    pub async fn resume(&self, thread_id: &str, text: &str) -> MaestroResult<RunOutcome> {
        let mut state = self.store.load(thread_id).await?.ok_or_else(|| {
            MaestroError::Checkpoint(format!("unknown thread '{thread_id}'"))
        })?;

        if state.stage.is_terminal() {
            debug!(thread_id = %thread_id, stage = %state.stage, "Resume of finished thread");
            return Ok(terminal_outcome(&state));
        }
        if !state.inject(text) {
            warn!(
                thread_id = %thread_id,
                stage = %state.stage,
                "Checkpoint already answered; ignoring resume text"
            );
        }
        info!(thread_id = %thread_id, stage = %state.stage, "Orchestration resumed");
        self.drive(state).await
    }

    /// Stored state of a thread, if any.
    pub async fn thread(&self, thread_id: &str) -> MaestroResult<Option<OrchestrationState>> {
        self.store.load(thread_id).await
    }

    pub async fn execution_metrics(&self) -> ExecutionMetrics {
        ExecutionMetrics {
            loader: self.loader.metrics(),
            routing: self.router.metrics(),
            workers: self.loader.snapshot(),
            executions: self.monitor.summaries().await,
            in_flight: self.monitor.in_flight().await,
            stale_total: self.monitor.stale_total(),
        }
    }

    /// Forget every loaded worker and cached capability, e.g. after a roster change.
    pub fn rebuild(&self) -> usize {
        let unloaded = self.loader.unload_all();
        info!(unloaded, "Orchestrator rebuilt");
        unloaded
    }

    async fn drive(&self, mut state: OrchestrationState) -> MaestroResult<RunOutcome> {
        let started = Instant::now();

        let outcome = loop {
            match self.run_segment(&mut state).await {
                Ok(Some(checkpoint)) => {
                    self.store.save(&state).await?;
                    info!(
                        thread_id = %state.thread_id,
                        kind = %checkpoint.kind,
                        "Suspended at checkpoint"
                    );
                    match self.channel.suspend(checkpoint.clone()).await? {
                        Resumption::Resume(response) => {
                            if !state.inject(response.text) {
                                warn!(
                                    thread_id = %state.thread_id,
                                    "Checkpoint already answered; ignoring reply"
                                );
                            }
                        }
                        Resumption::Detach => {
                            break RunOutcome::Suspended {
                                thread_id: state.thread_id.clone(),
                                checkpoint,
                            };
                        }
                    }
                }
                Ok(None) => break terminal_outcome(&state),
                Err(e) => {
                    fail(&mut state, &e);
                    break terminal_outcome(&state);
                }
            }
        };

        if state.stage.is_terminal() {
            self.store.save(&state).await?;
        }
        self.archive(&state, &outcome, started.elapsed().as_secs_f64())
            .await;
        Ok(outcome)
    }

    // One stretch of stage processing between checkpoints, watched by the monitor.
    async fn run_segment(
        &self,
        state: &mut OrchestrationState,
    ) -> MaestroResult<Option<CheckpointRequest>> {
        let execution_id = state.execution_id;
        let seconds = self.monitor.ceiling().as_secs();
        let (segment, mut cancel) = self.monitor.register(execution_id, &state.thread_id).await;

        let result = tokio::select! {
            result = self.advance(state) => Ok(result),
            _ = cancelled(&mut cancel) => Err(MaestroError::StaleExecution { execution_id, seconds }),
        };

        self.monitor.deregister(segment).await;
        result
    }

    async fn advance(&self, state: &mut OrchestrationState) -> Option<CheckpointRequest> {
        loop {
            if state.stage.is_terminal() {
                return None;
            }
            let stage = state.stage;
            let started = Instant::now();
            let step = self.step(state).await;
            state.record_timing(stage, started.elapsed().as_secs_f64());
            state.touch();

            match step {
                Ok(Step::Next) => {
                    if state.stage != stage {
                        debug!(
                            thread_id = %state.thread_id,
                            from = %stage,
                            to = %state.stage,
                            "Stage transition"
                        );
                    }
                }
                Ok(Step::Checkpoint(request)) => return Some(request),
                Err(e) => fail(state, &e),
            }
        }
    }

    async fn step(&self, state: &mut OrchestrationState) -> MaestroResult<Step> {
        match state.stage {
            Stage::Director => Ok(self.director(state)),
            Stage::Routing => self.route(state),
            Stage::SpecialistExecution => self.run_specialist(state).await,
            Stage::DirectResponse => self.respond_directly(state).await,
            Stage::AwaitingSatisfaction => Ok(self.await_satisfaction(state)),
            Stage::Synthesis => {
                synthesize(state);
                Ok(Step::Next)
            }
            Stage::Complete | Stage::Error => Ok(Step::Next),
        }
    }

    fn director(&self, state: &mut OrchestrationState) -> Step {
        if state.user_input.is_none() {
            return Step::Checkpoint(checkpoint(
                state,
                CheckpointKind::Input,
                "What would you like the team to work on?",
                String::new(),
            ));
        }
        state.stage = if state.needs_synthesis() {
            Stage::Synthesis
        } else if state.satisfied {
            Stage::Complete
        } else if state.specialist_result_count() > 0 {
            Stage::AwaitingSatisfaction
        } else {
            Stage::Routing
        };
        Step::Next
    }

    fn route(&self, state: &mut OrchestrationState) -> MaestroResult<Step> {
        state.iterations += 1;
        if state.iterations > self.config.max_iterations {
            return Err(MaestroError::Orchestrator(format!(
                "exceeded {} routing passes",
                self.config.max_iterations
            )));
        }

        let task = state.user_input.clone().unwrap_or_default();
        state.task_description = Some(task.clone());

        let team = self.roster.has_team() && self.roster.list_workers().len() >= 2;
        if !team {
            info!(thread_id = %state.thread_id, "No specialist team; answering directly");
            state.routing = None;
            state.stage = Stage::DirectResponse;
            return Ok(Step::Next);
        }

        let analysis = self.router.analyze_task(&task);
        let decision =
            self.router
                .optimize_routing(&analysis, self.config.strategy, &BTreeSet::new());

        if !decision.is_direct() && decision.confidence > self.router.config().min_confidence {
            state.pending_workers = decision.selected_workers.iter().cloned().collect();
            state.selected_worker = decision.primary().map(str::to_string);
            state.stage = Stage::SpecialistExecution;
        } else {
            state.stage = Stage::DirectResponse;
        }
        info!(
            thread_id = %state.thread_id,
            selected = ?decision.selected_workers,
            confidence = decision.confidence,
            next = %state.stage,
            "Routed request"
        );
        state.routing = Some(decision);
        Ok(Step::Next)
    }

    async fn run_specialist(&self, state: &mut OrchestrationState) -> MaestroResult<Step> {
        let Some(worker) = state.pending_workers.pop_front() else {
            state.stage = self.after_specialists(state);
            return Ok(Step::Next);
        };
        state.selected_worker = Some(worker.clone());

        let prompt = specialist_prompt(state, &worker);
        let started = Instant::now();
        let handle = self.loader.get(&worker).await?;

        let result = match tokio::time::timeout(self.config.worker_timeout(), handle.run(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(MaestroError::ExecutionTimeout {
                worker: worker.clone(),
                seconds: self.config.worker_timeout_secs,
            }),
        };
        let elapsed = started.elapsed();
        let success = result.is_ok();
        if let Some(decision) = &state.routing {
            self.router
                .record_outcome(decision, std::slice::from_ref(&worker), elapsed, success);
        }
        *state.node_timings.entry(worker.clone()).or_default() += elapsed.as_secs_f64();

        let text = result.inspect_err(|_| {
            self.loader.record_error(&worker);
        })?;
        info!(
            thread_id = %state.thread_id,
            worker = %worker,
            elapsed_secs = elapsed.as_secs_f64(),
            "Specialist finished"
        );
        state.record_result(worker, text);
        state.stage = self.after_specialists(state);
        Ok(Step::Next)
    }

    fn after_specialists(&self, state: &OrchestrationState) -> Stage {
        if state.has_pending_specialist() {
            Stage::SpecialistExecution
        } else if state.needs_synthesis() {
            Stage::Synthesis
        } else {
            Stage::AwaitingSatisfaction
        }
    }

    async fn respond_directly(&self, state: &mut OrchestrationState) -> MaestroResult<Step> {
        let director = self.config.director.clone();
        let prompt = specialist_prompt(state, &director);
        let handle = self.loader.get(&director).await?;
        let text = match tokio::time::timeout(self.config.worker_timeout(), handle.run(&prompt)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MaestroError::ExecutionTimeout {
                    worker: director,
                    seconds: self.config.worker_timeout_secs,
                })
            }
        };
        state.final_response = Some(text);
        state.stage = Stage::Complete;
        Ok(Step::Next)
    }

    fn await_satisfaction(&self, state: &mut OrchestrationState) -> Step {
        let Some(reply) = state.human_response.clone() else {
            return Step::Checkpoint(checkpoint(
                state,
                CheckpointKind::Satisfaction,
                "Are you satisfied with this result? Reply 'satisfied' or describe what else is needed.",
                state.final_text(),
            ));
        };

        match Verdict::parse(&reply) {
            Verdict::Satisfied => {
                state.satisfied = true;
                state.stage = if state.needs_synthesis() {
                    Stage::Synthesis
                } else {
                    Stage::Complete
                };
            }
            Verdict::MoreWork(text) => {
                debug!(thread_id = %state.thread_id, "Human requested more work");
                state.user_input = Some(text);
                state.human_response = None;
                state.stage = Stage::Routing;
            }
        }
        Step::Next
    }

    async fn archive(&self, state: &OrchestrationState, outcome: &RunOutcome, duration_secs: f64) {
        let (label, error) = match outcome {
            RunOutcome::Completed { .. } => ("completed", None),
            RunOutcome::Suspended { .. } => ("suspended", None),
            RunOutcome::Failed { error, .. } => ("failed", Some(error.clone())),
        };
        self.monitor
            .archive(ExecutionSummary {
                execution_id: state.execution_id,
                thread_id: state.thread_id.clone(),
                outcome: label.to_string(),
                stage: state.stage,
                workers: state
                    .results
                    .keys()
                    .filter(|k| *k != SYNTHESIS_KEY)
                    .cloned()
                    .collect(),
                node_timings: state.node_timings.clone(),
                duration_secs,
                error,
                finished_at: Utc::now(),
            })
            .await;
    }
}

fn checkpoint(
    state: &OrchestrationState,
    kind: CheckpointKind,
    prompt: &str,
    context: String,
) -> CheckpointRequest {
    CheckpointRequest {
        thread_id: state.thread_id.clone(),
        execution_id: state.execution_id,
        kind,
        prompt: prompt.to_string(),
        context,
    }
}

fn fail(state: &mut OrchestrationState, err: &MaestroError) {
    let context = ErrorContext::from_error(err);
    error!(
        thread_id = %state.thread_id,
        stage = %state.stage,
        worker = ?context.worker,
        reason = %context.reason,
        error = %err,
        "Orchestration failed"
    );
    state.error_context = Some(context);
    state.stage = Stage::Error;
}

fn terminal_outcome(state: &OrchestrationState) -> RunOutcome {
    match state.stage {
        Stage::Error => RunOutcome::Failed {
            thread_id: state.thread_id.clone(),
            execution_id: state.execution_id,
            error: state.error_context.clone().unwrap_or_else(|| ErrorContext {
                worker: None,
                kind: ErrorKind::Internal,
                reason: "internal".to_string(),
                message: "execution failed without context".to_string(),
                detail: "execution failed without context".to_string(),
            }),
        },
        _ => RunOutcome::Completed {
            thread_id: state.thread_id.clone(),
            response: state.final_text(),
        },
    }
}

// The current task plus what the other workers have produced so far.
fn specialist_prompt(state: &OrchestrationState, worker: &str) -> String {
    let mut prompt = state
        .task_description
        .clone()
        .or_else(|| state.user_input.clone())
        .unwrap_or_default();
    let prior: Vec<(&String, &String)> = state
        .results
        .iter()
        .filter(|(name, _)| name.as_str() != worker && name.as_str() != SYNTHESIS_KEY)
        .collect();
    if !prior.is_empty() {
        prompt.push_str("\n\n## Context from other workers\n");
        for (name, text) in prior {
            let _ = write!(prompt, "\n### {name}\n{text}\n");
        }
    }
    prompt
}

fn synthesize(state: &mut OrchestrationState) {
    let mut report = String::from("## Combined report\n");
    for (name, text) in state.results.iter().filter(|(k, _)| *k != SYNTHESIS_KEY) {
        let _ = write!(report, "\n### {name}\n{}\n", text.trim_end());
    }
    state.synthesized = state.specialist_result_count();
    state.results_dirty = false;
    info!(
        thread_id = %state.thread_id,
        contributors = state.synthesized,
        "Synthesized results"
    );
    state.results.insert(SYNTHESIS_KEY.to_string(), report);
    state.stage = Stage::Director;
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
