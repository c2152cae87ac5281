use crate::capability::CapabilityIndex;
use crate::config::RoutingConfig;
use crate::loader::WorkerLoader;
use crate::types::{Capability, Complexity, RoutingDecision, RoutingStrategy, TaskAnalysis, WorkerStatus};
use chrono::{DateTime, Utc};
use maestro_core::RosterProvider;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MULTI_STEP_MARKERS: &[&str] = &[
    "then",
    "after that",
    "afterwards",
    "first",
    "finally",
    "next",
    "step",
    "steps",
    "followed by",
];

const ANALYSIS_MARKERS: &[&str] = &[
    "compare",
    "analyze",
    "evaluate",
    "trade-off",
    "tradeoff",
    "architecture",
    "design",
];

const CONJUNCTIONS: &[&str] = &[" and ", " also ", " as well as ", " plus ", ";"];

/// Sum of per-capability match scores for a task description.
///
/// Every term is non-negative, so adding capabilities never lowers the sum.
pub fn capability_score(capabilities: &[Capability], description: &str) -> f64 {
    capabilities
        .iter()
        .map(|c| c.match_score(description))
        .sum()
}

/// One scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
    /// Capability names that contributed a positive match.
    pub matched: Vec<String>,
}

/// A recorded routing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingOutcome {
    pub decision: RoutingDecision,
    pub actual_workers: Vec<String>,
    pub duration_secs: f64,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct WorkerStats {
    runs: u64,
    successes: u64,
    total_secs: f64,
}

#[derive(Debug, Default)]
struct DecisionStats {
    total: u64,
    confidence_sum: f64,
}

/// Aggregate routing observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub total_decisions: u64,
    pub average_confidence: f64,
    pub recorded_outcomes: usize,
    pub per_worker_success_rate: BTreeMap<String, f64>,
    pub per_worker_average_duration_secs: BTreeMap<String, f64>,
}

/// Scores roster workers against a task and picks who should handle it.
///
/// Scoring is static: recorded outcomes feed metrics only.
pub struct RoutingOptimizer {
    roster: Arc<dyn RosterProvider>,
    loader: Arc<WorkerLoader>,
    index: Arc<CapabilityIndex>,
    config: RoutingConfig,
    director: String,
    max_collaborators: usize,
    enumeration: Option<Regex>,
    decisions: Mutex<DecisionStats>,
    outcomes: Mutex<VecDeque<RoutingOutcome>>,
    worker_stats: Mutex<HashMap<String, WorkerStats>>,
}

impl RoutingOptimizer {
    pub fn new(
        roster: Arc<dyn RosterProvider>,
        loader: Arc<WorkerLoader>,
        config: RoutingConfig,
    ) -> Self {
        let index = Arc::clone(loader.capability_index());
        Self {
            roster,
            loader,
            index,
            config,
            director: "director".to_string(),
            max_collaborators: 3,
            enumeration: Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*•])\s+\S").ok(),
            decisions: Mutex::new(DecisionStats::default()),
            outcomes: Mutex::new(VecDeque::new()),
            worker_stats: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the worker that is never routed to.
    pub fn with_director(mut self, director: impl Into<String>) -> Self {
        self.director = director.into();
        self
    }

    pub fn with_max_collaborators(mut self, max: usize) -> Self {
        self.max_collaborators = max.max(1);
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Classify a request and derive the capabilities it needs.
    pub fn analyze_task(&self, description: &str) -> TaskAnalysis {
        let required_capabilities = self.index.required_capabilities(description);
        let complexity = self.classify(description);
        let analysis = TaskAnalysis {
            description: description.to_string(),
            complexity,
            requires_collaboration: required_capabilities.len() > 1,
            required_capabilities,
        };
        debug!(
            complexity = %analysis.complexity,
            required = ?analysis.required_capabilities,
            "Analyzed task"
        );
        analysis
    }

    fn classify(&self, description: &str) -> Complexity {
        let lower = description.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|t| !t.is_empty())
            .collect();
        let mut points = 0;

        if tokens.len() > 30 {
            points += 1;
        }
        if tokens.len() > 80 {
            points += 1;
        }
        let multi_step = MULTI_STEP_MARKERS.iter().any(|m| {
            if m.contains(' ') {
                lower.contains(m)
            } else {
                tokens.contains(m)
            }
        });
        if multi_step {
            points += 1;
        }
        let conjunctions: usize = CONJUNCTIONS.iter().map(|c| lower.matches(c).count()).sum();
        if conjunctions >= 2 {
            points += 1;
        }
        if let Some(enumeration) = &self.enumeration {
            if enumeration.find_iter(description).count() >= 2 {
                points += 1;
            }
        }
        if ANALYSIS_MARKERS.iter().any(|m| lower.contains(m)) {
            points += 1;
        }

        match points {
            0 => Complexity::Simple,
            1 => Complexity::Moderate,
            2 | 3 => Complexity::Complex,
            _ => Complexity::VeryComplex,
        }
    }

    /// Score of one worker for `description`, including the ready bonus and reliability penalty.
    pub fn score_worker(&self, name: &str, description: &str) -> Option<Candidate> {
        let descriptor = self.roster.get(name)?;
        let capabilities = self.index.capabilities_for(&descriptor);

        let mut matched = Vec::new();
        let mut score = 0.0;
        for capability in &capabilities {
            let s = capability.match_score(description);
            if s > 0.0 {
                matched.push(capability.name.clone());
            }
            score += s;
        }
        if self.loader.status(name) == WorkerStatus::Ready {
            score += self.config.ready_bonus;
        }
        score *= self.config.reliability_factor(self.loader.error_count(name));

        Some(Candidate {
            name: name.to_string(),
            score: score.max(0.0),
            matched,
        })
    }

    /// All eligible workers ranked by score, best first. Ties break by name.
    pub fn rank(&self, description: &str, exclude: &BTreeSet<String>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .roster
            .list_workers()
            .into_keys()
            .filter(|name| *name != self.director && !exclude.contains(name))
            .filter_map(|name| self.score_worker(&name, description))
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates
    }

    /// Pick the worker(s) for a task.
    ///
    /// An empty selection with zero confidence means no worker scored above
    /// `min_confidence` and the director should answer directly.
    pub fn optimize_routing(
        &self,
        analysis: &TaskAnalysis,
        strategy: RoutingStrategy,
        exclude: &BTreeSet<String>,
    ) -> RoutingDecision {
        let strategy = match strategy {
            RoutingStrategy::Auto if analysis.requires_collaboration => RoutingStrategy::Collaborative,
            RoutingStrategy::Auto => RoutingStrategy::Single,
            other => other,
        };
        let ranked = self.rank(&analysis.description, exclude);

        let decision = match ranked.first() {
            Some(top) if top.score > self.config.min_confidence => {
                let mut selected = vec![top.clone()];
                if strategy == RoutingStrategy::Collaborative {
                    self.add_collaborators(analysis, &ranked, &mut selected);
                }
                let alternatives = ranked
                    .iter()
                    .filter(|c| !selected.iter().any(|s| s.name == c.name))
                    .take(self.config.max_alternatives)
                    .map(|c| (c.name.clone(), c.score))
                    .collect();
                RoutingDecision {
                    reasoning: self.explain(analysis, &selected),
                    confidence: top.score.min(1.0),
                    selected_workers: selected.into_iter().map(|c| c.name).collect(),
                    strategy,
                    alternatives,
                }
            }
            best => RoutingDecision {
                selected_workers: Vec::new(),
                confidence: 0.0,
                reasoning: match best {
                    Some(c) => format!(
                        "No worker scored above {:.2} (best: {} at {:.2}); handling directly",
                        self.config.min_confidence, c.name, c.score
                    ),
                    None => "No specialist workers available; handling directly".to_string(),
                },
                strategy,
                alternatives: ranked
                    .iter()
                    .take(self.config.max_alternatives)
                    .map(|c| (c.name.clone(), c.score))
                    .collect(),
            },
        };

        {
            let mut stats = self.decisions.lock();
            stats.total += 1;
            stats.confidence_sum += decision.confidence;
        }
        info!(
            selected = ?decision.selected_workers,
            confidence = decision.confidence,
            strategy = %decision.strategy,
            "Routing decision"
        );
        decision
    }

    // Adds workers above threshold that cover a still-missing required capability.
    fn add_collaborators(&self, analysis: &TaskAnalysis, ranked: &[Candidate], selected: &mut Vec<Candidate>) {
        let mut covered: BTreeSet<String> = selected
            .iter()
            .flat_map(|c| c.matched.iter().cloned())
            .collect();
        for candidate in ranked.iter().skip(1) {
            if selected.len() >= self.max_collaborators {
                break;
            }
            if candidate.score <= self.config.min_confidence {
                break;
            }
            let contributes = candidate
                .matched
                .iter()
                .any(|m| analysis.required_capabilities.contains(m) && !covered.contains(m));
            if contributes {
                covered.extend(candidate.matched.iter().cloned());
                selected.push(candidate.clone());
            }
        }
    }

    fn explain(&self, analysis: &TaskAnalysis, selected: &[Candidate]) -> String {
        let parts: Vec<String> = selected
            .iter()
            .map(|c| {
                if c.matched.is_empty() {
                    format!("{} (score {:.2}, ready)", c.name, c.score)
                } else {
                    format!("{} (score {:.2}, matched {})", c.name, c.score, c.matched.join(", "))
                }
            })
            .collect();
        format!(
            "{} task; selected {}",
            analysis.complexity,
            parts.join("; ")
        )
    }

    /// Record what actually ran for a decision. Feeds metrics only.
    pub fn record_outcome(
        &self,
        decision: &RoutingDecision,
        actual_workers: &[String],
        duration: Duration,
        success: bool,
    ) {
        let duration_secs = duration.as_secs_f64();
        {
            let mut stats = self.worker_stats.lock();
            for worker in actual_workers {
                let entry = stats.entry(worker.clone()).or_default();
                entry.runs += 1;
                entry.total_secs += duration_secs;
                if success {
                    entry.successes += 1;
                }
            }
        }

        let mut outcomes = self.outcomes.lock();
        if outcomes.len() >= self.config.outcome_history {
            outcomes.pop_front();
        }
        outcomes.push_back(RoutingOutcome {
            decision: decision.clone(),
            actual_workers: actual_workers.to_vec(),
            duration_secs,
            success,
            recorded_at: Utc::now(),
        });
    }

    pub fn outcomes(&self) -> Vec<RoutingOutcome> {
        self.outcomes.lock().iter().cloned().collect()
    }

    pub fn metrics(&self) -> RoutingMetrics {
        let (total_decisions, average_confidence) = {
            let stats = self.decisions.lock();
            let avg = if stats.total == 0 {
                0.0
            } else {
                stats.confidence_sum / stats.total as f64
            };
            (stats.total, avg)
        };
        let stats = self.worker_stats.lock();
        let mut per_worker_success_rate = BTreeMap::new();
        let mut per_worker_average_duration_secs = BTreeMap::new();
        for (name, s) in stats.iter().filter(|(_, s)| s.runs > 0) {
            per_worker_success_rate.insert(name.clone(), s.successes as f64 / s.runs as f64);
            per_worker_average_duration_secs.insert(name.clone(), s.total_secs / s.runs as f64);
        }
        RoutingMetrics {
            total_decisions,
            average_confidence,
            recorded_outcomes: self.outcomes.lock().len(),
            per_worker_success_rate,
            per_worker_average_duration_secs,
        }
    }
}
