use crate::types::RoutingStrategy;
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the orchestration state machine and its execution monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Roster name of the worker that answers directly and is never routed to.
    #[serde(default = "default_director")]
    pub director: String,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    /// Executions older than this are force-failed by the monitor.
    #[serde(default = "default_stale_ceiling_secs")]
    pub stale_ceiling_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Routing passes allowed per request.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default = "default_max_collaborators")]
    pub max_collaborators: usize,
    /// Execution summaries retained for metrics.
    #[serde(default = "default_summary_history")]
    pub summary_history: usize,
}

fn default_director() -> String {
    "director".to_string()
}

fn default_worker_timeout_secs() -> u64 {
    300
}

fn default_stale_ceiling_secs() -> u64 {
    600
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_max_iterations() -> u32 {
    16
}

fn default_max_collaborators() -> usize {
    3
}

fn default_summary_history() -> usize {
    100
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            director: default_director(),
            worker_timeout_secs: default_worker_timeout_secs(),
            stale_ceiling_secs: default_stale_ceiling_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_iterations: default_max_iterations(),
            strategy: RoutingStrategy::default(),
            max_collaborators: default_max_collaborators(),
            summary_history: default_summary_history(),
        }
    }
}

impl OrchestratorConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn stale_ceiling(&self) -> Duration {
        Duration::from_secs(self.stale_ceiling_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.director.trim().is_empty() {
            return Err(MaestroError::Config("director name must not be empty".into()));
        }
        if self.worker_timeout_secs == 0 {
            return Err(MaestroError::Config("worker_timeout_secs must be > 0".into()));
        }
        if self.stale_ceiling_secs == 0 {
            return Err(MaestroError::Config("stale_ceiling_secs must be > 0".into()));
        }
        if self.monitor_interval_secs == 0 {
            return Err(MaestroError::Config("monitor_interval_secs must be > 0".into()));
        }
        if self.max_iterations == 0 {
            return Err(MaestroError::Config("max_iterations must be > 0".into()));
        }
        if self.max_collaborators == 0 {
            return Err(MaestroError::Config("max_collaborators must be > 0".into()));
        }
        Ok(())
    }
}

/// Tunables of the routing score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// A worker is selected only when its score is strictly above this.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Added to the score of workers whose handle is already ready.
    #[serde(default = "default_ready_bonus")]
    pub ready_bonus: f64,
    #[serde(default = "default_penalty_per_error")]
    pub penalty_per_error: f64,
    /// Upper bound of the reliability penalty.
    #[serde(default = "default_max_reliability_penalty")]
    pub max_reliability_penalty: f64,
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
    /// Routing outcomes kept in memory.
    #[serde(default = "default_outcome_history")]
    pub outcome_history: usize,
}

fn default_min_confidence() -> f64 {
    0.1
}

fn default_ready_bonus() -> f64 {
    0.1
}

fn default_penalty_per_error() -> f64 {
    0.1
}

fn default_max_reliability_penalty() -> f64 {
    0.5
}

fn default_max_alternatives() -> usize {
    3
}

fn default_outcome_history() -> usize {
    1000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            ready_bonus: default_ready_bonus(),
            penalty_per_error: default_penalty_per_error(),
            max_reliability_penalty: default_max_reliability_penalty(),
            max_alternatives: default_max_alternatives(),
            outcome_history: default_outcome_history(),
        }
    }
}

impl RoutingConfig {
    /// Multiplier applied to a worker's score for `error_count` recorded failures.
    pub fn reliability_factor(&self, error_count: u32) -> f64 {
        let penalty = (f64::from(error_count) * self.penalty_per_error).min(self.max_reliability_penalty);
        1.0 - penalty
    }

    pub fn validate(&self) -> MaestroResult<()> {
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("ready_bonus", self.ready_bonus),
            ("penalty_per_error", self.penalty_per_error),
            ("max_reliability_penalty", self.max_reliability_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MaestroError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.outcome_history == 0 {
            return Err(MaestroError::Config("outcome_history must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.worker_timeout(), Duration::from_secs(300));
        assert_eq!(config.stale_ceiling(), Duration::from_secs(600));
        assert_eq!(config.strategy, RoutingStrategy::Single);
        config.validate().unwrap();
        RoutingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: OrchestratorConfig =
            toml::from_str("worker_timeout_secs = 5\nstrategy = \"auto\"").unwrap();
        assert_eq!(config.worker_timeout_secs, 5);
        assert_eq!(config.strategy, RoutingStrategy::Auto);
        assert_eq!(config.director, "director");
        assert_eq!(config.max_iterations, 16);
    }

    #[test]
    fn test_reliability_factor_is_capped() {
        let config = RoutingConfig::default();
        assert!((config.reliability_factor(0) - 1.0).abs() < 1e-9);
        assert!((config.reliability_factor(3) - 0.7).abs() < 1e-9);
        assert!((config.reliability_factor(9) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RoutingConfig {
            min_confidence: 1.5,
            ..RoutingConfig::default()
        };
        assert!(matches!(config.validate(), Err(MaestroError::Config(_))));

        let config = OrchestratorConfig {
            worker_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
