use maestro_agent::ModelConfig;
use maestro_core::WorkerDescriptor;
use maestro_orchestrator::{
    default_roster, CapabilityPattern, OrchestratorConfig, RoutingConfig, StaticRoster,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct MaestroConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub workers: Vec<WorkerDescriptor>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityPattern>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            data_dir: default_data_dir(),
            orchestrator: OrchestratorConfig::default(),
            routing: RoutingConfig::default(),
            workers: Vec::new(),
            capabilities: Vec::new(),
        }
    }
}

impl MaestroConfig {
    /// Read and validate `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.model = config.model.resolve_api_key();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.model.validate()?;
        self.orchestrator.validate()?;
        self.routing.validate()?;
        StaticRoster::validate(&self.workers)?;
        for pattern in &self.capabilities {
            pattern.validate()?;
        }
        Ok(())
    }

    /// Configured workers, or the built-in team when none are configured.
    pub fn roster(&self) -> StaticRoster {
        let workers = if self.workers.is_empty() {
            default_roster()
        } else {
            self.workers.clone()
        };
        StaticRoster::with_director(self.orchestrator.director.clone(), workers)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}
