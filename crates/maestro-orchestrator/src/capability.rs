use crate::types::Capability;
use maestro_core::{MaestroError, MaestroResult, WorkerDescriptor};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Capability granted to workers whose name carries a developer role hint.
pub const SOFTWARE_DEVELOPMENT: &str = "software_development";

const SOFTWARE_DEVELOPMENT_CONFIDENCE: f64 = 0.9;

const ROLE_HINTS: &[&str] = &["developer", "swe", "engineer", "coder", "programmer"];

/// A capability name with the fixed keyword set that evidences it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPattern {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub keywords: Vec<String>,
}

impl CapabilityPattern {
    pub fn new(name: &str, description: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Reject patterns that would match any text: a blank name, no keywords,
    /// or a blank keyword.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.name.trim().is_empty() {
            return Err(MaestroError::Config("capability name must not be empty".into()));
        }
        if self.keywords.is_empty() {
            return Err(MaestroError::Config(format!(
                "capability '{}' has no keywords",
                self.name
            )));
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(MaestroError::Config(format!(
                "capability '{}' has an empty keyword",
                self.name
            )));
        }
        Ok(())
    }

    fn keyword_set(&self) -> BTreeSet<String> {
        self.keywords.iter().map(|k| k.to_lowercase()).collect()
    }

    /// Whether any keyword occurs in `lower` (already lowercased).
    fn intersects(&self, lower: &str) -> bool {
        self.keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
    }
}

/// The built-in capability patterns.
pub fn default_patterns() -> Vec<CapabilityPattern> {
    vec![
        CapabilityPattern::new(
            "file_operations",
            "Reading, creating and editing files",
            &["file", "read", "write", "create", "modify", "edit"],
        ),
        CapabilityPattern::new(
            "code",
            "Writing and changing program code",
            &["code", "implement", "function", "program", "script", "compile", "refactor", "debug"],
        ),
        CapabilityPattern::new(
            "review",
            "Reviewing work for defects and quality",
            &["review", "audit", "critique", "feedback", "bugs", "quality", "inspect"],
        ),
        CapabilityPattern::new(
            "writing",
            "Drafting prose and documentation",
            &["draft", "document", "article", "essay", "blog", "story", "prose"],
        ),
        CapabilityPattern::new(
            "research",
            "Finding and summarizing information",
            &["research", "search", "investigate", "explore", "sources", "summarize"],
        ),
        CapabilityPattern::new(
            "data_analysis",
            "Analyzing data sets and metrics",
            &["data", "analyze", "statistics", "chart", "dataset", "metrics", "csv"],
        ),
        CapabilityPattern::new(
            "testing",
            "Writing and running tests",
            &["test", "verify", "validate", "assert", "coverage"],
        ),
        CapabilityPattern::new(
            "web",
            "Interacting with web services",
            &["web", "http", "endpoint", "browse", "fetch", "website"],
        ),
        CapabilityPattern::new(
            "planning",
            "Breaking work into plans and schedules",
            &["plan", "roadmap", "schedule", "organize", "strategy", "milestone"],
        ),
    ]
}

fn software_development_pattern() -> CapabilityPattern {
    CapabilityPattern::new(
        SOFTWARE_DEVELOPMENT,
        "General software engineering",
        &["code", "implement", "develop", "software", "program", "debug", "fix", "build"],
    )
}

/// Derives worker capabilities from configuration text and caches them per worker name.
///
/// Cached entries live until [`CapabilityIndex::invalidate`] or
/// [`CapabilityIndex::clear`] is called.
pub struct CapabilityIndex {
    patterns: Vec<CapabilityPattern>,
    cache: RwLock<HashMap<String, Vec<Capability>>>,
}

impl CapabilityIndex {
    /// Create an index with the built-in patterns.
    pub fn new() -> Self {
        Self::with_patterns(Vec::new())
    }

    /// Create an index with the built-in patterns plus `extra`.
    ///
    /// An extra pattern with the same name as a built-in replaces it.
    pub fn with_patterns(extra: Vec<CapabilityPattern>) -> Self {
        let mut patterns = default_patterns();
        for pattern in extra {
            match patterns.iter_mut().find(|p| p.name == pattern.name) {
                Some(existing) => *existing = pattern,
                None => patterns.push(pattern),
            }
        }
        Self {
            patterns,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn patterns(&self) -> &[CapabilityPattern] {
        &self.patterns
    }

    /// Capabilities for `descriptor`, derived once and then served from cache.
    pub fn capabilities_for(&self, descriptor: &WorkerDescriptor) -> Vec<Capability> {
        if let Some(cached) = self.cache.read().get(&descriptor.name) {
            return cached.clone();
        }

        let derived = self.derive(descriptor);
        let mut cache = self.cache.write();
        // Another caller may have filled the entry between the two locks.
        cache
            .entry(descriptor.name.clone())
            .or_insert(derived)
            .clone()
    }

    /// Derive capabilities without touching the cache.
    pub fn derive(&self, descriptor: &WorkerDescriptor) -> Vec<Capability> {
        let text = format!(
            "{} {} {} {}",
            descriptor.role,
            descriptor.instructions,
            descriptor.description,
            descriptor.tools.join(" ")
        )
        .to_lowercase();

        let mut capabilities: Vec<Capability> = self
            .patterns
            .iter()
            .filter_map(|pattern| {
                let keywords = pattern.keyword_set();
                if keywords.is_empty() {
                    return None;
                }
                let count = keywords.iter().filter(|k| text.contains(k.as_str())).count();
                (count > 0).then(|| Capability {
                    name: pattern.name.clone(),
                    description: pattern.description.clone(),
                    confidence: (count as f64 / keywords.len() as f64).min(1.0),
                    keywords,
                })
            })
            .collect();

        let name = descriptor.name.to_lowercase();
        if ROLE_HINTS.iter().any(|hint| name.contains(hint))
            && !capabilities.iter().any(|c| c.name == SOFTWARE_DEVELOPMENT)
        {
            let pattern = software_development_pattern();
            capabilities.push(Capability {
                name: pattern.name.clone(),
                description: pattern.description.clone(),
                keywords: pattern.keyword_set(),
                confidence: SOFTWARE_DEVELOPMENT_CONFIDENCE,
            });
        }

        debug!(
            worker = %descriptor.name,
            capabilities = capabilities.len(),
            "Derived worker capabilities"
        );
        capabilities
    }

    /// Names of the patterns whose keywords occur in `description`.
    pub fn required_capabilities(&self, description: &str) -> BTreeSet<String> {
        let lower = description.to_lowercase();
        self.patterns
            .iter()
            .filter(|p| p.intersects(&lower))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Drop the cached entry for one worker. Returns whether it was cached.
    pub fn invalidate(&self, name: &str) -> bool {
        self.cache.write().remove(name).is_some()
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for CapabilityIndex {
    fn default() -> Self {
        Self::new()
    }
}
