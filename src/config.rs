use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngramConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub consolidation: ConsolidationConfig,
    pub importance: ImportanceConfig,
    pub scheduler: SchedulerConfig,
    pub graph: GraphConfig,
    pub breaker: BreakerConfig,
    pub queue: QueueConfig,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Default project id stamped on new memories.
    pub project_id: String,
    /// Directory holding one markdown file per memory.
    pub memory_dir: String,
    /// Sidecar database: ingestion queue + search analytics.
    pub session_db: String,
    /// Sidecar database: FSRS state + review history.
    pub fsrs_db: String,
    /// Sidecar database: derived index, embeddings, graph, cache, breakers.
    pub intelligence_db: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Weight of the semantic channel in the hybrid fusion (BM25 gets the rest).
    pub hybrid_alpha: f64,
    /// Minimum cosine similarity for a semantic candidate.
    pub semantic_threshold: f64,
    /// Candidates fetched from each channel before ranking.
    pub candidate_limit: usize,
    pub default_limit: usize,
    /// Final ranking weights: semantic, keyword, recency, importance.
    pub rank_weights: [f64; 4],
    pub cache_ttl_hours: i64,
    pub cache_max_entries: usize,
    /// Result-set sizes outside this range bypass the cache.
    pub cache_min_results: usize,
    pub cache_max_results: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub llm_enabled: bool,
    /// Shell command invoked for LLM extraction; receives the prompt on stdin.
    pub llm_command: String,
    pub llm_timeout_ms: u64,
    /// Bidirectional word-overlap ratio above which a candidate is a duplicate.
    pub dedup_ratio: f64,
    /// Conversations shorter than this are skipped entirely.
    pub min_conversation_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImportanceConfig {
    pub decay_rate: f64,
    pub reinforce_factor: f64,
    pub reinforce_cap: f64,
    pub archive_threshold: f64,
    pub stale_threshold_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub due_limit: usize,
    /// Promotion gate: minimum stability.
    pub promote_min_stability: f64,
    /// Promotion gate: minimum review count.
    pub promote_min_reviews: u32,
    /// Promotion gate: minimum distinct validating projects.
    pub promote_min_projects: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    pub default_strength: f64,
    /// Minimum LLM confidence before a contradicts edge is auto-linked.
    pub contradiction_min_confidence: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// Soft cap; the hook drops with a warning past this.
    pub capacity: usize,
    /// Running jobs older than this are considered abandoned and re-queued.
    pub lease_minutes: i64,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            consolidation: ConsolidationConfig::default(),
            importance: ImportanceConfig::default(),
            scheduler: SchedulerConfig::default(),
            graph: GraphConfig::default(),
            breaker: BreakerConfig::default(),
            queue: QueueConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_engram_dir();
        Self {
            project_id: "default".into(),
            memory_dir: base.join("memories").to_string_lossy().into_owned(),
            session_db: base.join("session.db").to_string_lossy().into_owned(),
            fsrs_db: base.join("fsrs.db").to_string_lossy().into_owned(),
            intelligence_db: base.join("intelligence.db").to_string_lossy().into_owned(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir: default_engram_dir()
                .join("models")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.7,
            semantic_threshold: 0.65,
            candidate_limit: 50,
            default_limit: 20,
            rank_weights: [0.5, 0.2, 0.2, 0.1],
            cache_ttl_hours: 24,
            cache_max_entries: 500,
            cache_min_results: 3,
            cache_max_results: 100,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            llm_enabled: false,
            llm_command: "claude -p".into(),
            llm_timeout_ms: 30_000,
            dedup_ratio: 0.70,
            min_conversation_chars: 50,
        }
    }
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.99,
            reinforce_factor: 1.15,
            reinforce_cap: 0.95,
            archive_threshold: 0.2,
            stale_threshold_days: 180,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            due_limit: 10,
            promote_min_stability: 3.0,
            promote_min_reviews: 3,
            promote_min_projects: 2,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_strength: 0.5,
            contradiction_min_confidence: 0.7,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_s: 60,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            lease_minutes: 30,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `MEMORY_SYSTEM_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_PROJECT_ID") {
            self.storage.project_id = val;
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_MEMORY_DIR") {
            self.storage.memory_dir = val;
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_SESSION_DB") {
            self.storage.session_db = val;
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_FSRS_DB") {
            self.storage.fsrs_db = val;
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_INTELLIGENCE_DB") {
            self.storage.intelligence_db = val;
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_LLM_ENABLED") {
            self.consolidation.llm_enabled = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_LLM_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.consolidation.llm_timeout_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("MEMORY_SYSTEM_LOG_LEVEL") {
            self.log_level = val;
        }
    }

    pub fn memory_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.memory_dir)
    }

    pub fn session_db(&self) -> PathBuf {
        expand_tilde(&self.storage.session_db)
    }

    pub fn fsrs_db(&self) -> PathBuf {
        expand_tilde(&self.storage.fsrs_db)
    }

    pub fn intelligence_db(&self) -> PathBuf {
        expand_tilde(&self.storage.intelligence_db)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
