//! Configuration schema for mediagate
//!
//! Configuration is stored at `~/.config/mediagate/config.toml`

use crate::error::{MediagateError, MediagateResult};
use crate::stage::{ScoreDirection, StageKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Content-addressed cache settings
    pub cache: CacheConfig,

    /// Spend ceilings
    pub budget: BudgetConfig,

    /// Pipeline execution settings
    pub pipeline: PipelineConfig,

    /// Ordered assessment stages, cheapest first
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            pipeline: PipelineConfig::default(),
            stages: default_stages(),
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Override for the state directory (cache, budget ledger, events)
    pub state_dir: Option<PathBuf>,

    /// Append one JSON line per assessed asset to the events log
    pub events_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            state_dir: None,
            events_log: true,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable result caching (default: true)
    pub enabled: bool,

    /// Re-hash file contents on every lookup instead of trusting size checks
    pub strict: bool,

    /// Cache root (defaults to `<state_dir>/cache`)
    pub dir: Option<PathBuf>,

    /// Entries not accessed for N days are removed by `cache gc` (0 = disabled)
    pub gc_days: u32,

    /// A path index record is trusted only if the file was last changed at
    /// least this long before it was hashed (non-strict mode)
    pub racy_window_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            dir: None,
            gc_days: 90,
            racy_window_ms: 2000,
        }
    }
}

/// Budget ceilings, all in the same currency unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum spend on a single asset
    pub per_item_limit: f64,

    /// Maximum spend in one batch
    pub per_batch_limit: f64,

    /// Maximum spend across all runs
    pub lifetime_limit: f64,

    /// Persist the lifetime counter between runs
    pub persist_lifetime: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_item_limit: 0.25,
            per_batch_limit: 5.0,
            lifetime_limit: 100.0,
            persist_lifetime: true,
        }
    }
}

/// Pipeline execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum assets assessed in parallel
    pub concurrency: usize,

    /// Timeout for a stage that does not set its own
    pub default_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_timeout_secs: 30,
        }
    }
}

/// One entry of the ordered stage list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stable stage identifier, used as the cache payload key
    pub id: String,

    /// Which registered technique implements this stage
    pub kind: StageKind,

    /// Nominal cost per call, used for budget pre-checks
    #[serde(default)]
    pub cost_per_call: f64,

    /// Pass threshold (inclusive)
    pub threshold: f64,

    /// Comparison direction; defaults to the kind's natural scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ScoreDirection>,

    /// Failure or error stops the asset's pipeline
    #[serde(default = "default_required")]
    pub required: bool,

    /// Per-call timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Remote endpoint for remote kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the remote API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Local kinds: files smaller than this score zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bytes: Option<u64>,

    /// Local kinds: bytes sampled for scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_bytes: Option<u64>,
}

impl StageConfig {
    /// Comparison direction, falling back to the kind's default
    pub fn direction(&self) -> ScoreDirection {
        self.direction
            .unwrap_or_else(|| self.kind.default_direction())
    }

    /// Whether this stage spends budget
    pub fn is_paid(&self) -> bool {
        self.cost_per_call > 0.0
    }
}

fn default_required() -> bool {
    true
}

fn default_stages() -> Vec<StageConfig> {
    vec![StageConfig {
        id: "local_quality".to_string(),
        kind: StageKind::LocalQuality,
        cost_per_call: 0.0,
        threshold: 50.0,
        direction: None,
        required: true,
        timeout_secs: None,
        endpoint: None,
        api_key_env: None,
        min_bytes: None,
        sample_bytes: None,
    }]
}

impl Config {
    /// Check budget and stage settings before any asset is processed
    pub fn validate(&self) -> MediagateResult<()> {
        self.validate_budget()?;
        self.validate_stages()?;

        if self.pipeline.concurrency == 0 {
            return Err(MediagateError::User(
                "pipeline.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_budget(&self) -> MediagateResult<()> {
        let limits = [
            ("per_item_limit", self.budget.per_item_limit),
            ("per_batch_limit", self.budget.per_batch_limit),
            ("lifetime_limit", self.budget.lifetime_limit),
        ];
        for (name, value) in limits {
            if !value.is_finite() || value <= 0.0 {
                return Err(MediagateError::BudgetConfig(format!(
                    "{} must be a positive amount, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    fn validate_stages(&self) -> MediagateResult<()> {
        if self.stages.is_empty() {
            return Err(MediagateError::NoStages);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                return Err(MediagateError::stage_config("<unnamed>", "id must not be empty"));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(MediagateError::stage_config(&stage.id, "duplicate stage id"));
            }
            if !stage.cost_per_call.is_finite() || stage.cost_per_call < 0.0 {
                return Err(MediagateError::stage_config(
                    &stage.id,
                    format!("cost_per_call must be >= 0, got {}", stage.cost_per_call),
                ));
            }
            if !stage.threshold.is_finite() {
                return Err(MediagateError::stage_config(&stage.id, "threshold must be finite"));
            }
            if stage.timeout_secs == Some(0) {
                return Err(MediagateError::stage_config(&stage.id, "timeout_secs must be > 0"));
            }
            if stage.kind.is_remote() && stage.endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(MediagateError::stage_config(
                    &stage.id,
                    format!("{} stages need an endpoint", stage.kind),
                ));
            }
        }

        let out_of_order = self
            .stages
            .windows(2)
            .any(|pair| pair[1].cost_per_call < pair[0].cost_per_call);
        if out_of_order {
            warn!("Stages are not ordered cheapest-first; budget skips may cut off cheaper stages");
        }

        Ok(())
    }
}
