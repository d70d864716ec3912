//! Stage registry
//!
//! A fixed set of known stage kinds, each mapped to a constructor. The stage
//! list from configuration is resolved once at startup; unknown kinds are
//! rejected by deserialization and bad settings by the constructors.

use crate::config::StageConfig;
use crate::error::{MediagateError, MediagateResult};
use crate::stage::http::HttpScorer;
use crate::stage::local::LocalQualityStage;
use crate::stage::remote::RemoteStage;
use crate::stage::{CapabilityStage, ScoreDirection, StageSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Known assessment techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Free local byte-level quality check
    LocalQuality,
    /// Paid remote scoring API
    RemoteScore,
    /// Paid remote semantic analysis
    SemanticAnalysis,
}

impl StageKind {
    /// Natural scale of the technique's score
    pub fn default_direction(&self) -> ScoreDirection {
        match self {
            Self::LocalQuality | Self::RemoteScore => ScoreDirection::Ascending,
            Self::SemanticAnalysis => ScoreDirection::Descending,
        }
    }

    /// Whether the technique calls an external service
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteScore | Self::SemanticAnalysis)
    }

    /// All kinds in registration order
    pub fn all() -> &'static [Self] {
        &[Self::LocalQuality, Self::RemoteScore, Self::SemanticAnalysis]
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalQuality => "local_quality",
            Self::RemoteScore => "remote_score",
            Self::SemanticAnalysis => "semantic_analysis",
        };
        write!(f, "{}", name)
    }
}

/// Settings shared by every constructor
#[derive(Debug, Clone)]
pub struct RegistryContext {
    pub default_timeout: Duration,
}

impl Default for RegistryContext {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Builds one stage from its configuration
pub type StageConstructor =
    fn(&StageConfig, &RegistryContext) -> MediagateResult<Arc<dyn CapabilityStage>>;

/// Maps stage kinds to constructors
pub struct StageRegistry {
    constructors: HashMap<StageKind, StageConstructor>,
    context: RegistryContext,
}

impl StageRegistry {
    /// Registry with no constructors
    pub fn empty(context: RegistryContext) -> Self {
        Self {
            constructors: HashMap::new(),
            context,
        }
    }

    /// Registry with the built-in techniques
    pub fn with_defaults(context: RegistryContext) -> Self {
        let mut registry = Self::empty(context);
        registry.register(StageKind::LocalQuality, build_local_quality);
        registry.register(StageKind::RemoteScore, build_remote);
        registry.register(StageKind::SemanticAnalysis, build_remote);
        registry
    }

    /// Register (or replace) the constructor for a kind
    pub fn register(&mut self, kind: StageKind, constructor: StageConstructor) {
        self.constructors.insert(kind, constructor);
    }

    /// Whether a constructor exists for `kind`
    pub fn supports(&self, kind: StageKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Resolve the ordered stage list, preserving configured order
    pub fn build(&self, configs: &[StageConfig]) -> MediagateResult<Vec<Arc<dyn CapabilityStage>>> {
        if configs.is_empty() {
            return Err(MediagateError::NoStages);
        }

        configs
            .iter()
            .map(|config| {
                let constructor = self.constructors.get(&config.kind).ok_or_else(|| {
                    MediagateError::stage_config(
                        &config.id,
                        format!("no constructor registered for kind {}", config.kind),
                    )
                })?;
                let stage = constructor(config, &self.context)?;
                debug!(
                    "Registered stage {} ({}, cost {}, threshold {})",
                    config.id,
                    config.kind,
                    config.cost_per_call,
                    stage.spec().threshold
                );
                Ok(stage)
            })
            .collect()
    }
}

fn build_local_quality(
    config: &StageConfig,
    context: &RegistryContext,
) -> MediagateResult<Arc<dyn CapabilityStage>> {
    let spec = StageSpec::from_config(config, context.default_timeout);
    let mut stage = LocalQualityStage::new(spec);
    if let Some(min_bytes) = config.min_bytes {
        stage = stage.with_min_bytes(min_bytes);
    }
    if let Some(sample_bytes) = config.sample_bytes {
        if sample_bytes == 0 {
            return Err(MediagateError::stage_config(&config.id, "sample_bytes must be > 0"));
        }
        stage = stage.with_sample_bytes(sample_bytes);
    }
    Ok(Arc::new(stage))
}

fn build_remote(
    config: &StageConfig,
    context: &RegistryContext,
) -> MediagateResult<Arc<dyn CapabilityStage>> {
    let endpoint = config
        .endpoint
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| MediagateError::stage_config(&config.id, "remote stages need an endpoint"))?;

    let spec = StageSpec::from_config(config, context.default_timeout);
    let timeout = spec.timeout.unwrap_or(context.default_timeout);
    let scorer = HttpScorer::new(endpoint, config.api_key_env.as_deref(), timeout)?;

    Ok(Arc::new(RemoteStage::new(spec, Arc::new(scorer))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn pipeline_config() -> Config {
        toml::from_str(
            r#"
            [[stages]]
            id = "local"
            kind = "local_quality"
            threshold = 50
            min_bytes = 256

            [[stages]]
            id = "score"
            kind = "remote_score"
            cost_per_call = 0.02
            threshold = 0.7
            endpoint = "https://scoring.example/v1/score"

            [[stages]]
            id = "semantic"
            kind = "semantic_analysis"
            cost_per_call = 0.05
            threshold = 0.3
            required = false
            endpoint = "https://semantic.example/v1/analyze"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn kind_display_matches_serde() {
        for kind in StageKind::all() {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn build_preserves_order() {
        let config = pipeline_config();
        let registry = StageRegistry::with_defaults(RegistryContext::default());
        let stages = registry.build(&config.stages).unwrap();

        let ids: Vec<&str> = stages.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["local", "score", "semantic"]);
        assert!(!stages[0].spec().is_paid());
        assert_eq!(stages[2].spec().threshold.direction, ScoreDirection::Descending);
        assert!(!stages[2].spec().required);
    }

    #[test]
    fn build_rejects_unregistered_kind() {
        let config = pipeline_config();
        let mut registry = StageRegistry::empty(RegistryContext::default());
        registry.register(StageKind::LocalQuality, build_local_quality);
        assert!(registry.supports(StageKind::LocalQuality));
        assert!(!registry.supports(StageKind::RemoteScore));

        let err = registry.build(&config.stages).err().unwrap();
        assert!(err.to_string().contains("no constructor registered"));
    }

    #[test]
    fn build_rejects_empty_list() {
        let registry = StageRegistry::with_defaults(RegistryContext::default());
        assert!(matches!(registry.build(&[]), Err(MediagateError::NoStages)));
    }

    #[test]
    fn remote_without_endpoint_fails() {
        let mut config = pipeline_config();
        config.stages[1].endpoint = None;
        let registry = StageRegistry::with_defaults(RegistryContext::default());
        assert!(registry.build(&config.stages).is_err());
    }
}
