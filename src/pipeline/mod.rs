//! Assessment pipeline
//!
//! [`Orchestrator`] sequences the configured stages for a single asset;
//! [`BatchRunner`] drives many assets through it in parallel.

pub mod batch;
pub mod orchestrator;

pub use batch::BatchRunner;
pub use orchestrator::{DisabledStages, Orchestrator};

use crate::budget::BudgetGuard;
use crate::cache::ContentCache;
use crate::config::Config;
use crate::error::MediagateResult;
use crate::stage::registry::RegistryContext;
use crate::stage::StageRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Build an orchestrator from a validated configuration
///
/// # Arguments
/// * `config` - The loaded configuration
/// * `strict` - Overrides `[cache] strict` when set
pub async fn build_orchestrator(config: &Config, strict: Option<bool>) -> MediagateResult<Orchestrator> {
    config.validate()?;

    let registry = StageRegistry::with_defaults(RegistryContext {
        default_timeout: Duration::from_secs(config.pipeline.default_timeout_secs),
    });
    let stages = registry.build(&config.stages)?;

    let cache = if config.cache.enabled {
        let mut cache_config = config.clone();
        if let Some(strict) = strict {
            cache_config.cache.strict = strict;
        }
        Some(Arc::new(ContentCache::from_config(&cache_config).await?))
    } else {
        debug!("Cache disabled; every asset is assessed from scratch");
        None
    };

    let budget = Arc::new(BudgetGuard::from_config(config).await?);
    Ok(Orchestrator::new(stages, cache, budget))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn builds_from_default_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.general.state_dir = Some(dir.path().to_path_buf());

        let orchestrator = build_orchestrator(&config, Some(true)).await.unwrap();
        assert_eq!(orchestrator.stages().len(), 1);
        assert!(orchestrator.cache().unwrap().is_strict());
        assert!(dir.path().join("cache").join("entries").exists());
    }

    #[tokio::test]
    async fn invalid_config_is_fatal() {
        let mut config = Config::default();
        config.budget.per_batch_limit = 0.0;
        assert!(build_orchestrator(&config, None).await.is_err());
    }
}
