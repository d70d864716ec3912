//! Per-asset stage sequencing
//!
//! For one asset: identify it through the cache, replay or resume any cached
//! results, run the remaining stages in configured order under the budget
//! guard, write the results back and fold everything into a report.

use crate::asset::Asset;
use crate::budget::{BudgetGuard, ItemSpend};
use crate::cache::{hash_file, CacheEntry, CacheLookup, ContentCache};
use crate::error::{MediagateError, MediagateResult};
use crate::observe::Observable;
use crate::report::{PipelineReport, ReportBuilder, StageResult, StageStatus};
use crate::stage::{CapabilityError, CapabilityStage, ErrorKind, StageOutcome, StageSpec};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stages switched off for the rest of the run, shared by every worker
#[derive(Debug, Default)]
pub struct DisabledStages {
    reasons: Mutex<HashMap<String, String>>,
}

impl DisabledStages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable a stage; returns false if it already was
    pub fn disable(&self, stage_id: &str, reason: &str) -> bool {
        let mut reasons = self.reasons.lock().unwrap_or_else(|e| e.into_inner());
        if reasons.contains_key(stage_id) {
            return false;
        }
        reasons.insert(stage_id.to_string(), reason.to_string());
        true
    }

    pub fn is_disabled(&self, stage_id: &str) -> bool {
        self.reasons
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(stage_id)
    }

    /// Disabled stage ids with their reasons, sorted by id
    pub fn list(&self) -> Vec<(String, String)> {
        let reasons = self.reasons.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = reasons
            .iter()
            .map(|(id, reason)| (id.clone(), reason.clone()))
            .collect();
        list.sort();
        list
    }
}

impl Observable for DisabledStages {
    fn component(&self) -> &'static str {
        "disabled_stages"
    }

    fn stats(&self) -> serde_json::Value {
        let stages = self
            .list()
            .into_iter()
            .map(|(id, reason)| (id, json!(reason)))
            .collect::<serde_json::Map<_, _>>();
        json!({ "count": stages.len(), "stages": stages })
    }
}

/// Runs the configured stages for one asset at a time
pub struct Orchestrator {
    stages: Vec<Arc<dyn CapabilityStage>>,
    cache: Option<Arc<ContentCache>>,
    budget: Arc<BudgetGuard>,
    disabled: Arc<DisabledStages>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator. Without a cache every run starts from scratch.
    pub fn new(
        stages: Vec<Arc<dyn CapabilityStage>>,
        cache: Option<Arc<ContentCache>>,
        budget: Arc<BudgetGuard>,
    ) -> Self {
        Self {
            stages,
            cache,
            budget,
            disabled: Arc::new(DisabledStages::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn budget(&self) -> &BudgetGuard {
        &self.budget
    }

    pub fn cache(&self) -> Option<&ContentCache> {
        self.cache.as_deref()
    }

    pub fn disabled(&self) -> &DisabledStages {
        &self.disabled
    }

    pub fn stages(&self) -> &[Arc<dyn CapabilityStage>] {
        &self.stages
    }

    /// Assess one file. Every failure is folded into the report.
    pub async fn assess(&self, path: &Path) -> PipelineReport {
        let lookup = match self.identify(path).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!("Cannot assess {}: {}", path.display(), e);
                return PipelineReport::failed(path, e.to_string());
            }
        };

        let asset = match Asset::inspect(path, lookup.content_hash.clone(), lookup.size).await {
            Ok(asset) => asset,
            Err(e) => {
                warn!("Cannot assess {}: {}", path.display(), e);
                let mut report = PipelineReport::failed(path, e.to_string());
                report.content_hash = Some(lookup.content_hash);
                return report;
            }
        };

        let mut builder = ReportBuilder::new(path, &asset.content_hash);
        let mut item = ItemSpend::new();
        self.run_stages(&asset, lookup.entry.as_ref(), &mut builder, &mut item)
            .await;

        self.write_back(&asset, lookup.entry, &builder).await;

        let report = builder.finish();
        info!(
            "{} {} ({}{}, cost {:.4})",
            report.verdict(),
            path.display(),
            asset.short_hash(),
            if report.cache_hit { ", cached" } else { "" },
            report.total_cost
        );
        report
    }

    /// Hash and size the file, fetching its cache entry when caching is on
    async fn identify(&self, path: &Path) -> MediagateResult<CacheLookup> {
        if let Some(ref cache) = self.cache {
            return cache.lookup(path).await;
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediagateError::PathNotFound(path.to_path_buf())
            } else {
                MediagateError::io(format!("reading metadata of {}", path.display()), e)
            }
        })?;
        Ok(CacheLookup {
            content_hash: hash_file(path).await?,
            size: metadata.len(),
            entry: None,
            from_index: false,
        })
    }

    async fn run_stages(
        &self,
        asset: &Asset,
        cached: Option<&CacheEntry>,
        builder: &mut ReportBuilder,
        item: &mut ItemSpend,
    ) {
        for (index, stage) in self.stages.iter().enumerate() {
            let spec = stage.spec();

            if let Some(previous) = cached.and_then(|e| e.stage(&spec.id)) {
                if previous.status.is_deterministic() {
                    let result = regate(spec, previous);
                    let stops = spec.required && result.status != StageStatus::Passed;
                    debug!("Stage {} reused for {}", spec.id, asset.short_hash());
                    builder.reuse(spec, result);
                    if stops {
                        builder.stop(&spec.id, true);
                        return;
                    }
                    continue;
                }
            }

            if self.cancel.is_cancelled() {
                debug!("Cancelled before stage {} for {}", spec.id, asset.short_hash());
                builder.cancel(&spec.id);
                return;
            }

            if self.disabled.is_disabled(&spec.id) {
                builder.push(spec, StageResult::skipped(spec, StageStatus::SkippedDisabled));
                if spec.required {
                    builder.stop(&spec.id, false);
                    return;
                }
                continue;
            }

            if !stage.validate_input(asset) {
                debug!("Stage {} does not accept {}", spec.id, asset.path.display());
                builder.push(spec, StageResult::skipped(spec, StageStatus::SkippedInvalidInput));
                if spec.required {
                    builder.stop(&spec.id, true);
                    return;
                }
                continue;
            }

            let reservation = if spec.is_paid() {
                match self.budget.can_afford(item, spec.cost_per_call) {
                    Some(reservation) => Some(reservation),
                    None => {
                        info!(
                            "Budget exhausted at stage {} for {}",
                            spec.id,
                            asset.path.display()
                        );
                        for later in self.stages[index..].iter().map(|s| s.spec()) {
                            if later.is_paid() {
                                builder.push(later, StageResult::skipped(later, StageStatus::SkippedBudget));
                            }
                        }
                        builder.stop(&spec.id, false);
                        return;
                    }
                }
            } else {
                None
            };

            let started = Instant::now();
            let outcome = self.invoke(stage.as_ref(), asset, builder.results()).await;
            let elapsed = started.elapsed();

            let incurred = match outcome {
                Ok(ref outcome) => outcome.cost,
                Err(ref err) => err.cost,
            };
            match reservation {
                Some(reservation) if incurred > 0.0 => {
                    self.budget.commit(item, reservation, incurred)
                }
                Some(reservation) => self.budget.release(item, reservation),
                None if incurred > 0.0 => self.budget.record(item, incurred),
                None => {}
            }

            match outcome {
                Ok(outcome) => {
                    let result = StageResult::scored(spec, outcome, elapsed);
                    debug!(
                        "Stage {} scored {:?} for {} ({})",
                        spec.id,
                        result.score,
                        asset.short_hash(),
                        result.status
                    );
                    let stops = spec.required && !result.passed;
                    builder.push(spec, result);
                    if stops {
                        builder.stop(&spec.id, true);
                        return;
                    }
                }
                Err(err) => {
                    warn!("Stage {} failed for {}: {}", spec.id, asset.path.display(), err);
                    if err.kind == ErrorKind::Authentication
                        && self.disabled.disable(&spec.id, &err.message)
                    {
                        warn!("Stage {} disabled for the rest of the run", spec.id);
                    }
                    let result = StageResult::errored(spec, &err, elapsed);
                    let is_final = result.status.is_deterministic();
                    builder.push(spec, result);
                    if spec.required {
                        builder.stop(&spec.id, is_final);
                        return;
                    }
                }
            }
        }
    }

    /// Call a stage under its timeout
    async fn invoke(
        &self,
        stage: &dyn CapabilityStage,
        asset: &Asset,
        prior: &[StageResult],
    ) -> Result<StageOutcome, CapabilityError> {
        let spec = stage.spec();
        match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, stage.process(asset, prior))
                .await
                .unwrap_or_else(|_| {
                    Err(CapabilityError::timeout(format!(
                        "no response within {}s",
                        limit.as_secs_f64()
                    ))
                    .with_cost(spec.cost_per_call))
                }),
            None => stage.process(asset, prior).await,
        }
    }

    /// Persist results. Failures are logged and never fail the asset.
    async fn write_back(&self, asset: &Asset, previous: Option<CacheEntry>, builder: &ReportBuilder) {
        let Some(ref cache) = self.cache else {
            return;
        };

        if builder.all_reused() {
            if let Err(e) = cache.touch(&asset.content_hash).await {
                warn!("Failed to update access time for {}: {}", asset.short_hash(), e);
            }
            return;
        }

        if !builder.has_scored_results() {
            debug!("Nothing scored for {}, not caching", asset.short_hash());
            return;
        }

        let mut stages: BTreeMap<String, StageResult> = previous
            .map(|entry| {
                entry
                    .stages
                    .into_iter()
                    .filter(|(_, r)| r.status.is_deterministic())
                    .collect()
            })
            .unwrap_or_default();
        for result in builder.results() {
            if result.status.is_deterministic() || !stages.contains_key(&result.stage_id) {
                stages.insert(result.stage_id.clone(), result.clone());
            }
        }

        let entry = CacheEntry::new(
            &asset.content_hash,
            asset.size,
            &asset.path,
            builder.is_complete(),
            stages.into_values(),
        );
        if let Err(e) = cache.put(&asset.path, entry).await {
            warn!("Failed to cache results for {}: {}", asset.path.display(), e);
        }
    }
}

/// Re-apply the current threshold to a cached score
fn regate(spec: &StageSpec, previous: &StageResult) -> StageResult {
    let mut result = previous.clone();
    if let (true, Some(score)) = (result.status.is_scored(), result.score) {
        result.passed = spec.threshold.passes(score);
        result.status = if result.passed {
            StageStatus::Passed
        } else {
            StageStatus::Failed
        };
    }
    result
}
