//! Stage results, per-asset reports and batch roll-ups
//!
//! `ReportBuilder` folds stage results into one [`PipelineReport`] per asset;
//! [`BatchSummary`] rolls a set of reports up into batch statistics.

use crate::stage::{CapabilityError, ErrorKind, StageOutcome, StageSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// How a stage ended for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Ran and met its threshold
    Passed,
    /// Ran and missed its threshold
    Failed,
    /// Infrastructure failure
    Errored,
    /// Not run: the budget could not cover it
    SkippedBudget,
    /// Not run: the stage does not accept this asset
    SkippedInvalidInput,
    /// Not run: the stage was disabled earlier in the run
    SkippedDisabled,
}

impl StageStatus {
    /// Whether the stage produced a score
    pub fn is_scored(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    /// Whether the same asset would get the same status on a re-run
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::SkippedInvalidInput)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedBudget | Self::SkippedInvalidInput | Self::SkippedDisabled
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::SkippedBudget => "skipped: budget",
            Self::SkippedInvalidInput => "skipped: invalid input",
            Self::SkippedDisabled => "skipped: disabled",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one stage for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub status: StageStatus,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    /// Spend incurred, recorded even when the stage failed
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// A stage that ran and produced a score
    pub fn scored(spec: &StageSpec, outcome: StageOutcome, elapsed: Duration) -> Self {
        let passed = spec.threshold.passes(outcome.score);
        Self {
            stage_id: spec.id.clone(),
            status: if passed {
                StageStatus::Passed
            } else {
                StageStatus::Failed
            },
            passed,
            score: Some(outcome.score),
            metadata: outcome.metadata,
            cost: outcome.cost,
            duration_ms: elapsed.as_millis() as u64,
            error_kind: None,
            error: None,
        }
    }

    /// A stage that failed. A provider rejecting the asset is recorded as
    /// invalid input; every other kind is an infrastructure error.
    pub fn errored(spec: &StageSpec, err: &CapabilityError, elapsed: Duration) -> Self {
        Self {
            stage_id: spec.id.clone(),
            status: match err.kind {
                ErrorKind::InvalidInput => StageStatus::SkippedInvalidInput,
                _ => StageStatus::Errored,
            },
            passed: false,
            score: None,
            metadata: serde_json::Value::Null,
            cost: err.cost.max(0.0),
            duration_ms: elapsed.as_millis() as u64,
            error_kind: Some(err.kind),
            error: Some(err.message.clone()),
        }
    }

    /// A stage that did not run
    pub fn skipped(spec: &StageSpec, status: StageStatus) -> Self {
        debug_assert!(status.is_skipped());
        Self {
            stage_id: spec.id.clone(),
            status,
            passed: false,
            score: None,
            metadata: serde_json::Value::Null,
            cost: 0.0,
            duration_ms: 0,
            error_kind: match status {
                StageStatus::SkippedInvalidInput => Some(ErrorKind::InvalidInput),
                _ => None,
            },
            error: None,
        }
    }
}

/// Assessment of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub path: PathBuf,
    /// Absent only when the asset could not be read
    pub content_hash: Option<String>,
    /// Stage results in execution order
    pub stages: Vec<StageResult>,
    /// Stage at which execution stopped early
    pub stopped_at: Option<String>,
    /// Spend incurred by this run
    pub total_cost: f64,
    pub passed: bool,
    pub cache_hit: bool,
    /// Every stage result is final; a re-run would change nothing
    pub complete: bool,
    /// An optional stage errored or was disabled
    pub degraded: bool,
    pub cancelled: bool,
    /// Stage ids whose results were reused from a partial cache entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reused_stages: Vec<String>,
    /// Asset-level failure (unreadable file, worker crash)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineReport {
    /// Report for an asset that never reached the stage loop
    pub fn failed(path: &Path, error: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            content_hash: None,
            stages: Vec::new(),
            stopped_at: None,
            total_cost: 0.0,
            passed: false,
            cache_hit: false,
            complete: false,
            degraded: false,
            cancelled: false,
            reused_stages: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Result for a stage id, if it was recorded
    pub fn stage(&self, stage_id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    /// One-word verdict for display
    pub fn verdict(&self) -> &'static str {
        if self.error.is_some() {
            "error"
        } else if self.passed {
            "pass"
        } else if !self.complete {
            "incomplete"
        } else {
            "reject"
        }
    }
}

/// Folds stage results into a [`PipelineReport`]
#[derive(Debug)]
pub struct ReportBuilder {
    path: PathBuf,
    content_hash: String,
    stages: Vec<StageResult>,
    required: Vec<bool>,
    total_cost: f64,
    stopped_at: Option<String>,
    stopped_final: bool,
    degraded: bool,
    cancelled: bool,
    reused: Vec<String>,
    executed: usize,
}

impl ReportBuilder {
    pub fn new(path: &Path, content_hash: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            content_hash: content_hash.to_string(),
            stages: Vec::new(),
            required: Vec::new(),
            total_cost: 0.0,
            stopped_at: None,
            stopped_final: false,
            degraded: false,
            cancelled: false,
            reused: Vec::new(),
            executed: 0,
        }
    }

    /// Record a result produced in this run
    pub fn push(&mut self, spec: &StageSpec, result: StageResult) {
        self.total_cost += result.cost;
        if !spec.required
            && matches!(result.status, StageStatus::Errored | StageStatus::SkippedDisabled)
        {
            self.degraded = true;
        }
        if !result.status.is_skipped() {
            self.executed += 1;
        }
        self.required.push(spec.required);
        self.stages.push(result);
    }

    /// Record a result replayed from the cache; its cost was paid earlier
    pub fn reuse(&mut self, spec: &StageSpec, result: StageResult) {
        self.reused.push(spec.id.clone());
        self.required.push(spec.required);
        self.stages.push(result);
    }

    /// Stop at `stage_id`. A final stop is a verdict that a re-run would repeat.
    pub fn stop(&mut self, stage_id: &str, is_final: bool) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(stage_id.to_string());
            self.stopped_final = is_final;
        }
    }

    pub fn cancel(&mut self, next_stage: &str) {
        self.cancelled = true;
        self.stop(next_stage, false);
    }

    /// Results so far, in execution order
    pub fn results(&self) -> &[StageResult] {
        &self.stages
    }

    /// Whether every result came from the cache
    pub fn all_reused(&self) -> bool {
        self.executed == 0 && !self.reused.is_empty() && self.reused.len() == self.stages.len()
    }

    /// Whether any stage produced a score worth caching
    pub fn has_scored_results(&self) -> bool {
        self.stages.iter().any(|s| s.status.is_scored())
    }

    /// Whether a re-run could produce anything different
    pub fn is_complete(&self) -> bool {
        let stopped_ok = self.stopped_at.is_none() || self.stopped_final;
        stopped_ok && !self.cancelled && self.stages.iter().all(|s| s.status.is_deterministic())
    }

    pub fn finish(self) -> PipelineReport {
        let complete = self.is_complete();
        let cache_hit = self.all_reused();
        let required_ok = self
            .stages
            .iter()
            .zip(&self.required)
            .all(|(result, required)| !required || result.status == StageStatus::Passed);
        let passed = self.stopped_at.is_none() && !self.cancelled && required_ok;

        PipelineReport {
            path: self.path,
            content_hash: Some(self.content_hash),
            stages: self.stages,
            stopped_at: self.stopped_at,
            total_cost: self.total_cost,
            passed,
            cache_hit,
            complete,
            degraded: self.degraded,
            cancelled: self.cancelled,
            reused_stages: if cache_hit { Vec::new() } else { self.reused },
            error: None,
        }
    }
}

/// Per-stage tallies across a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTally {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub cost: f64,
}

/// Roll-up of a batch of reports
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub assets: usize,
    pub passed: usize,
    pub rejected: usize,
    pub incomplete: usize,
    pub errors: usize,
    pub cache_hits: usize,
    pub degraded: usize,
    pub total_cost: f64,
    /// How many assets stopped at each stage
    pub stopped_at: BTreeMap<String, usize>,
    /// Stage outcomes incurred in this batch (cache replays excluded)
    pub stages: BTreeMap<String, StageTally>,
}

impl BatchSummary {
    pub fn from_reports(reports: &[PipelineReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            summary.add(report);
            summary
        })
    }

    pub fn add(&mut self, report: &PipelineReport) {
        self.assets += 1;
        self.total_cost += report.total_cost;

        match report.verdict() {
            "error" => self.errors += 1,
            "pass" => self.passed += 1,
            "incomplete" => self.incomplete += 1,
            _ => self.rejected += 1,
        }
        if report.cache_hit {
            self.cache_hits += 1;
        }
        if report.degraded {
            self.degraded += 1;
        }
        if let Some(ref stage) = report.stopped_at {
            *self.stopped_at.entry(stage.clone()).or_default() += 1;
        }

        if report.cache_hit {
            return;
        }
        let incurred = report
            .stages
            .iter()
            .filter(|r| !report.reused_stages.contains(&r.stage_id));
        for result in incurred {
            let tally = self.stages.entry(result.stage_id.clone()).or_default();
            match result.status {
                StageStatus::Passed => tally.passed += 1,
                StageStatus::Failed => tally.failed += 1,
                StageStatus::Errored => tally.errored += 1,
                _ => tally.skipped += 1,
            }
            tally.cost += result.cost;
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} asset(s): {} passed, {} rejected, {} incomplete, {} error(s), {} cache hit(s), cost {:.4}",
            self.assets,
            self.passed,
            self.rejected,
            self.incomplete,
            self.errors,
            self.cache_hits,
            self.total_cost
        )
    }
}

/// Everything a batch produced
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub reports: Vec<PipelineReport>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn new(batch_id: Uuid, reports: Vec<PipelineReport>) -> Self {
        let summary = BatchSummary::from_reports(&reports);
        Self {
            batch_id,
            reports,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{StageKind, Threshold};

    fn spec(id: &str, required: bool) -> StageSpec {
        StageSpec {
            id: id.to_string(),
            kind: StageKind::RemoteScore,
            cost_per_call: 0.02,
            threshold: Threshold::ascending(0.5),
            required,
            timeout: None,
        }
    }

    fn outcome(score: f64, cost: f64) -> StageOutcome {
        StageOutcome {
            score,
            metadata: serde_json::Value::Null,
            cost,
        }
    }

    #[test]
    fn scored_result_applies_threshold() {
        let pass = StageResult::scored(&spec("a", true), outcome(0.5, 0.02), Duration::from_millis(7));
        assert_eq!(pass.status, StageStatus::Passed);
        assert_eq!(pass.duration_ms, 7);

        let fail = StageResult::scored(&spec("a", true), outcome(0.49, 0.02), Duration::ZERO);
        assert_eq!(fail.status, StageStatus::Failed);
        assert_eq!(fail.cost, 0.02);
    }

    #[test]
    fn provider_rejection_is_recorded_as_invalid_input() {
        let a = spec("a", true);
        let err = CapabilityError::invalid_input("HTTP 422").with_cost(0.01);
        let result = StageResult::errored(&a, &err, Duration::ZERO);
        assert_eq!(result.status, StageStatus::SkippedInvalidInput);
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidInput));
        assert_eq!(result.cost, 0.01);

        let err = CapabilityError::transient("HTTP 503");
        let result = StageResult::errored(&a, &err, Duration::ZERO);
        assert_eq!(result.status, StageStatus::Errored);
    }

    #[test]
    fn builder_reports_scored_results() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", false);
        let b = spec("b", false);
        builder.push(&a, StageResult::skipped(&a, StageStatus::SkippedInvalidInput));
        builder.push(
            &b,
            StageResult::errored(&b, &CapabilityError::transient("reset"), Duration::ZERO),
        );
        assert!(!builder.has_scored_results());

        let c = spec("c", false);
        builder.push(&c, StageResult::scored(&c, outcome(0.1, 0.02), Duration::ZERO));
        assert!(builder.has_scored_results());
    }

    #[test]
    fn builder_all_passed() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", true);
        let b = spec("b", true);
        builder.push(&a, StageResult::scored(&a, outcome(0.9, 0.0), Duration::ZERO));
        builder.push(&b, StageResult::scored(&b, outcome(0.6, 0.02), Duration::ZERO));

        let report = builder.finish();
        assert!(report.passed);
        assert!(report.complete);
        assert!(!report.cache_hit);
        assert_eq!(report.stopped_at, None);
        assert!((report.total_cost - 0.02).abs() < 1e-12);
    }

    #[test]
    fn builder_optional_failure_still_passes() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", true);
        let b = spec("b", false);
        builder.push(&a, StageResult::scored(&a, outcome(0.9, 0.0), Duration::ZERO));
        builder.push(&b, StageResult::scored(&b, outcome(0.1, 0.02), Duration::ZERO));

        let report = builder.finish();
        assert!(report.passed);
        assert!(!report.degraded);
    }

    #[test]
    fn builder_optional_error_degrades_and_is_incomplete() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", true);
        let b = spec("b", false);
        builder.push(&a, StageResult::scored(&a, outcome(0.9, 0.0), Duration::ZERO));
        let err = CapabilityError::transient("connection reset");
        builder.push(&b, StageResult::errored(&b, &err, Duration::ZERO));

        let report = builder.finish();
        assert!(report.passed);
        assert!(report.degraded);
        assert!(!report.complete);
    }

    #[test]
    fn builder_final_stop_is_complete() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", true);
        builder.push(&a, StageResult::scored(&a, outcome(0.1, 0.0), Duration::ZERO));
        builder.stop("a", true);

        let report = builder.finish();
        assert!(!report.passed);
        assert!(report.complete);
        assert_eq!(report.verdict(), "reject");
    }

    #[test]
    fn builder_budget_stop_is_incomplete() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", true);
        builder.push(&a, StageResult::skipped(&a, StageStatus::SkippedBudget));
        builder.stop("a", false);

        let report = builder.finish();
        assert!(!report.passed);
        assert!(!report.complete);
        assert_eq!(report.verdict(), "incomplete");
    }

    #[test]
    fn builder_all_reused_is_cache_hit() {
        let mut builder = ReportBuilder::new(Path::new("/a.png"), "abc123");
        let a = spec("a", true);
        builder.reuse(&a, StageResult::scored(&a, outcome(0.9, 0.02), Duration::ZERO));

        let report = builder.finish();
        assert!(report.cache_hit);
        assert_eq!(report.total_cost, 0.0);
        assert!(report.reused_stages.is_empty());
        assert!(report.passed);
    }

    #[test]
    fn stage_result_json_omits_empty_fields() {
        let a = spec("a", true);
        let result = StageResult::skipped(&a, StageStatus::SkippedBudget);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"skipped_budget\""));
        assert!(!json.contains("score"));
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn summary_rolls_up() {
        let a = spec("a", true);
        let mut passing = ReportBuilder::new(Path::new("/a.png"), "aa");
        passing.push(&a, StageResult::scored(&a, outcome(0.9, 0.02), Duration::ZERO));

        let mut rejected = ReportBuilder::new(Path::new("/b.png"), "bb");
        rejected.push(&a, StageResult::scored(&a, outcome(0.1, 0.02), Duration::ZERO));
        rejected.stop("a", true);

        let reports = vec![
            passing.finish(),
            rejected.finish(),
            PipelineReport::failed(Path::new("/c.png"), "permission denied"),
        ];
        let summary = BatchSummary::from_reports(&reports);

        assert_eq!(summary.assets, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.stopped_at.get("a"), Some(&1));
        assert_eq!(summary.stages["a"].passed, 1);
        assert_eq!(summary.stages["a"].failed, 1);
        assert!((summary.total_cost - 0.04).abs() < 1e-12);
        assert!(summary.to_string().starts_with("3 asset(s): 1 passed"));
    }
}
