//! Bounded-concurrency batch execution
//!
//! Each asset runs on its own task; at most `concurrency` are in flight.
//! Stages within one asset stay sequential. The budget guard is the only
//! state the workers share on the cost path.

use crate::events::{AssetEvent, EventSink};
use crate::pipeline::Orchestrator;
use crate::report::{BatchReport, PipelineReport};
use futures_util::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs an orchestrator over many assets
pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    events: Arc<dyn EventSink>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, events: Arc<dyn EventSink>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            events,
            concurrency: concurrency.max(1),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Assess every path, returning reports in input order
    pub async fn run(&self, paths: Vec<PathBuf>) -> BatchReport {
        self.run_with_progress(paths, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_done` as each asset finishes
    pub async fn run_with_progress<F>(&self, paths: Vec<PathBuf>, on_done: F) -> BatchReport
    where
        F: Fn(&PipelineReport),
    {
        let batch_id = Uuid::new_v4();
        let budget = self.orchestrator.budget();
        budget.begin_batch();
        info!(
            "Batch {} started: {} asset(s), concurrency {}",
            batch_id,
            paths.len(),
            self.concurrency
        );

        let mut completed = stream::iter(paths.into_iter().enumerate())
            .map(|(index, path)| {
                let orchestrator = Arc::clone(&self.orchestrator);
                async move {
                    let worker_path = path.clone();
                    let report = tokio::spawn(async move { orchestrator.assess(&worker_path).await })
                        .await
                        .unwrap_or_else(|e| {
                            warn!("Worker for {} failed: {}", path.display(), e);
                            PipelineReport::failed(&path, format!("worker failed: {}", e))
                        });
                    (index, report)
                }
            })
            .buffer_unordered(self.concurrency);

        let mut reports = Vec::new();
        while let Some((index, report)) = completed.next().await {
            self.events
                .emit(&AssetEvent::from_report(batch_id, &report))
                .await;
            on_done(&report);
            reports.push((index, report));
        }
        reports.sort_by_key(|(index, _)| *index);

        if let Err(e) = budget.save().await {
            warn!("Failed to save budget ledger: {}", e);
        }

        let report = BatchReport::new(batch_id, reports.into_iter().map(|(_, r)| r).collect());
        let state = budget.snapshot();
        debug!("Batch {} budget: {:?}", batch_id, state);
        if state.overage > 0.0 {
            warn!(
                "Billed {:.4} beyond reservations so far (batch {}, over limit: {})",
                state.overage,
                batch_id,
                state.is_over_limit()
            );
        }
        info!("Batch {} finished: {}", batch_id, report.summary);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::budget::{BudgetGuard, BudgetLimits};
    use crate::events::JsonlEventSink;
    use crate::report::StageResult;
    use crate::stage::{
        CapabilityError, CapabilityStage, StageKind, StageOutcome, StageSpec, Threshold,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Paid {
        spec: StageSpec,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CapabilityStage for Paid {
        fn spec(&self) -> &StageSpec {
            &self.spec
        }

        fn validate_input(&self, _asset: &Asset) -> bool {
            true
        }

        async fn process(
            &self,
            _asset: &Asset,
            _prior: &[StageResult],
        ) -> Result<StageOutcome, CapabilityError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(StageOutcome {
                score: 0.9,
                metadata: serde_json::Value::Null,
                cost: self.spec.cost_per_call,
            })
        }
    }

    fn paid_stage(cost: f64) -> Arc<Paid> {
        Arc::new(Paid {
            spec: StageSpec {
                id: "score".to_string(),
                kind: StageKind::RemoteScore,
                cost_per_call: cost,
                threshold: Threshold::ascending(0.5),
                required: true,
                timeout: None,
            },
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn write_assets(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("render-{}.png", i));
                std::fs::write(&path, format!("frame {}", i)).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_respects_budget_and_concurrency() {
        let dir = TempDir::new().unwrap();
        let paths = write_assets(&dir, 12);
        let stage = paid_stage(0.1);
        let budget = Arc::new(BudgetGuard::new(BudgetLimits::new(1.0, 0.5, 10.0).unwrap()));
        let orchestrator = Arc::new(Orchestrator::new(
            vec![Arc::clone(&stage) as Arc<dyn CapabilityStage>],
            None,
            budget,
        ));
        let events = Arc::new(JsonlEventSink::new(dir.path().join("events.log")));
        let runner = BatchRunner::new(orchestrator, events, 3);

        let batch = runner.run(paths.clone()).await;

        assert_eq!(batch.reports.len(), 12);
        assert_eq!(batch.summary.passed, 5);
        assert_eq!(batch.summary.incomplete, 7);
        assert!(batch.summary.total_cost <= 0.5 + 1e-9);
        assert!(stage.peak.load(Ordering::SeqCst) <= 3);

        let in_order: Vec<_> = batch.reports.iter().map(|r| r.path.clone()).collect();
        assert_eq!(in_order, paths);

        let log = std::fs::read_to_string(dir.path().join("events.log")).unwrap();
        assert_eq!(log.lines().count(), 12);
    }

    #[tokio::test]
    async fn missing_paths_become_error_reports() {
        let dir = TempDir::new().unwrap();
        let stage = paid_stage(0.0);
        let budget = Arc::new(BudgetGuard::new(BudgetLimits::new(1.0, 1.0, 1.0).unwrap()));
        let orchestrator = Arc::new(Orchestrator::new(
            vec![stage as Arc<dyn CapabilityStage>],
            None,
            budget,
        ));
        let runner = BatchRunner::new(orchestrator, Arc::new(crate::events::NullEventSink), 2);

        let mut paths = write_assets(&dir, 1);
        paths.push(dir.path().join("gone.png"));
        let batch = runner.run(paths).await;

        assert_eq!(batch.summary.passed, 1);
        assert_eq!(batch.summary.errors, 1);
    }
}
