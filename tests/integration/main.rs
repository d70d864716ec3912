//! Integration tests for mediagate

use std::path::{Path, PathBuf};

/// PNG signature followed by pseudo-random bytes (high entropy)
fn write_png(dir: &Path, name: &str, seed: u32, len: usize) -> PathBuf {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        bytes.push((state >> 24) as u8);
    }
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

mod cli_tests {
    use super::write_png;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Temp dir holding a config whose state lives inside it
    fn workspace() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "[general]\nstate_dir = {:?}\n",
                dir.path().join("state").display().to_string()
            ),
        )
        .unwrap();
        (dir, config)
    }

    fn mediagate(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("mediagate");
        cmd.env("CI", "1").arg("--config").arg(config);
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("mediagate")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cost-gated assessment"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("mediagate")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("mediagate"));
    }

    #[test]
    fn config_path() {
        let (_dir, config) = workspace();
        mediagate(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let (_dir, config) = workspace();
        mediagate(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[budget]"))
            .stdout(predicate::str::contains("local_quality"));
    }

    #[test]
    fn config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("nested").join("config.toml");
        mediagate(&config)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(config.exists());
    }

    #[test]
    fn config_validate_rejects_zero_budget() {
        let (_dir, config) = workspace();
        let mut content = std::fs::read_to_string(&config).unwrap();
        content.push_str("[budget]\nper_batch_limit = 0.0\n");
        std::fs::write(&config, content).unwrap();

        mediagate(&config)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("per_batch_limit"));
    }

    #[test]
    fn cache_stats_empty() {
        let (_dir, config) = workspace();
        mediagate(&config)
            .args(["cache", "stats", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"entries\": 0"));
    }

    #[test]
    fn cache_invalidate_rejects_bad_hash() {
        let (_dir, config) = workspace();
        mediagate(&config)
            .args(["cache", "invalidate", "not-a-hash"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid content hash"));
    }

    #[test]
    fn budget_shows_limits() {
        let (_dir, config) = workspace();
        mediagate(&config)
            .args(["budget", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"per_batch\": 5.0"));
    }

    #[test]
    fn assess_passes_then_hits_cache() {
        let (dir, config) = workspace();
        let png = write_png(dir.path(), "frame.png", 7, 8192);

        let first = mediagate(&config)
            .args(["assess", "--format", "json"])
            .arg(&png)
            .output()
            .unwrap();
        assert!(first.status.success());
        let first: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
        assert_eq!(first["summary"]["passed"], 1);
        assert_eq!(first["reports"][0]["cache_hit"], false);

        let second = mediagate(&config)
            .args(["assess", "--format", "json"])
            .arg(&png)
            .output()
            .unwrap();
        let second: serde_json::Value = serde_json::from_slice(&second.stdout).unwrap();
        assert_eq!(second["reports"][0]["cache_hit"], true);
        assert_eq!(second["summary"]["cache_hits"], 1);

        mediagate(&config)
            .args(["cache", "show"])
            .arg(&png)
            .assert()
            .success()
            .stdout(predicate::str::contains("local_quality"))
            .stdout(predicate::str::contains("complete"));
    }

    #[test]
    fn assess_plain_reports_each_file() {
        let (dir, config) = workspace();
        let png = write_png(dir.path(), "frame.png", 11, 8192);
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "not media at all").unwrap();
        let missing = dir.path().join("missing.png");

        mediagate(&config)
            .args(["assess", "--format", "plain"])
            .arg(&png)
            .arg(&text)
            .arg(&missing)
            .assert()
            .success()
            .stdout(predicate::str::contains("pass\t"))
            .stdout(predicate::str::contains("reject\t"))
            .stdout(predicate::str::contains("error\t"));
    }

    #[test]
    fn assess_no_cache_leaves_cache_empty() {
        let (dir, config) = workspace();
        let png = write_png(dir.path(), "frame.png", 5, 4096);

        mediagate(&config)
            .args(["assess", "--no-cache", "--format", "plain"])
            .arg(&png)
            .assert()
            .success();

        mediagate(&config)
            .args(["cache", "stats", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("entries 0"));
    }

    #[test]
    fn assess_writes_events_log() {
        let (dir, config) = workspace();
        let png = write_png(dir.path(), "frame.png", 3, 4096);

        mediagate(&config)
            .args(["assess", "--format", "plain"])
            .arg(&png)
            .assert()
            .success();

        let log = std::fs::read_to_string(dir.path().join("state").join("events.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("frame.png"));
    }
}

mod pipeline_tests {
    use super::write_png;
    use async_trait::async_trait;
    use mediagate::asset::Asset;
    use mediagate::budget::{BudgetGuard, BudgetLimits};
    use mediagate::cache::ContentCache;
    use mediagate::events::NullEventSink;
    use mediagate::pipeline::{BatchRunner, Orchestrator};
    use mediagate::report::StageStatus;
    use mediagate::stage::{
        CapabilityError, CapabilityStage, LocalQualityStage, RemoteStage, ScoreResponse, Scorer,
        StageKind, StageSpec, Threshold,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct CountingScorer {
        score: f64,
        calls: AtomicUsize,
    }

    impl CountingScorer {
        fn new(score: f64) -> Arc<Self> {
            Arc::new(Self {
                score,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Scorer for CountingScorer {
        async fn score(&self, _asset: &Asset) -> Result<ScoreResponse, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScoreResponse {
                score: self.score,
                metadata: serde_json::json!({ "model": "fixture" }),
                cost: None,
            })
        }
    }

    fn spec(id: &str, kind: StageKind, cost: f64, threshold: Threshold) -> StageSpec {
        StageSpec {
            id: id.to_string(),
            kind,
            cost_per_call: cost,
            threshold,
            required: true,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    struct Fixture {
        score: Arc<CountingScorer>,
        semantic: Arc<CountingScorer>,
        stages: Vec<Arc<dyn CapabilityStage>>,
    }

    /// local (free, >= 50) -> score (0.02, >= 0.7) -> semantic (0.05, <= 0.3)
    fn fixture(score: f64, semantic: f64) -> Fixture {
        let score = CountingScorer::new(score);
        let semantic = CountingScorer::new(semantic);
        let stages: Vec<Arc<dyn CapabilityStage>> = vec![
            Arc::new(LocalQualityStage::new(spec(
                "local_quality",
                StageKind::LocalQuality,
                0.0,
                Threshold::ascending(50.0),
            ))),
            Arc::new(RemoteStage::new(
                spec("score", StageKind::RemoteScore, 0.02, Threshold::ascending(0.7)),
                Arc::clone(&score) as Arc<dyn Scorer>,
            )),
            Arc::new(RemoteStage::new(
                spec(
                    "semantic",
                    StageKind::SemanticAnalysis,
                    0.05,
                    Threshold::descending(0.3),
                ),
                Arc::clone(&semantic) as Arc<dyn Scorer>,
            )),
        ];
        Fixture {
            score,
            semantic,
            stages,
        }
    }

    fn budget(per_item: f64, per_batch: f64) -> Arc<BudgetGuard> {
        Arc::new(BudgetGuard::new(
            BudgetLimits::new(per_item, per_batch, 100.0).unwrap(),
        ))
    }

    async fn cache(dir: &Path, strict: bool) -> Option<Arc<ContentCache>> {
        Some(Arc::new(
            ContentCache::open(dir.join("cache"), strict).await.unwrap(),
        ))
    }

    #[tokio::test]
    async fn passing_asset_costs_once_then_replays_free() {
        let dir = TempDir::new().unwrap();
        let png = write_png(dir.path(), "a.png", 1, 8192);
        let f = fixture(0.75, 0.12);
        let orchestrator =
            Orchestrator::new(f.stages.clone(), cache(dir.path(), false).await, budget(0.25, 5.0));

        let first = orchestrator.assess(&png).await;
        assert!(first.passed);
        assert!(first.complete);
        assert!(!first.cache_hit);
        assert!((first.total_cost - 0.07).abs() < 1e-9);
        assert_eq!(first.stopped_at, None);

        let second = orchestrator.assess(&png).await;
        assert!(second.passed);
        assert!(second.cache_hit);
        assert_eq!(second.total_cost, 0.0);
        assert_eq!(f.score.calls(), 1);
        assert_eq!(f.semantic.calls(), 1);

        let third = orchestrator.assess(&png).await;
        assert_eq!(
            serde_json::to_value(&second).unwrap(),
            serde_json::to_value(&third).unwrap()
        );
    }

    #[tokio::test]
    async fn required_threshold_failure_skips_later_stages() {
        let dir = TempDir::new().unwrap();
        let png = write_png(dir.path(), "a.png", 2, 8192);
        let f = fixture(0.5, 0.12);
        let orchestrator =
            Orchestrator::new(f.stages.clone(), cache(dir.path(), false).await, budget(0.25, 5.0));

        let report = orchestrator.assess(&png).await;
        assert!(!report.passed);
        assert!(report.complete);
        assert_eq!(report.stopped_at.as_deref(), Some("score"));
        assert_eq!(report.stage("score").unwrap().status, StageStatus::Failed);
        assert!(report.stage("semantic").is_none());
        assert_eq!(f.semantic.calls(), 0);

        let replay = orchestrator.assess(&png).await;
        assert!(replay.cache_hit);
        assert_eq!(f.score.calls(), 1);
    }

    #[tokio::test]
    async fn item_budget_skips_unaffordable_stage() {
        let dir = TempDir::new().unwrap();
        let png = write_png(dir.path(), "a.png", 3, 8192);
        let f = fixture(0.75, 0.12);
        let orchestrator =
            Orchestrator::new(f.stages.clone(), cache(dir.path(), false).await, budget(0.03, 5.0));

        let report = orchestrator.assess(&png).await;
        assert!(!report.passed);
        assert!(!report.complete);
        assert_eq!(report.stopped_at.as_deref(), Some("semantic"));
        assert_eq!(
            report.stage("semantic").unwrap().status,
            StageStatus::SkippedBudget
        );
        assert_eq!(f.semantic.calls(), 0);
        assert!((report.total_cost - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn modified_file_is_reassessed() {
        for strict in [false, true] {
            let dir = TempDir::new().unwrap();
            let png = write_png(dir.path(), "a.png", 4, 8192);
            let f = fixture(0.75, 0.12);
            let orchestrator = Orchestrator::new(
                f.stages.clone(),
                cache(dir.path(), strict).await,
                budget(0.25, 5.0),
            );

            let before = orchestrator.assess(&png).await;
            write_png(dir.path(), "a.png", 5, 9000);
            let after = orchestrator.assess(&png).await;

            assert_ne!(before.content_hash, after.content_hash, "strict: {}", strict);
            assert!(!after.cache_hit);
            assert_eq!(f.score.calls(), 2);
        }
    }

    #[tokio::test]
    async fn same_size_rewrite_with_restored_mtime_is_reassessed() {
        let dir = TempDir::new().unwrap();
        let png = write_png(dir.path(), "a.png", 6, 8192);
        let mtime = std::fs::metadata(&png).unwrap().modified().unwrap();
        let f = fixture(0.75, 0.12);
        let orchestrator =
            Orchestrator::new(f.stages.clone(), cache(dir.path(), false).await, budget(0.25, 5.0));

        let before = orchestrator.assess(&png).await;
        write_png(dir.path(), "a.png", 7, 8192);
        std::fs::File::options()
            .write(true)
            .open(&png)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        let after = orchestrator.assess(&png).await;

        assert_ne!(before.content_hash, after.content_hash);
        assert!(!after.cache_hit);
        assert_eq!(f.score.calls(), 2);
    }

    #[tokio::test]
    async fn batch_spend_never_exceeds_limit() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..20)
            .map(|i| write_png(dir.path(), &format!("{}.png", i), 100 + i, 4096))
            .collect();
        let f = fixture(0.75, 0.12);
        let guard = budget(0.25, 0.2);
        let orchestrator = Arc::new(Orchestrator::new(
            f.stages.clone(),
            cache(dir.path(), false).await,
            Arc::clone(&guard),
        ));
        let runner = BatchRunner::new(orchestrator, Arc::new(NullEventSink), 6);

        let batch = runner.run(paths).await;
        let spent: f64 = batch.reports.iter().map(|r| r.total_cost).sum();
        assert!(spent <= 0.2 + 1e-9);
        assert!((guard.snapshot().batch - spent).abs() < 1e-9);
        // A full pass costs 0.07, so at most two fit
        assert!(batch.summary.passed <= 2);
        assert_eq!(batch.summary.passed + batch.summary.incomplete, 20);
        assert_eq!(batch.reports.len(), 20);
    }
}
