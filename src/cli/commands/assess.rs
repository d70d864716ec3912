//! Assess command - run files through the stage pipeline

use crate::cli::args::{AssessArgs, OutputFormat};
use crate::config::Config;
use crate::error::MediagateResult;
use crate::events::sink_from_config;
use crate::observe::{self, Observable};
use crate::pipeline::{build_orchestrator, BatchRunner};
use crate::report::{BatchReport, PipelineReport};
use crate::ui::{self, AssessProgress, UiContext};
use console::style;
use std::sync::Arc;
use tracing::{debug, warn};

/// Execute the assess command
pub async fn execute(args: AssessArgs, config: &Config) -> MediagateResult<()> {
    let ctx = if args.format == OutputFormat::Table {
        UiContext::detect()
    } else {
        UiContext::non_interactive()
    };

    let mut config = config.clone();
    if args.no_cache {
        debug!("Cache disabled for this run (--no-cache)");
        config.cache.enabled = false;
    }
    let concurrency = args.concurrency.unwrap_or(config.pipeline.concurrency);
    let strict = args.strict.then_some(true);

    let orchestrator = Arc::new(build_orchestrator(&config, strict).await?);
    let runner = BatchRunner::new(Arc::clone(&orchestrator), sink_from_config(&config), concurrency);

    // First ctrl-c lets in-flight stages finish; nothing new starts
    let signal_token = orchestrator.cancellation_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight stages");
            signal_token.cancel();
        }
    });

    let total = args.paths.len();
    if args.format == OutputFormat::Table {
        ui::intro(&ctx, &format!("Assessing {} file(s)", total));
    }
    let progress = AssessProgress::new(&ctx, total, false);
    let batch = runner
        .run_with_progress(args.paths, |report| progress.on_report(report))
        .await;
    progress.finish();
    signal.abort();

    let mut components: Vec<&dyn Observable> = vec![orchestrator.budget(), orchestrator.disabled()];
    if let Some(cache) = orchestrator.cache() {
        components.push(cache);
    }
    debug!("Run stats: {}", observe::collect(&components));

    match args.format {
        OutputFormat::Table => print_table(&ctx, &batch, orchestrator.disabled().list()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&batch)?),
        OutputFormat::Plain => print_plain(&batch.reports),
    }

    Ok(())
}

fn print_table(ctx: &UiContext, batch: &BatchReport, disabled: Vec<(String, String)>) {
    println!(
        "{:<40} {:<12} {:<18} {:<10} {:<6}",
        "FILE", "VERDICT", "STOPPED AT", "COST", "CACHE"
    );
    println!("{}", "-".repeat(90));

    for report in &batch.reports {
        let name = report.path.display().to_string();
        let stopped = report.stopped_at.as_deref().unwrap_or("-");
        let cache = if report.cache_hit {
            "hit"
        } else if !report.reused_stages.is_empty() {
            "partial"
        } else {
            "-"
        };
        println!(
            "{:<40} {:<12} {:<18} {:<10.4} {:<6}",
            truncate(&name, 40),
            pad_styled(&ui::verdict(report.verdict()), report.verdict(), 12),
            stopped,
            report.total_cost,
            cache
        );
        if let Some(ref error) = report.error {
            println!("  {}", style(error).dim());
        }
    }

    println!();
    for (stage, reason) in disabled {
        ui::step_warn_hint(ctx, &format!("Stage '{}' disabled for this run", stage), &reason);
    }

    let summary = &batch.summary;
    if summary.errors == 0 && summary.incomplete == 0 {
        ui::outro_success(ctx, &summary.to_string());
    } else {
        ui::outro_warn(ctx, &summary.to_string());
    }
}

fn print_plain(reports: &[PipelineReport]) {
    for report in reports {
        println!("{}\t{}", report.verdict(), report.path.display());
    }
}

/// Keep the tail of long paths, which carries the file name
fn truncate(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count <= width {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (width - 3)).collect();
    format!("...{}", tail)
}

/// Pad a styled string using the width of its plain text
fn pad_styled(styled: &str, plain: &str, width: usize) -> String {
    let padding = width.saturating_sub(plain.chars().count());
    format!("{}{}", styled, " ".repeat(padding))
}
