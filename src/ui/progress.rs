//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::report::PipelineReport;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over a batch of assets.
///
/// Shows an indicatif bar in interactive mode and one line per finished
/// asset otherwise.
pub struct AssessProgress {
    bar: Option<ProgressBar>,
    verbose_lines: bool,
}

impl AssessProgress {
    /// `lines` prints a line per asset in non-interactive mode
    pub fn new(ctx: &UiContext, total: usize, lines: bool) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total as u64);
            let template = "  {spinner:.cyan} Assessing  {bar:24.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}";
            if let Ok(progress_style) = ProgressStyle::default_bar().template(template) {
                bar.set_style(
                    progress_style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .progress_chars("━╸─"),
                );
            }
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self {
            bar,
            verbose_lines: lines,
        }
    }

    /// Record one finished asset
    pub fn on_report(&self, report: &PipelineReport) {
        let name = report
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| report.path.display().to_string());

        match self.bar {
            Some(ref bar) => {
                bar.set_message(name);
                bar.inc(1);
            }
            None if self.verbose_lines => {
                println!("  {} {}", style(format!("[{}]", report.verdict())).dim(), name);
            }
            None => {}
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
