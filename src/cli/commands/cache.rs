//! Cache command - inspect and clean the analysis cache

use crate::cache::{is_valid_hash, CacheEntry, CacheStats, ContentCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::{MediagateError, MediagateResult};
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> MediagateResult<()> {
    match args.action {
        CacheAction::Stats { format } => {
            let cache = ContentCache::from_config(config).await?;
            show_stats(&cache, format).await
        }
        CacheAction::Show { path, strict } => {
            let cache =
                ContentCache::open(ConfigManager::cache_dir(config), strict || config.cache.strict)
                    .await?;
            show_entry(&cache, &path).await
        }
        CacheAction::Gc { days, dry_run, yes } => {
            let cache = ContentCache::from_config(config).await?;
            gc(&cache, days.unwrap_or(config.cache.gc_days), dry_run, yes).await
        }
        CacheAction::Invalidate { hash } => invalidate(config, &hash).await,
    }
}

async fn show_stats(cache: &ContentCache, format: OutputFormat) -> MediagateResult<()> {
    let stats = cache.stats().await?;

    match format {
        OutputFormat::Table => print_stats_table(cache, &stats),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Plain => {
            println!("entries {}", stats.entries);
            println!("complete {}", stats.complete);
            println!("partial {}", stats.partial);
            println!("unreadable {}", stats.unreadable);
            println!("bytes {}", stats.total_bytes);
            println!("index {}", stats.index_records);
        }
    }
    Ok(())
}

fn print_stats_table(cache: &ContentCache, stats: &CacheStats) {
    let ctx = UiContext::detect();
    ui::key_value(&ctx, "Location", &cache.root().display().to_string());
    ui::key_value(&ctx, "Entries", &stats.entries.to_string());
    ui::key_value(&ctx, "Complete", &stats.complete.to_string());
    ui::key_value(&ctx, "Partial", &stats.partial.to_string());
    ui::key_value_status(
        &ctx,
        "Unreadable",
        &stats.unreadable.to_string(),
        stats.unreadable == 0,
    );
    ui::key_value(&ctx, "Size", &format_bytes(stats.total_bytes));
    ui::key_value(&ctx, "Indexed paths", &stats.index_records.to_string());
}

async fn show_entry(cache: &ContentCache, path: &Path) -> MediagateResult<()> {
    let lookup = cache.lookup(path).await?;
    let entry = lookup
        .entry
        .ok_or_else(|| MediagateError::CacheEntryNotFound(lookup.content_hash.clone()))?;
    print_entry(&entry);
    Ok(())
}

fn print_entry(entry: &CacheEntry) {
    println!("Hash:     {}", entry.content_hash);
    println!("Size:     {}", format_bytes(entry.file_size));
    println!("Path:     {}", entry.path.display());
    println!("Created:  {}", entry.created_at.format("%Y-%m-%d %H:%M"));
    println!(
        "Accessed: {} ({} time(s))",
        entry.last_accessed.format("%Y-%m-%d %H:%M"),
        entry.access_count
    );
    println!(
        "State:    {}",
        if entry.complete {
            style("complete").green()
        } else {
            style("partial").yellow()
        }
    );
    println!();

    println!("{:<20} {:<24} {:<10} {:<10}", "STAGE", "STATUS", "SCORE", "COST");
    println!("{}", "-".repeat(66));
    for result in entry.stages.values() {
        let score = result
            .score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<24} {:<10} {:<10.4}",
            result.stage_id,
            result.status.to_string(),
            score,
            result.cost
        );
    }
}

async fn gc(cache: &ContentCache, days: u32, dry_run: bool, yes: bool) -> MediagateResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);

    // Dry pass sizes the prompt
    let preview = cache.gc(days, true).await?;
    if preview.removed.is_empty() && preview.index_pruned == 0 {
        ui::step_ok(&ctx, &format!("Nothing older than {} day(s)", days));
        return Ok(());
    }

    if dry_run {
        for hash in &preview.removed {
            println!("  would remove {}", hash);
        }
        ui::step_info(
            &ctx,
            &format!(
                "{} of {} entr(ies) would be removed ({}), {} stale index record(s)",
                preview.removed.len(),
                preview.scanned,
                format_bytes(preview.bytes_freed),
                preview.index_pruned
            ),
        );
        return Ok(());
    }

    let prompt = format!(
        "Remove {} cache entr(ies) ({})?",
        preview.removed.len(),
        format_bytes(preview.bytes_freed)
    );
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::remark(&ctx, "Cancelled. Pass --yes to skip the prompt");
        return Ok(());
    }

    let report = cache.gc(days, false).await?;
    ui::step_ok_detail(
        &ctx,
        &format!("Removed {} entr(ies)", report.removed.len()),
        &format!(
            "{} freed, {} index record(s) pruned",
            format_bytes(report.bytes_freed),
            report.index_pruned
        ),
    );
    Ok(())
}

async fn invalidate(config: &Config, hash: &str) -> MediagateResult<()> {
    if !is_valid_hash(hash) {
        return Err(MediagateError::InvalidHash(hash.to_string()));
    }
    let ctx = UiContext::detect();
    let cache = ContentCache::from_config(config).await?;

    if cache.invalidate(hash).await? {
        ui::step_ok(&ctx, &format!("Removed entry {}", hash));
    } else {
        ui::step_warn(&ctx, &format!("No entry for {}", hash));
    }
    Ok(())
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
