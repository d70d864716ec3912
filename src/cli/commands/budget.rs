//! Budget command - show limits and persisted spend

use crate::budget::{BudgetLimits, Ledger};
use crate::cli::args::{BudgetArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::MediagateResult;
use crate::ui::{self, UiContext};
use serde::Serialize;

#[derive(Serialize)]
struct BudgetView {
    limits: BudgetLimits,
    persist_lifetime: bool,
    lifetime_spent: f64,
    lifetime_remaining: f64,
    batches: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

/// Execute the budget command
pub async fn execute(args: BudgetArgs, config: &Config) -> MediagateResult<()> {
    let limits = BudgetLimits::from_config(&config.budget)?;
    let ledger_path = ConfigManager::budget_ledger_path(config);
    let ledger = if config.budget.persist_lifetime {
        Ledger::load(&ledger_path).await?
    } else {
        None
    };

    let spent = ledger.as_ref().map(|l| l.lifetime_spent).unwrap_or(0.0);
    let view = BudgetView {
        limits,
        persist_lifetime: config.budget.persist_lifetime,
        lifetime_spent: spent,
        lifetime_remaining: (limits.lifetime - spent).max(0.0),
        batches: ledger.as_ref().map(|l| l.batches).unwrap_or(0),
        updated_at: ledger.as_ref().map(|l| l.updated_at.to_rfc3339()),
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Plain => {
            println!("per_item {}", view.limits.per_item);
            println!("per_batch {}", view.limits.per_batch);
            println!("lifetime {}", view.limits.lifetime);
            println!("lifetime_spent {}", view.lifetime_spent);
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            ui::key_value(&ctx, "Per item", &format!("{:.4}", view.limits.per_item));
            ui::key_value(&ctx, "Per batch", &format!("{:.4}", view.limits.per_batch));
            ui::key_value_status(
                &ctx,
                "Lifetime",
                &format!("{:.4} / {:.4}", view.lifetime_spent, view.limits.lifetime),
                view.lifetime_remaining > 0.0,
            );
            if view.persist_lifetime {
                ui::key_value(&ctx, "Batches", &view.batches.to_string());
                ui::key_value(&ctx, "Ledger", &ledger_path.display().to_string());
            } else {
                ui::remark(&ctx, "Lifetime spend is not persisted (budget.persist_lifetime = false)");
            }
        }
    }

    Ok(())
}
