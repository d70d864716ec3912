//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::MediagateResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> MediagateResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Validate) => validate_config(config, manager)?,
    }

    Ok(())
}

fn show_config(config: &Config) -> MediagateResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> MediagateResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

fn validate_config(config: &Config, manager: &ConfigManager) -> MediagateResult<()> {
    let ctx = UiContext::detect();
    config.validate()?;

    let paid = config.stages.iter().filter(|s| s.is_paid()).count();
    ui::step_ok_detail(
        &ctx,
        "Configuration is valid",
        &format!(
            "{} stage(s), {} paid, {}",
            config.stages.len(),
            paid,
            manager.path().display()
        ),
    );
    Ok(())
}
