//! Interactive prompts with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{MediagateError, MediagateResult};

/// Prompt for confirmation, returns `default` if non-interactive
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> MediagateResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| MediagateError::User(format!("Prompt task failed: {}", e)))?
    .map_err(|e| MediagateError::User(format!("Prompt failed: {}", e)))
}
