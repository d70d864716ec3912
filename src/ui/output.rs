//! Step, outro and key-value lines
//!
//! Interactive terminals get cliclack's gutter; everything else gets
//! bracketed tags that stay readable in CI logs and pipes.

use super::context::UiContext;
use console::{style, StyledObject};

#[derive(Clone, Copy)]
enum Tone {
    Ok,
    Warn,
    Info,
}

impl Tone {
    fn tag(self) -> StyledObject<&'static str> {
        match self {
            Self::Ok => style("[OK]").green(),
            Self::Warn => style("[WARN]").yellow(),
            Self::Info => style("[INFO]").cyan(),
        }
    }
}

fn step(ctx: &UiContext, tone: Tone, text: String) {
    if !ctx.use_fancy_output() {
        println!("  {} {}", tone.tag(), text);
        return;
    }
    let shown = match tone {
        Tone::Ok => cliclack::log::success(text),
        Tone::Warn => cliclack::log::warning(text),
        Tone::Info => cliclack::log::info(text),
    };
    shown.ok();
}

fn outro(ctx: &UiContext, tone: Tone, message: &str) {
    if !ctx.use_fancy_output() {
        println!("{} {}", tone.tag(), message);
        return;
    }
    let styled = match tone {
        Tone::Warn => style(message).yellow().bold(),
        _ => style(message).green().bold(),
    };
    cliclack::outro(styled).ok();
}

/// Banner before a batch
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
    }
}

pub fn outro_success(ctx: &UiContext, message: &str) {
    outro(ctx, Tone::Ok, message);
}

pub fn outro_warn(ctx: &UiContext, message: &str) {
    outro(ctx, Tone::Warn, message);
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    step(ctx, Tone::Ok, message.to_string());
}

pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Tone::Ok, format!("{} ({})", message, style(detail).dim()));
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    step(ctx, Tone::Warn, message.to_string());
}

pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step(ctx, Tone::Warn, format!("{} - {}", message, style(hint).dim()));
}

pub fn step_info(ctx: &UiContext, message: &str) {
    step(ctx, Tone::Info, message.to_string());
}

/// Dimmed hint line
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::remark(message).ok();
    } else {
        println!("  {}", style(message).dim());
    }
}

pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    let key = if ctx.use_fancy_output() {
        style(key).dim().to_string()
    } else {
        key.to_string()
    };
    println!("  {}: {}", key, value);
}

/// Key-value pair flagged by whether the value is within limits
pub fn key_value_status(ctx: &UiContext, key: &str, value: &str, ok: bool) {
    if ctx.use_fancy_output() {
        let value = if ok {
            style(value).green()
        } else {
            style(value).yellow()
        };
        println!("  {}: {}", style(key).dim(), value);
    } else {
        let tone = if ok { Tone::Ok } else { Tone::Warn };
        println!("  {} {}: {}", tone.tag(), key, value);
    }
}

/// Colored one-word verdict for report tables
pub fn verdict(verdict: &str) -> String {
    match verdict {
        "pass" => style(verdict).green().to_string(),
        "reject" => style(verdict).red().to_string(),
        "incomplete" => style(verdict).yellow().to_string(),
        _ => style(verdict).red().bold().to_string(),
    }
}
