//! Terminal output
//!
//! Uses `cliclack` for step and outro lines and `indicatif` for batch
//! progress, with plain fallbacks in CI and when output is piped.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro_success, outro_warn, remark, step_info,
    step_ok, step_ok_detail, step_warn, step_warn_hint, verdict,
};
pub use progress::AssessProgress;
pub use prompts::confirm;
