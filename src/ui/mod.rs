//! Terminal output for the CLI
//!
//! Status lines go to stderr so stdout stays machine-readable. Spinners are
//! only drawn on an interactive terminal; CI gets plain tagged lines.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::FetchProgress;
