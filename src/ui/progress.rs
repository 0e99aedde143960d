//! Fetch progress with CI fallback

use super::context::UiContext;
use crate::worker::OutputDelegate;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Longest get output line shown next to the spinner
const MAX_LINE: usize = 60;

/// Spinner showing the latest line of get output
///
/// In interactive mode the spinner message follows the get script's stderr.
/// In CI every stderr line is echoed, dimmed.
pub struct FetchProgress {
    bar: Option<ProgressBar>,
}

impl FetchProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new_spinner();
            if let Ok(template) =
                ProgressStyle::default_spinner().template("  {spinner:.cyan} {prefix}  {msg:.dim}  {elapsed:.dim}")
            {
                bar.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.set_prefix(format!("Fetching {}", label));
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            eprintln!("  {} Fetching {}...", style("...").dim(), label);
            None
        };
        Self { bar }
    }

    /// Finish and clear the spinner
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

/// Shorten a line to fit beside the spinner
fn clip(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() > MAX_LINE {
        let head: String = trimmed.chars().take(MAX_LINE - 3).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

impl OutputDelegate for FetchProgress {
    fn stdout(&self, _line: &str) {}

    fn stderr(&self, line: &str) {
        match self.bar {
            Some(ref bar) => {
                if !line.trim().is_empty() {
                    bar.set_message(clip(line));
                }
            }
            None => eprintln!("    {}", style(line).dim()),
        }
    }
}

impl Drop for FetchProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_non_interactive() {
        let ctx = UiContext::non_interactive();
        let progress = FetchProgress::new(&ctx, "git");
        progress.stderr("Cloning into '/tmp/build/get'...");
        progress.stdout("{}");
        progress.finish();
        // Should not panic
    }

    #[test]
    fn clip_long_lines() {
        assert_eq!(clip("  short  "), "short");
        let long = "x".repeat(100);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_LINE);
        assert!(clipped.ends_with("..."));
    }
}
