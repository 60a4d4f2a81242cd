//! Progress indicators for long-running import/export runs.
//!
//! Hidden whenever stderr is not an interactive terminal so piped and agent
//! invocations stay clean.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::time::Duration;

/// Whether progress should be drawn at all.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// Determinate bar for a known item count.
///
/// # Panics
///
/// Panics if the template string is invalid (it is a compile-time constant).
#[must_use]
pub fn progress_bar(total: u64, message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if show {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("valid template")
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

/// Spinner for indeterminate work.
///
/// # Panics
///
/// Panics if the template string is invalid (it is a compile-time constant).
#[must_use]
pub fn spinner(message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if show {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_bar_is_inert() {
        let pb = progress_bar(10, "Test", false);
        pb.inc(5);
        pb.finish();
    }

    #[test]
    fn hidden_spinner_is_inert() {
        let pb = spinner("Testing", false);
        pb.finish_and_clear();
    }
}
