use std::time::Duration;

use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressStyle};

/// Stderr spinner for one-shot commands. A quiet spinner draws nothing and
/// prints no status line, so `--json` output stays machine-readable.
pub struct Spinner {
    bar: ProgressBar,
    quiet: bool,
}

impl Spinner {
    pub fn start(message: impl Into<String>, quiet: bool) -> Self {
        if quiet {
            return Self {
                bar: ProgressBar::hidden(),
                quiet,
            };
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.dim} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar, quiet }
    }

    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        if !self.quiet {
            eprintln!("{} {}", "✔".green(), message.into());
        }
    }

    /// Errors are always shown; they also end up in the exit status.
    pub fn fail(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", "✘".red(), message.into());
    }
}
