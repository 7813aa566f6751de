//! Progress reporting for generation runs
//!
//! Progress bars use the indicatif crate. [`ProgressObserver`] plugs a bar
//! into [`MockupEngine::generate_all`](crate::engine::MockupEngine::generate_all).

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::{GenerationObserver, GenerationSummary};
use crate::scenario::Scenario;

/// Default style for a main progress bar
pub const DEFAULT_MAIN_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}) {msg}";

/// Default style for a spinner
pub const DEFAULT_SPINNER_TEMPLATE: &str = "{spinner:.green} {elapsed_precise} {msg}";

/// Create a main progress bar with a standardized style
#[must_use]
pub fn create_main_progress_bar(length: u64, description: Option<&str>) -> ProgressBar {
    let pb = ProgressBar::new(length);
    let style = ProgressStyle::default_bar()
        .template(DEFAULT_MAIN_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);

    if let Some(desc) = description {
        pb.set_message(desc.to_string());
    }

    pb
}

/// Create a spinner for stages without a known length
#[must_use]
pub fn create_spinner(message: Option<&str>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(DEFAULT_SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    if let Some(msg) = message {
        pb.set_message(msg.to_string());
    }

    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar, optionally with a message
pub fn finish_progress_bar(pb: &ProgressBar, message: Option<&str>) {
    if let Some(msg) = message {
        pb.finish_with_message(msg.to_string());
    } else {
        pb.finish();
    }
}

/// Generation observer that drives a progress bar
#[derive(Default)]
pub struct ProgressObserver {
    bar: Option<ProgressBar>,
    warnings: usize,
}

impl ProgressObserver {
    /// Create an observer; the bar appears when generation starts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings seen so far
    #[must_use]
    pub const fn warnings(&self) -> usize {
        self.warnings
    }
}

impl GenerationObserver for ProgressObserver {
    fn on_start(&mut self, total: usize) {
        self.bar = Some(create_main_progress_bar(total as u64, Some("Generating scenarios")));
    }

    fn on_scenario(&mut self, scenario: &Scenario, _rows: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(scenario.id.clone());
            bar.inc(1);
        }
    }

    fn on_warning(&mut self, _scenario_id: &str, _message: &str) {
        self.warnings += 1;
    }

    fn on_finish(&mut self, summary: &GenerationSummary) {
        if let Some(bar) = self.bar.take() {
            let message = format!(
                "{} row(s), {} warning(s)",
                summary.rows, summary.warnings
            );
            finish_progress_bar(&bar, Some(&message));
        }
    }
}
