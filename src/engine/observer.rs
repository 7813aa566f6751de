//! Progress reporting hooks for generation runs

use crate::scenario::Scenario;

use super::GenerationSummary;

/// Receives progress events from [`MockupEngine::generate_all`](super::MockupEngine::generate_all)
pub trait GenerationObserver {
    /// Called once before the first scenario
    fn on_start(&mut self, _total: usize) {}

    /// Called after each scenario with the number of rows it produced
    fn on_scenario(&mut self, _scenario: &Scenario, _rows: usize) {}

    /// Called for every recovered irregularity
    fn on_warning(&mut self, _scenario_id: &str, _message: &str) {}

    /// Called once after the last scenario
    fn on_finish(&mut self, _summary: &GenerationSummary) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl GenerationObserver for NoopObserver {}
