//! The per-run history: one entry per round, plus the initial one.

use comms::msg::Metrics;

use crate::state::WorkerId;

/// What one round amounted to. Entry 0 records the evaluation of the
/// initial state; an aborted round keeps its default (empty) roster.
#[derive(Debug, Clone, Default)]
pub struct RoundSummary {
    pub round: u32,
    pub sampled: Vec<WorkerId>,
    pub num_successes: usize,
    pub num_failures: usize,
    /// Centralized evaluation loss, if an evaluator ran.
    pub loss: Option<f64>,
    pub metrics: Metrics,
}

#[derive(Debug, Default)]
pub struct History {
    rounds: Vec<RoundSummary>,
}

impl History {
    pub fn push(&mut self, summary: RoundSummary) {
        self.rounds.push(summary);
    }

    pub fn rounds(&self) -> &[RoundSummary] {
        &self.rounds
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn last(&self) -> Option<&RoundSummary> {
        self.rounds.last()
    }
}
