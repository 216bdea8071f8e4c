use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// Shared flag checked by running fits and EM loops once per iteration
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Converged,
    MaxIterations,
    Singular,
    Cancelled,
    TimeBudgetExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCriterium {
    MaxIterations { max_iterations: usize }, // Stop once max iterations reached
    OneStepConvergence { epsilon: f64, max_iterations: Option<usize> }, // Relative change of the evaluation below epsilon
    OneStepConvergenceAbsolute { epsilon: f64, max_iterations: Option<usize> }, // Absolute change below epsilon
}

impl TerminationCriterium {
    fn max_iterations(&self) -> Option<usize> {
        match self {
            TerminationCriterium::MaxIterations { max_iterations } => Some(*max_iterations),
            TerminationCriterium::OneStepConvergence { max_iterations, .. }
            | TerminationCriterium::OneStepConvergenceAbsolute { max_iterations, .. } => *max_iterations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationTracker {
    evals: Vec<f64>,
    iters: usize,

    termination_criterium: TerminationCriterium,

    cancellation: Option<CancellationToken>,
    time_budget: Option<Duration>,
    started: Instant,
}

impl OptimizationTracker {
    pub fn new(termination_criterium: TerminationCriterium) -> Self {
        Self {
            evals: Vec::new(),
            iters: 0,
            termination_criterium,
            cancellation: None,
            time_budget: None,
            started: Instant::now(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    // The budget clock starts when the tracker is built
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn iterations(&self) -> usize {
        self.iters
    }

    pub fn evaluations(&self) -> &[f64] {
        &self.evals
    }

    pub fn record_initial(&mut self, eval: f64) {
        self.evals.push(eval);
    }

    pub fn interrupted(&self) -> Option<TerminationReason> {
        if self.cancellation.as_ref().map(|token| token.is_cancelled()).unwrap_or(false) {
            return Some(TerminationReason::Cancelled);
        }
        if let Some(budget) = self.time_budget {
            if self.started.elapsed() >= budget {
                return Some(TerminationReason::TimeBudgetExceeded);
            }
        }
        None
    }

    fn max_iterations_reached(&self) -> bool {
        self.termination_criterium
            .max_iterations()
            .map(|max_iterations| self.iters >= max_iterations)
            .unwrap_or(false)
    }

    fn last_delta(&self) -> Option<(f64, f64)> {
        if self.evals.len() < 2 {
            return None; // Need at least two evaluations to calculate delta
        }
        let curr = self.evals[self.evals.len() - 1];
        let prev = self.evals[self.evals.len() - 2];
        Some((curr, prev))
    }

    fn one_step_convergence(&self) -> bool {
        match self.termination_criterium {
            TerminationCriterium::OneStepConvergence { epsilon, .. } => {
                let Some((curr, prev)) = self.last_delta() else { return false };
                if prev.abs() < f64::EPSILON {
                    return true;
                }
                (curr - prev).abs() / prev.abs() < epsilon
            }
            TerminationCriterium::OneStepConvergenceAbsolute { epsilon, .. } => {
                let Some((curr, prev)) = self.last_delta() else { return false };
                (curr - prev).abs() < epsilon
            }
            TerminationCriterium::MaxIterations { .. } => false,
        }
    }

    // Records one finished iteration and tells whether to stop
    pub fn step(&mut self, new_eval: f64) -> Option<TerminationReason> {
        self.evals.push(new_eval);
        self.iters += 1;

        if self.one_step_convergence() {
            return Some(TerminationReason::Converged);
        }
        if self.max_iterations_reached() {
            return Some(TerminationReason::MaxIterations);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_iterations() {
        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 2 });
        tracker.record_initial(0.0);
        assert_eq!(tracker.step(1.0), None);
        assert_eq!(tracker.step(2.0), Some(TerminationReason::MaxIterations));
    }

    #[test]
    fn test_absolute_convergence() {
        let criterium = TerminationCriterium::OneStepConvergenceAbsolute { epsilon: 1e-3, max_iterations: Some(100) };
        let mut tracker = OptimizationTracker::new(criterium);
        tracker.record_initial(-100.0);
        assert_eq!(tracker.step(-50.0), None);
        assert_eq!(tracker.step(-49.9999), Some(TerminationReason::Converged));
    }

    #[test]
    fn test_relative_convergence() {
        let criterium = TerminationCriterium::OneStepConvergence { epsilon: 1e-6, max_iterations: None };
        let mut tracker = OptimizationTracker::new(criterium);
        tracker.record_initial(1000.0);
        assert_eq!(tracker.step(999.0), None);
        assert_eq!(tracker.step(999.0001), Some(TerminationReason::Converged));
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 10 })
            .with_cancellation(token.clone());
        assert_eq!(tracker.interrupted(), None);
        token.cancel();
        assert_eq!(tracker.interrupted(), Some(TerminationReason::Cancelled));
    }

    #[test]
    fn test_zero_time_budget() {
        let tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 10 })
            .with_time_budget(Duration::ZERO);
        assert_eq!(tracker.interrupted(), Some(TerminationReason::TimeBudgetExceeded));
    }
}
