use super::optimization_tracker::{OptimizationTracker, TerminationReason};

// Outcome of one pure iteration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Continue,
    Converged, // The solver decided on its own that it is done
    Singular,  // The problem is degenerate at the current point
}

#[derive(Debug, Clone)]
pub struct StepOutcome<S> {
    pub state: S,
    pub status: StepStatus,
}

// An iterative refinement expressed as `state -> state'`.
// `step` must not mutate the solver, so a run can be single-stepped in tests.
pub trait IterativeSolver {
    type State: Clone;
    type Error;

    fn initialize(&self) -> Result<Self::State, Self::Error>;

    fn step(&self, state: &Self::State) -> Result<StepOutcome<Self::State>, Self::Error>;

    // Value handed to the tracker after each step
    fn evaluate(&self, state: &Self::State) -> f64;
}

#[derive(Debug, Clone)]
pub struct SolverRun<S> {
    pub state: S,
    pub iterations: usize,
    pub history: Vec<f64>, // Evaluations, starting with the initial state
    pub reason: TerminationReason,
}

impl<S> SolverRun<S> {
    pub fn converged(&self) -> bool {
        self.reason == TerminationReason::Converged
    }
}

pub fn run_solver<T: IterativeSolver>(
    solver: &T,
    tracker: &mut OptimizationTracker,
) -> Result<SolverRun<T::State>, T::Error> {
    let mut state = solver.initialize()?;
    tracker.record_initial(solver.evaluate(&state));

    loop {
        if let Some(reason) = tracker.interrupted() {
            return Ok(finish(state, tracker, reason));
        }

        let outcome = solver.step(&state)?;
        state = outcome.state;

        let tracker_reason = tracker.step(solver.evaluate(&state));

        let reason = match outcome.status {
            StepStatus::Converged => Some(TerminationReason::Converged),
            StepStatus::Singular => Some(TerminationReason::Singular),
            StepStatus::Continue => tracker_reason,
        };

        if let Some(reason) = reason {
            return Ok(finish(state, tracker, reason));
        }
    }
}

fn finish<S>(state: S, tracker: &OptimizationTracker, reason: TerminationReason) -> SolverRun<S> {
    SolverRun {
        state,
        iterations: tracker.iterations(),
        history: tracker.evaluations().to_vec(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::optimization_tracker::{CancellationToken, TerminationCriterium};

    // Halves the distance to a target every step
    struct Halver {
        start: f64,
        target: f64,
    }

    impl IterativeSolver for Halver {
        type State = f64;
        type Error = ();

        fn initialize(&self) -> Result<f64, ()> {
            Ok(self.start)
        }

        fn step(&self, state: &f64) -> Result<StepOutcome<f64>, ()> {
            let next = state + (self.target - state) / 2.0;
            let status = if (next - self.target).abs() < 1e-9 { StepStatus::Converged } else { StepStatus::Continue };
            Ok(StepOutcome { state: next, status })
        }

        fn evaluate(&self, state: &f64) -> f64 {
            -(state - self.target).abs()
        }
    }

    #[test]
    fn test_single_step_is_pure() {
        let solver = Halver { start: 0.0, target: 8.0 };
        let state = solver.initialize().unwrap();
        let first = solver.step(&state).unwrap();
        let again = solver.step(&state).unwrap();
        assert_eq!(first.state, 4.0);
        assert_eq!(first.state, again.state);
    }

    #[test]
    fn test_run_until_converged() {
        let solver = Halver { start: 0.0, target: 1.0 };
        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 1000 });
        let run = run_solver(&solver, &mut tracker).unwrap();
        assert!(run.converged());
        assert_eq!(run.history.len(), run.iterations + 1);
    }

    #[test]
    fn test_run_hits_iteration_cap() {
        let solver = Halver { start: 0.0, target: 1.0 };
        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 3 });
        let run = run_solver(&solver, &mut tracker).unwrap();
        assert_eq!(run.reason, TerminationReason::MaxIterations);
        assert_eq!(run.iterations, 3);
        assert_eq!(run.state, 0.875);
    }

    #[test]
    fn test_cancelled_before_first_step() {
        let solver = Halver { start: 0.0, target: 1.0 };
        let token = CancellationToken::new();
        token.cancel();
        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 10 })
            .with_cancellation(token);
        let run = run_solver(&solver, &mut tracker).unwrap();
        assert_eq!(run.reason, TerminationReason::Cancelled);
        assert_eq!(run.iterations, 0);
        assert_eq!(run.state, 0.0);
    }
}
