use log::{debug, warn};
use thiserror::Error;

use super::hmm_instance::*;
use super::hmm_matrices::*;
use super::state::*;
use crate::optimization::constraints::OptimizationConstraint;
use crate::optimization::optimizer::{IterativeSolver, StepOutcome, StepStatus};

// A state whose summed posterior falls below this is considered collapsed
const COLLAPSE_THRESHOLD: f64 = 1e-8;

// Parameters together with the expectations computed under them
#[derive(Debug, Clone)]
pub struct EMState {
    pub parameters: HMMParameters,
    pub expectations: ForwardBackward,
    pub collapsed_states: Vec<usize>, // States kept frozen in the last M-step
}

impl EMState {
    pub fn log_likelihood(&self) -> f64 {
        self.expectations.log_likelihood
    }
}

/// Expectation-maximization for a Gaussian-emission HMM on one sequence.
///
/// Each step re-estimates the parameters from the expectations of the
/// previous state (M-step), then recomputes the expectations under the new
/// parameters (E-step), so the evaluation of a state is always the
/// log-likelihood of its own parameters.
pub struct BaumWelch<'a> {
    observations: &'a [f64],
    initial_parameters: HMMParameters,
    variance_floor: f64,
}

impl<'a> BaumWelch<'a> {
    pub fn new(observations: &'a [f64], initial_parameters: HMMParameters, variance_floor: f64) -> Self {
        Self { observations, initial_parameters, variance_floor }
    }

    fn expectations(&self, parameters: &HMMParameters) -> Result<ForwardBackward, BaumWelchError> {
        Ok(HMMInstance::from_parameters(parameters)?.run_forward_backward(self.observations)?)
    }

    pub fn update_start_matrix(&self, expectations: &ForwardBackward, start_matrix: &mut StartMatrix) {
        for state_id in 0..start_matrix.num_states() {
            start_matrix[state_id] = expectations.gammas[state_id][0];
        }
        OptimizationConstraint::PositiveSumTo { sum: 1.0 }.repair(&mut start_matrix.matrix);
    }

    pub fn update_transition_matrix(&self, expectations: &ForwardBackward, transition_matrix: &mut TransitionMatrix) {
        let num_states = transition_matrix.num_states();
        let row_constraint = OptimizationConstraint::PositiveSumTo { sum: 1.0 };

        for state_from in 0..num_states {
            let row: Vec<f64> = expectations.xi_sums[state_from].clone();
            let expected_departures: f64 = row.iter().sum();

            // Only ever seen at the last sample: nothing to learn from
            if expected_departures <= COLLAPSE_THRESHOLD {
                continue;
            }

            let mut new_row: Vec<f64> = row.iter().map(|xi| xi / expected_departures).collect();
            row_constraint.repair(&mut new_row);
            for (state_to, prob) in new_row.into_iter().enumerate() {
                transition_matrix[(state_from, state_to)] = prob;
            }
        }
    }

    // Returns the ids of the states that kept their previous emission
    pub fn update_states(&self, expectations: &ForwardBackward, states: &mut [State]) -> Result<Vec<usize>, BaumWelchError> {
        let mut collapsed = Vec::new();

        for state in states.iter_mut() {
            let gammas = &expectations.gammas[state.id];
            let weight: f64 = gammas.iter().sum();

            if weight < COLLAPSE_THRESHOLD {
                collapsed.push(state.id);
                continue;
            }

            let mean = gammas.iter().zip(self.observations).map(|(g, x)| g * x).sum::<f64>() / weight;
            let variance = gammas
                .iter()
                .zip(self.observations)
                .map(|(g, x)| g * (x - mean).powi(2))
                .sum::<f64>()
                / weight;

            *state = State::from_variance(state.id, mean, variance.max(self.variance_floor))
                .map_err(|error| BaumWelchError::InvalidState { error })?;
        }

        Ok(collapsed)
    }

    pub fn maximize(&self, current: &EMState) -> Result<(HMMParameters, Vec<usize>), BaumWelchError> {
        let mut parameters = current.parameters.clone();

        self.update_start_matrix(&current.expectations, &mut parameters.start_matrix);
        self.update_transition_matrix(&current.expectations, &mut parameters.transition_matrix);
        let collapsed = self.update_states(&current.expectations, &mut parameters.states)?;

        Ok((parameters, collapsed))
    }
}

impl<'a> IterativeSolver for BaumWelch<'a> {
    type State = EMState;
    type Error = BaumWelchError;

    fn initialize(&self) -> Result<EMState, BaumWelchError> {
        let expectations = self.expectations(&self.initial_parameters)?;
        if !expectations.log_likelihood.is_finite() {
            return Err(BaumWelchError::NonFiniteLogLikelihood { iteration: 0 });
        }

        Ok(EMState { parameters: self.initial_parameters.clone(), expectations, collapsed_states: Vec::new() })
    }

    fn step(&self, state: &EMState) -> Result<StepOutcome<EMState>, BaumWelchError> {
        let (parameters, collapsed_states) = self.maximize(state)?;

        if !collapsed_states.is_empty() {
            warn!("HMM states {:?} received no posterior mass, keeping their previous emission", collapsed_states);
        }

        // Two states drifting onto the same mean make the model degenerate
        let expectations = match HMMInstance::from_parameters(&parameters) {
            Ok(instance) => instance.run_forward_backward(self.observations)?,
            Err(err) => {
                warn!("Baum-Welch stopped on a degenerate model: {}", err);
                return Ok(StepOutcome { state: state.clone(), status: StepStatus::Singular });
            }
        };

        if !expectations.log_likelihood.is_finite() {
            warn!("Baum-Welch produced a non-finite log-likelihood");
            return Ok(StepOutcome { state: state.clone(), status: StepStatus::Singular });
        }

        debug!(
            "Baum-Welch step: log-likelihood {:.6} -> {:.6}",
            state.expectations.log_likelihood, expectations.log_likelihood
        );

        Ok(StepOutcome {
            state: EMState { parameters, expectations, collapsed_states },
            status: StepStatus::Continue,
        })
    }

    fn evaluate(&self, state: &EMState) -> f64 {
        state.expectations.log_likelihood
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BaumWelchError {
    #[error(transparent)]
    Instance(#[from] HMMInstanceError),
    #[error("re-estimated state is invalid: {error}")]
    InvalidState { error: StateError },
    #[error("log-likelihood is not finite at iteration {iteration}")]
    NonFiniteLogLikelihood { iteration: usize },
}
