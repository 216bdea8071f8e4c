use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hmm_matrices::*;
use super::hmm_tools::StateMatrix2D;
use super::probability_matrices::*;
use super::state::*;
use super::viterbi::{Viterbi, ViterbiPath};

// Two states closer than this are treated as the same state
const STATE_VALUE_EPSILON: f64 = 1e-8;

/// Emission states plus the Markov chain driving them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HMMParameters {
    pub states: Vec<State>,
    pub start_matrix: StartMatrix,
    pub transition_matrix: TransitionMatrix,
}

impl HMMParameters {
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn means(&self) -> Vec<f64> {
        self.states.iter().map(|state| state.value).collect()
    }

    pub fn variances(&self) -> Vec<f64> {
        self.states.iter().map(|state| state.get_variance()).collect()
    }

    // Renumbers the states so that their means increase with the id
    pub fn sorted_by_mean(&self) -> (HMMParameters, Vec<usize>) {
        let mut order: Vec<usize> = (0..self.states.len()).collect();
        order.sort_by(|&a, &b| self.states[a].value.total_cmp(&self.states[b].value));

        let states = order
            .iter()
            .enumerate()
            .map(|(new_id, &old_id)| State { id: new_id, ..self.states[old_id].clone() })
            .collect();

        let sorted = HMMParameters {
            states,
            start_matrix: self.start_matrix.permuted(&order),
            transition_matrix: self.transition_matrix.permuted(&order),
        };

        (sorted, order)
    }
}

// Everything the E-step produces for one observation sequence
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    pub gammas: StateMatrix2D<f64>,
    pub xi_sums: StateMatrix2D<f64>,
    pub log_likelihood: f64,
}

pub struct HMMInstance<'a> {
    states: &'a [State],
    start_matrix: &'a StartMatrix,
    transition_matrix: &'a TransitionMatrix,
}

impl<'a> HMMInstance<'a> {
    pub fn new(
        states: &'a [State],
        start_matrix: &'a StartMatrix,
        transition_matrix: &'a TransitionMatrix,
    ) -> Result<Self, HMMInstanceError> {
        Self::check_validity(states, start_matrix, transition_matrix)?;
        Ok(Self { states, start_matrix, transition_matrix })
    }

    pub fn from_parameters(parameters: &'a HMMParameters) -> Result<Self, HMMInstanceError> {
        Self::new(&parameters.states, &parameters.start_matrix, &parameters.transition_matrix)
    }

    pub fn check_start_matrix_validity(start_matrix: &StartMatrix, num_states: usize) -> Result<(), HMMInstanceError> {
        if start_matrix.matrix.len() != num_states {
            return Err(HMMInstanceError::IncompatibleDimensions {
                dim_states: num_states,
                dim_start_matrix: Some(start_matrix.matrix.len()),
                dim_transition_matrix: None,
            });
        }

        start_matrix.validate().map_err(|error| HMMInstanceError::InvalidMatrix { error })
    }

    pub fn check_transition_matrix_validity(
        transition_matrix: &TransitionMatrix,
        num_states: usize,
    ) -> Result<(), HMMInstanceError> {
        let (rows, columns) = transition_matrix.matrix.shape();

        if rows != num_states || columns != num_states {
            return Err(HMMInstanceError::IncompatibleDimensions {
                dim_states: num_states,
                dim_start_matrix: None,
                dim_transition_matrix: Some([rows, columns]),
            });
        }

        transition_matrix.validate().map_err(|error| HMMInstanceError::InvalidMatrix { error })
    }

    // Ids must be exactly 0..K and values must be distinct
    pub fn check_states_validity(states: &[State]) -> Result<(), HMMInstanceError> {
        if states.is_empty() {
            return Err(HMMInstanceError::NoStates);
        }

        let mut state_ids: HashSet<usize> = HashSet::new();
        let mut state_values: Vec<f64> = Vec::new();

        for state in states {
            let state_id = state.get_id();
            let state_value = state.get_value();

            if !state_ids.insert(state_id) {
                return Err(HMMInstanceError::DuplicateStateId { id: state_id });
            }

            if state_values.iter().any(|&v| (v - state_value).abs() < STATE_VALUE_EPSILON) {
                return Err(HMMInstanceError::DuplicateStateValues);
            }

            state_values.push(state_value);
        }

        let expected_ids: Vec<usize> = (0..states.len()).collect();
        let mut actual_ids: Vec<usize> = state_ids.into_iter().collect();
        actual_ids.sort_unstable();

        if actual_ids != expected_ids {
            return Err(HMMInstanceError::InvalidStateIdSequence { expected: expected_ids, found: actual_ids });
        }

        // States are indexed by id from here on
        if states.iter().enumerate().any(|(position, state)| state.id != position) {
            return Err(HMMInstanceError::InvalidStateIdSequence {
                expected: expected_ids,
                found: states.iter().map(|state| state.id).collect(),
            });
        }

        Ok(())
    }

    pub fn check_sequence_validity(sequence_values: &[f64]) -> Result<(), HMMInstanceError> {
        if sequence_values.is_empty() {
            return Err(HMMInstanceError::EmptySequence);
        }
        if let Some(index) = sequence_values.iter().position(|value| !value.is_finite()) {
            return Err(HMMInstanceError::NonFiniteObservation { index });
        }
        Ok(())
    }

    pub fn check_validity(
        states: &[State],
        start_matrix: &StartMatrix,
        transition_matrix: &TransitionMatrix,
    ) -> Result<(), HMMInstanceError> {
        Self::check_states_validity(states)?;
        Self::check_start_matrix_validity(start_matrix, states.len())?;
        Self::check_transition_matrix_validity(transition_matrix, states.len())?;
        Ok(())
    }

    pub fn run_forward_backward(&self, observations: &[f64]) -> Result<ForwardBackward, HMMInstanceError> {
        Self::check_sequence_validity(observations)?;

        let scaled = compute_scaled_emissions(self.states, observations);
        let (alphas, scaling) =
            compute_scaled_alphas(self.states, &scaled.emissions, self.start_matrix, self.transition_matrix);
        let betas = compute_scaled_betas(self.states, &scaled.emissions, self.transition_matrix, &scaling);

        let gammas = compute_gammas_with_scaled(self.states, &alphas, &betas);
        let xi_sums = compute_xi_sums_with_scaled(
            self.states,
            &scaled.emissions,
            self.transition_matrix,
            &alphas,
            &betas,
            &scaling,
        );

        Ok(ForwardBackward {
            gammas,
            xi_sums,
            log_likelihood: log_likelihood_from_scaling(&scaling, &scaled.log_offsets),
        })
    }

    // ln P(observations | model), forward pass only
    pub fn log_likelihood(&self, observations: &[f64]) -> Result<f64, HMMInstanceError> {
        Self::check_sequence_validity(observations)?;

        let scaled = compute_scaled_emissions(self.states, observations);
        let (_, scaling) = compute_scaled_alphas(self.states, &scaled.emissions, self.start_matrix, self.transition_matrix);

        Ok(log_likelihood_from_scaling(&scaling, &scaled.log_offsets))
    }

    pub fn run_viterbi(&self, observations: &[f64]) -> Result<ViterbiPath, HMMInstanceError> {
        Self::check_sequence_validity(observations)?;
        Ok(Viterbi::new(self.states, self.start_matrix, self.transition_matrix).run(observations))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HMMInstanceError {
    #[error("an HMM needs at least one state")]
    NoStates,
    #[error("{dim_states} states do not match start matrix {dim_start_matrix:?} / transition matrix {dim_transition_matrix:?}")]
    IncompatibleDimensions {
        dim_states: usize,
        dim_start_matrix: Option<usize>,
        dim_transition_matrix: Option<[usize; 2]>,
    },
    #[error("invalid probability matrix: {error}")]
    InvalidMatrix { error: MatrixValidationError },
    #[error("state id {id} is used twice")]
    DuplicateStateId { id: usize },
    #[error("state ids must be {expected:?}, found {found:?}")]
    InvalidStateIdSequence { expected: Vec<usize>, found: Vec<usize> },
    #[error("two states share the same value")]
    DuplicateStateValues,
    #[error("observation sequence is empty")]
    EmptySequence,
    #[error("observation {index} is not finite")]
    NonFiniteObservation { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters() -> HMMParameters {
        HMMParameters {
            states: vec![State::new(0, 5.0, 1.0).unwrap(), State::new(1, 1.0, 0.5).unwrap()],
            start_matrix: StartMatrix::new(vec![0.3, 0.7]),
            transition_matrix: TransitionMatrix::new(vec![vec![0.9, 0.1], vec![0.2, 0.8]]),
        }
    }

    #[test]
    fn test_sorted_by_mean() {
        let (sorted, order) = parameters().sorted_by_mean();

        assert_eq!(order, vec![1, 0]);
        assert_eq!(sorted.means(), vec![1.0, 5.0]);
        assert_eq!(sorted.states[0].id, 0);
        assert_eq!(sorted.start_matrix.matrix, vec![0.7, 0.3]);
        assert_eq!(sorted.transition_matrix[(0, 0)], 0.8);
        assert_eq!(sorted.transition_matrix[(1, 0)], 0.1);
    }

    #[test]
    fn test_invalid_ids() {
        let states = vec![State::new(0, 1.0, 1.0).unwrap(), State::new(2, 2.0, 1.0).unwrap()];
        assert!(matches!(
            HMMInstance::check_states_validity(&states),
            Err(HMMInstanceError::InvalidStateIdSequence { .. })
        ));
    }

    #[test]
    fn test_duplicate_values() {
        let states = vec![State::new(0, 1.0, 1.0).unwrap(), State::new(1, 1.0, 2.0).unwrap()];
        assert!(matches!(HMMInstance::check_states_validity(&states), Err(HMMInstanceError::DuplicateStateValues)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut params = parameters();
        params.start_matrix = StartMatrix::uniform(3);
        assert!(matches!(
            HMMInstance::from_parameters(&params),
            Err(HMMInstanceError::IncompatibleDimensions { dim_start_matrix: Some(3), .. })
        ));
    }

    #[test]
    fn test_non_finite_observation() {
        let params = parameters();
        let instance = HMMInstance::from_parameters(&params).unwrap();
        assert!(matches!(
            instance.run_forward_backward(&[1.0, f64::NAN]),
            Err(HMMInstanceError::NonFiniteObservation { index: 1 })
        ));
    }

    #[test]
    fn test_forward_and_forward_backward_agree() {
        let params = parameters();
        let instance = HMMInstance::from_parameters(&params).unwrap();
        let observations = [1.1, 0.9, 4.8, 5.2, 1.0];

        let full = instance.run_forward_backward(&observations).unwrap();
        let forward = instance.log_likelihood(&observations).unwrap();
        assert!((full.log_likelihood - forward).abs() < 1e-12);
    }
}
