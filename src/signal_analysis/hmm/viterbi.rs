use serde::{Deserialize, Serialize};

use super::hmm_matrices::{StartMatrix, TransitionMatrix};
use super::hmm_tools::StateMatrix2D;
use super::state::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViterbiPath {
    pub path: Vec<usize>,
    pub log_probability: f64, // ln P(path, observations)
}

/// Most likely state path, computed in log space.
///
/// Ties between equally likely predecessors (or final states) go to the
/// lowest state id, so the result only depends on the inputs.
pub struct Viterbi<'a> {
    states: &'a [State],
    start_matrix: &'a StartMatrix,
    transition_matrix: &'a TransitionMatrix,
}

impl<'a> Viterbi<'a> {
    // Inputs are expected to have been validated by HMMInstance
    pub fn new(states: &'a [State], start_matrix: &'a StartMatrix, transition_matrix: &'a TransitionMatrix) -> Self {
        Self { states, start_matrix, transition_matrix }
    }

    pub fn run(&self, observations: &[f64]) -> ViterbiPath {
        let num_states = self.states.len();
        let num_steps = observations.len();
        if num_steps == 0 {
            return ViterbiPath { path: Vec::new(), log_probability: 0.0 };
        }

        let log_transitions: Vec<Vec<f64>> = self.transition_matrix
            .matrix
            .iter()
            .map(|row| row.iter().map(|p| p.ln()).collect())
            .collect();

        let mut viterbi_probs = StateMatrix2D::<f64>::empty((num_states, num_steps));
        let mut backtrace_mat = StateMatrix2D::<usize>::empty((num_states, num_steps));

        for state in self.states {
            viterbi_probs[state][0] = self.start_matrix[state].ln() + state.log_emission_probability(observations[0]);
        }

        for t in 1..num_steps {
            for next_state in self.states {
                let mut best_prev_state: usize = 0;
                let mut max_prob = viterbi_probs[0_usize][t - 1] + log_transitions[0][next_state.id];

                for previous_state in &self.states[1..] {
                    let total_prob = viterbi_probs[previous_state][t - 1] + log_transitions[previous_state.id][next_state.id];
                    if total_prob > max_prob {
                        max_prob = total_prob;
                        best_prev_state = previous_state.id;
                    }
                }

                viterbi_probs[next_state][t] = max_prob + next_state.log_emission_probability(observations[t]);
                backtrace_mat[next_state][t] = best_prev_state;
            }
        }

        // Backtrace from the best final state
        let mut last_state = 0;
        let mut max_final_prob = viterbi_probs[0_usize][num_steps - 1];
        for state in &self.states[1..] {
            let final_prob = viterbi_probs[state][num_steps - 1];
            if final_prob > max_final_prob {
                max_final_prob = final_prob;
                last_state = state.id;
            }
        }

        let mut path = vec![0_usize; num_steps];
        path[num_steps - 1] = last_state;
        for t in (1..num_steps).rev() {
            path[t - 1] = backtrace_mat[path[t]][t];
        }

        ViterbiPath { path, log_probability: max_final_prob }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Vec<State>, StartMatrix, TransitionMatrix) {
        let states = vec![State::new(0, 0.0, 1.0).unwrap(), State::new(1, 10.0, 1.0).unwrap()];
        (states, StartMatrix::uniform(2), TransitionMatrix::with_self_transition_bias(2, 0.9))
    }

    #[test]
    fn test_well_separated_states() {
        let (states, start, transition) = setup();
        let observations = [0.1, -0.3, 0.2, 9.8, 10.1, 10.4, 0.0];

        let result = Viterbi::new(&states, &start, &transition).run(&observations);
        assert_eq!(result.path, vec![0, 0, 0, 1, 1, 1, 0]);
        assert!(result.log_probability.is_finite());
    }

    #[test]
    fn test_single_outlier_is_smoothed() {
        // 5.3 is closer to state 1, but jumping there and back costs two
        // unlikely transitions
        let (states, start, transition) = setup();
        let observations = [0.0, 0.2, 5.3, -0.1, 0.1];

        let result = Viterbi::new(&states, &start, &transition).run(&observations);
        assert_eq!(result.path, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ties_go_to_lowest_state() {
        // Symmetric model, observation exactly between the states
        let (states, start, transition) = setup();
        let result = Viterbi::new(&states, &start, &transition).run(&[5.0]);
        assert_eq!(result.path, vec![0]);
    }

    #[test]
    fn test_deterministic() {
        let (states, start, transition) = setup();
        let observations: Vec<f64> = (0..200).map(|i| if (i / 17) % 2 == 0 { 0.3 } else { 9.6 }).collect();

        let viterbi = Viterbi::new(&states, &start, &transition);
        assert_eq!(viterbi.run(&observations), viterbi.run(&observations));
    }
}
