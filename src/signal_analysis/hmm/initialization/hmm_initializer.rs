use log::debug;
use thiserror::Error;

use super::kmeans::{k_means_1d, quantile_centers, range_centers};
use crate::signal_analysis::hmm::hmm_instance::HMMParameters;
use crate::signal_analysis::hmm::hmm_matrices::{StartMatrix, TransitionMatrix};
use crate::signal_analysis::hmm::state::{State, StateError};
use crate::trace_data::tools::compute_mean_and_variance;

pub(crate) const KMEANS_MAX_ITERATIONS: usize = 100;
pub(crate) const KMEANS_TOLERANCE: f64 = 1e-9;

/// Deterministic starting point for Baum-Welch.
///
/// Means come from quantile-seeded 1-D k-means, variances from the
/// resulting clusters, `π` is uniform and the transition matrix carries
/// `self_transition_bias` on its diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct HMMInitializer {
    self_transition_bias: f64,
    variance_floor: f64,
    kmeans_max_iterations: usize,
}

impl HMMInitializer {
    pub fn new(self_transition_bias: f64, variance_floor: f64) -> Self {
        Self { self_transition_bias, variance_floor, kmeans_max_iterations: KMEANS_MAX_ITERATIONS }
    }

    pub fn get_initial_values(&self, sequence_values: &[f64], num_states: usize) -> Result<HMMParameters, HMMInitializerError> {
        if sequence_values.is_empty() {
            return Err(HMMInitializerError::EmptySequence);
        }
        if num_states == 0 {
            return Err(HMMInitializerError::NoStates);
        }

        let mut centers = quantile_centers(sequence_values, num_states);
        if has_duplicates(&centers) {
            centers = range_centers(sequence_values, num_states);
        }

        let (mut centers, assignments) = k_means_1d(sequence_values, centers, self.kmeans_max_iterations, KMEANS_TOLERANCE);
        let [_, data_variance] = compute_mean_and_variance(sequence_values);

        let mut variances = Vec::with_capacity(num_states);
        for cluster in 0..num_states {
            let members: Vec<f64> = sequence_values
                .iter()
                .zip(&assignments)
                .filter(|(_, &assignment)| assignment == cluster)
                .map(|(&value, _)| value)
                .collect();

            let variance = if members.len() > 1 { compute_mean_and_variance(&members)[1] } else { data_variance };
            variances.push(variance.max(self.variance_floor));
        }

        // k-means keeps 1-D centers ordered, but ids must follow the means
        let mut order: Vec<usize> = (0..num_states).collect();
        order.sort_by(|&a, &b| centers[a].total_cmp(&centers[b]));
        centers = order.iter().map(|&i| centers[i]).collect();
        variances = order.iter().map(|&i| variances[i]).collect();

        let states = centers
            .iter()
            .zip(&variances)
            .enumerate()
            .map(|(id, (&mean, &variance))| State::from_variance(id, mean, variance))
            .collect::<Result<Vec<State>, StateError>>()
            .map_err(|error| HMMInitializerError::InvalidState { error })?;

        debug!("Initial HMM means {:?}, variances {:?}", centers, variances);

        Ok(HMMParameters {
            states,
            start_matrix: StartMatrix::uniform(num_states),
            transition_matrix: TransitionMatrix::with_self_transition_bias(num_states, self.self_transition_bias),
        })
    }
}

fn has_duplicates(centers: &[f64]) -> bool {
    centers.windows(2).any(|pair| pair[0] == pair[1])
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HMMInitializerError {
    #[error("cannot initialize from an empty sequence")]
    EmptySequence,
    #[error("number of states must be at least 1")]
    NoStates,
    #[error("initial state is invalid: {error}")]
    InvalidState { error: StateError },
}
