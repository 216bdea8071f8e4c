//! Scaled forward-backward quantities.
//!
//! Emissions are stored relative to the largest emission of each time step
//! (`e'[k][t] = exp(log e_k(x_t) - m_t)`), and every alpha column is
//! normalised by its sum `c_t`. The log-likelihood is then
//! `Σ ln c_t + Σ m_t`, which stays finite for long traces and for
//! observations far from every state.

use super::hmm_matrices::{StartMatrix, TransitionMatrix};
use super::hmm_tools::StateMatrix2D;
use super::state::*;

pub struct ScaledEmissions {
    pub emissions: StateMatrix2D<f64>,
    pub log_offsets: Vec<f64>,
}

pub fn compute_scaled_emissions(states: &[State], observations: &[f64]) -> ScaledEmissions {
    let mut emissions = StateMatrix2D::<f64>::empty((states.len(), observations.len()));
    let mut log_offsets = Vec::with_capacity(observations.len());

    for (t, &value) in observations.iter().enumerate() {
        let log_emissions: Vec<f64> = states.iter().map(|state| state.log_emission_probability(value)).collect();
        let offset = log_emissions.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        for (state, log_emission) in states.iter().zip(&log_emissions) {
            emissions[state][t] = (log_emission - offset).exp();
        }
        log_offsets.push(offset);
    }

    ScaledEmissions { emissions, log_offsets }
}

// Returns the normalised alphas and the scaling factor of every time step
pub fn compute_scaled_alphas(
    states: &[State],
    emissions: &StateMatrix2D<f64>,
    start_matrix: &StartMatrix,
    transition_matrix: &TransitionMatrix,
) -> (StateMatrix2D<f64>, Vec<f64>) {
    let (num_states, num_steps) = emissions.shape();
    let mut alphas = StateMatrix2D::<f64>::empty((num_states, num_steps));
    let mut scaling_factors = Vec::with_capacity(num_steps);

    for t in 0..num_steps {
        let mut normalization = 0.0;

        for state in states {
            let value = if t == 0 {
                start_matrix[state] * emissions[state][0]
            } else {
                let incoming: f64 = states
                    .iter()
                    .map(|previous| alphas[previous][t - 1] * transition_matrix[(previous, state)])
                    .sum();
                incoming * emissions[state][t]
            };

            alphas[state][t] = value;
            normalization += value;
        }

        if normalization == 0.0 {
            normalization = f64::MIN_POSITIVE;
        }
        for state in states {
            alphas[state][t] /= normalization;
        }

        scaling_factors.push(normalization);
    }

    (alphas, scaling_factors)
}

pub fn compute_scaled_betas(
    states: &[State],
    emissions: &StateMatrix2D<f64>,
    transition_matrix: &TransitionMatrix,
    scaling_factors: &[f64],
) -> StateMatrix2D<f64> {
    let (num_states, num_steps) = emissions.shape();
    let mut betas = StateMatrix2D::<f64>::empty((num_states, num_steps));

    for state in states {
        betas[state][num_steps - 1] = 1.0;
    }

    for t in (0..num_steps - 1).rev() {
        for state in states {
            let outgoing: f64 = states
                .iter()
                .map(|next| transition_matrix[(state, next)] * emissions[next][t + 1] * betas[next][t + 1])
                .sum();
            betas[state][t] = outgoing / scaling_factors[t + 1];
        }
    }

    betas
}

// Posterior state probabilities, each column sums to 1
pub fn compute_gammas_with_scaled(
    states: &[State],
    scaled_alphas: &StateMatrix2D<f64>,
    scaled_betas: &StateMatrix2D<f64>,
) -> StateMatrix2D<f64> {
    let (num_states, num_steps) = scaled_alphas.shape();
    let mut gammas = StateMatrix2D::<f64>::empty((num_states, num_steps));

    for t in 0..num_steps {
        let mut normalization = 0.0;
        for state in states {
            gammas[state][t] = scaled_alphas[state][t] * scaled_betas[state][t];
            normalization += gammas[state][t];
        }

        if normalization > 0.0 {
            for state in states {
                gammas[state][t] /= normalization;
            }
        }
    }

    gammas
}

// Expected number of i -> j transitions, summed over the whole sequence
pub fn compute_xi_sums_with_scaled(
    states: &[State],
    emissions: &StateMatrix2D<f64>,
    transition_matrix: &TransitionMatrix,
    scaled_alphas: &StateMatrix2D<f64>,
    scaled_betas: &StateMatrix2D<f64>,
    scaling_factors: &[f64],
) -> StateMatrix2D<f64> {
    let (num_states, num_steps) = emissions.shape();
    let mut xi_sums = StateMatrix2D::<f64>::empty((num_states, num_states));

    for t in 0..num_steps.saturating_sub(1) {
        for state_from in states {
            for state_to in states {
                let xi = scaled_alphas[state_from][t]
                    * transition_matrix[(state_from, state_to)]
                    * emissions[state_to][t + 1]
                    * scaled_betas[state_to][t + 1]
                    / scaling_factors[t + 1];

                xi_sums[state_from][state_to.id] += xi;
            }
        }
    }

    xi_sums
}

pub fn log_likelihood_from_scaling(scaling_factors: &[f64], log_offsets: &[f64]) -> f64 {
    scaling_factors.iter().map(|c| c.ln()).sum::<f64>() + log_offsets.iter().sum::<f64>()
}
