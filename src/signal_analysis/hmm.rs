/********** Hidden Markov Model (HMM) Module for Extension Kinetics **********
* Gaussian-emission HMM following the methodology described in:
*
* "Analysis of Single-Molecule FRET Trajectories Using Hidden Markov Modeling"
*
* Authors: Sean A. McKinney, Chirlmin Joo, and Taekjip Ha
* Published in: *Biophysical Journal*, Volume 91, September 2006, Pages 1941–1951
* DOI: [10.1529/biophysj.106.082487](https://doi.org/10.1529/biophysj.106.082487)
*
* Here the observed signal is the bead extension instead of the FRET efficiency.
**********/

use rand::Rng;
use rand_distr::StandardNormal;

pub mod hmm_tools;
pub mod state;
pub mod hmm_matrices;
pub mod probability_matrices;
pub mod viterbi;
pub mod hmm_instance;
pub mod initialization;
pub mod baum_welch;
pub mod analysis;
pub mod hmm_config;
pub mod segmentation;

use hmm_matrices::*;
use state::*;

pub struct HMM;

impl HMM {
    /// Samples a state path and its noisy observations. Used to build
    /// synthetic traces with a known ground truth.
    pub fn gen_sequence(
        states: &[State],
        start_matrix: &StartMatrix,
        transition_matrix: &TransitionMatrix,
        time_steps: usize,
        rng: &mut impl Rng,
    ) -> (Vec<usize>, Vec<f64>) {
        let mut sequence = Vec::with_capacity(time_steps);
        let mut values = Vec::with_capacity(time_steps);
        if time_steps == 0 || states.is_empty() {
            return (sequence, values);
        }

        let mut current_state = sample_index(&start_matrix.matrix, rng);

        for step in 0..time_steps {
            if step > 0 {
                current_state = sample_index(&transition_matrix.matrix[current_state], rng);
            }
            sequence.push(current_state);

            let z: f64 = rng.sample(StandardNormal);
            values.push(states[current_state].value + states[current_state].noise_std * z);
        }

        (sequence, values)
    }
}

// Inverse CDF draw; rounding leftovers fall on the last index
fn sample_index(probabilities: &[f64], rng: &mut impl Rng) -> usize {
    let random_value: f64 = rng.gen_range(0.0..1.0);
    let mut cumulative_prob = 0.0;
    for (index, prob) in probabilities.iter().enumerate() {
        cumulative_prob += prob;
        if random_value < cumulative_prob {
            return index;
        }
    }
    probabilities.len().saturating_sub(1)
}
