use serde::{Deserialize, Serialize};

use super::hmm_instance::HMMParameters;
use super::hmm_matrices::{StartMatrix, TransitionMatrix};
use super::segmentation::{HMMError, StateCountReason};
use super::state::State;
use crate::trace_data::tools::SignalFilter;
use crate::trace_data::trace::Channel;

pub const HMM_NUM_STATES_DEFAULT: usize = 2;
pub const HMM_MAX_ITERATIONS_DEFAULT: usize = 100;
pub const HMM_TOLERANCE_DEFAULT: f64 = 1e-4; // Absolute log-likelihood improvement
pub const HMM_SELF_TRANSITION_BIAS_DEFAULT: f64 = 0.9;
pub const HMM_MAX_STATES_DEFAULT: usize = 10;
pub const HMM_MIN_SAMPLES_PER_STATE_DEFAULT: usize = 2;
pub const HMM_VARIANCE_FLOOR_FRACTION_DEFAULT: f64 = 1e-6; // Of the data variance

/// User supplied model, decoded without training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedHMMParameters {
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    #[serde(default)]
    pub start_probabilities: Option<Vec<f64>>, // Uniform when absent
    pub transition_matrix: Vec<Vec<f64>>,
}

impl FixedHMMParameters {
    pub fn num_states(&self) -> usize {
        self.means.len()
    }

    pub fn to_parameters(&self) -> Result<HMMParameters, HMMError> {
        if self.variances.len() != self.means.len() {
            return Err(HMMError::InvalidSetting {
                setting: format!("{} means but {} variances", self.means.len(), self.variances.len()),
            });
        }

        let states = self
            .means
            .iter()
            .zip(&self.variances)
            .enumerate()
            .map(|(id, (&mean, &variance))| State::from_variance(id, mean, variance))
            .collect::<Result<Vec<State>, _>>()
            .map_err(|error| HMMError::InvalidState { error })?;

        let start_matrix = match &self.start_probabilities {
            Some(probabilities) => StartMatrix::new(probabilities.clone()),
            None => StartMatrix::uniform(self.means.len()),
        };

        Ok(HMMParameters {
            states,
            start_matrix,
            transition_matrix: TransitionMatrix::new(self.transition_matrix.clone()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HMMConfig {
    pub num_states: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub self_transition_bias: f64,
    pub max_states: usize,
    pub min_samples_per_state: usize,
    pub variance_floor_fraction: f64,
    pub channel: Channel,
    pub pre_filter: Option<SignalFilter>,
    pub fixed_parameters: Option<FixedHMMParameters>,
    pub time_budget_ms: Option<u64>,
}

impl Default for HMMConfig {
    fn default() -> Self {
        Self {
            num_states: HMM_NUM_STATES_DEFAULT,
            max_iterations: HMM_MAX_ITERATIONS_DEFAULT,
            tolerance: HMM_TOLERANCE_DEFAULT,
            self_transition_bias: HMM_SELF_TRANSITION_BIAS_DEFAULT,
            max_states: HMM_MAX_STATES_DEFAULT,
            min_samples_per_state: HMM_MIN_SAMPLES_PER_STATE_DEFAULT,
            variance_floor_fraction: HMM_VARIANCE_FLOOR_FRACTION_DEFAULT,
            channel: Channel::Extension,
            pre_filter: None,
            fixed_parameters: None,
            time_budget_ms: None,
        }
    }
}

impl HMMConfig {
    pub fn new(num_states: usize) -> Self {
        Self { num_states, ..Default::default() }
    }

    pub fn with_fixed_parameters(mut self, parameters: FixedHMMParameters) -> Self {
        self.num_states = parameters.num_states();
        self.fixed_parameters = Some(parameters);
        self
    }

    /// Checks everything that does not depend on the data.
    pub fn validate(&self) -> Result<(), HMMError> {
        if self.num_states < 1 {
            return Err(HMMError::InvalidStateCount { num_states: self.num_states, reason: StateCountReason::BelowOne });
        }
        if self.num_states > self.max_states {
            return Err(HMMError::InvalidStateCount {
                num_states: self.num_states,
                reason: StateCountReason::AboveMaximum { max_states: self.max_states },
            });
        }

        if self.max_iterations == 0 {
            return Err(HMMError::InvalidSetting { setting: "max_iterations must be at least 1".to_string() });
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(HMMError::InvalidSetting { setting: format!("tolerance {} must be finite and >= 0", self.tolerance) });
        }
        if !(0.0..=1.0).contains(&self.self_transition_bias) {
            return Err(HMMError::InvalidSetting {
                setting: format!("self_transition_bias {} must lie in [0, 1]", self.self_transition_bias),
            });
        }
        if !(self.variance_floor_fraction.is_finite() && self.variance_floor_fraction > 0.0) {
            return Err(HMMError::InvalidSetting {
                setting: format!("variance_floor_fraction {} must be positive", self.variance_floor_fraction),
            });
        }
        if self.channel == Channel::Time {
            return Err(HMMError::InvalidSetting { setting: "the time channel cannot be segmented".to_string() });
        }
        if let Some(filter) = &self.pre_filter {
            filter.validate().map_err(|setting| HMMError::InvalidSetting { setting })?;
        }

        if let Some(fixed) = &self.fixed_parameters {
            if fixed.num_states() != self.num_states {
                return Err(HMMError::InvalidSetting {
                    setting: format!("fixed parameters describe {} states, num_states is {}", fixed.num_states(), self.num_states),
                });
            }
            let parameters = fixed.to_parameters()?;
            super::hmm_instance::HMMInstance::from_parameters(&parameters)?;
        }

        Ok(())
    }
}
