use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One hidden state with a Gaussian emission `N(value, noise_std²)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: usize,
    pub value: f64,
    pub noise_std: f64,
}

impl State {
    pub fn new(id: usize, value: f64, noise_std: f64) -> Result<Self, StateError> {
        if !value.is_finite() {
            return Err(StateError::InvalidValueInput { input: value });
        }
        if !(noise_std > 0.0 && noise_std.is_finite()) {
            return Err(StateError::InvalidNoiseInput { input: noise_std });
        }

        Ok(State { id, value, noise_std })
    }

    pub fn from_variance(id: usize, value: f64, variance: f64) -> Result<Self, StateError> {
        Self::new(id, value, variance.sqrt())
    }

    pub fn get_value(&self) -> f64 {
        self.value
    }

    pub fn get_noise_std(&self) -> f64 {
        self.noise_std
    }

    pub fn get_variance(&self) -> f64 {
        self.noise_std * self.noise_std
    }

    pub fn standard_gaussian_emission_probability(&self, observed: f64) -> f64 {
        self.log_emission_probability(observed).exp()
    }

    pub fn log_emission_probability(&self, observed: f64) -> f64 {
        let scaled_diff = (observed - self.value) / self.noise_std;
        -0.5 * scaled_diff * scaled_diff - self.noise_std.ln() - 0.5 * (2.0 * PI).ln()
    }
}

pub trait IDTarget {
    fn get_id(&self) -> usize;
}

impl IDTarget for usize {
    fn get_id(&self) -> usize {
        *self
    }
}

impl IDTarget for State {
    fn get_id(&self) -> usize {
        self.id
    }
}

impl IDTarget for &State {
    fn get_id(&self) -> usize {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("state noise must be positive and finite, got {input}")]
    InvalidNoiseInput { input: f64 },
    #[error("state value must be finite, got {input}")]
    InvalidValueInput { input: f64 },
}
