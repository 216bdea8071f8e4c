use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{FitDirection, ModelKind};
use crate::optimization::levenberg_marquardt::LmError;
use crate::optimization::optimization_tracker::TerminationReason;
use crate::trace_data::trace::{Channel, TraceError};

// Why a fit stopped without converging. Carried inside FitResult, never
// returned as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceIssue {
    MaxIterationsReached,
    SingularJacobian,
    Cancelled,
    TimeBudgetExceeded,
}

impl ConvergenceIssue {
    pub fn from_termination(reason: TerminationReason) -> Option<Self> {
        match reason {
            TerminationReason::Converged => None,
            TerminationReason::MaxIterations => Some(ConvergenceIssue::MaxIterationsReached),
            TerminationReason::Singular => Some(ConvergenceIssue::SingularJacobian),
            TerminationReason::Cancelled => Some(ConvergenceIssue::Cancelled),
            TerminationReason::TimeBudgetExceeded => Some(ConvergenceIssue::TimeBudgetExceeded),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model_name: String,
    pub model: ModelKind,
    pub direction: FitDirection,
    pub parameters: BTreeMap<String, f64>,
    pub parameter_errors: BTreeMap<String, f64>, // Standard errors, 0 for fixed parameters
    pub fixed_parameters: Vec<String>,
    pub residual_sum_of_squares: f64,
    pub r_squared: f64,
    pub converged: bool,
    pub convergence_issue: Option<ConvergenceIssue>,
    pub iterations: usize,
    pub num_points: usize,
}

impl FitResult {
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    pub fn parameter_error(&self, name: &str) -> Option<f64> {
        self.parameter_errors.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientDataReason {
    TooFewPoints { points: usize, free_parameters: usize },
    ConstantObservations,
}

impl fmt::Display for InsufficientDataReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientDataReason::TooFewPoints { points, free_parameters } => {
                write!(f, "{} points for {} free parameters", points, free_parameters)
            }
            InsufficientDataReason::ConstantObservations => write!(f, "observations are constant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("insufficient data: {reason}")]
    InsufficientData { reason: InsufficientDataReason },
    #[error("x has {x_len} values but y has {y_len}")]
    LengthMismatch { x_len: usize, y_len: usize },
    #[error("non-finite input value at index {index}")]
    NonFiniteInput { index: usize },
    #[error("model {model} has no parameter named {name}")]
    UnknownParameter { model: String, name: String },
    #[error("bounds of {name} are empty: [{min}, {max}]")]
    InvalidBounds { name: String, min: f64, max: f64 },
    #[error("invalid fit setting: {setting}")]
    InvalidSetting { setting: String },
    #[error("trace has no {channel} channel")]
    MissingChannel { channel: Channel },
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("optimizer setup failed: {0}")]
    Optimizer(#[from] LmError),
}
