use serde::{Deserialize, Serialize};

use super::analysis_config::AnalysisConfig;
use crate::force_calibration::{CalibrationError, CalibrationReport};
use crate::model_fitting::{FitError, FitResult};
use crate::signal_analysis::events::{JumpError, JumpEvent};
use crate::signal_analysis::hmm::segmentation::{HMMError, StateSegmentation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidTrace,
    InsufficientData,
    InvalidStateCount,
    InvalidConfiguration,
    MissingChannel,
    Numerical,
}

/// Why one sub-analysis produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&FitError> for AnalysisFailure {
    fn from(err: &FitError) -> Self {
        let kind = match err {
            FitError::InsufficientData { .. } => FailureKind::InsufficientData,
            FitError::LengthMismatch { .. } | FitError::NonFiniteInput { .. } | FitError::Trace(_) => FailureKind::InvalidTrace,
            FitError::UnknownParameter { .. } | FitError::InvalidBounds { .. } | FitError::InvalidSetting { .. } => {
                FailureKind::InvalidConfiguration
            }
            FitError::MissingChannel { .. } => FailureKind::MissingChannel,
            FitError::Optimizer(_) => FailureKind::Numerical,
        };
        Self { kind, message: err.to_string() }
    }
}

impl From<&CalibrationError> for AnalysisFailure {
    fn from(err: &CalibrationError) -> Self {
        match err {
            CalibrationError::MissingChannel { .. } => Self { kind: FailureKind::MissingChannel, message: err.to_string() },
            CalibrationError::InvalidSetting { .. } => {
                Self { kind: FailureKind::InvalidConfiguration, message: err.to_string() }
            }
            CalibrationError::Fit(fit_err) => Self { kind: AnalysisFailure::from(fit_err).kind, message: err.to_string() },
        }
    }
}

impl From<&HMMError> for AnalysisFailure {
    fn from(err: &HMMError) -> Self {
        let kind = match err {
            HMMError::InvalidStateCount { .. } => FailureKind::InvalidStateCount,
            HMMError::MissingChannel { .. } => FailureKind::MissingChannel,
            HMMError::InvalidSetting { .. } | HMMError::InvalidState { .. } => FailureKind::InvalidConfiguration,
            HMMError::Instance(_) => FailureKind::InvalidTrace,
            HMMError::Initializer(_) | HMMError::Training(_) => FailureKind::Numerical,
        };
        Self { kind, message: err.to_string() }
    }
}

impl From<&JumpError> for AnalysisFailure {
    fn from(err: &JumpError) -> Self {
        let kind = match err {
            JumpError::InvalidSetting { .. } => FailureKind::InvalidConfiguration,
            JumpError::MissingChannel { .. } => FailureKind::MissingChannel,
        };
        Self { kind, message: err.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum AnalysisOutcome<T> {
    NotRequested,
    Completed(T),
    Failed(AnalysisFailure),
}

impl<T> AnalysisOutcome<T> {
    pub fn from_result<E>(result: Result<T, E>) -> Self
    where
        for<'e> AnalysisFailure: From<&'e E>,
    {
        match result {
            Ok(value) => AnalysisOutcome::Completed(value),
            Err(err) => AnalysisOutcome::Failed(AnalysisFailure::from(&err)),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, AnalysisOutcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AnalysisOutcome::Failed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            AnalysisOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&AnalysisFailure> {
        match self {
            AnalysisOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Everything computed for one trace. Sub-analyses fail independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub trace_id: String,
    pub config: AnalysisConfig,
    pub fitting: AnalysisOutcome<FitResult>,
    pub calibration: AnalysisOutcome<CalibrationReport>,
    pub kinetics: AnalysisOutcome<StateSegmentation>,
    pub events: AnalysisOutcome<Vec<JumpEvent>>,
}

impl AnalysisResult {
    pub fn succeeded_analyses(&self) -> Vec<&'static str> {
        let mut succeeded = Vec::new();
        if self.fitting.is_completed() {
            succeeded.push("fitting");
        }
        if self.calibration.is_completed() {
            succeeded.push("calibration");
        }
        if self.kinetics.is_completed() {
            succeeded.push("kinetics");
        }
        if self.events.is_completed() {
            succeeded.push("events");
        }
        succeeded
    }

    pub fn failed_analyses(&self) -> Vec<(&'static str, &AnalysisFailure)> {
        [
            ("fitting", self.fitting.failure()),
            ("calibration", self.calibration.failure()),
            ("kinetics", self.kinetics.failure()),
            ("events", self.events.failure()),
        ]
        .into_iter()
        .filter_map(|(name, failure)| failure.map(|failure| (name, failure)))
        .collect()
    }
}
