use serde::{Deserialize, Serialize};

use super::runner::AnalysisError;
use crate::force_calibration::CalibrationConfig;
use crate::model_fitting::FitConfig;
use crate::signal_analysis::events::JumpDetectionConfig;
use crate::signal_analysis::hmm::hmm_config::HMMConfig;

/// Which analyses to run on a trace, and how.
///
/// An absent section means the analysis is not requested. Each present
/// section is validated before any computation starts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fitting: Option<FitConfig>,
    pub calibration: Option<CalibrationConfig>,
    pub kinetics: Option<HMMConfig>,
    pub events: Option<JumpDetectionConfig>,
}

impl AnalysisConfig {
    pub fn from_toml_str(document: &str) -> Result<Self, AnalysisError> {
        let config: AnalysisConfig =
            toml::from_str(document).map_err(|err| AnalysisError::Parse { message: err.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_fitting(mut self, fitting: FitConfig) -> Self {
        self.fitting = Some(fitting);
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn with_kinetics(mut self, kinetics: HMMConfig) -> Self {
        self.kinetics = Some(kinetics);
        self
    }

    pub fn with_events(mut self, events: JumpDetectionConfig) -> Self {
        self.events = Some(events);
        self
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if let Some(fitting) = &self.fitting {
            fitting.validate().map_err(AnalysisError::Fitting)?;
        }
        if let Some(calibration) = &self.calibration {
            calibration.validate().map_err(AnalysisError::Calibration)?;
        }
        if let Some(kinetics) = &self.kinetics {
            kinetics.validate().map_err(AnalysisError::Kinetics)?;
        }
        if let Some(events) = &self.events {
            events.validate().map_err(AnalysisError::Events)?;
        }
        Ok(())
    }
}
