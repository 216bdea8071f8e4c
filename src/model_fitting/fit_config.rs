use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::fit_result::FitError;
use super::handle_correction::HandleCorrection;
use super::models::{FitDirection, ModelKind, MoleculePreset};
use crate::optimization::levenberg_marquardt::LM_TOLERANCE_DEFAULT;
use crate::thermal::Temperature;
use crate::trace_data::trace::Channel;

pub const FIT_MAX_ITERATIONS_DEFAULT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterBound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceRange {
    pub min: f64,
    pub max: f64,
}

// Plateaus shorter than this are dropped when averaging
pub const PLATEAU_MIN_SAMPLES: usize = 6;

/// What a trace contributes to the fit: every sample, or one averaged
/// point per magnet plateau.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FitInput {
    #[default]
    RawSamples,
    PlateauAverages { tolerance: f64 }, // mm
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub model: ModelKind,
    pub direction: FitDirection,
    pub temperature: Temperature,
    pub preset: Option<MoleculePreset>,

    pub initial_guesses: BTreeMap<String, f64>,
    pub bounds: BTreeMap<String, ParameterBound>,
    pub fixed: BTreeMap<String, f64>, // Held at the given value during optimization
    pub fit_thermal_energy: bool,     // kT is fixed at the temperature value unless set

    pub input: FitInput,
    pub force_range: Option<ForceRange>,
    pub handle_correction: Option<HandleCorrection>,
    pub x_channel: Option<Channel>,
    pub y_channel: Option<Channel>,

    pub max_iterations: usize,
    pub tolerance: f64,
    pub time_budget_ms: Option<u64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Wlc,
            direction: FitDirection::default(),
            temperature: Temperature::default(),
            preset: None,
            initial_guesses: BTreeMap::new(),
            bounds: BTreeMap::new(),
            fixed: BTreeMap::new(),
            fit_thermal_energy: false,
            input: FitInput::default(),
            force_range: None,
            handle_correction: None,
            x_channel: None,
            y_channel: None,
            max_iterations: FIT_MAX_ITERATIONS_DEFAULT,
            tolerance: LM_TOLERANCE_DEFAULT,
            time_budget_ms: None,
        }
    }
}

// Parameter vector, fixed mask and bounds in the model's schema order
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameters {
    pub values: Vec<f64>,
    pub fixed: Vec<bool>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl FitConfig {
    pub fn new(model: ModelKind) -> Self {
        Self { model, ..Default::default() }
    }

    pub fn with_direction(mut self, direction: FitDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_initial_guess(mut self, name: &str, value: f64) -> Self {
        self.initial_guesses.insert(name.to_string(), value);
        self
    }

    pub fn with_fixed(mut self, name: &str, value: f64) -> Self {
        self.fixed.insert(name.to_string(), value);
        self
    }

    pub fn with_bound(mut self, name: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.bounds.insert(name.to_string(), ParameterBound { min, max });
        self
    }

    pub fn validate(&self) -> Result<(), FitError> {
        let names = self.model.parameter_names();
        let check_name = |name: &String| {
            if names.contains(&name.as_str()) {
                Ok(())
            } else {
                Err(FitError::UnknownParameter { model: self.model.name().to_string(), name: name.clone() })
            }
        };

        self.initial_guesses.keys().try_for_each(check_name)?;
        self.bounds.keys().try_for_each(check_name)?;
        self.fixed.keys().try_for_each(check_name)?;

        for (name, bound) in &self.bounds {
            let min = bound.min.unwrap_or(f64::NEG_INFINITY);
            let max = bound.max.unwrap_or(f64::INFINITY);
            if !(min <= max) {
                return Err(FitError::InvalidBounds { name: name.clone(), min, max });
            }
        }

        if self.max_iterations == 0 {
            return Err(FitError::InvalidSetting { setting: "max_iterations".to_string() });
        }
        if !(self.tolerance > 0.0) {
            return Err(FitError::InvalidSetting { setting: "tolerance".to_string() });
        }
        if let FitInput::PlateauAverages { tolerance } = self.input {
            if !(tolerance >= 0.0 && tolerance.is_finite()) {
                return Err(FitError::InvalidSetting { setting: "plateau tolerance".to_string() });
            }
        }
        if let Some(range) = self.force_range {
            if !(range.min <= range.max) {
                return Err(FitError::InvalidSetting { setting: "force_range".to_string() });
            }
        }

        Ok(())
    }

    // Precedence: model defaults < preset < explicit guesses < fixed values
    pub fn resolve_parameters(&self, x: &[f64], y: &[f64]) -> Result<ResolvedParameters, FitError> {
        self.validate()?;

        let names = self.model.parameter_names();
        let thermal_energy = self.temperature.thermal_energy();

        let mut values = self.model.default_initial_guesses(x, y, self.direction, thermal_energy);
        let mut fixed = vec![false; names.len()];
        let (mut min, mut max): (Vec<f64>, Vec<f64>) = self.model.default_bounds().into_iter().unzip();

        if let Some(preset) = self.preset.filter(|_| self.model.is_polymer()) {
            for (name, value) in preset.initial_guesses() {
                if let Some(index) = self.model.parameter_index(&name) {
                    values[index] = value;
                }
            }
        }

        if let Some(index) = self.model.parameter_index("kT") {
            fixed[index] = !self.fit_thermal_energy;
        }

        for (i, name) in names.iter().enumerate() {
            if let Some(value) = self.initial_guesses.get(*name) {
                values[i] = *value;
            }
            if let Some(bound) = self.bounds.get(*name) {
                if let Some(lower) = bound.min {
                    min[i] = lower;
                }
                if let Some(upper) = bound.max {
                    max[i] = upper;
                }
            }
            if let Some(value) = self.fixed.get(*name) {
                values[i] = *value;
                fixed[i] = true;
            }
            if !(min[i] <= max[i]) {
                return Err(FitError::InvalidBounds { name: name.to_string(), min: min[i], max: max[i] });
            }
        }

        Ok(ResolvedParameters { values, fixed, min, max })
    }

    // Free parameter count, known before any data is seen
    pub fn free_parameter_count(&self) -> usize {
        self.model
            .parameter_names()
            .iter()
            .filter(|name| !self.fixed.contains_key(**name))
            .filter(|name| **name != "kT" || self.fit_thermal_energy)
            .count()
    }

    pub fn channels(&self) -> (Channel, Channel) {
        let (x_default, y_default) = self.model.default_channels(self.direction);
        (self.x_channel.unwrap_or(x_default), self.y_channel.unwrap_or(y_default))
    }
}
