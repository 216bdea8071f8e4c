use serde::{Deserialize, Serialize};

use super::equipartition::{CalibrationError, CalibrationReport};
use crate::model_fitting::curve_fitter::fit_curve;
use crate::model_fitting::fit_config::FitConfig;
use crate::model_fitting::fit_result::FitResult;
use crate::model_fitting::models::{double_exponential, ModelKind, MAGNET_FORCE_DEFAULTS};

const HEIGHT_BISECTION_ITERATIONS: usize = 100;

/// Force (pN) applied at a given magnet height (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MagnetForceModel {
    DoubleExponential { a1: f64, b1: f64, a2: f64, b2: f64, c: f64 },
    SingleExponential { a: f64, b: f64, c: f64 },
}

impl Default for MagnetForceModel {
    fn default() -> Self {
        let [a1, b1, a2, b2, c] = MAGNET_FORCE_DEFAULTS.map(|(_, value)| value);
        MagnetForceModel::DoubleExponential { a1, b1, a2, b2, c }
    }
}

impl MagnetForceModel {
    pub fn single_exponential_default() -> Self {
        MagnetForceModel::SingleExponential { a: 85.0, b: -0.77, c: -0.17 }
    }

    pub fn force(&self, height: f64) -> f64 {
        match *self {
            MagnetForceModel::DoubleExponential { a1, b1, a2, b2, c } => double_exponential(height, a1, b1, a2, b2, c),
            MagnetForceModel::SingleExponential { a, b, c } => a * (b * height).exp() + c,
        }
    }

    // Magnet height in [low, high] producing `force`, None if the force is
    // not reached in that interval
    pub fn height_for_force(&self, force: f64, low: f64, high: f64) -> Option<f64> {
        let residual = |height: f64| self.force(height) - force;

        let (mut low, mut high) = (low.min(high), low.max(high));
        let (r_low, r_high) = (residual(low), residual(high));
        if !(r_low.is_finite() && r_high.is_finite()) || r_low * r_high > 0.0 {
            return None;
        }
        let decreasing = r_low > r_high;

        for _ in 0..HEIGHT_BISECTION_ITERATIONS {
            let mid = 0.5 * (low + high);
            if (residual(mid) > 0.0) == decreasing {
                low = mid;
            } else {
                high = mid;
            }
        }

        Some(0.5 * (low + high))
    }
}

/// Fits the double-exponential force curve to the (magnet height, force)
/// pairs of a calibration report.
pub fn fit_magnet_force_curve(report: &CalibrationReport) -> Result<(MagnetForceModel, FitResult), CalibrationError> {
    let heights: Vec<f64> = report.results.iter().map(|result| result.mean_magnet_position).collect();
    let forces = report.forces();

    let fit = fit_curve(&heights, &forces, &FitConfig::new(ModelKind::DoubleExponential))?;
    let parameter = |name: &str| fit.parameter(name).unwrap_or(f64::NAN);

    let model = MagnetForceModel::DoubleExponential {
        a1: parameter("a1"),
        b1: parameter("b1"),
        a2: parameter("a2"),
        b2: parameter("b2"),
        c: parameter("c"),
    };

    Ok((model, fit))
}
