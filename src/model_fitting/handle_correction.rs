use serde::{Deserialize, Serialize};

use super::models::wlc_extension;

// Smallest corrected extension after a shift (nm)
const HANDLE_SHIFT_FLOOR: f64 = 1.0;

/// dsDNA handles in series with the molecule of interest. Their WLC
/// extension at the measured force is removed before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandleCorrection {
    pub contour_length: f64,     // nm
    pub persistence_length: f64, // nm
}

impl HandleCorrection {
    pub fn new(contour_length: f64, persistence_length: f64) -> Self {
        Self { contour_length, persistence_length }
    }

    pub fn handle_extension(&self, force: f64, thermal_energy: f64) -> f64 {
        wlc_extension(force, self.persistence_length, self.contour_length, thermal_energy)
    }

    pub fn correct_extension(&self, force: &[f64], extension: &[f64], thermal_energy: f64) -> Vec<f64> {
        let mut corrected: Vec<f64> = force
            .iter()
            .zip(extension)
            .map(|(&f, &x)| x - self.handle_extension(f, thermal_energy))
            .collect();

        let minimum = corrected.iter().copied().fold(f64::INFINITY, f64::min);
        if minimum < 0.0 {
            let shift = HANDLE_SHIFT_FLOOR - minimum;
            corrected.iter_mut().for_each(|x| *x += shift);
        }

        corrected
    }
}
