//! Power-spectrum force calibration.
//!
//! The lateral motion of a tethered bead is an overdamped particle in a
//! harmonic well of stiffness `κ = F / L`. Its power spectrum is a
//! Lorentzian with corner frequency `fc = κ / (2πγ)`, so fitting `fc` and
//! knowing the drag `γ` of the bead near the surface gives `κ` and `F`
//! without relying on the absolute variance.

use std::f64::consts::PI;

use log::debug;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::model_fitting::fit_result::FitError;
use crate::model_fitting::{fit_curve, FitConfig, ModelKind};
use crate::trace_data::tools::compute_mean;

pub const WATER_VISCOSITY: f64 = 8.9e-4; // Pa·s, 25 °C
pub const PSD_MAX_SEGMENT_LENGTH: usize = 8192;
pub const PSD_MIN_FREQUENCY_DEFAULT: f64 = 0.5; // Hz
// Upper fit limit as a fraction of the sampling rate, below the aliased band
pub const PSD_MAX_FREQUENCY_FRACTION: f64 = 0.4;

// Pa·s · nm -> pN·s/nm
const VISCOSITY_TO_PN_NM: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsdSettings {
    pub viscosity: f64,                 // Pa·s
    pub segment_length: Option<usize>,  // Welch segment, defaults to min(8192, n / 4)
    pub min_frequency: f64,             // Hz
    pub max_frequency: Option<f64>,     // Hz, defaults to 0.4 · sampling rate
    pub surface_correction: bool,       // Faxén correction of the drag near the surface
}

impl Default for PsdSettings {
    fn default() -> Self {
        Self {
            viscosity: WATER_VISCOSITY,
            segment_length: None,
            min_frequency: PSD_MIN_FREQUENCY_DEFAULT,
            max_frequency: None,
            surface_correction: true,
        }
    }
}

impl PsdSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.viscosity > 0.0 && self.viscosity.is_finite()) {
            return Err(format!("viscosity {} must be positive", self.viscosity));
        }
        if !(self.min_frequency >= 0.0 && self.min_frequency.is_finite()) {
            return Err(format!("min_frequency {} must be finite and >= 0", self.min_frequency));
        }
        if let Some(max) = self.max_frequency {
            if !(max > self.min_frequency) {
                return Err(format!("max_frequency {} must exceed min_frequency {}", max, self.min_frequency));
            }
        }
        if let Some(length) = self.segment_length {
            if length < 8 {
                return Err(format!("segment_length {} must be at least 8", length));
            }
        }
        Ok(())
    }

    pub fn segment_length_for(&self, samples: usize) -> usize {
        self.segment_length.unwrap_or((samples / 4).min(PSD_MAX_SEGMENT_LENGTH)).min(samples)
    }
}

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>, // Hz
    pub density: Vec<f64>,     // units² / Hz
}

impl PowerSpectrum {
    // Points with min <= f <= max, as (frequencies, density)
    pub fn band(&self, min: f64, max: f64) -> (Vec<f64>, Vec<f64>) {
        self.frequencies
            .iter()
            .zip(&self.density)
            .filter(|(frequency, _)| **frequency >= min && **frequency <= max)
            .map(|(frequency, density)| (*frequency, *density))
            .unzip()
    }
}

// Periodic Hann window
fn hann_window(length: usize) -> Vec<f64> {
    (0..length).map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / length as f64).cos()).collect()
}

/// Welch estimate: Hann-windowed segments overlapping by half, each with
/// its mean removed, periodograms averaged.
pub fn welch_psd(values: &[f64], sampling_rate: f64, segment_length: usize) -> PowerSpectrum {
    if segment_length < 2 || values.len() < segment_length || !(sampling_rate > 0.0) {
        return PowerSpectrum::default();
    }

    let window = hann_window(segment_length);
    let scale = 1.0 / (sampling_rate * window.iter().map(|w| w * w).sum::<f64>());
    let step = segment_length - segment_length / 2;
    let num_bins = segment_length / 2 + 1;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(segment_length);

    let mut density = vec![0.0; num_bins];
    let mut num_segments = 0;

    for start in (0..=values.len() - segment_length).step_by(step) {
        let segment = &values[start..start + segment_length];
        let mean = compute_mean(segment);

        let mut buffer: Vec<Complex<f64>> =
            segment.iter().zip(&window).map(|(value, w)| Complex::new((value - mean) * w, 0.0)).collect();
        fft.process(&mut buffer);

        for (bin, power) in density.iter_mut().enumerate() {
            *power += buffer[bin].norm_sqr() * scale;
        }
        num_segments += 1;
    }

    // Fold the negative frequencies in, except DC and Nyquist
    let nyquist = if segment_length % 2 == 0 { Some(num_bins - 1) } else { None };
    for (bin, power) in density.iter_mut().enumerate() {
        *power /= num_segments as f64;
        if bin != 0 && Some(bin) != nyquist {
            *power *= 2.0;
        }
    }

    let resolution = sampling_rate / segment_length as f64;
    debug!("Welch PSD: {} segments of {} samples, {:.4} Hz bins", num_segments, segment_length, resolution);

    PowerSpectrum { frequencies: (0..num_bins).map(|bin| bin as f64 * resolution).collect(), density }
}

/// Faxén factor for motion parallel to a wall, `h` being the distance of
/// the bead center to the surface (tether length plus radius).
pub fn parallel_surface_correction(tether_length: f64, bead_radius: f64) -> f64 {
    let ratio = bead_radius / (tether_length + bead_radius);
    1.0 / (1.0 - 9.0 / 16.0 * ratio + 1.0 / 8.0 * ratio.powi(3) - 45.0 / 256.0 * ratio.powi(4) - 1.0 / 16.0 * ratio.powi(5))
}

// Stokes drag in pN·s/nm
pub fn drag_coefficient(settings: &PsdSettings, tether_length: f64, bead_radius: f64) -> f64 {
    let stokes = 6.0 * PI * settings.viscosity * VISCOSITY_TO_PN_NM * bead_radius;
    if settings.surface_correction {
        stokes * parallel_surface_correction(tether_length, bead_radius)
    } else {
        stokes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralFit {
    pub corner_frequency: f64, // Hz
    pub amplitude: f64,        // units² / Hz
    pub offset: f64,
    pub drag_coefficient: f64, // pN·s/nm
    pub stiffness: f64,        // 2πγ·fc, pN/nm
    pub num_frequencies: usize,
}

/// Fits a Lorentzian to the Welch spectrum of `signal` and converts the
/// corner frequency into a lateral stiffness.
pub fn spectral_stiffness(
    signal: &[f64],
    sampling_rate: f64,
    tether_length: f64,
    bead_radius: f64,
    settings: &PsdSettings,
) -> Result<SpectralFit, FitError> {
    let spectrum = welch_psd(signal, sampling_rate, settings.segment_length_for(signal.len()));
    let max_frequency = settings.max_frequency.unwrap_or(PSD_MAX_FREQUENCY_FRACTION * sampling_rate);
    let (frequencies, density) = spectrum.band(settings.min_frequency, max_frequency);

    let fit = fit_curve(&frequencies, &density, &FitConfig::new(ModelKind::Lorentzian))?;
    let parameter = |name: &str| fit.parameter(name).unwrap_or(f64::NAN);

    let corner_frequency = parameter("fc");
    let drag = drag_coefficient(settings, tether_length, bead_radius);

    Ok(SpectralFit {
        corner_frequency,
        amplitude: parameter("A"),
        offset: parameter("offset"),
        drag_coefficient: drag,
        stiffness: 2.0 * PI * drag * corner_frequency,
        num_frequencies: frequencies.len(),
    })
}
