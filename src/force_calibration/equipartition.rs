//! Equipartition force calibration.
//!
//! A bead tethered by a molecule of length `L` under force `F` behaves like
//! an inverted pendulum with lateral stiffness `F / L`, so equipartition
//! gives `F = kT · L / <δx²>`. Slow drift inflates `<δx²>`, hence the
//! detrending before the variance is taken. The same windows can instead
//! be calibrated from the corner frequency of their power spectrum, see
//! `power_spectrum`.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::power_spectrum::{spectral_stiffness, PsdSettings, SpectralFit};
use super::windows::WindowMode;
use crate::model_fitting::fit_result::FitError;
use crate::thermal::Temperature;
use crate::trace_data::tools::{compute_mean, compute_mean_and_variance, Detrend};
use crate::trace_data::trace::{Channel, Trace};

// Fewer samples than this give an unreliable variance estimate
pub const CALIBRATION_MIN_SAMPLES_DEFAULT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSignal {
    #[default]
    Transverse,
    Extension,
}

impl PositionSignal {
    pub fn channel(&self) -> Channel {
        match self {
            PositionSignal::Transverse => Channel::Transverse,
            PositionSignal::Extension => Channel::Extension,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum CalibrationMethod {
    #[default]
    Variance,
    Psd(PsdSettings), // Needs the bead radius for the drag coefficient
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub method: CalibrationMethod,
    pub temperature: Temperature,
    pub window_mode: WindowMode,
    pub signal: PositionSignal,
    pub bead_radius: Option<f64>, // nm, added to the tether length
    pub detrend: Detrend,
    pub min_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            method: CalibrationMethod::default(),
            temperature: Temperature::default(),
            window_mode: WindowMode::default(),
            signal: PositionSignal::default(),
            bead_radius: None,
            detrend: Detrend::default(),
            min_samples: CALIBRATION_MIN_SAMPLES_DEFAULT,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.window_mode.validate()?;

        if self.min_samples < 2 {
            return Err(CalibrationError::InvalidSetting { setting: "min_samples".to_string() });
        }
        if let Some(radius) = self.bead_radius {
            if !(radius >= 0.0 && radius.is_finite()) {
                return Err(CalibrationError::InvalidSetting { setting: "bead_radius".to_string() });
            }
        }
        if !(self.temperature.kelvin() > 0.0) {
            return Err(CalibrationError::InvalidSetting { setting: "temperature".to_string() });
        }
        if let CalibrationMethod::Psd(settings) = &self.method {
            settings.validate().map_err(|setting| CalibrationError::InvalidSetting { setting })?;
            if !self.bead_radius.is_some_and(|radius| radius > 0.0) {
                return Err(CalibrationError::InvalidSetting {
                    setting: "psd calibration needs a positive bead_radius".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub window_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub sample_count: usize,
    pub mean_extension: f64,
    pub variance_extension: f64, // Variance of the detrended position signal (nm²)
    pub computed_force: f64,     // pN
    pub stiffness_used: f64,     // kT / variance, or 2πγ·fc for the spectral method (pN/nm)
    pub mean_magnet_position: f64,
    pub spectral_fit: Option<SpectralFit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooFewSamples { minimum: usize },
    ZeroVariance,
    NonPositiveLength { length: f64 },
    SpectrumFitFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedWindow {
    pub window_index: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub sample_count: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub thermal_energy: f64,
    pub results: Vec<CalibrationResult>,
    pub skipped: Vec<SkippedWindow>,
}

impl CalibrationReport {
    pub fn forces(&self) -> Vec<f64> {
        self.results.iter().map(|result| result.computed_force).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("trace has no {channel} channel")]
    MissingChannel { channel: Channel },
    #[error("invalid calibration setting: {setting}")]
    InvalidSetting { setting: String },
    #[error("force curve fit failed: {0}")]
    Fit(#[from] FitError),
}

/// Runs the configured calibration over every window of the trace.
///
/// Windows that cannot give a usable variance (or spectrum) are listed in
/// `CalibrationReport::skipped` and never appear in `results`.
pub fn calibrate(trace: &Trace, config: &CalibrationConfig) -> Result<CalibrationReport, CalibrationError> {
    config.validate()?;

    let channel = config.signal.channel();
    let signal = trace.channel(channel).ok_or(CalibrationError::MissingChannel { channel })?;
    let thermal_energy = config.temperature.thermal_energy();
    let radius = config.bead_radius.unwrap_or(0.0);

    let time = trace.get_time();
    let sampling_rate = 1.0 / trace.sampling_interval();
    let mut report = CalibrationReport { thermal_energy, ..Default::default() };

    for (window_index, range) in config.window_mode.windows(trace)?.into_iter().enumerate() {
        let sample_count = range.len();
        let skip = |reason: SkipReason| SkippedWindow {
            window_index,
            start_index: range.start,
            end_index: range.end,
            sample_count,
            reason,
        };

        if sample_count < config.min_samples {
            warn!("Skipping calibration window {} with {} samples (minimum {})", window_index, sample_count, config.min_samples);
            report.skipped.push(skip(SkipReason::TooFewSamples { minimum: config.min_samples }));
            continue;
        }

        let detrended = config.detrend.apply(&time[range.clone()], &signal[range.clone()]);
        let [_, variance] = compute_mean_and_variance(&detrended);

        let mean_extension = compute_mean(&trace.get_extension()[range.clone()]);
        let length = mean_extension + radius;

        if !(variance > 0.0) {
            warn!("Skipping calibration window {}: position variance is zero", window_index);
            report.skipped.push(skip(SkipReason::ZeroVariance));
            continue;
        }
        if !(length > 0.0) {
            warn!("Skipping calibration window {}: tether length {} nm", window_index, length);
            report.skipped.push(skip(SkipReason::NonPositiveLength { length }));
            continue;
        }

        let (stiffness_used, spectral_fit) = match &config.method {
            CalibrationMethod::Variance => (thermal_energy / variance, None),
            CalibrationMethod::Psd(settings) => {
                match spectral_stiffness(&detrended, sampling_rate, mean_extension, radius, settings) {
                    Ok(fit) => (fit.stiffness, Some(fit)),
                    Err(err) => {
                        warn!("Skipping calibration window {}: spectrum fit failed: {}", window_index, err);
                        report.skipped.push(skip(SkipReason::SpectrumFitFailed { message: err.to_string() }));
                        continue;
                    }
                }
            }
        };

        let result = CalibrationResult {
            window_index,
            start_time: time[range.start],
            end_time: time[range.end - 1],
            sample_count,
            mean_extension,
            variance_extension: variance,
            computed_force: stiffness_used * length,
            stiffness_used,
            mean_magnet_position: compute_mean(&trace.get_magnet_position()[range]),
            spectral_fit,
        };
        debug!("Calibration window {}: F = {:.4} pN at L = {:.2} nm", window_index, result.computed_force, length);
        report.results.push(result);
    }

    info!(
        "Calibrated {} windows of trace {} ({} skipped)",
        report.results.len(),
        trace.get_id(),
        report.skipped.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::force_calibration::power_spectrum::drag_coefficient;
    use crate::trace_data::trace::TraceMetadata;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn noisy_trace(n: usize, std: f64, drift: f64) -> Trace {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, std).unwrap();

        let time: Vec<f64> = (0..n).map(|i| i as f64 / 1024.0).collect();
        let transverse: Vec<f64> = time.iter().map(|t| drift * t + noise.sample(&mut rng)).collect();
        let extension = vec![800.0; n];

        Trace::new(time, extension, vec![1.0; n], vec![2.0; n], TraceMetadata::new("cal"))
            .unwrap()
            .with_transverse(transverse)
            .unwrap()
    }

    #[test]
    fn test_force_from_known_variance() {
        let std = 20.0;
        let trace = noisy_trace(20_000, std, 0.0);
        let config = CalibrationConfig::default();

        let report = calibrate(&trace, &config).unwrap();
        assert_eq!(report.results.len(), 1);

        let result = &report.results[0];
        let kt = config.temperature.thermal_energy();
        assert!((result.computed_force - kt * 800.0 / result.variance_extension).abs() < 1e-9);

        let expected = kt * 800.0 / (std * std);
        assert!((result.computed_force - expected).abs() / expected < 0.05);
    }

    #[test]
    fn test_detrending_removes_drift() {
        let trace = noisy_trace(20_000, 10.0, 2000.0);

        let raw = calibrate(&trace, &CalibrationConfig { detrend: Detrend::None, ..Default::default() }).unwrap();
        let detrended = calibrate(&trace, &CalibrationConfig::default()).unwrap();

        // Uncorrected drift biases the force low
        assert!(raw.results[0].computed_force < 0.5 * detrended.results[0].computed_force);
        assert!((detrended.results[0].variance_extension - 100.0).abs() < 5.0);
    }

    #[test]
    fn test_short_window_is_skipped() {
        let trace = noisy_trace(5000, 10.0, 0.0);
        let config = CalibrationConfig { window_mode: WindowMode::FixedDuration { seconds: 2.0 }, ..Default::default() };

        let report = calibrate(&trace, &config).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].window_index, 2);
        assert_eq!(report.skipped[0].sample_count, 904);
        assert_eq!(report.results[1].window_index, 1);
    }

    #[test]
    fn test_missing_transverse() {
        let trace = Trace::new(vec![0.0, 1.0], vec![1.0, 2.0], vec![1.0; 2], vec![1.0; 2], TraceMetadata::new("x")).unwrap();
        let result = calibrate(&trace, &CalibrationConfig::default());
        assert!(matches!(result, Err(CalibrationError::MissingChannel { channel: Channel::Transverse })));
    }

    // Lateral bead motion in a trap of the given stiffness, as a discrete
    // Ornstein-Uhlenbeck process
    fn ornstein_uhlenbeck(n: usize, corner: f64, sampling_rate: f64, std: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(13);
        let unit = Normal::new(0.0, 1.0).unwrap();
        let decay = (-2.0 * std::f64::consts::PI * corner / sampling_rate).exp();
        let kick = std * (1.0 - decay * decay).sqrt();

        let mut position = 0.0;
        (0..n)
            .map(|_| {
                position = decay * position + kick * unit.sample(&mut rng);
                position
            })
            .collect()
    }

    #[test]
    fn test_psd_method_recovers_force() {
        let sampling_rate = 5000.0;
        let (force, extension, radius) = (5.0, 1000.0, 500.0);
        let settings = PsdSettings::default();

        let stiffness = force / (extension + radius);
        let corner = stiffness / (2.0 * std::f64::consts::PI * drag_coefficient(&settings, extension, radius));
        let kt = Temperature::default().thermal_energy();
        let position = ornstein_uhlenbeck(150_000, corner, sampling_rate, (kt / stiffness).sqrt());

        let n = position.len();
        let time: Vec<f64> = (0..n).map(|i| i as f64 / sampling_rate).collect();
        let metadata = TraceMetadata::new("psd").with_sampling_rate(sampling_rate);
        let trace = Trace::new(time, vec![extension; n], vec![force; n], vec![1.0; n], metadata)
            .unwrap()
            .with_transverse(position)
            .unwrap();

        let config = CalibrationConfig { method: CalibrationMethod::Psd(settings), bead_radius: Some(radius), ..Default::default() };
        let report = calibrate(&trace, &config).unwrap();
        let result = &report.results[0];
        let fit = result.spectral_fit.unwrap();

        assert!((fit.corner_frequency - corner).abs() / corner < 0.1, "fc = {} vs {}", fit.corner_frequency, corner);
        assert!((result.computed_force - force).abs() / force < 0.1);
        assert!((result.stiffness_used * (extension + radius) - result.computed_force).abs() < 1e-9);

        // Both methods agree on a trace that obeys both models
        let variance = calibrate(&trace, &CalibrationConfig { bead_radius: Some(radius), ..Default::default() }).unwrap();
        assert!(variance.results[0].spectral_fit.is_none());
        assert!((variance.results[0].computed_force - force).abs() / force < 0.1);
    }

    #[test]
    fn test_psd_needs_bead_radius() {
        let config = CalibrationConfig { method: CalibrationMethod::Psd(PsdSettings::default()), ..Default::default() };
        assert!(matches!(config.validate(), Err(CalibrationError::InvalidSetting { .. })));
    }

    #[test]
    fn test_empty_fit_band_skips_window() {
        let trace = noisy_trace(4000, 10.0, 0.0);
        let settings = PsdSettings { min_frequency: 0.5, max_frequency: Some(0.6), ..PsdSettings::default() };
        let config = CalibrationConfig { method: CalibrationMethod::Psd(settings), bead_radius: Some(500.0), ..Default::default() };

        let report = calibrate(&trace, &config).unwrap();
        assert!(report.results.is_empty());
        assert!(matches!(report.skipped[0].reason, SkipReason::SpectrumFitFailed { .. }));
    }

    #[test]
    fn test_bead_radius_adds_to_length() {
        let trace = noisy_trace(4000, 10.0, 0.0);
        let plain = calibrate(&trace, &CalibrationConfig::default()).unwrap();
        let with_bead = calibrate(&trace, &CalibrationConfig { bead_radius: Some(200.0), ..Default::default() }).unwrap();

        let ratio = with_bead.results[0].computed_force / plain.results[0].computed_force;
        assert!((ratio - 1000.0 / 800.0).abs() < 1e-9);
    }
}
