use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};

use super::fit_config::{FitConfig, FitInput, PLATEAU_MIN_SAMPLES};
use super::fit_result::{ConvergenceIssue, FitError, FitResult, InsufficientDataReason};
use super::models::ModelKind;
use crate::optimization::constraints::OptimizationConstraint;
use crate::optimization::levenberg_marquardt::LevenbergMarquardt;
use crate::optimization::optimization_tracker::{CancellationToken, OptimizationTracker, TerminationCriterium};
use crate::optimization::optimizer::run_solver;
use crate::trace_data::segments::magnet_plateaus;
use crate::trace_data::tools::compute_mean;
use crate::trace_data::trace::{Channel, Trace};

pub fn fit_curve(x: &[f64], y: &[f64], config: &FitConfig) -> Result<FitResult, FitError> {
    fit_curve_cancellable(x, y, config, None)
}

/// Least-squares fit of `config.model` to the points `(x, y)`.
///
/// Malformed or degenerate input is an `Err` and the optimizer is never
/// started. A fit that stops early (iteration cap, singular Jacobian,
/// cancellation) is still an `Ok` carrying the last accepted parameters
/// with `converged == false`.
pub fn fit_curve_cancellable(
    x: &[f64],
    y: &[f64],
    config: &FitConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<FitResult, FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch { x_len: x.len(), y_len: y.len() });
    }
    if let Some(index) = x.iter().zip(y).position(|(a, b)| !a.is_finite() || !b.is_finite()) {
        return Err(FitError::NonFiniteInput { index });
    }

    config.validate()?;

    let free_parameters = config.free_parameter_count();
    if x.len() < free_parameters || x.is_empty() {
        return Err(FitError::InsufficientData {
            reason: InsufficientDataReason::TooFewPoints { points: x.len(), free_parameters },
        });
    }
    if y.iter().all(|value| *value == y[0]) {
        return Err(FitError::InsufficientData { reason: InsufficientDataReason::ConstantObservations });
    }

    let resolved = config.resolve_parameters(x, y)?;
    let names = config.model.parameter_names();

    let model = |params: &[f64]| config.model.evaluate_all(params, x, config.direction);
    let constraint = OptimizationConstraint::MaxMinValue { max: resolved.max.clone(), min: resolved.min.clone() };
    let solver = LevenbergMarquardt::new(model, y, resolved.values.clone(), &resolved.fixed, constraint, config.tolerance)?;

    let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations {
        max_iterations: config.max_iterations,
    });
    if let Some(token) = cancellation {
        tracker = tracker.with_cancellation(token.clone());
    }
    if let Some(budget) = config.time_budget_ms {
        tracker = tracker.with_time_budget(Duration::from_millis(budget));
    }

    debug!("Fitting {} to {} points from {:?}", config.model.name(), x.len(), resolved.values);
    let run = run_solver(&solver, &mut tracker)?;
    let params = run.state.params;
    let rss = run.state.cost;

    let mut issue = ConvergenceIssue::from_termination(run.reason);

    // Standard errors from the covariance estimate at the final point
    let mut parameter_errors: BTreeMap<String, f64> = names.iter().map(|name| (name.to_string(), 0.0)).collect();
    match solver.normal_matrix_inverse(&params) {
        Some(inverse) => {
            let dof = x.len() - solver.num_free();
            let sigma_sq = if dof > 0 { rss / dof as f64 } else { f64::NAN };
            for (column, &index) in solver.free_indices().iter().enumerate() {
                let error = (inverse[(column, column)] * sigma_sq).sqrt();
                parameter_errors.insert(names[index].to_string(), error);
            }
        }
        None => {
            for &index in solver.free_indices() {
                parameter_errors.insert(names[index].to_string(), f64::NAN);
            }
            issue = issue.or(Some(ConvergenceIssue::SingularJacobian));
        }
    }

    let mean = compute_mean(y);
    let tss: f64 = y.iter().map(|value| (value - mean).powi(2)).sum();
    let r_squared = 1.0 - rss / tss;

    let result = FitResult {
        model_name: config.model.name().to_string(),
        model: config.model,
        direction: config.direction,
        parameters: names.iter().zip(&params).map(|(name, value)| (name.to_string(), *value)).collect(),
        parameter_errors,
        fixed_parameters: names.iter()
            .zip(&resolved.fixed)
            .filter(|(_, fixed)| **fixed)
            .map(|(name, _)| name.to_string())
            .collect(),
        residual_sum_of_squares: rss,
        r_squared,
        converged: issue.is_none(),
        convergence_issue: issue,
        iterations: run.iterations,
        num_points: x.len(),
    };

    match result.convergence_issue {
        None => info!("{} fit converged after {} iterations, R² = {:.5}", result.model_name, result.iterations, r_squared),
        Some(issue) => warn!("{} fit did not converge ({:?}) after {} iterations", result.model_name, issue, result.iterations),
    }

    Ok(result)
}

pub fn fit_trace(trace: &Trace, config: &FitConfig) -> Result<FitResult, FitError> {
    fit_trace_cancellable(trace, config, None)
}

/// Fits the configured channels of a trace, applying the handle
/// correction, plateau averaging and force window first when configured.
pub fn fit_trace_cancellable(
    trace: &Trace,
    config: &FitConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<FitResult, FitError> {
    config.validate()?;
    if config.model == ModelKind::Lorentzian {
        return Err(FitError::InvalidSetting {
            setting: "lorentzian model applies to power spectra, not trace channels".to_string(),
        });
    }
    let (x_channel, y_channel) = config.channels();

    let corrected_extension = config.handle_correction.map(|handles| {
        handles.correct_extension(trace.get_force(), trace.get_extension(), config.temperature.thermal_energy())
    });

    let x = channel_values(trace, corrected_extension.as_deref(), x_channel)?;
    let y = channel_values(trace, corrected_extension.as_deref(), y_channel)?;

    let [force, x, y] = match config.input {
        FitInput::RawSamples => [trace.get_force().to_vec(), x.to_vec(), y.to_vec()],
        FitInput::PlateauAverages { tolerance } => {
            let averaged = plateau_averages(trace.get_magnet_position(), tolerance, [trace.get_force(), x, y]);
            debug!("Averaged {} samples into {} magnet plateaus", trace.len(), averaged[0].len());
            averaged
        }
    };

    match config.force_range {
        Some(range) => {
            let (x, y): (Vec<f64>, Vec<f64>) = force
                .iter()
                .zip(x.iter().zip(&y))
                .filter(|(force, _)| **force >= range.min && **force <= range.max)
                .map(|(_, (a, b))| (*a, *b))
                .unzip();
            debug!("Force window [{}, {}] pN keeps {} of {} points", range.min, range.max, x.len(), force.len());
            fit_curve_cancellable(&x, &y, config, cancellation)
        }
        None => fit_curve_cancellable(&x, &y, config, cancellation),
    }
}

// Mean of each channel over every magnet plateau with enough samples
fn plateau_averages(magnet_position: &[f64], tolerance: f64, channels: [&[f64]; 3]) -> [Vec<f64>; 3] {
    let mut averaged: [Vec<f64>; 3] = Default::default();

    for plateau in magnet_plateaus(magnet_position, tolerance) {
        if plateau.len() < PLATEAU_MIN_SAMPLES {
            continue;
        }
        for (means, values) in averaged.iter_mut().zip(channels) {
            means.push(compute_mean(&values[plateau.clone()]));
        }
    }

    averaged
}

fn channel_values<'a>(trace: &'a Trace, corrected_extension: Option<&'a [f64]>, channel: Channel) -> Result<&'a [f64], FitError> {
    match (corrected_extension, channel) {
        (Some(corrected), Channel::Extension) => Ok(corrected),
        _ => trace.channel(channel).ok_or(FitError::MissingChannel { channel }),
    }
}
