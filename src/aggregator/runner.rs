use log::{info, warn};
use rayon::prelude::*;
use thiserror::Error;

use super::analysis_config::AnalysisConfig;
use super::analysis_result::{AnalysisOutcome, AnalysisResult};
use crate::force_calibration::{calibrate, CalibrationError};
use crate::model_fitting::{fit_trace_cancellable, FitError};
use crate::optimization::optimization_tracker::CancellationToken;
use crate::signal_analysis::events::{detect_trace_jumps, JumpError};
use crate::signal_analysis::hmm::segmentation::{segment_trace_cancellable, HMMError};
use crate::trace_data::trace::Trace;

/// Fatal problems found before any analysis starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("cannot parse analysis configuration: {message}")]
    Parse { message: String },
    #[error("invalid fitting configuration: {0}")]
    Fitting(FitError),
    #[error("invalid calibration configuration: {0}")]
    Calibration(CalibrationError),
    #[error("invalid kinetics configuration: {0}")]
    Kinetics(HMMError),
    #[error("invalid jump detection configuration: {0}")]
    Events(JumpError),
}

pub fn analyze(trace: &Trace, config: &AnalysisConfig) -> Result<AnalysisResult, AnalysisError> {
    analyze_cancellable(trace, config, None)
}

/// Runs every requested analysis on `trace`.
///
/// The configuration is validated first and is the only source of an
/// `Err`. After that each analysis runs on its own, and a failure is
/// recorded in its outcome without touching the others.
pub fn analyze_cancellable(
    trace: &Trace,
    config: &AnalysisConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<AnalysisResult, AnalysisError> {
    config.validate()?;
    Ok(run_analyses(trace, config, cancellation))
}

/// Analyzes independent traces in parallel with the same configuration.
/// The output keeps the order of `traces`.
pub fn analyze_batch(traces: &[Trace], config: &AnalysisConfig) -> Result<Vec<AnalysisResult>, AnalysisError> {
    config.validate()?;
    info!("Analyzing a batch of {} traces", traces.len());

    Ok(traces.par_iter().map(|trace| run_analyses(trace, config, None)).collect())
}

fn run_analyses(trace: &Trace, config: &AnalysisConfig, cancellation: Option<&CancellationToken>) -> AnalysisResult {
    info!("Analyzing trace {} ({} samples)", trace.get_id(), trace.len());

    let fitting = match &config.fitting {
        Some(fit_config) => AnalysisOutcome::from_result(fit_trace_cancellable(trace, fit_config, cancellation)),
        None => AnalysisOutcome::NotRequested,
    };
    let calibration = match &config.calibration {
        Some(calibration_config) => AnalysisOutcome::from_result(calibrate(trace, calibration_config)),
        None => AnalysisOutcome::NotRequested,
    };
    // Jumps first: they are a cheap look at the steps the HMM will segment
    let events = match &config.events {
        Some(jump_config) => AnalysisOutcome::from_result(detect_trace_jumps(trace, jump_config)),
        None => AnalysisOutcome::NotRequested,
    };
    let kinetics = match &config.kinetics {
        Some(hmm_config) => AnalysisOutcome::from_result(segment_trace_cancellable(trace, hmm_config, cancellation)),
        None => AnalysisOutcome::NotRequested,
    };

    let result = AnalysisResult {
        trace_id: trace.get_id().to_string(),
        config: config.clone(),
        fitting,
        calibration,
        kinetics,
        events,
    };

    for (name, failure) in result.failed_analyses() {
        warn!("Trace {}: {} failed ({:?}): {}", result.trace_id, name, failure.kind, failure.message);
    }
    info!("Trace {} done, succeeded: {:?}", result.trace_id, result.succeeded_analyses());

    result
}
