use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::analysis::dwell_times::{compute_dwell_statistics, dwell_times_by_state, extract_dwells, Dwell, DwellStatistics};
use super::analysis::hmm_analyzer::HMMAnalyzer;
use super::baum_welch::{BaumWelch, BaumWelchError};
use super::hmm_config::HMMConfig;
use super::hmm_instance::{HMMInstance, HMMInstanceError, HMMParameters};
use super::initialization::hmm_initializer::{HMMInitializer, HMMInitializerError};
use super::state::StateError;
use crate::optimization::optimization_tracker::{
    CancellationToken, OptimizationTracker, TerminationCriterium, TerminationReason,
};
use crate::optimization::optimizer::run_solver;
use crate::trace_data::tools::{compute_mean_and_variance, count_distinct};
use crate::trace_data::trace::{Channel, Trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HMMWarningKind {
    MaxIterationsReached,
    Cancelled,
    TimeBudgetExceeded,
    NumericalInstability,
}

/// EM stopped before the log-likelihood settled. The segmentation it is
/// attached to still holds the last-iteration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HMMConvergenceWarning {
    pub kind: HMMWarningKind,
    pub iterations: usize,
    pub last_improvement: Option<f64>, // Log-likelihood change of the final iteration
}

impl HMMConvergenceWarning {
    fn from_run(reason: TerminationReason, iterations: usize, history: &[f64]) -> Option<Self> {
        let kind = match reason {
            TerminationReason::Converged => return None,
            TerminationReason::MaxIterations => HMMWarningKind::MaxIterationsReached,
            TerminationReason::Singular => HMMWarningKind::NumericalInstability,
            TerminationReason::Cancelled => HMMWarningKind::Cancelled,
            TerminationReason::TimeBudgetExceeded => HMMWarningKind::TimeBudgetExceeded,
        };
        let last_improvement = match history {
            [.., previous, last] => Some(last - previous),
            _ => None,
        };
        Some(Self { kind, iterations, last_improvement })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSegmentation {
    pub state_sequence: Vec<usize>,
    pub state_means: Vec<f64>,
    pub state_variances: Vec<f64>,
    pub start_probabilities: Vec<f64>,
    pub transition_matrix: Vec<Vec<f64>>, // Per-sample probabilities, row-stochastic
    pub dwell_times_by_state: BTreeMap<usize, Vec<f64>>,
    pub dwells: Vec<Dwell>,
    pub dwell_statistics: Vec<DwellStatistics>,
    pub log_likelihood: f64,
    pub viterbi_log_probability: f64,
    pub converged: bool,
    pub iterations: usize,
    pub convergence_warning: Option<HMMConvergenceWarning>,
    pub state_occupancy: Vec<f64>,
    pub transition_counts: Vec<Vec<usize>>,
    pub transition_rates: Vec<Vec<f64>>, // 1/s
    pub idealized_trace: Vec<f64>,
    pub sampling_interval: f64,
}

impl StateSegmentation {
    pub fn num_states(&self) -> usize {
        self.state_means.len()
    }
}

pub fn segment_trace(trace: &Trace, config: &HMMConfig) -> Result<StateSegmentation, HMMError> {
    segment_trace_cancellable(trace, config, None)
}

pub fn segment_trace_cancellable(
    trace: &Trace,
    config: &HMMConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<StateSegmentation, HMMError> {
    config.validate()?;
    let values = trace
        .channel(config.channel)
        .ok_or(HMMError::MissingChannel { channel: config.channel })?;

    segment_signal_cancellable(values, trace.sampling_interval(), config, cancellation)
}

pub fn segment_signal(values: &[f64], sampling_interval: f64, config: &HMMConfig) -> Result<StateSegmentation, HMMError> {
    segment_signal_cancellable(values, sampling_interval, config, None)
}

/// Trains (or takes as given) a Gaussian HMM, decodes the Viterbi path and
/// derives the kinetic statistics of that path.
pub fn segment_signal_cancellable(
    values: &[f64],
    sampling_interval: f64,
    config: &HMMConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<StateSegmentation, HMMError> {
    config.validate()?;
    HMMInstance::check_sequence_validity(values)?;
    if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
        return Err(HMMError::InvalidSetting {
            setting: format!("sampling interval {} must be positive", sampling_interval),
        });
    }

    let signal = match &config.pre_filter {
        Some(filter) => filter.apply(values),
        None => values.to_vec(),
    };

    info!("Segmenting {} samples into {} states", signal.len(), config.num_states);

    // Fixed parameters keep the caller's state numbering
    let (parameters, trained) = match &config.fixed_parameters {
        Some(fixed) => {
            debug!("Decoding with fixed HMM parameters");
            (fixed.to_parameters()?, TrainedModel { iterations: 0, warning: None })
        }
        None => {
            check_state_count(&signal, config)?;
            let (parameters, trained) = train(&signal, config, cancellation)?;
            (parameters.sorted_by_mean().0, trained)
        }
    };

    let instance = HMMInstance::from_parameters(&parameters)?;
    let viterbi = instance.run_viterbi(&signal)?;
    let log_likelihood = instance.log_likelihood(&signal)?;

    let num_states = parameters.num_states();
    let state_means = parameters.means();
    let analysis = HMMAnalyzer::new(&viterbi.path, &state_means, sampling_interval).run();
    let dwells = extract_dwells(&viterbi.path, sampling_interval);

    if let Some(warning) = &trained.warning {
        warn!("HMM training did not converge: {:?} after {} iterations", warning.kind, warning.iterations);
    }
    info!(
        "HMM segmentation done: {} dwells, log-likelihood {:.4}, means {:?}",
        dwells.len(),
        log_likelihood,
        state_means
    );

    Ok(StateSegmentation {
        state_variances: parameters.variances(),
        start_probabilities: parameters.start_matrix.matrix.clone(),
        transition_matrix: parameters.transition_matrix.matrix.clone().into_inner(),
        dwell_times_by_state: dwell_times_by_state(&dwells, num_states),
        dwell_statistics: compute_dwell_statistics(&dwells, num_states),
        dwells,
        log_likelihood,
        viterbi_log_probability: viterbi.log_probability,
        converged: trained.warning.is_none(),
        iterations: trained.iterations,
        convergence_warning: trained.warning,
        state_occupancy: analysis.state_occupancy,
        transition_counts: analysis.transition_counts,
        transition_rates: analysis.transition_rates,
        idealized_trace: analysis.idealized_trace,
        state_sequence: viterbi.path,
        state_means,
        sampling_interval,
    })
}

struct TrainedModel {
    iterations: usize,
    warning: Option<HMMConvergenceWarning>,
}

// Data-dependent part of the state-count sanity check
fn check_state_count(signal: &[f64], config: &HMMConfig) -> Result<(), HMMError> {
    let num_states = config.num_states;

    let required = num_states * config.min_samples_per_state;
    if signal.len() < required {
        return Err(HMMError::InvalidStateCount {
            num_states,
            reason: StateCountReason::TooFewSamples { samples: signal.len(), required },
        });
    }

    let distinct = count_distinct(signal);
    if distinct < num_states {
        return Err(HMMError::InvalidStateCount { num_states, reason: StateCountReason::TooFewDistinctValues { distinct } });
    }

    Ok(())
}

fn train(
    signal: &[f64],
    config: &HMMConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<(HMMParameters, TrainedModel), HMMError> {
    let [_, data_variance] = compute_mean_and_variance(signal);
    let variance_floor = if data_variance > 0.0 {
        config.variance_floor_fraction * data_variance
    } else {
        config.variance_floor_fraction
    };

    let initial = HMMInitializer::new(config.self_transition_bias, variance_floor).get_initial_values(signal, config.num_states)?;
    let solver = BaumWelch::new(signal, initial, variance_floor);

    let mut tracker = OptimizationTracker::new(TerminationCriterium::OneStepConvergenceAbsolute {
        epsilon: config.tolerance,
        max_iterations: Some(config.max_iterations),
    });
    if let Some(token) = cancellation {
        tracker = tracker.with_cancellation(token.clone());
    }
    if let Some(budget) = config.time_budget_ms {
        tracker = tracker.with_time_budget(Duration::from_millis(budget));
    }

    let run = run_solver(&solver, &mut tracker)?;
    debug!("Baum-Welch stopped after {} iterations: {:?}", run.iterations, run.reason);

    let trained = TrainedModel {
        warning: HMMConvergenceWarning::from_run(run.reason, run.iterations, &run.history),
        iterations: run.iterations,
    };
    Ok((run.state.parameters, trained))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCountReason {
    BelowOne,
    AboveMaximum { max_states: usize },
    TooFewDistinctValues { distinct: usize },
    TooFewSamples { samples: usize, required: usize },
}

impl fmt::Display for StateCountReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateCountReason::BelowOne => write!(f, "at least one state is required"),
            StateCountReason::AboveMaximum { max_states } => write!(f, "more than the maximum of {}", max_states),
            StateCountReason::TooFewDistinctValues { distinct } => {
                write!(f, "the signal has only {} distinct values", distinct)
            }
            StateCountReason::TooFewSamples { samples, required } => {
                write!(f, "{} samples, at least {} required", samples, required)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HMMError {
    #[error("invalid number of states {num_states}: {reason}")]
    InvalidStateCount { num_states: usize, reason: StateCountReason },
    #[error("trace has no {channel} channel")]
    MissingChannel { channel: Channel },
    #[error("invalid HMM setting: {setting}")]
    InvalidSetting { setting: String },
    #[error("invalid state: {error}")]
    InvalidState { error: StateError },
    #[error(transparent)]
    Instance(#[from] HMMInstanceError),
    #[error(transparent)]
    Initializer(#[from] HMMInitializerError),
    #[error(transparent)]
    Training(#[from] BaumWelchError),
}
