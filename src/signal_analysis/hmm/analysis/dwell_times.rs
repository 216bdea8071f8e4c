use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::model_fitting::curve_fitter::fit_curve;
use crate::model_fitting::fit_config::FitConfig;
use crate::model_fitting::fit_result::{FitError, FitResult};
use crate::model_fitting::models::ModelKind;

// Fewer uncensored dwells than this are not fitted
pub const LIFETIME_FIT_MIN_DWELLS: usize = 5;

/// One run of consecutive identical states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dwell {
    pub state: usize,
    pub start_index: usize,
    pub num_samples: usize,
    pub duration: f64, // s
    pub censored: bool, // Touches the start or end of the trace
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellStatistics {
    pub state: usize,
    pub count: usize,
    pub uncensored_count: usize,
    pub mean_dwell_time: Option<f64>, // Over uncensored dwells
    pub lifetime_fit: Option<FitResult>,
    pub lifetime_fit_failure: Option<String>,
}

pub fn extract_dwells(state_sequence: &[usize], sampling_interval: f64) -> Vec<Dwell> {
    let mut dwells: Vec<Dwell> = Vec::new();

    for (index, &state) in state_sequence.iter().enumerate() {
        match dwells.last_mut() {
            Some(current) if current.state == state => current.num_samples += 1,
            _ => dwells.push(Dwell { state, start_index: index, num_samples: 1, duration: 0.0, censored: false }),
        }
    }

    let last = dwells.len().saturating_sub(1);
    for (i, dwell) in dwells.iter_mut().enumerate() {
        dwell.duration = dwell.num_samples as f64 * sampling_interval;
        dwell.censored = i == 0 || i == last;
    }

    dwells
}

// Every state gets an entry, in trace order, censored dwells included
pub fn dwell_times_by_state(dwells: &[Dwell], num_states: usize) -> BTreeMap<usize, Vec<f64>> {
    let mut by_state: BTreeMap<usize, Vec<f64>> = (0..num_states).map(|state| (state, Vec::new())).collect();
    for dwell in dwells {
        by_state.entry(dwell.state).or_default().push(dwell.duration);
    }
    by_state
}

/// Per-state dwell summary. With enough uncensored dwells the exponential
/// model is fitted to their empirical survival curve, whose `tau` is the
/// state lifetime.
pub fn compute_dwell_statistics(dwells: &[Dwell], num_states: usize) -> Vec<DwellStatistics> {
    (0..num_states)
        .map(|state| {
            let mut uncensored: Vec<f64> = dwells
                .iter()
                .filter(|dwell| dwell.state == state && !dwell.censored)
                .map(|dwell| dwell.duration)
                .collect();
            let count = dwells.iter().filter(|dwell| dwell.state == state).count();

            let mean_dwell_time = if uncensored.is_empty() {
                None
            } else {
                Some(uncensored.iter().sum::<f64>() / uncensored.len() as f64)
            };

            let (lifetime_fit, lifetime_fit_failure) = if uncensored.len() >= LIFETIME_FIT_MIN_DWELLS {
                uncensored.sort_by(|a, b| a.total_cmp(b));
                match fit_survival_curve(&uncensored) {
                    Ok(fit) => (Some(fit), None),
                    Err(err) => {
                        debug!("Lifetime fit of state {} failed: {}", state, err);
                        (None, Some(err.to_string()))
                    }
                }
            } else {
                (None, None)
            };

            DwellStatistics {
                state,
                count,
                uncensored_count: uncensored.len(),
                mean_dwell_time,
                lifetime_fit,
                lifetime_fit_failure,
            }
        })
        .collect()
}

// Survival S(t_i) = fraction of dwells lasting at least t_i, for sorted t_i
fn fit_survival_curve(sorted_durations: &[f64]) -> Result<FitResult, FitError> {
    let n = sorted_durations.len() as f64;
    let survival: Vec<f64> = (0..sorted_durations.len()).map(|i| (n - i as f64) / n).collect();

    fit_curve(sorted_durations, &survival, &FitConfig::new(ModelKind::Exponential))
}
