//! Step detection on one trace channel.
//!
//! A jump is a first difference of the (optionally filtered) signal whose
//! magnitude lies strictly between `min_jump` and `max_jump`. Candidates
//! closer than `merge_distance` samples to the last kept jump are folded
//! into it, so one unfolding event smeared over a few samples by the
//! filter is reported once.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace_data::tools::SignalFilter;
use crate::trace_data::trace::{Channel, Trace};

pub const JUMP_MIN_DEFAULT: f64 = 2.0; // nm
pub const JUMP_MAX_DEFAULT: f64 = 20.0; // nm
pub const JUMP_MERGE_DISTANCE_DEFAULT: usize = 10; // samples
pub const JUMP_FILTER_KERNEL_DEFAULT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpDetectionConfig {
    pub channel: Channel,
    pub filter: Option<SignalFilter>,
    pub min_jump: f64,
    pub max_jump: f64,
    pub merge_distance: usize,
}

impl Default for JumpDetectionConfig {
    fn default() -> Self {
        Self {
            channel: Channel::Extension,
            filter: Some(SignalFilter::Median { kernel_size: JUMP_FILTER_KERNEL_DEFAULT }),
            min_jump: JUMP_MIN_DEFAULT,
            max_jump: JUMP_MAX_DEFAULT,
            merge_distance: JUMP_MERGE_DISTANCE_DEFAULT,
        }
    }
}

impl JumpDetectionConfig {
    pub fn with_thresholds(mut self, min_jump: f64, max_jump: f64) -> Self {
        self.min_jump = min_jump;
        self.max_jump = max_jump;
        self
    }

    pub fn with_filter(mut self, filter: Option<SignalFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn validate(&self) -> Result<(), JumpError> {
        if !(self.min_jump >= 0.0 && self.min_jump.is_finite()) {
            return Err(JumpError::InvalidSetting { setting: format!("min_jump {} must be finite and >= 0", self.min_jump) });
        }
        if !(self.max_jump > self.min_jump) {
            return Err(JumpError::InvalidSetting {
                setting: format!("max_jump {} must exceed min_jump {}", self.max_jump, self.min_jump),
            });
        }
        if let Some(filter) = &self.filter {
            filter.validate().map_err(|setting| JumpError::InvalidSetting { setting })?;
        }
        Ok(())
    }
}

/// A step between sample `index` and `index + 1` of the filtered signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Jump {
    pub index: usize,
    pub size: f64, // Signed, in channel units
}

/// A jump located on the trace it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JumpEvent {
    pub index: usize,
    pub time: f64,  // s, at the last sample before the step
    pub force: f64, // pN, at the same sample
    pub size: f64,
}

pub fn detect_jumps(values: &[f64], config: &JumpDetectionConfig) -> Result<Vec<Jump>, JumpError> {
    config.validate()?;

    let signal = match &config.filter {
        Some(filter) => filter.apply(values),
        None => values.to_vec(),
    };

    let mut jumps: Vec<Jump> = Vec::new();
    for (index, pair) in signal.windows(2).enumerate() {
        let size = pair[1] - pair[0];
        if !(size.abs() > config.min_jump && size.abs() < config.max_jump) {
            continue;
        }

        match jumps.last() {
            Some(last) if index - last.index <= config.merge_distance => {
                debug!("Jump at sample {} merged into the one at {}", index, last.index);
            }
            _ => jumps.push(Jump { index, size }),
        }
    }

    Ok(jumps)
}

pub fn detect_trace_jumps(trace: &Trace, config: &JumpDetectionConfig) -> Result<Vec<JumpEvent>, JumpError> {
    let values = trace.channel(config.channel).ok_or(JumpError::MissingChannel { channel: config.channel })?;
    let jumps = detect_jumps(values, config)?;

    info!(
        "Found {} jumps in {} of trace {} within ({}, {})",
        jumps.len(),
        config.channel,
        trace.get_id(),
        config.min_jump,
        config.max_jump
    );

    Ok(jumps
        .into_iter()
        .map(|jump| JumpEvent {
            index: jump.index,
            time: trace.get_time()[jump.index],
            force: trace.get_force()[jump.index],
            size: jump.size,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JumpError {
    #[error("invalid jump detection setting: {setting}")]
    InvalidSetting { setting: String },
    #[error("trace has no {channel} channel")]
    MissingChannel { channel: Channel },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_data::trace::TraceMetadata;

    // Piecewise-constant signal: each (length, level) pair is one plateau
    fn steps(plateaus: &[(usize, f64)]) -> Vec<f64> {
        plateaus.iter().flat_map(|&(length, level)| vec![level; length]).collect()
    }

    #[test]
    fn test_hand_placed_steps() {
        let values = steps(&[(50, 0.0), (50, 10.0), (50, 4.0)]);
        let jumps = detect_jumps(&values, &JumpDetectionConfig::default()).unwrap();
        assert_eq!(jumps, vec![Jump { index: 49, size: 10.0 }, Jump { index: 99, size: -6.0 }]);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        // 2.0 sits on the lower threshold, 50.0 above the upper one
        let values = steps(&[(30, 0.0), (30, 2.0), (30, 52.0), (30, 47.0)]);
        let jumps = detect_jumps(&values, &JumpDetectionConfig::default()).unwrap();
        assert_eq!(jumps, vec![Jump { index: 89, size: -5.0 }]);
    }

    #[test]
    fn test_close_jumps_are_merged() {
        let values = steps(&[(40, 0.0), (6, 5.0), (40, 10.0), (40, 15.0)]);
        let config = JumpDetectionConfig::default().with_filter(None);
        let jumps = detect_jumps(&values, &config).unwrap();
        assert_eq!(jumps.iter().map(|jump| jump.index).collect::<Vec<_>>(), vec![39, 85]);
    }

    #[test]
    fn test_filter_suppresses_single_sample_spikes() {
        let mut values = vec![0.0; 60];
        values[30] = 10.0;

        let unfiltered = detect_jumps(&values, &JumpDetectionConfig::default().with_filter(None)).unwrap();
        assert_eq!(unfiltered, vec![Jump { index: 29, size: 10.0 }]);

        let filtered = detect_jumps(&values, &JumpDetectionConfig::default()).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_invalid_thresholds() {
        let config = JumpDetectionConfig::default().with_thresholds(5.0, 5.0);
        assert!(matches!(detect_jumps(&[0.0, 1.0], &config), Err(JumpError::InvalidSetting { .. })));

        let config = JumpDetectionConfig::default().with_thresholds(f64::NAN, 5.0);
        assert!(matches!(config.validate(), Err(JumpError::InvalidSetting { .. })));

        let config = JumpDetectionConfig::default().with_filter(Some(SignalFilter::MovingAverage { kernel_size: 0 }));
        assert!(matches!(config.validate(), Err(JumpError::InvalidSetting { .. })));
    }

    #[test]
    fn test_short_signal_has_no_jumps() {
        assert!(detect_jumps(&[], &JumpDetectionConfig::default()).unwrap().is_empty());
        assert!(detect_jumps(&[3.0], &JumpDetectionConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn test_trace_jumps_carry_time_and_force() {
        let extension = steps(&[(20, 100.0), (20, 108.0)]);
        let n = extension.len();
        let time: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
        let force: Vec<f64> = (0..n).map(|i| 10.0 + i as f64 * 0.1).collect();
        let trace = Trace::new(time, extension, force, vec![1.0; n], TraceMetadata::new("hairpin")).unwrap();

        let events = detect_trace_jumps(&trace, &JumpDetectionConfig::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 19);
        assert_eq!(events[0].time, 9.5);
        assert!((events[0].force - 11.9).abs() < 1e-12);
        assert_eq!(events[0].size, 8.0);

        let config = JumpDetectionConfig { channel: Channel::Transverse, ..JumpDetectionConfig::default() };
        assert!(matches!(detect_trace_jumps(&trace, &config), Err(JumpError::MissingChannel { .. })));
    }
}
