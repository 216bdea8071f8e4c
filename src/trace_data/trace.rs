use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tools::{compute_mean, compute_mean_and_variance, SignalFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Time,
    Extension,
    Force,
    MagnetPosition,
    Transverse,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Time => "time (s)",
            Channel::Extension => "extension (nm)",
            Channel::Force => "force (pN)",
            Channel::MagnetPosition => "magnet position (mm)",
            Channel::Transverse => "transverse position (nm)",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub trace_id: String,
    pub bead_id: Option<String>,
    pub molecule_id: Option<String>,
    pub sampling_rate: Option<f64>, // Hz
}

impl TraceMetadata {
    pub fn new(trace_id: &str) -> Self {
        Self { trace_id: trace_id.to_string(), ..Default::default() }
    }

    pub fn with_sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.sampling_rate = Some(sampling_rate);
        self
    }
}

/// One decoded magnetic-tweezer recording.
///
/// All channels have the same length (at least 2) and `time` is strictly
/// increasing. A `Trace` cannot be modified after construction; slicing
/// produces a new, independent trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    time: Vec<f64>,
    extension: Vec<f64>,
    force: Vec<f64>,
    magnet_position: Vec<f64>,
    transverse: Option<Vec<f64>>,
    metadata: TraceMetadata,
}

impl Trace {
    pub fn new(
        time: Vec<f64>,
        extension: Vec<f64>,
        force: Vec<f64>,
        magnet_position: Vec<f64>,
        metadata: TraceMetadata,
    ) -> Result<Self, TraceError> {
        check_time_validity(&time)?;
        check_channel_validity(Channel::Extension, &extension, time.len())?;
        check_channel_validity(Channel::Force, &force, time.len())?;
        check_channel_validity(Channel::MagnetPosition, &magnet_position, time.len())?;

        if let Some(rate) = metadata.sampling_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(TraceError::InvalidSamplingRate { rate });
            }
        }

        Ok(Self { time, extension, force, magnet_position, transverse: None, metadata })
    }

    // Attach the lateral bead position used by the equipartition calibration
    pub fn with_transverse(mut self, transverse: Vec<f64>) -> Result<Self, TraceError> {
        check_channel_validity(Channel::Transverse, &transverse, self.time.len())?;
        self.transverse = Some(transverse);
        Ok(self)
    }

    pub fn get_time(&self) -> &[f64] {
        &self.time
    }

    pub fn get_extension(&self) -> &[f64] {
        &self.extension
    }

    pub fn get_force(&self) -> &[f64] {
        &self.force
    }

    pub fn get_magnet_position(&self) -> &[f64] {
        &self.magnet_position
    }

    pub fn get_transverse(&self) -> Option<&[f64]> {
        self.transverse.as_deref()
    }

    pub fn get_metadata(&self) -> &TraceMetadata {
        &self.metadata
    }

    pub fn get_id(&self) -> &str {
        &self.metadata.trace_id
    }

    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        match channel {
            Channel::Time => Some(&self.time),
            Channel::Extension => Some(&self.extension),
            Channel::Force => Some(&self.force),
            Channel::MagnetPosition => Some(&self.magnet_position),
            Channel::Transverse => self.get_transverse(),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    // Always false: construction guarantees at least two samples
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.time[self.time.len() - 1] - self.time[0]
    }

    // Seconds per sample. Metadata sampling rate wins over the time axis.
    pub fn sampling_interval(&self) -> f64 {
        match self.metadata.sampling_rate {
            Some(rate) => 1.0 / rate,
            None => self.duration() / (self.time.len() - 1) as f64,
        }
    }

    pub fn mean(&self, channel: Channel) -> Option<f64> {
        self.channel(channel).map(compute_mean)
    }

    pub fn variance(&self, channel: Channel) -> Option<f64> {
        self.channel(channel).map(|values| compute_mean_and_variance(values)[1])
    }

    pub fn min(&self, channel: Channel) -> Option<f64> {
        self.channel(channel).map(|values| values.iter().copied().fold(f64::INFINITY, f64::min))
    }

    pub fn max(&self, channel: Channel) -> Option<f64> {
        self.channel(channel).map(|values| values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn filtered(&self, channel: Channel, filter: &SignalFilter) -> Option<Vec<f64>> {
        self.channel(channel).map(|values| filter.apply(values))
    }

    pub fn slice_indices(&self, range: Range<usize>) -> Result<Trace, TraceError> {
        if range.start > range.end || range.end > self.len() {
            return Err(TraceError::IndexOutOfRange { start: range.start, end: range.end, len: self.len() });
        }
        if range.end - range.start < 2 {
            return Err(TraceError::TooShort { len: range.end - range.start });
        }

        let transverse = self.transverse.as_ref().map(|values| values[range.clone()].to_vec());

        Ok(Trace {
            time: self.time[range.clone()].to_vec(),
            extension: self.extension[range.clone()].to_vec(),
            force: self.force[range.clone()].to_vec(),
            magnet_position: self.magnet_position[range].to_vec(),
            transverse,
            metadata: self.metadata.clone(),
        })
    }

    // Inclusive on both ends
    pub fn slice_time(&self, start: f64, end: f64) -> Result<Trace, TraceError> {
        if !(start <= end) {
            return Err(TraceError::EmptyTimeRange { start, end });
        }

        let first = self.time.partition_point(|&t| t < start);
        let last = self.time.partition_point(|&t| t <= end);

        if last <= first {
            return Err(TraceError::EmptyTimeRange { start, end });
        }

        self.slice_indices(first..last)
    }
}

fn check_time_validity(time: &[f64]) -> Result<(), TraceError> {
    if time.len() < 2 {
        return Err(TraceError::TooShort { len: time.len() });
    }

    for (index, value) in time.iter().enumerate() {
        if !value.is_finite() {
            return Err(TraceError::NonFiniteValue { channel: Channel::Time, index });
        }
        if index > 0 && *value <= time[index - 1] {
            return Err(TraceError::NonMonotonicTime { index });
        }
    }

    Ok(())
}

fn check_channel_validity(channel: Channel, values: &[f64], expected: usize) -> Result<(), TraceError> {
    if values.len() != expected {
        return Err(TraceError::LengthMismatch { channel, expected, found: values.len() });
    }

    if let Some(index) = values.iter().position(|value| !value.is_finite()) {
        return Err(TraceError::NonFiniteValue { channel, index });
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
    #[error("trace needs at least 2 samples, got {len}")]
    TooShort { len: usize },
    #[error("{channel} has {found} samples, expected {expected}")]
    LengthMismatch { channel: Channel, expected: usize, found: usize },
    #[error("time is not strictly increasing at sample {index}")]
    NonMonotonicTime { index: usize },
    #[error("{channel} has a non-finite value at sample {index}")]
    NonFiniteValue { channel: Channel, index: usize },
    #[error("sampling rate must be positive and finite, got {rate}")]
    InvalidSamplingRate { rate: f64 },
    #[error("no samples in time range [{start}, {end}]")]
    EmptyTimeRange { start: f64, end: f64 },
    #[error("index range {start}..{end} is outside a trace of {len} samples")]
    IndexOutOfRange { start: usize, end: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_trace(n: usize) -> Trace {
        let time: Vec<f64> = (0..n).map(|i| i as f64 * 0.1).collect();
        let extension: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        let force = vec![5.0; n];
        let magnet = vec![1.5; n];
        Trace::new(time, extension, force, magnet, TraceMetadata::new("bead_1")).unwrap()
    }

    #[test]
    fn test_trace_creation() {
        let trace = ramp_trace(10);
        assert_eq!(trace.len(), 10);
        assert_eq!(trace.get_id(), "bead_1");
        assert!((trace.sampling_interval() - 0.1).abs() < 1e-12);
        assert!(trace.get_transverse().is_none());
    }

    #[test]
    fn test_length_mismatch() {
        let result = Trace::new(vec![0.0, 1.0], vec![1.0], vec![1.0, 1.0], vec![1.0, 1.0], TraceMetadata::default());
        match result {
            Err(TraceError::LengthMismatch { channel: Channel::Extension, expected: 2, found: 1 }) => (),
            other => panic!("Expected LengthMismatch error, got {:?}", other),
        }
    }

    #[test]
    fn test_too_short() {
        let result = Trace::new(vec![0.0], vec![1.0], vec![1.0], vec![1.0], TraceMetadata::default());
        assert!(matches!(result, Err(TraceError::TooShort { len: 1 })));
    }

    #[test]
    fn test_non_monotonic_time() {
        let result = Trace::new(
            vec![0.0, 1.0, 1.0],
            vec![1.0; 3], vec![1.0; 3], vec![1.0; 3],
            TraceMetadata::default(),
        );
        assert!(matches!(result, Err(TraceError::NonMonotonicTime { index: 2 })));
    }

    #[test]
    fn test_non_finite_value() {
        let result = Trace::new(
            vec![0.0, 1.0, 2.0],
            vec![1.0, f64::NAN, 1.0], vec![1.0; 3], vec![1.0; 3],
            TraceMetadata::default(),
        );
        assert!(matches!(result, Err(TraceError::NonFiniteValue { channel: Channel::Extension, index: 1 })));
    }

    #[test]
    fn test_transverse_length_checked() {
        let result = ramp_trace(5).with_transverse(vec![0.0; 4]);
        assert!(matches!(result, Err(TraceError::LengthMismatch { channel: Channel::Transverse, .. })));
    }

    #[test]
    fn test_slice_indices_is_independent() {
        let trace = ramp_trace(10);
        let sliced = trace.slice_indices(2..6).unwrap();

        assert_eq!(sliced.len(), 4);
        assert_eq!(sliced.get_extension(), &[102.0, 103.0, 104.0, 105.0]);
        assert_eq!(trace.len(), 10);
        assert!(trace.slice_indices(3..4).is_err());
        assert!(trace.slice_indices(5..11).is_err());
    }

    #[test]
    fn test_slice_time_inclusive() {
        let trace = ramp_trace(10);
        let sliced = trace.slice_time(0.2, 0.5).unwrap();
        assert_eq!(sliced.len(), 4);
        assert!((sliced.get_time()[0] - 0.2).abs() < 1e-12);

        assert!(matches!(trace.slice_time(5.0, 6.0), Err(TraceError::EmptyTimeRange { .. })));
    }

    #[test]
    fn test_channel_statistics() {
        let trace = ramp_trace(5);
        assert_eq!(trace.mean(Channel::Extension), Some(102.0));
        assert_eq!(trace.variance(Channel::Extension), Some(2.0));
        assert_eq!(trace.variance(Channel::Force), Some(0.0));
        assert_eq!(trace.min(Channel::Extension), Some(100.0));
        assert_eq!(trace.max(Channel::Extension), Some(104.0));
        assert_eq!(trace.mean(Channel::Transverse), None);
    }

    #[test]
    fn test_metadata_sampling_rate_wins() {
        let time = vec![0.0, 0.5, 1.0];
        let metadata = TraceMetadata::new("x").with_sampling_rate(1000.0);
        let trace = Trace::new(time, vec![0.0; 3], vec![0.0; 3], vec![0.0; 3], metadata).unwrap();
        assert!((trace.sampling_interval() - 1e-3).abs() < 1e-15);
    }
}
