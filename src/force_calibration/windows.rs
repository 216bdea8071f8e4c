use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::equipartition::CalibrationError;
use crate::trace_data::segments::{fixed_duration_windows, magnet_plateaus};
use crate::trace_data::trace::Trace;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum WindowMode {
    #[default]
    WholeTrace,
    FixedDuration { seconds: f64 },
    MagnetPlateaus { tolerance: f64 }, // mm
}

impl WindowMode {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        match self {
            WindowMode::WholeTrace => Ok(()),
            WindowMode::FixedDuration { seconds } if !(*seconds > 0.0 && seconds.is_finite()) => {
                Err(CalibrationError::InvalidSetting { setting: "window seconds".to_string() })
            }
            WindowMode::MagnetPlateaus { tolerance } if !(*tolerance >= 0.0 && tolerance.is_finite()) => {
                Err(CalibrationError::InvalidSetting { setting: "plateau tolerance".to_string() })
            }
            _ => Ok(()),
        }
    }

    // Index ranges in trace order, covering every sample exactly once
    pub fn windows(&self, trace: &Trace) -> Result<Vec<Range<usize>>, CalibrationError> {
        self.validate()?;

        let windows = match self {
            WindowMode::WholeTrace => vec![0..trace.len()],
            WindowMode::FixedDuration { seconds } => fixed_duration_windows(trace.get_time(), *seconds),
            WindowMode::MagnetPlateaus { tolerance } => magnet_plateaus(trace.get_magnet_position(), *tolerance),
        };

        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_data::trace::TraceMetadata;

    fn trace() -> Trace {
        let time: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let magnet = vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0];
        Trace::new(time, vec![100.0; 10], vec![1.0; 10], magnet, TraceMetadata::new("w")).unwrap()
    }

    #[test]
    fn test_whole_trace() {
        assert_eq!(WindowMode::WholeTrace.windows(&trace()).unwrap(), vec![0..10]);
    }

    #[test]
    fn test_fixed_duration() {
        let windows = WindowMode::FixedDuration { seconds: 2.0 }.windows(&trace()).unwrap();
        assert_eq!(windows, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_magnet_plateaus() {
        let windows = WindowMode::MagnetPlateaus { tolerance: 0.1 }.windows(&trace()).unwrap();
        assert_eq!(windows, vec![0..3, 3..7, 7..10]);
    }

    #[test]
    fn test_invalid_duration() {
        assert!(WindowMode::FixedDuration { seconds: 0.0 }.windows(&trace()).is_err());
    }
}
