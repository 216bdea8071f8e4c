use std::ops::Range;

// Contiguous runs where the magnet stays within `tolerance` (mm) of the
// position it had when the run started. Every sample belongs to one run.
pub fn magnet_plateaus(magnet_position: &[f64], tolerance: f64) -> Vec<Range<usize>> {
    let mut plateaus = Vec::new();
    if magnet_position.is_empty() {
        return plateaus;
    }

    let mut start = 0;
    let mut reference = magnet_position[0];

    for (i, &position) in magnet_position.iter().enumerate().skip(1) {
        if (position - reference).abs() > tolerance {
            plateaus.push(start..i);
            start = i;
            reference = position;
        }
    }
    plateaus.push(start..magnet_position.len());

    plateaus
}

// Consecutive windows of `seconds` length measured from the first sample.
// The last window holds whatever is left. A non-positive or non-finite
// duration gives no windows.
pub fn fixed_duration_windows(time: &[f64], seconds: f64) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    if time.is_empty() || !(seconds.is_finite() && seconds > 0.0) {
        return windows;
    }

    let origin = time[0];
    let mut start = 0;
    let mut window_index = 0_usize;

    for (i, &t) in time.iter().enumerate() {
        let current = ((t - origin) / seconds).floor() as usize;
        if current != window_index {
            windows.push(start..i);
            start = i;
            window_index = current;
        }
    }
    windows.push(start..time.len());

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnet_plateaus() {
        let magnet = vec![1.0, 1.0, 1.001, 2.0, 2.0, 3.0];
        let plateaus = magnet_plateaus(&magnet, 0.01);
        assert_eq!(plateaus, vec![0..3, 3..5, 5..6]);
    }

    #[test]
    fn test_fixed_duration_windows() {
        let time: Vec<f64> = (0..10).map(|i| i as f64 * 0.25).collect();
        let windows = fixed_duration_windows(&time, 1.0);
        assert_eq!(windows, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_fixed_duration_windows_rejects_bad_duration() {
        let time: Vec<f64> = (0..10).map(|i| i as f64 * 0.25).collect();
        assert!(fixed_duration_windows(&time, 0.0).is_empty());
        assert!(fixed_duration_windows(&time, -1.0).is_empty());
        assert!(fixed_duration_windows(&time, f64::NAN).is_empty());
        assert!(fixed_duration_windows(&time, f64::INFINITY).is_empty());
    }
}
