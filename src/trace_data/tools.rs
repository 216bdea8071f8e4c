use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFilter {
    Median { kernel_size: usize },
    MovingAverage { kernel_size: usize },
}

impl SignalFilter {
    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        match self {
            SignalFilter::Median { kernel_size } => median_filter(values, *kernel_size),
            SignalFilter::MovingAverage { kernel_size } => moving_average(values, *kernel_size),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let (SignalFilter::Median { kernel_size } | SignalFilter::MovingAverage { kernel_size }) = self;
        if *kernel_size == 0 {
            return Err("filter kernel_size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detrend {
    None,
    Constant,
    #[default]
    Linear,
}

impl Detrend {
    pub fn apply(&self, time: &[f64], values: &[f64]) -> Vec<f64> {
        match self {
            Detrend::None => values.to_vec(),
            Detrend::Constant => {
                let mean = compute_mean(values);
                values.iter().map(|value| value - mean).collect()
            }
            Detrend::Linear => {
                let (slope, intercept) = linear_regression(time, values);
                time.iter()
                    .zip(values)
                    .map(|(t, value)| value - (slope * t + intercept))
                    .collect()
            }
        }
    }
}

// Window is centered on each sample and shrinks at the edges
pub fn median_filter(values: &[f64], window_size: usize) -> Vec<f64> {
    let mut filtered = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = i.saturating_sub(window_size / 2);
        let end = (i + window_size / 2 + 1).min(values.len());

        let mut window: Vec<f64> = values[start..end].to_vec();
        window.sort_by(|a, b| a.total_cmp(b));

        let median = if window.len() == 1 {
            window[0]
        } else if window.len() % 2 == 0 {
            (window[window.len() / 2 - 1] + window[window.len() / 2]) / 2.0
        } else {
            window[window.len() / 2]
        };

        filtered.push(median);
    }
    filtered
}

pub fn moving_average(values: &[f64], window_size: usize) -> Vec<f64> {
    let mut filtered = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = i.saturating_sub(window_size / 2);
        let end = (i + window_size / 2 + 1).min(values.len());
        filtered.push(compute_mean(&values[start..end]));
    }
    filtered
}

pub fn compute_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// Population variance (divides by n)
pub fn compute_mean_and_variance(values: &[f64]) -> [f64; 2] {
    let mean = compute_mean(values);
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    [mean, variance]
}

// Least-squares line through (x, y). Returns (slope, intercept).
pub fn linear_regression(x: &[f64], y: &[f64]) -> (f64, f64) {
    let mean_x = compute_mean(x);
    let mean_y = compute_mean(y);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxx += (xi - mean_x).powi(2);
        sxy += (xi - mean_x) * (yi - mean_y);
    }

    if sxx == 0.0 {
        return (0.0, mean_y);
    }

    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

pub fn count_distinct(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len()
}
