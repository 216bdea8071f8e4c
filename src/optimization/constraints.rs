use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizationConstraint {
    PositiveSumTo { sum: f64 },
    MaxMinValue { max: Vec<f64>, min: Vec<f64> },
    None,
}

impl OptimizationConstraint {
    pub fn check(&self, num_values: usize) -> Result<(), ConstraintError> {
        match self {
            OptimizationConstraint::PositiveSumTo { sum } => {
                if !(*sum > 0.0) {
                    return Err(ConstraintError::InvalidSum { sum: *sum });
                }
            }
            OptimizationConstraint::MaxMinValue { max, min } => {
                if max.len() != num_values || min.len() != num_values {
                    return Err(ConstraintError::IncompatibleDimensions {
                        expected: num_values,
                        found: max.len().max(min.len()),
                    });
                }
                if let Some(index) = (0..num_values).find(|&i| !(min[i] <= max[i])) {
                    return Err(ConstraintError::EmptyInterval { index, min: min[index], max: max[index] });
                }
            }
            OptimizationConstraint::None => {}
        }
        Ok(())
    }

    pub fn repair(&self, values: &mut [f64]) {
        match self {
            // Negative entries are zeroed before rescaling. An all-zero
            // vector becomes uniform.
            OptimizationConstraint::PositiveSumTo { sum } => {
                let mut current_sum = 0.0;
                for value in values.iter_mut() {
                    if *value < 0.0 || !value.is_finite() {
                        *value = 0.0;
                    }
                    current_sum += *value;
                }

                if current_sum == 0.0 {
                    let uniform = sum / values.len() as f64;
                    values.iter_mut().for_each(|value| *value = uniform);
                } else if current_sum != *sum {
                    let factor = sum / current_sum;
                    values.iter_mut().for_each(|value| *value *= factor);
                }
            }

            OptimizationConstraint::MaxMinValue { max, min } => {
                for (i, value) in values.iter_mut().enumerate() {
                    *value = value.max(min[i]).min(max[i]);
                }
            }

            OptimizationConstraint::None => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintError {
    #[error("constraint sum must be positive, got {sum}")]
    InvalidSum { sum: f64 },
    #[error("constraint has {found} bounds for {expected} values")]
    IncompatibleDimensions { expected: usize, found: usize },
    #[error("bounds for value {index} are empty: [{min}, {max}]")]
    EmptyInterval { index: usize, min: f64, max: f64 },
}
