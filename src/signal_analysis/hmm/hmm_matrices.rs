use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hmm_tools::StateMatrix2D;
use super::state::*;

// Row sums may deviate from 1 by this much
pub const PROBABILITY_MARGIN: f64 = 1e-4;

pub trait ProbabilityMatrix {
    fn validate(&self) -> Result<(), MatrixValidationError>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixValidationError {
    #[error("transition matrix must be square and non-empty")]
    IncorrectShape,
    #[error("start probabilities {values:?} do not sum to 1")]
    VectorIncorrectValues { values: Vec<f64> },
    #[error("rows {rows:?} do not sum to 1")]
    RowsIncorrectValues { rows: Vec<usize>, values: Vec<Vec<f64>> },
    #[error("matrix is all zeros")]
    MatrixEmpty,
    #[error("rows {rows:?} are all zeros")]
    RowsEmpty { rows: Vec<usize> },
    #[error("probability outside [0, 1]")]
    InvalidValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    pub matrix: StateMatrix2D<f64>,
}

impl TransitionMatrix {
    pub fn new(matrix: Vec<Vec<f64>>) -> Self {
        Self { matrix: StateMatrix2D::new(matrix) }
    }

    pub fn from_state_matrix(matrix: StateMatrix2D<f64>) -> Self {
        Self { matrix }
    }

    // `bias` on the diagonal, the rest spread evenly over the other states
    pub fn with_self_transition_bias(num_states: usize, bias: f64) -> Self {
        if num_states == 1 {
            return Self::new(vec![vec![1.0]]);
        }

        let off_diagonal = (1.0 - bias) / (num_states - 1) as f64;
        let matrix = (0..num_states)
            .map(|i| (0..num_states).map(|j| if i == j { bias } else { off_diagonal }).collect::<Vec<f64>>())
            .collect();

        Self::new(matrix)
    }

    pub fn num_states(&self) -> usize {
        self.matrix.len()
    }

    // Same chain with states renumbered: new state i is old state order[i]
    pub fn permuted(&self, order: &[usize]) -> Self {
        let matrix = order
            .iter()
            .map(|&from| order.iter().map(|&to| self.matrix[from][to]).collect::<Vec<f64>>())
            .collect();
        Self::new(matrix)
    }
}

impl ProbabilityMatrix for TransitionMatrix {
    fn validate(&self) -> Result<(), MatrixValidationError> {
        let num_states = self.matrix.len();
        if num_states == 0 || self.matrix.iter().any(|row| row.len() != num_states) {
            return Err(MatrixValidationError::IncorrectShape);
        }

        let mut empty_rows = Vec::<usize>::new();
        let mut incorrect_rows_id = Vec::<usize>::new();
        let mut incorrect_rows_values = Vec::<Vec<f64>>::new();

        for (i, row) in self.matrix.iter().enumerate() {
            if row.iter().any(|&val| !(val >= 0.0 && val <= 1.0 + PROBABILITY_MARGIN)) {
                return Err(MatrixValidationError::InvalidValue);
            }

            if row.iter().all(|&val| val == 0.0) {
                empty_rows.push(i);
            } else {
                let sum: f64 = row.iter().sum();
                if (sum - 1.0).abs() > PROBABILITY_MARGIN {
                    incorrect_rows_id.push(i);
                    incorrect_rows_values.push(row.clone());
                }
            }
        }

        if empty_rows.len() == num_states {
            return Err(MatrixValidationError::MatrixEmpty);
        } else if !empty_rows.is_empty() {
            return Err(MatrixValidationError::RowsEmpty { rows: empty_rows });
        } else if !incorrect_rows_id.is_empty() {
            return Err(MatrixValidationError::RowsIncorrectValues {
                rows: incorrect_rows_id,
                values: incorrect_rows_values,
            });
        }

        Ok(())
    }
}

impl Index<(usize, usize)> for TransitionMatrix {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.matrix[index.0][index.1]
    }
}

impl Index<(&State, &State)> for TransitionMatrix {
    type Output = f64;

    fn index(&self, index: (&State, &State)) -> &Self::Output {
        &self.matrix[index.0.id][index.1.id]
    }
}

impl IndexMut<(usize, usize)> for TransitionMatrix {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        &mut self.matrix[index.0][index.1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMatrix {
    pub matrix: Vec<f64>,
}

impl StartMatrix {
    pub fn new(matrix: Vec<f64>) -> Self {
        Self { matrix }
    }

    pub fn uniform(num_states: usize) -> Self {
        Self { matrix: vec![1.0 / num_states as f64; num_states] }
    }

    pub fn num_states(&self) -> usize {
        self.matrix.len()
    }

    pub fn permuted(&self, order: &[usize]) -> Self {
        Self::new(order.iter().map(|&i| self.matrix[i]).collect())
    }
}

impl ProbabilityMatrix for StartMatrix {
    fn validate(&self) -> Result<(), MatrixValidationError> {
        if self.matrix.iter().any(|&val| !(val >= 0.0 && val <= 1.0 + PROBABILITY_MARGIN)) {
            return Err(MatrixValidationError::InvalidValue);
        }

        if self.matrix.iter().all(|&val| val == 0.0) {
            return Err(MatrixValidationError::MatrixEmpty);
        }

        let total_sum: f64 = self.matrix.iter().sum();
        if (total_sum - 1.0).abs() > PROBABILITY_MARGIN {
            return Err(MatrixValidationError::VectorIncorrectValues { values: self.matrix.clone() });
        }

        Ok(())
    }
}

impl Index<usize> for StartMatrix {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.matrix[index]
    }
}

impl Index<&State> for StartMatrix {
    type Output = f64;

    fn index(&self, state: &State) -> &Self::Output {
        &self.matrix[state.id]
    }
}

impl IndexMut<usize> for StartMatrix {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.matrix[index]
    }
}
