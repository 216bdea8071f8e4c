use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use super::state::IDTarget;

// Vector indexed by state id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateMatrix1D<T> {
    matrix: Vec<T>,
}

impl<T: Clone + Default> StateMatrix1D<T> {
    pub fn new(matrix: Vec<T>) -> Self {
        Self { matrix }
    }

    pub fn empty(len: usize) -> Self {
        Self { matrix: vec![T::default(); len] }
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.matrix.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.matrix
    }

    pub fn into_inner(self) -> Vec<T> {
        self.matrix
    }
}

impl<T, I: IDTarget> Index<I> for StateMatrix1D<T> {
    type Output = T;

    fn index(&self, index: I) -> &Self::Output {
        &self.matrix[index.get_id()]
    }
}

impl<T, I: IDTarget> IndexMut<I> for StateMatrix1D<T> {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        &mut self.matrix[index.get_id()]
    }
}

// Row-major matrix whose rows are indexed by state id: `m[state][t]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateMatrix2D<T> {
    matrix: Vec<Vec<T>>,
}

impl<T: Clone + Default> StateMatrix2D<T> {
    pub fn new(matrix: Vec<Vec<T>>) -> Self {
        Self { matrix }
    }

    pub fn empty(shape: (usize, usize)) -> Self {
        Self { matrix: vec![vec![T::default(); shape.1]; shape.0] }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.matrix.len(), self.matrix.first().map(|row| row.len()).unwrap_or(0))
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<T>> {
        self.matrix.iter()
    }

    pub fn rows(&self) -> &[Vec<T>] {
        &self.matrix
    }

    pub fn into_inner(self) -> Vec<Vec<T>> {
        self.matrix
    }
}

impl<T, I: IDTarget> Index<I> for StateMatrix2D<T> {
    type Output = Vec<T>;

    fn index(&self, index: I) -> &Self::Output {
        &self.matrix[index.get_id()]
    }
}

impl<T, I: IDTarget> IndexMut<I> for StateMatrix2D<T> {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        &mut self.matrix[index.get_id()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_analysis::hmm::state::State;

    #[test]
    fn test_index_by_state_and_id() {
        let state = State::new(1, 3.0, 0.5).unwrap();
        let mut matrix = StateMatrix2D::<f64>::empty((2, 3));
        matrix[&state][2] = 4.0;

        assert_eq!(matrix[1_usize][2], 4.0);
        assert_eq!(matrix.shape(), (2, 3));
    }

    #[test]
    fn test_1d_matrix() {
        let mut vector = StateMatrix1D::<usize>::empty(3);
        vector[2_usize] += 5;
        assert_eq!(vector.into_inner(), vec![0, 0, 5]);
    }
}
