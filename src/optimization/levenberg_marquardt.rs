//! Damped Gauss-Newton (Levenberg-Marquardt) least squares.
//!
//! The solver only sees a closure mapping a full parameter vector to model
//! predictions at the data points. Parameters marked as fixed are carried
//! along untouched, the rest are optimized. Bounds are enforced by clamping
//! the free parameters of the trial point after every step.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::constraints::{ConstraintError, OptimizationConstraint};
use super::optimizer::{IterativeSolver, StepOutcome, StepStatus};

pub const LM_INITIAL_LAMBDA: f64 = 1e-3;
pub const LM_TOLERANCE_DEFAULT: f64 = 1e-10;
const LM_LAMBDA_UP: f64 = 10.0;
const LM_LAMBDA_DOWN: f64 = 10.0;
const LM_MAX_LAMBDA: f64 = 1e16;
const LM_MIN_LAMBDA: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq)]
pub struct LmState {
    pub params: Vec<f64>, // Full parameter vector, fixed ones included
    pub lambda: f64,
    pub cost: f64, // Sum of squared residuals at `params`
}

pub struct LevenbergMarquardt<'a, F> {
    model: F,
    observed: &'a [f64],
    initial_params: Vec<f64>,
    free: Vec<usize>,
    constraint: OptimizationConstraint,
    tolerance: f64,
}

impl<'a, F> LevenbergMarquardt<'a, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    pub fn new(
        model: F,
        observed: &'a [f64],
        initial_params: Vec<f64>,
        fixed: &[bool],
        constraint: OptimizationConstraint,
        tolerance: f64,
    ) -> Result<Self, LmError> {
        if fixed.len() != initial_params.len() {
            return Err(LmError::IncompatibleDimensions { params: initial_params.len(), mask: fixed.len() });
        }

        constraint.check(initial_params.len()).map_err(|err| LmError::InvalidConstraint { err })?;

        let free: Vec<usize> = (0..initial_params.len()).filter(|&i| !fixed[i]).collect();
        if free.is_empty() {
            return Err(LmError::NoFreeParameters);
        }

        Ok(Self { model, observed, initial_params, free, constraint, tolerance })
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    pub fn predict(&self, params: &[f64]) -> Vec<f64> {
        (self.model)(params)
    }

    pub fn cost(&self, params: &[f64]) -> f64 {
        let predicted = self.predict(params);
        if predicted.len() != self.observed.len() {
            return f64::INFINITY;
        }

        let cost: f64 = self.observed.iter()
            .zip(&predicted)
            .map(|(y, f)| (y - f).powi(2))
            .sum();

        if cost.is_finite() { cost } else { f64::INFINITY }
    }

    fn residuals(&self, params: &[f64]) -> DVector<f64> {
        let predicted = self.predict(params);
        DVector::from_iterator(
            self.observed.len(),
            self.observed.iter().zip(&predicted).map(|(y, f)| y - f),
        )
    }

    // Forward differences, falling back to backward differences when the
    // forward point leaves the model's domain
    pub fn jacobian(&self, params: &[f64]) -> DMatrix<f64> {
        let base = self.predict(params);
        let mut jacobian = DMatrix::<f64>::zeros(self.observed.len(), self.free.len());

        for (column, &index) in self.free.iter().enumerate() {
            let h = f64::EPSILON.sqrt() * params[index].abs().max(1.0);

            let mut shifted = params.to_vec();
            shifted[index] += h;
            let mut predicted = self.predict(&shifted);
            let mut scale = h;

            if predicted.iter().any(|value| !value.is_finite()) {
                shifted[index] = params[index] - h;
                predicted = self.predict(&shifted);
                scale = -h;
            }

            if predicted.iter().any(|value| !value.is_finite()) {
                continue; // Leaves a zero column, reported as singular
            }

            for row in 0..self.observed.len() {
                jacobian[(row, column)] = (predicted[row] - base[row]) / scale;
            }
        }

        jacobian
    }

    // (JᵀJ)⁻¹ over the free parameters, None when singular
    pub fn normal_matrix_inverse(&self, params: &[f64]) -> Option<DMatrix<f64>> {
        let jacobian = self.jacobian(params);
        let normal = jacobian.transpose() * &jacobian;
        let inverse = normal.try_inverse()?;

        if inverse.iter().all(|value| value.is_finite()) { Some(inverse) } else { None }
    }

    // Applies the constraint, then puts the fixed parameters back
    fn repair(&self, params: &mut [f64]) {
        let before = params.to_vec();
        self.constraint.repair(params);
        for (i, value) in params.iter_mut().enumerate() {
            if !self.free.contains(&i) {
                *value = before[i];
            }
        }
    }

    fn rejected(&self, state: &LmState) -> StepOutcome<LmState> {
        let lambda = state.lambda * LM_LAMBDA_UP;
        let status = if lambda > LM_MAX_LAMBDA { StepStatus::Converged } else { StepStatus::Continue };
        StepOutcome { state: LmState { lambda, ..state.clone() }, status }
    }
}

impl<'a, F> IterativeSolver for LevenbergMarquardt<'a, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    type State = LmState;
    type Error = LmError;

    fn initialize(&self) -> Result<LmState, LmError> {
        let mut params = self.initial_params.clone();
        self.repair(&mut params);

        let cost = self.cost(&params);
        if !cost.is_finite() {
            return Err(LmError::NonFiniteInitialCost { params });
        }

        Ok(LmState { params, lambda: LM_INITIAL_LAMBDA, cost })
    }

    fn step(&self, state: &LmState) -> Result<StepOutcome<LmState>, LmError> {
        if state.cost <= f64::MIN_POSITIVE {
            return Ok(StepOutcome { state: state.clone(), status: StepStatus::Converged });
        }

        let jacobian = self.jacobian(&state.params);
        let residuals = self.residuals(&state.params);

        let normal = jacobian.transpose() * &jacobian;
        let gradient = jacobian.transpose() * residuals;

        // A parameter with no influence on the model makes JᵀJ singular
        if normal.diagonal().iter().any(|value| *value <= f64::MIN_POSITIVE) {
            return Ok(StepOutcome { state: state.clone(), status: StepStatus::Singular });
        }

        let mut damped = normal.clone();
        for i in 0..damped.nrows() {
            damped[(i, i)] += state.lambda * normal[(i, i)];
        }

        let Some(cholesky) = damped.cholesky() else {
            return Ok(self.rejected(state));
        };
        let delta = cholesky.solve(&gradient);

        let mut trial = state.params.clone();
        for (column, &index) in self.free.iter().enumerate() {
            trial[index] += delta[column];
        }
        self.repair(&mut trial);

        let trial_cost = self.cost(&trial);
        if !(trial_cost < state.cost) {
            return Ok(self.rejected(state));
        }

        let free_norm = self.free.iter().map(|&i| state.params[i].powi(2)).sum::<f64>().sqrt();
        let step_norm = self.free.iter().map(|&i| (trial[i] - state.params[i]).powi(2)).sum::<f64>().sqrt();

        let small_reduction = state.cost - trial_cost <= self.tolerance * state.cost;
        let small_step = step_norm <= self.tolerance * (free_norm + self.tolerance);

        let status = if small_reduction || small_step || trial_cost <= f64::MIN_POSITIVE {
            StepStatus::Converged
        } else {
            StepStatus::Continue
        };

        let lambda = (state.lambda / LM_LAMBDA_DOWN).max(LM_MIN_LAMBDA);

        Ok(StepOutcome { state: LmState { params: trial, lambda, cost: trial_cost }, status })
    }

    fn evaluate(&self, state: &LmState) -> f64 {
        state.cost
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LmError {
    #[error("{params} parameters but {mask} fixed flags")]
    IncompatibleDimensions { params: usize, mask: usize },
    #[error("every parameter is fixed")]
    NoFreeParameters,
    #[error("invalid parameter bounds: {err}")]
    InvalidConstraint { err: ConstraintError },
    #[error("model is not finite at the initial parameters {params:?}")]
    NonFiniteInitialCost { params: Vec<f64> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::optimization_tracker::{OptimizationTracker, TerminationCriterium};
    use crate::optimization::optimizer::run_solver;

    fn line_data() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 3.0 * x - 2.0).collect();
        (x, y)
    }

    #[test]
    fn test_fits_straight_line() {
        let (x, y) = line_data();
        let model = |p: &[f64]| x.iter().map(|x| p[0] * x + p[1]).collect::<Vec<f64>>();

        let lm = LevenbergMarquardt::new(model, &y, vec![1.0, 0.0], &[false, false], OptimizationConstraint::None, 1e-12).unwrap();
        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 100 });
        let run = run_solver(&lm, &mut tracker).unwrap();

        assert!(run.converged());
        assert!((run.state.params[0] - 3.0).abs() < 1e-6);
        assert!((run.state.params[1] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_parameter_untouched() {
        let (x, y) = line_data();
        let model = |p: &[f64]| x.iter().map(|x| p[0] * x + p[1]).collect::<Vec<f64>>();

        let lm = LevenbergMarquardt::new(model, &y, vec![1.0, -2.0], &[false, true], OptimizationConstraint::None, 1e-12).unwrap();
        assert_eq!(lm.num_free(), 1);

        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 100 });
        let run = run_solver(&lm, &mut tracker).unwrap();
        assert_eq!(run.state.params[1], -2.0);
        assert!((run.state.params[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounds_are_enforced() {
        let (x, y) = line_data();
        let model = |p: &[f64]| x.iter().map(|x| p[0] * x + p[1]).collect::<Vec<f64>>();
        let constraint = OptimizationConstraint::MaxMinValue { max: vec![2.0, 100.0], min: vec![0.0, -100.0] };

        let lm = LevenbergMarquardt::new(model, &y, vec![1.0, 0.0], &[false, false], constraint, 1e-12).unwrap();
        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 200 });
        let run = run_solver(&lm, &mut tracker).unwrap();
        assert!(run.state.params[0] <= 2.0);
    }

    #[test]
    fn test_bounds_leave_fixed_parameter_alone() {
        let (x, y) = line_data();
        let model = |p: &[f64]| x.iter().map(|x| p[0] * x + p[1]).collect::<Vec<f64>>();
        let constraint = OptimizationConstraint::MaxMinValue { max: vec![10.0, 1.0], min: vec![0.0, 0.0] };

        let lm = LevenbergMarquardt::new(model, &y, vec![1.0, -2.0], &[false, true], constraint, 1e-12).unwrap();
        assert_eq!(lm.initialize().unwrap().params[1], -2.0);

        let mut tracker = OptimizationTracker::new(TerminationCriterium::MaxIterations { max_iterations: 100 });
        let run = run_solver(&lm, &mut tracker).unwrap();
        assert_eq!(run.state.params[1], -2.0);
        assert!((run.state.params[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_parameter_without_effect_is_singular() {
        let (x, y) = line_data();
        let model = |p: &[f64]| x.iter().map(|x| p[0] * x).collect::<Vec<f64>>();

        let lm = LevenbergMarquardt::new(model, &y, vec![1.0, 0.0], &[false, false], OptimizationConstraint::None, 1e-12).unwrap();
        let state = lm.initialize().unwrap();
        let outcome = lm.step(&state).unwrap();
        assert_eq!(outcome.status, StepStatus::Singular);
        assert!(lm.normal_matrix_inverse(&state.params).is_none());
    }

    #[test]
    fn test_all_fixed_is_rejected() {
        let y = vec![1.0, 2.0];
        let model = |p: &[f64]| vec![p[0]; 2];
        let result = LevenbergMarquardt::new(model, &y, vec![1.0], &[true], OptimizationConstraint::None, 1e-12);
        assert!(matches!(result, Err(LmError::NoFreeParameters)));
    }
}
