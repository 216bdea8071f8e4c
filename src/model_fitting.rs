pub mod models;
pub mod fit_config;
pub mod fit_result;
pub mod curve_fitter;
pub mod handle_correction;

pub use curve_fitter::{fit_curve, fit_curve_cancellable, fit_trace, fit_trace_cancellable};
pub use fit_config::{FitConfig, FitInput, ParameterBound};
pub use fit_result::{ConvergenceIssue, FitError, FitResult, InsufficientDataReason};
pub use models::{FitDirection, ModelKind, MoleculePreset};
