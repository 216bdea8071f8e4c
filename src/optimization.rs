pub mod optimizer;
pub mod constraints;
pub mod optimization_tracker;
pub mod levenberg_marquardt;
