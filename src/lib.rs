pub mod thermal;
pub mod trace_data;
pub mod optimization;
pub mod model_fitting;
pub mod force_calibration;
pub mod signal_analysis;
pub mod aggregator;

pub use aggregator::analysis_config::AnalysisConfig;
pub use aggregator::analysis_result::{AnalysisFailure, AnalysisOutcome, AnalysisResult};
pub use aggregator::runner::{analyze, analyze_batch, AnalysisError};
pub use trace_data::trace::{Channel, Trace, TraceError, TraceMetadata};
