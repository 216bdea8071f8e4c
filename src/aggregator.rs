pub mod analysis_config;
pub mod analysis_result;
pub mod runner;
