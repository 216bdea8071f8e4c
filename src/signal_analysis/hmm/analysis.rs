pub mod hmm_analyzer;
pub mod dwell_times;
