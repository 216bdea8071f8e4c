pub mod kmeans;
pub mod hmm_initializer;
