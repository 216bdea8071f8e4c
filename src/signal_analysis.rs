pub mod events;
pub mod hmm;
