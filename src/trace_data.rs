pub mod trace;
pub mod tools;
pub mod segments;
