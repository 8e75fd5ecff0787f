pub mod dataset;
pub mod types;
