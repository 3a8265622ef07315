pub mod bucketing;
pub mod candidate;
pub mod models;
