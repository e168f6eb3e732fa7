pub mod audit;
pub mod core;
pub mod host;
pub mod markers;
pub mod rubric;
pub mod setup;
