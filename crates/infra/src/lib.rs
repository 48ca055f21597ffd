//! Infrastructure layer: store backends, external service adapters, jobs, config.

pub mod config;
pub mod jobs;
pub mod store;
