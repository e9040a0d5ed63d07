//! Document parsing for MiniCI.
//!
//! This crate handles parsing of:
//! - Pipeline definitions (YAML)
//! - Job documents binding a pipeline to parameters and triggers
//! - Runtime settings

pub mod error;
pub mod job;
pub mod pipeline;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use job::{load_jobs_dir, parse_job};
pub use pipeline::parse_pipeline;
pub use system::Settings;
