//! Core domain types and traits for the MiniCI orchestrator.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Pipeline, stage and run report definitions
//! - Job configurations and queue items
//! - Collaborator traits: executors, workspaces, notification sinks

pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod notify;
pub mod pipeline;
pub mod repository;

pub use error::{Error, Result};
pub use id::ResourceId;
