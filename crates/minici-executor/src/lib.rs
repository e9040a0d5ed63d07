//! Stage execution backends for MiniCI.
//!
//! Provides:
//! - `LocalExecutor`: runs stages as shell processes on this host
//! - `GitWorkspace`: per-job working copies cloned with `git`

pub mod local;
pub mod workspace;

pub use local::LocalExecutor;
pub use minici_core::executor::{DEFAULT_STAGE_TIMEOUT, Executor, TIMEOUT_OUTPUT};
pub use workspace::GitWorkspace;
