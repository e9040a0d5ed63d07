//! Job scheduling for MiniCI.
//!
//! Holds the in-memory job queue and registry, fires cron triggers, and runs
//! queued jobs on a pool of workers.

pub mod cron;
pub mod dispatcher;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod trigger;
pub mod worker;

pub use cron::CronSchedule;
pub use dispatcher::Dispatcher;
pub use orchestrator::{PipelineEvent, PipelineRunner};
pub use queue::JobQueue;
pub use registry::JobRegistry;
pub use trigger::TriggerScheduler;
pub use worker::{Worker, WorkerContext};
