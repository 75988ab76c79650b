pub mod artifact;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod limit;
pub mod pipeline;
pub mod task;
pub mod utils;
pub mod web;

use std::sync::Arc;

use artifact::ArtifactStore;
use config::Config;
use limit::SubmissionLimiter;
use task::{Dispatcher, TaskRegistry};

/// Shared state handed to the HTTP handlers.
pub struct AppContext {
    pub config: Config,
    pub registry: Arc<TaskRegistry>,
    pub artifacts: Arc<ArtifactStore>,
    pub dispatcher: Dispatcher,
    pub limiter: SubmissionLimiter,
}
