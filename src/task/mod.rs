pub mod dispatcher;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;

pub use dispatcher::{DispatchJob, Dispatcher, DispatcherSettings, StagedInput};
pub use registry::{RegistryStats, TaskRegistry, TransitionError};
pub use types::{Task, TaskError, TaskErrorKind, TaskOptions, TaskResult, TaskStatus};
