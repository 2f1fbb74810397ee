// Errors a task step can fail with.

use tasker_common::{ContextError, TaskValidationError};

#[derive(Debug, thiserror::Error)]
pub enum TaskStepError {
    #[error("missing task configuration")]
    MissingConfig,

    #[error(transparent)]
    InvalidConfig(#[from] TaskValidationError),

    #[error("parse timeout: {0}")]
    ParseTimeout(String),

    /// Selecting a worker or creating the container failed.
    #[error(transparent)]
    Worker(anyhow::Error),

    #[error("missing image artifact source: {name}")]
    MissingTaskImageSource { name: String },

    #[error(transparent)]
    FetchImage(anyhow::Error),

    #[error("missing inputs: {}", inputs.join(", "))]
    MissingInputs { inputs: Vec<String> },

    #[error("run task process: {0:#}")]
    Process(anyhow::Error),

    #[error("initialize task caches: {0:#}")]
    TaskCache(anyhow::Error),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl TaskStepError {
    /// Whether the step stopped because it was interrupted from outside.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskStepError::Context(ContextError::Canceled))
    }
}
