//! Scheduler Error Types

use crate::plugin::api::PluginError;
use crate::store::StoreError;

/// A schedule's method or method_config could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScheduleParseError {
    pub message: String,
}

impl ScheduleParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to parse schedule: {0}")]
    Parse(#[from] ScheduleParseError),

    #[error("No async runtime available to run job '{job_id}'")]
    NoRuntime { job_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
