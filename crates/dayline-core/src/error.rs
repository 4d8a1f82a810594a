//! Typed errors raised at the library boundary.

use thiserror::Error;

/// A plan item that cannot be placed on the timeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("plan item {index}: missing start")]
    MissingStart { index: usize },

    #[error("plan item {index}: invalid start {value:?}: {reason}")]
    InvalidStart {
        index: usize,
        value: String,
        reason: String,
    },

    #[error("plan item {index}: invalid duration_minutes {value}")]
    InvalidDuration { index: usize, value: String },
}

/// Layout settings that cannot produce a usable timeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("invalid layout config: {0}")]
    InvalidConfig(String),
}

/// Timezone and date expression failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateError {
    #[error("unknown timezone {value:?} (from {source_name})")]
    UnknownTimezone { value: String, source_name: String },

    #[error("empty timezone (from {0})")]
    EmptyTimezone(String),

    #[error("unrecognized date expression: {0}")]
    InvalidDay(String),

    #[error("unrecognized timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("local time {0} does not exist in {1}")]
    NonexistentLocalTime(String, String),
}
