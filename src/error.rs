use thiserror::Error;

/// Failure of a single probe attempt or of the timeout wrapper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// Deadline elapsed before the operation resolved.
    #[error("timeout")]
    Timeout,

    /// Immediate low-level failure (refused, reset, unreachable).
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),

    /// The strategy itself could not run (client construction, bad URL).
    #[error("probe client error: {0}")]
    Client(String),
}

/// Captured failure of one runner task. Stored in the task's result slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Input rejected before any scanning starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("subnet prefix must look like 192.168.1. (got {0:?})")]
    InvalidPrefix(String),

    #[error("no valid ports to scan")]
    NoPorts,
}
