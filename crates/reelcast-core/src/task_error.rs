//! Task execution error types
//!
//! Lets a task handler tell the queue whether a failure is worth another
//! delivery (recoverable) or should dead-letter the task straight away.

use std::fmt;

/// Task execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// The task fails immediately without consuming its retry budget.
    ///
    /// Use for input that will not change on redelivery: a payload that does
    /// not decode, a video id with no row behind it.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// The task is rescheduled with backoff until `max_retries` is reached.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Alternate form keeps the context chain ("transcode: ffmpeg exited ...")
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    /// Plain anyhow errors are treated as transient.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for Result to easily create unrecoverable task errors
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn unrecoverable_error() {
        let err = TaskError::unrecoverable(anyhow::anyhow!("video 9 not found"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("video 9 not found"));
    }

    #[test]
    fn recoverable_error() {
        let err = TaskError::recoverable(anyhow::anyhow!("connection reset"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn from_anyhow_defaults_to_recoverable() {
        let err: TaskError = anyhow::anyhow!("Some error").into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn display_keeps_context_chain() {
        let result: Result<(), anyhow::Error> =
            Err(anyhow::anyhow!("exit status 1")).context("transcode");
        let err = TaskError::recoverable(result.unwrap_err());
        assert_eq!(err.to_string(), "transcode: exit status 1");
    }

    #[test]
    fn result_ext() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("bad payload"));
        let task_result = result.unrecoverable();
        assert!(!task_result.unwrap_err().is_recoverable());
    }
}
