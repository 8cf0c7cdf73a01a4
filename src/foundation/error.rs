/// Convenience result type used across the scheduler.
pub type SchedResult<T> = Result<T, SchedError>;

/// Top-level error taxonomy used by scheduler APIs.
///
/// The coordination loop itself never fails on a stale or raced task; these errors cover
/// configuration, lane construction and the GPU initialization path.
#[derive(thiserror::Error, Debug)]
pub enum SchedError {
    /// Invalid options or misuse of an API (e.g. pushing outside a queue batch).
    #[error("validation error: {0}")]
    Validation(String),

    /// GPU post-processing could not be brought up.
    #[error("gpu initialization error: {0}")]
    GpuInit(String),

    /// An executor could not be built, or a task body failed while running on one.
    #[error("executor error: {0}")]
    Executor(String),

    /// A blocking drain ran past its deadline with work still in flight.
    #[error("stalled: {0}")]
    Stalled(String),

    /// Errors when serializing or deserializing configuration.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedError {
    /// Build a [`SchedError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`SchedError::GpuInit`] value.
    pub fn gpu_init(msg: impl Into<String>) -> Self {
        Self::GpuInit(msg.into())
    }

    /// Build a [`SchedError::Executor`] value.
    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    /// Build a [`SchedError::Stalled`] value.
    pub fn stalled(msg: impl Into<String>) -> Self {
        Self::Stalled(msg.into())
    }

    /// Build a [`SchedError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
