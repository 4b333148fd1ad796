//! Stable, observable error kinds for the regulator.
//!
//! The control loop never crashes on bad input: most of these are contained
//! at the point listed in each variant's doc and only `InvalidState` /
//! `AdapterFailure` surface to callers of `Controller::tick`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegulatorError {
    /// Surfaced to the caller; never raised inside the pipeline.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// From `get_state`/`set_param`; the tick aborts before mutating state.
    #[error("adapter failure: {0}")]
    AdapterFailure(String),

    /// Contained: the tick is skipped and retried fresh next tick.
    #[error("observer failure: {0}")]
    ObserverFailure(String),

    /// Contained per principle; treated as not-violated.
    #[error("principle check failure in {principle_id}: {message}")]
    PrincipleCheckFailure {
        principle_id: String,
        message: String,
    },

    /// Contained; the metric is set to NaN with a warning.
    #[error("custom metric failure in {metric}: {message}")]
    CustomMetricFailure { metric: String, message: String },

    /// Contained per handler; remaining handlers still run.
    #[error("event handler failure: {0}")]
    HandlerFailure(String),

    /// Transport-level; returned as 400 with structured validation errors.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Transport-level; 429 or WebSocket error message.
    #[error("rate limited")]
    RateLimited,

    /// Transport-level; 401 or WebSocket close 1008.
    #[error("unauthorized")]
    Unauthorized,
}

impl RegulatorError {
    pub fn adapter(err: impl std::fmt::Display) -> Self {
        Self::AdapterFailure(err.to_string())
    }
}
