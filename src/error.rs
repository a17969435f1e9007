// ABOUTME: Defines all error types for the flightdeck library using thiserror.
// ABOUTME: Each submodule has its own error enum, unified under FlightdeckError.

use std::sync::Arc;

/// Top-level error type for the flightdeck library.
#[derive(Debug, thiserror::Error)]
pub enum FlightdeckError {
    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Poll error: {0}")]
    Poll(#[from] PollError),
}

/// Errors from coordinated request submission.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    /// The underlying operation failed. Every caller attached to the same
    /// in-flight key observes this same failure; the `Arc` carries the
    /// original error for downcasting.
    #[error("operation failed: {0}")]
    Operation(Arc<anyhow::Error>),

    /// The executing side went away before the request settled. Only
    /// reachable when the runtime is torn down with requests in flight.
    #[error("request abandoned before settlement")]
    Abandoned,
}

/// Errors from polling for a terminal state.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("probe failed: {0}")]
    Probe(#[source] anyhow::Error),

    #[error("no terminal state after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },

    #[error("polling cancelled")]
    Cancelled,
}
