//! Errors that are part of the client's observable contract.

use thiserror::Error;

/// Terminal failures of a tracking session.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The rider's pickup order does not match any stop on the route.
    #[error("Could not find your stop on the assigned route.")]
    StopNotFound,

    #[error("Failed to fetch route info: {0}")]
    RouteUnavailable(#[source] anyhow::Error),

    #[error("No active route assigned to you.")]
    NoDriverRoute(#[source] anyhow::Error),

    #[error("No access token stored; sign in first.")]
    NotSignedIn,

    #[error("invalid session endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Failure reported by a positioning sensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({code}): {message}")]
pub struct SensorError {
    pub code: i32,
    pub message: String,
}

impl SensorError {
    pub const PERMISSION_DENIED: i32 = 1;
    pub const POSITION_UNAVAILABLE: i32 = 2;
    pub const TIMEOUT: i32 = 3;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
