//! Error types for the Tessera cluster controller.
//!
//! This module provides a unified error type [`TesseraError`] for all
//! controller operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Recruitment**: placement requests that cannot be satisfied now
//!   ([`TesseraError::NoMoreServers`]), placements below the expected fitness
//!   during the startup grace window ([`TesseraError::OperationFailed`]), and
//!   missing sub-recruitments ([`TesseraError::RecruitmentFailed`]).
//! - **Protocol**: version mismatches on the failure-monitoring stream and
//!   expired outstanding requests.
//! - **Configuration / storage**: invalid settings and KV store failures.
//!
//! Recruitment errors are recoverable: the dispatcher queues or retries
//! them. Anything else escaping the dispatcher ends the controller role so
//! the election loop can pick a new one.

use thiserror::Error;

/// Main error type for cluster controller operations.
#[derive(Error, Debug)]
pub enum TesseraError {
    // Recruitment errors
    #[error("No more servers available for recruitment")]
    NoMoreServers,

    #[error("Recruitment produced a placement below expected fitness")]
    OperationFailed,

    #[error("Recruitment failed: {0}")]
    RecruitmentFailed(String),

    // Protocol errors
    #[error("Requested failure information version {requested} is beyond current version {current}")]
    FutureVersion { requested: u64, current: u64 },

    #[error("Request timed out after {0}ms")]
    TimedOut(u64),

    #[error("Coordinators changed")]
    CoordinatorsChanged,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Storage errors
    #[error("KV store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Plumbing errors
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Check if the error is a recruitment error that should be retried
    /// (locally or via the outstanding-request queues) rather than taking
    /// down the controller.
    pub fn is_recruitment_retry(&self) -> bool {
        matches!(
            self,
            TesseraError::NoMoreServers | TesseraError::OperationFailed
        )
    }

    /// Check if the error is fatal to the controller role.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TesseraError::NoMoreServers
                | TesseraError::OperationFailed
                | TesseraError::RecruitmentFailed(_)
                | TesseraError::TimedOut(_)
                | TesseraError::CoordinatorsChanged
        )
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

/// Result type alias for cluster controller operations.
pub type Result<T> = std::result::Result<T, TesseraError>;
