//! # Errors
//!
//! Error taxonomy for the verification service. Client-caused structural
//! errors surface synchronously; oracle and infrastructure failures are
//! resolved internally by the verification worker and never reach a caller
//! as a terminal failure.

use thiserror::Error;

/// Result type for service operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Service errors, serializable as JSON error bodies.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The presented payload is structurally invalid: it cannot be framed or
    /// parsed, or the claimed SAID does not match the content address
    /// derivable from the payload. Never enqueued for verification.
    #[error(r#"{{"error": "malformed_presentation", "error_description": "{0}"}}"#)]
    MalformedPresentation(String),

    /// The requested resource does not exist. For authorization queries this
    /// means no presentation has ever referenced the holder.
    #[error(r#"{{"error": "not_found", "error_description": "{0}"}}"#)]
    NotFound(String),

    /// The identifier exists but is not currently backed by a valid,
    /// non-revoked credential.
    #[error(r#"{{"error": "unauthorized", "error_description": "{0}"}}"#)]
    Unauthorized(String),

    /// The service configuration is unusable (for example, no LEIs to
    /// accept). Surfaced at construction, never at request time.
    #[error(r#"{{"error": "invalid_configuration", "error_description": "{0}"}}"#)]
    Configuration(String),

    /// An unexpected internal fault. Faults processing one record are
    /// isolated and never corrupt cross-record state.
    #[error(r#"{{"error": "server_error", "error_description": "{0}"}}"#)]
    ServerError(String),
}
