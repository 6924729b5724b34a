//! Error types for workflow and store operations

use crate::status::TicketStatus;
use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Everything a workflow call can fail with.
///
/// `NotFound`, `InvalidTransition` and `Conflict` are the caller-facing rule
/// outcomes. The store variants are opaque internal failures; any of them
/// raised inside a transaction rolls the whole operation back.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced ticket, pause, request or notification is absent
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Status change not in the transition table
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: TicketStatus, to: TicketStatus },

    /// Ordering problem: active pause, already responded, duplicate code
    #[error("conflict: {0}")]
    Conflict(String),

    /// Actor role may not perform the operation
    #[error("{actor} may not {action}")]
    Forbidden { actor: String, action: &'static str },

    /// Malformed input
    #[error("{0}")]
    Validation(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// HTTP status equivalent
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::InvalidTransition { .. } => 422,
            Error::Conflict(_) => 409,
            Error::Forbidden { .. } => 403,
            Error::Validation(_) => 400,
            Error::Connection(_) | Error::Query(_) | Error::Pool(_) => 500,
        }
    }

    /// Short machine-readable tag
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Conflict(_) => "conflict",
            Error::Forbidden { .. } => "forbidden",
            Error::Validation(_) => "validation",
            Error::Connection(_) | Error::Query(_) | Error::Pool(_) => "internal",
        }
    }
}

/// Unknown text for a closed enum
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl From<ParseEnumError> for Error {
    fn from(e: ParseEnumError) -> Self {
        Error::Validation(e.to_string())
    }
}
