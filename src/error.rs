// src/error.rs
// Error taxonomy shared by the Rust API and the C boundary

use crate::options::OptionsError;
use crate::schema::SchemaError;
use std::fmt;

/// Stable numeric error codes reported across the C boundary
///
/// Values never change between releases; branch on these rather than on
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// A session could not be created
    Initialization = 1,
    /// An options document was malformed or had the wrong shape
    OptionsDecode = 2,
    /// A schema document was malformed or used unsupported vocabulary
    Schema = 3,
    /// Generation finished but the output did not satisfy the schema
    SchemaConformance = 4,
    /// The underlying model failed to generate
    GenerationFailure = 5,
    /// The handle was not in a state that allows the operation
    InvalidState = 6,
    /// An argument was missing or invalid (e.g., empty prompt)
    InvalidInput = 7,
    /// A stream was stopped by its sink before completion
    Cancelled = 8,
}

impl ErrorCode {
    /// Raw value written into `FmError::code`
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parses a raw code, returning `None` for values outside the taxonomy
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Initialization,
            2 => Self::OptionsDecode,
            3 => Self::Schema,
            4 => Self::SchemaConformance,
            5 => Self::GenerationFailure,
            6 => Self::InvalidState,
            7 => Self::InvalidInput,
            8 => Self::Cancelled,
            _ => return None,
        })
    }
}

/// Why the underlying model failed to produce output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The model became unavailable (assets missing, disabled, unsupported)
    Unavailable,
    /// Generation did not finish in time
    Timeout,
    /// Context window, rate limit or concurrency limit exceeded
    ResourceExhausted,
    /// The request or response was rejected by content guardrails
    ContentPolicy,
    /// Any other failure reported by the model
    Backend,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Unavailable => "model unavailable",
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceExhausted => "resources exhausted",
            FailureKind::ContentPolicy => "content policy",
            FailureKind::Backend => "backend failure",
        };
        f.write_str(label)
    }
}

/// Errors that can occur when using a language model session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The session could not be bound to the model
    /// This typically means the model is unavailable on this system
    #[error("Session initialization failed: {0}")]
    Initialization(String),

    /// The options document could not be decoded
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// The schema document is malformed, rejected before any generation
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The model finished but its output does not satisfy the schema
    #[error("Response does not conform to the schema: {0}")]
    SchemaConformance(String),

    /// The model returned an error during generation
    #[error("Generation error ({kind}): {message}")]
    Generation {
        /// Failure category
        kind: FailureKind,
        /// Message reported by the model
        message: String,
    },

    /// The operation is not allowed in the session's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Invalid input was provided (e.g., empty prompt)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The stream sink asked to stop before the final chunk
    #[error("Stream cancelled before completion")]
    Cancelled,

    /// A mutex or synchronization primitive was poisoned
    /// This indicates a panic occurred while holding a lock
    #[error("Synchronization primitive poisoned due to panic while holding lock")]
    PoisonError,
}

impl Error {
    /// Stable code for programmatic branching
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Initialization(_) => ErrorCode::Initialization,
            Error::Options(_) => ErrorCode::OptionsDecode,
            Error::Schema(_) => ErrorCode::Schema,
            Error::SchemaConformance(_) => ErrorCode::SchemaConformance,
            Error::Generation { .. } => ErrorCode::GenerationFailure,
            Error::InvalidState(_) | Error::PoisonError => ErrorCode::InvalidState,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::Cancelled => ErrorCode::Cancelled,
        }
    }

    pub(crate) fn generation(kind: FailureKind, message: impl Into<String>) -> Self {
        Error::Generation {
            kind,
            message: message.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;
