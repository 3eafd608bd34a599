// src/model.rs
// The seam between sessions and the underlying generative model

use crate::availability::{Availability, AvailabilityReason};
use crate::error::{Error, FailureKind};
use crate::options::GenerationOptions;
use crate::schema::{Schema, SchemaError};
use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};

/// Failures reported by a model implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The model cannot be used right now
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// Generation did not finish in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Context window, rate or concurrency limits were hit
    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Guardrails rejected the prompt or the output
    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    /// The model could not produce output matching the schema
    #[error("could not satisfy schema: {0}")]
    SchemaMismatch(String),

    /// The schema uses a feature the model cannot generate
    #[error("unsupported schema: {0}")]
    UnsupportedSchema(String),

    /// The request could not be handed to the model as given
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Error::generation(FailureKind::Unavailable, msg),
            BackendError::Timeout(msg) => Error::generation(FailureKind::Timeout, msg),
            BackendError::ResourceExhausted(msg) => {
                Error::generation(FailureKind::ResourceExhausted, msg)
            }
            BackendError::ContentPolicy(msg) => Error::generation(FailureKind::ContentPolicy, msg),
            BackendError::SchemaMismatch(msg) => Error::SchemaConformance(msg),
            BackendError::UnsupportedSchema(msg) => Error::Schema(SchemaError::Unsupported(msg)),
            BackendError::InvalidRequest(msg) => Error::InvalidInput(msg),
            BackendError::Other(msg) => Error::generation(FailureKind::Backend, msg),
        }
    }
}

/// A generative text model that sessions can be bound to
///
/// Implementations must be cheap to share across threads; the availability
/// check may run concurrently with any number of open sessions.
pub trait LanguageModel: Send + Sync {
    /// Reports whether the model can be used now
    fn availability(&self) -> Result<Availability, BackendError>;

    /// Opens a model session primed with `instructions` (may be empty)
    fn open(&self, instructions: &str) -> Result<Box<dyn ModelSession>, BackendError>;
}

/// A model-side session
///
/// Calls on one `ModelSession` are never made concurrently; the owning
/// `LanguageModelSession` serializes them.
pub trait ModelSession: Send {
    /// Generates the complete response text
    fn respond(&mut self, prompt: &str, options: &GenerationOptions)
    -> Result<String, BackendError>;

    /// Generates JSON text intended to satisfy `schema`
    fn respond_structured(
        &mut self,
        prompt: &str,
        schema: &Schema,
        options: &GenerationOptions,
    ) -> Result<String, BackendError>;

    /// Generates text incrementally, calling `on_fragment` for each new
    /// piece in order
    ///
    /// When `on_fragment` returns `ControlFlow::Break`, the implementation
    /// must stop generating and return promptly.
    fn stream(
        &mut self,
        prompt: &str,
        options: &GenerationOptions,
        on_fragment: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), BackendError>;
}

/// Stand-in model for platforms without an on-device model
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPlatform;

impl LanguageModel for UnsupportedPlatform {
    fn availability(&self) -> Result<Availability, BackendError> {
        Ok(Availability::unavailable(
            AvailabilityReason::UnsupportedPlatform,
        ))
    }

    fn open(&self, _instructions: &str) -> Result<Box<dyn ModelSession>, BackendError> {
        Err(BackendError::Unavailable(
            "no on-device language model on this platform".into(),
        ))
    }
}

/// The platform's default model
///
/// Apple's system language model when built for an Apple target with the
/// `foundation-models` feature, `UnsupportedPlatform` otherwise.
pub fn default_model() -> Arc<dyn LanguageModel> {
    static DEFAULT: OnceLock<Arc<dyn LanguageModel>> = OnceLock::new();
    DEFAULT.get_or_init(platform_model).clone()
}

#[cfg(all(target_vendor = "apple", feature = "foundation-models"))]
fn platform_model() -> Arc<dyn LanguageModel> {
    Arc::new(crate::apple::SystemLanguageModel)
}

#[cfg(not(all(target_vendor = "apple", feature = "foundation-models")))]
fn platform_model() -> Arc<dyn LanguageModel> {
    Arc::new(UnsupportedPlatform)
}
