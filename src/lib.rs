//! # fm-session
//!
//! A session layer over an on-device generative text model, with Apple's
//! [Foundation Models framework](https://developer.apple.com/documentation/foundationmodels)
//! as the built-in backend.
//!
//! ## Requirements
//!
//! For the Apple backend:
//!
//! - macOS 26+ or iOS 26+
//! - Apple Intelligence enabled in System Settings
//!
//! On every other target the crate still builds; [`check_availability`]
//! reports `unsupported platform` and sessions can be bound to any
//! [`LanguageModel`] implementation instead.
//!
//! ## Features
//!
//! - **Blocking Response**: complete text with `respond()`
//! - **Structured Response**: schema-conforming JSON with `respond_structured()`
//! - **Streaming Response**: ordered chunks with `stream_response()` or a
//!   pull-based [`ResponseStream`]
//! - **Availability**: a bounded check that needs no session
//! - **C ABI**: the [`capi`] module, built into the `cdylib`
//!
//! ## Examples
//!
//! ### Blocking Response
//!
//! ```no_run
//! use fm_session::LanguageModelSession;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = LanguageModelSession::new("You are a concise assistant.")?;
//!     let response = session.respond("What is Rust?", None)?;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```
//!
//! ### Structured Response
//!
//! ```no_run
//! use fm_session::LanguageModelSession;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = LanguageModelSession::new("")?;
//!     let schema = r#"{
//!         "name": "Person",
//!         "properties": [
//!             {"name": "name", "schema": {"type": "string"}},
//!             {"name": "age", "schema": {"type": "integer"}}
//!         ]
//!     }"#;
//!     let json = session.respond_structured("Invent a person", schema, None)?;
//!     println!("{}", json);
//!     Ok(())
//! }
//! ```
//!
//! ### Streaming Response
//!
//! ```no_run
//! use fm_session::LanguageModelSession;
//! use std::io::{self, Write};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = LanguageModelSession::new("")?;
//!
//!     session.stream_response("Tell me a story", None, |chunk| {
//!         print!("{}", chunk.text);
//!         let _ = io::stdout().flush();
//!     })?;
//!
//!     println!(); // newline after stream
//!     Ok(())
//! }
//! ```

// Internal modules
mod availability;
mod error;
mod model;
mod schema;
mod session;
mod stream;

pub mod capi;
pub mod options;

#[cfg(all(target_vendor = "apple", feature = "foundation-models"))]
mod apple;
#[cfg(all(target_vendor = "apple", feature = "foundation-models"))]
mod ffi;

// Public API exports
pub use availability::{
    Availability, AvailabilityReason, AvailabilityState, DEFAULT_AVAILABILITY_TIMEOUT,
    check_availability, check_availability_with,
};
pub use error::{Error, ErrorCode, FailureKind, Result};
pub use model::{BackendError, LanguageModel, ModelSession, UnsupportedPlatform, default_model};
pub use options::{GenerationOptions, OptionsError};
pub use schema::{Schema, SchemaError, SchemaNode, SchemaProperty, SchemaType};
pub use session::LanguageModelSession;
pub use stream::{Chunk, ResponseStream, StreamChunk};

#[cfg(all(target_vendor = "apple", feature = "foundation-models"))]
pub use apple::SystemLanguageModel;
