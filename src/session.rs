// src/session.rs
// Language Model Session - the main API for generating responses

use crate::availability::{self, DEFAULT_AVAILABILITY_TIMEOUT};
use crate::error::{Error, Result};
use crate::model::{self, LanguageModel, ModelSession};
use crate::options::{self, GenerationOptions};
use crate::schema::Schema;
use crate::stream::{Chunk, ChunkSequencer, ResponseStream, StreamChunk};
use serde::de::DeserializeOwned;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::SystemTime;

/// Chunks buffered between a stream worker and its consumer
const STREAM_BUFFER: usize = 8;

/// A session bound to a language model and a fixed set of instructions
///
/// The session owns the model-side state. It cannot be cloned; dropping it
/// is the one and only way to destroy it. Calls on one session are
/// serialized: a second call from another thread waits for the first to
/// finish. Distinct sessions never wait on each other.
///
/// # Examples
///
/// ## Blocking response
/// ```no_run
/// # use fm_session::LanguageModelSession;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = LanguageModelSession::new("You are terse.")?;
/// let response = session.respond("What is Rust?", None)?;
/// println!("{}", response);
/// # Ok(())
/// # }
/// ```
///
/// ## Streaming response
/// ```no_run
/// # use fm_session::LanguageModelSession;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = LanguageModelSession::new("")?;
/// session.stream_response("What is Rust?", None, |chunk| {
///     print!("{}", chunk.text);
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct LanguageModelSession {
    shared: Arc<Shared>,
    instructions: String,
    created: SystemTime,
}

impl LanguageModelSession {
    /// Creates a session on the platform's default model
    ///
    /// # Errors
    ///
    /// Returns `Error::Initialization` if the model is not available (for
    /// example Apple Intelligence is disabled) or refuses to open a session.
    pub fn new(instructions: &str) -> Result<Self> {
        Self::with_model(model::default_model(), instructions)
    }

    /// Creates a session on an explicit model
    ///
    /// Availability is re-checked here even if the caller already did so.
    /// `instructions` may be empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::Initialization` if the model is not ready or cannot
    /// open a session.
    pub fn with_model(model: Arc<dyn LanguageModel>, instructions: &str) -> Result<Self> {
        let availability =
            availability::check_availability_with(&model, DEFAULT_AVAILABILITY_TIMEOUT)
                .map_err(|e| Error::Initialization(e.to_string()))?;
        if !availability.is_ready() {
            return Err(Error::Initialization(format!("model is {availability}")));
        }

        let session = model
            .open(instructions)
            .map_err(|e| Error::Initialization(e.to_string()))?;

        tracing::debug!(
            instructions_len = instructions.len(),
            "language model session created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                holder: Mutex::new(None),
                idle: Condvar::new(),
            }),
            instructions: instructions.to_string(),
            created: SystemTime::now(),
        })
    }

    /// The instructions this session was created with
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn created_at(&self) -> SystemTime {
        self.created
    }

    /// Generates a complete response to the given prompt
    ///
    /// Blocks until the whole response is generated. For incremental
    /// output, use `stream_response` instead.
    ///
    /// # Arguments
    ///
    /// * `prompt` - The input text to send to the model
    /// * `options` - Optional JSON options document; `None` and `"{}"` both
    ///   mean defaults
    ///
    /// # Errors
    ///
    /// * `Error::InvalidInput` - If the prompt is empty
    /// * `Error::Options` - If the options document cannot be decoded
    /// * `Error::Generation` - If the model fails to generate
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use fm_session::LanguageModelSession;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = LanguageModelSession::new("You are terse.")?;
    /// let response = session.respond("Say hi", Some(r#"{"max_output_tokens": 5}"#))?;
    /// println!("Response: {}", response);
    /// # Ok(())
    /// # }
    /// ```
    pub fn respond(&self, prompt: &str, options: Option<&str>) -> Result<String> {
        check_prompt(prompt)?;
        let options = options::decode(options)?;
        self.respond_with_options(prompt, &options)
    }

    /// Same as `respond`, with already-typed options
    pub fn respond_with_options(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        check_prompt(prompt)?;
        let claim = Shared::claim(&self.shared, thread::current().id())?;

        tracing::debug!(prompt_len = prompt.len(), "generating response");
        let text = claim.session()?.respond(prompt, options)?;
        tracing::debug!(response_len = text.len(), "response generated");
        Ok(text)
    }

    /// Generates a response constrained to a schema
    ///
    /// The schema document is checked before anything is sent to the model.
    /// The returned text is JSON that conforms to the schema; output that
    /// does not conform is never returned.
    ///
    /// # Arguments
    ///
    /// * `prompt` - The input text to send to the model
    /// * `schema` - Schema document (see [`Schema`])
    /// * `options` - Optional JSON options document
    ///
    /// # Errors
    ///
    /// * `Error::InvalidInput` - If the prompt is empty
    /// * `Error::Schema` - If the schema document is malformed or unsupported
    /// * `Error::Options` - If the options document cannot be decoded
    /// * `Error::SchemaConformance` - If the model's output does not conform
    /// * `Error::Generation` - If the model fails to generate
    pub fn respond_structured(
        &self,
        prompt: &str,
        schema: &str,
        options: Option<&str>,
    ) -> Result<String> {
        check_prompt(prompt)?;
        let schema = Schema::parse(schema)?;
        self.respond_with_schema(prompt, &schema, options)
    }

    /// Same as `respond_structured`, with an already parsed schema
    pub fn respond_with_schema(
        &self,
        prompt: &str,
        schema: &Schema,
        options: Option<&str>,
    ) -> Result<String> {
        check_prompt(prompt)?;
        let options = options::decode(options)?;
        let claim = Shared::claim(&self.shared, thread::current().id())?;

        tracing::debug!(prompt_len = prompt.len(), "generating structured response");
        let text = claim.session()?.respond_structured(prompt, schema, &options)?;
        drop(claim);

        if let Err(err) = schema.validate(&text) {
            tracing::warn!(error = %err, "model output does not conform to the schema");
            return Err(err);
        }
        Ok(text)
    }

    /// Generates a structured response and decodes it into `T`
    ///
    /// # Errors
    ///
    /// Everything `respond_with_schema` returns, plus `Error::InvalidInput`
    /// when the conforming JSON does not fit `T`.
    pub fn respond_structured_into<T>(
        &self,
        prompt: &str,
        schema: &Schema,
        options: Option<&str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let text = self.respond_with_schema(prompt, schema, options)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::InvalidInput(format!(
                "structured response does not fit the target type: {e}"
            ))
        })
    }

    /// Generates a streaming response to the given prompt
    ///
    /// Blocks until the stream completes, calling `on_chunk` on this thread
    /// for each chunk in generation order. Exactly one chunk has
    /// `is_final == true` and it is always the last one.
    ///
    /// If generation fails midway, no further chunks are delivered and the
    /// error is returned. Text already delivered is not retracted.
    ///
    /// `on_chunk` must not call back into this session.
    ///
    /// # Arguments
    ///
    /// * `prompt` - The input text to send to the model
    /// * `options` - Optional JSON options document
    /// * `on_chunk` - Called for each generated chunk
    ///
    /// # Errors
    ///
    /// * `Error::InvalidInput` - If the prompt is empty
    /// * `Error::Options` - If the options document cannot be decoded
    /// * `Error::Generation` - If an error occurs during generation
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use fm_session::LanguageModelSession;
    /// # use std::io::{self, Write};
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = LanguageModelSession::new("")?;
    ///
    /// session.stream_response("Tell me a story", None, |chunk| {
    ///     print!("{}", chunk.text);
    ///     let _ = io::stdout().flush();
    /// })?;
    ///
    /// println!(); // newline after stream completes
    /// # Ok(())
    /// # }
    /// ```
    pub fn stream_response<F>(
        &self,
        prompt: &str,
        options: Option<&str>,
        mut on_chunk: F,
    ) -> Result<()>
    where
        F: FnMut(StreamChunk<'_>),
    {
        self.stream_response_until(prompt, options, move |chunk| {
            on_chunk(chunk);
            ControlFlow::Continue(())
        })
    }

    /// Streams a response until it completes or `on_chunk` breaks
    ///
    /// Returning `ControlFlow::Break(())` stops delivery immediately and
    /// tells the model to stop generating; the call then returns
    /// `Error::Cancelled` and no final chunk is delivered.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use fm_session::LanguageModelSession;
    /// # use std::ops::ControlFlow;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = LanguageModelSession::new("")?;
    /// let mut received = 0;
    /// let result = session.stream_response_until("Write a long story", None, |chunk| {
    ///     received += chunk.text.len();
    ///     if received > 200 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
    /// });
    /// assert!(result.is_ok() || matches!(result, Err(fm_session::Error::Cancelled)));
    /// # Ok(())
    /// # }
    /// ```
    pub fn stream_response_until<F>(
        &self,
        prompt: &str,
        options: Option<&str>,
        on_chunk: F,
    ) -> Result<()>
    where
        F: FnMut(StreamChunk<'_>) -> ControlFlow<()>,
    {
        check_prompt(prompt)?;
        let options = options::decode(options)?;
        Shared::claim(&self.shared, thread::current().id())?.stream(prompt, &options, on_chunk)
    }

    /// Starts a pull-based stream
    ///
    /// Generation runs on a worker thread and chunks are read by iterating
    /// the returned [`ResponseStream`], on any thread. The session is claimed
    /// before this returns and stays busy until the stream has yielded its
    /// final chunk or error, or has been dropped. In the meantime a call on
    /// this session from the creating thread fails with
    /// `Error::InvalidState` rather than deadlocking, and a call from any
    /// other thread waits.
    ///
    /// # Errors
    ///
    /// Input, options and busy-session errors are returned here; generation
    /// errors are yielded by the iterator.
    pub fn response_stream(&self, prompt: &str, options: Option<&str>) -> Result<ResponseStream> {
        check_prompt(prompt)?;
        let options = options::decode(options)?;

        let claim = Shared::claim(&self.shared, thread::current().id())?;
        let prompt = prompt.to_string();
        let (tx, rx) = mpsc::sync_channel::<Result<Chunk>>(STREAM_BUFFER);

        let worker = thread::Builder::new()
            .name("fm-response-stream".into())
            .spawn(move || {
                let result = claim.stream(&prompt, &options, |chunk| {
                    match tx.send(Ok(chunk.to_owned_chunk())) {
                        Ok(()) => ControlFlow::Continue(()),
                        // Consumer dropped the stream.
                        Err(_) => ControlFlow::Break(()),
                    }
                });
                if let Err(err) = result {
                    let _ = tx.send(Err(err));
                }
                claim
            })
            .map_err(|e| Error::InvalidState(format!("cannot spawn stream worker: {e}")))?;

        Ok(ResponseStream::new(rx, worker))
    }
}

impl Drop for LanguageModelSession {
    fn drop(&mut self) {
        tracing::debug!(
            in_flight_streams = Arc::strong_count(&self.shared) - 1,
            "language model session destroyed"
        );
    }
}

impl fmt::Debug for LanguageModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageModelSession")
            .field("instructions_len", &self.instructions.len())
            .field("created", &self.created)
            .finish()
    }
}

// Internal State Types

/// Model session plus the thread currently driving a call on it
struct Shared {
    session: Mutex<Box<dyn ModelSession>>,
    holder: Mutex<Option<ThreadId>>,
    idle: Condvar,
}

impl Shared {
    /// Claims the model session on behalf of `owner`
    ///
    /// Checking and taking the claim happen under one lock. Waits while
    /// another thread holds the session; fails if `owner` already does.
    fn claim(shared: &Arc<Self>, owner: ThreadId) -> Result<Claim> {
        let mut holder = shared.holder.lock()?;
        while let Some(current) = *holder {
            if current == owner {
                return Err(Error::InvalidState(
                    "a call on this session is already in progress on this thread".into(),
                ));
            }
            holder = shared.idle.wait(holder)?;
        }
        *holder = Some(owner);
        Ok(Claim {
            shared: Arc::clone(shared),
        })
    }
}

/// Exclusive use of a model session, released on drop
///
/// A claim can move to another thread; the owner recorded when it was
/// taken stays the same.
pub(crate) struct Claim {
    shared: Arc<Shared>,
}

impl Claim {
    fn session(&self) -> Result<MutexGuard<'_, Box<dyn ModelSession>>> {
        Ok(self.shared.session.lock()?)
    }

    fn stream<F>(&self, prompt: &str, options: &GenerationOptions, on_chunk: F) -> Result<()>
    where
        F: FnMut(StreamChunk<'_>) -> ControlFlow<()>,
    {
        let mut session = self.session()?;
        let mut sequencer = ChunkSequencer::new(on_chunk);

        tracing::debug!(prompt_len = prompt.len(), "streaming response");
        let outcome = session.stream(prompt, options, &mut |fragment: &str| {
            sequencer.push(fragment)
        });

        match outcome {
            Ok(()) => sequencer.finish(),
            Err(_) if sequencer.is_stopped() => Err(Error::Cancelled),
            Err(err) => {
                tracing::debug!(error = %err, "stream failed");
                Err(err.into())
            }
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.shared.holder.lock() {
            *holder = None;
        }
        self.shared.idle.notify_all();
    }
}

fn check_prompt(prompt: &str) -> Result<()> {
    if prompt.is_empty() {
        return Err(Error::InvalidInput("Prompt cannot be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn sessions_can_move_between_threads() {
        assert_send_sync::<LanguageModelSession>();
    }

    #[test]
    fn empty_prompt_is_rejected_before_anything_else() {
        assert_eq!(
            check_prompt(""),
            Err(Error::InvalidInput("Prompt cannot be empty".into()))
        );
        assert!(check_prompt(" ").is_ok());
    }

    #[test]
    fn default_model_off_apple_cannot_open_sessions() {
        if cfg!(all(target_vendor = "apple", feature = "foundation-models")) {
            return;
        }
        let err = LanguageModelSession::new("You are terse.").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Initialization);
        assert!(err.to_string().contains("unsupported platform"));
    }
}
