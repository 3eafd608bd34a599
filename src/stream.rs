// src/stream.rs
// Stream chunks, final-chunk sequencing and the pull-based response stream

use crate::error::{Error, Result};
use crate::session::Claim;
use std::ops::ControlFlow;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

/// One incremental piece of a streamed response
///
/// `text` is only valid for the duration of the sink call; copy it if it has
/// to outlive the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamChunk<'a> {
    /// Fragment to append to the text received so far
    pub text: &'a str,
    /// Set on the last delivery of a stream, and only there
    pub is_final: bool,
}

impl StreamChunk<'_> {
    pub fn to_owned_chunk(&self) -> Chunk {
        Chunk {
            text: self.text.to_string(),
            is_final: self.is_final,
        }
    }
}

/// Owned counterpart of [`StreamChunk`], yielded by [`ResponseStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub is_final: bool,
}

/// Turns a model's fragments into chunks with exactly one final marker
///
/// Holds the most recent fragment back until the next one arrives (or the
/// model finishes) so the last delivery can carry `is_final = true`.
pub(crate) struct ChunkSequencer<F> {
    sink: F,
    pending: Option<String>,
    stopped: bool,
}

impl<F> ChunkSequencer<F>
where
    F: FnMut(StreamChunk<'_>) -> ControlFlow<()>,
{
    pub(crate) fn new(sink: F) -> Self {
        Self {
            sink,
            pending: None,
            stopped: false,
        }
    }

    /// Accepts the next fragment from the model
    pub(crate) fn push(&mut self, fragment: &str) -> ControlFlow<()> {
        if self.stopped {
            return ControlFlow::Break(());
        }
        if fragment.is_empty() {
            return ControlFlow::Continue(());
        }
        if let Some(previous) = self.pending.replace(fragment.to_string()) {
            let flow = (self.sink)(StreamChunk {
                text: &previous,
                is_final: false,
            });
            if flow.is_break() {
                self.stopped = true;
                return flow;
            }
        }
        ControlFlow::Continue(())
    }

    /// Whether the sink asked to stop
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Delivers the final chunk, carrying the held-back fragment if any
    pub(crate) fn finish(mut self) -> Result<()> {
        if self.stopped {
            return Err(Error::Cancelled);
        }
        let text = self.pending.take().unwrap_or_default();
        // The stream is over either way; a Break here changes nothing.
        let _ = (self.sink)(StreamChunk {
            text: &text,
            is_final: true,
        });
        Ok(())
    }
}

/// A lazy, finite, non-restartable sequence of response chunks
///
/// Produced by [`LanguageModelSession::response_stream`]. Generation runs on
/// a worker thread; chunks arrive in generation order. The iterator ends
/// after the final chunk or after the first error. The worker hands its
/// claim on the session back when it exits, and the claim is released only
/// once that final item has been yielded or the stream is dropped. Dropping
/// it early stops generation.
///
/// [`LanguageModelSession::response_stream`]: crate::LanguageModelSession::response_stream
pub struct ResponseStream {
    receiver: Option<Receiver<Result<Chunk>>>,
    worker: Option<JoinHandle<Claim>>,
    done: bool,
}

impl ResponseStream {
    pub(crate) fn new(receiver: Receiver<Result<Chunk>>, worker: JoinHandle<Claim>) -> Self {
        Self {
            receiver: Some(receiver),
            worker: Some(worker),
            done: false,
        }
    }

    /// Drains the stream into the complete response text
    pub fn collect_text(self) -> Result<String> {
        let mut text = String::new();
        for chunk in self {
            text.push_str(&chunk?.text);
        }
        Ok(text)
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(worker) = self.worker.take() {
            // The worker has already sent its last message, so joining here
            // is short. Dropping the returned claim frees the session.
            let _ = worker.join();
        }
    }
}

impl Iterator for ResponseStream {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let received = self.receiver.as_ref()?.recv();
        match received {
            Ok(Ok(chunk)) => {
                if chunk.is_final {
                    self.finish();
                }
                Some(Ok(chunk))
            }
            Ok(Err(err)) => {
                self.finish();
                Some(Err(err))
            }
            Err(_) => {
                self.finish();
                None
            }
        }
    }
}

impl std::iter::FusedIterator for ResponseStream {}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        // Closing the channel makes the worker's next send fail, which
        // stops generation.
        drop(self.receiver.take());
        self.finish();
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("done", &self.done)
            .finish()
    }
}
