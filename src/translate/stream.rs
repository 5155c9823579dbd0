//! Shared, replayable text stream produced by a model provider.
//!
//! One [`StreamWriter`] appends chunks; any number of readers obtained from a
//! [`StreamHandle`] see every chunk from the beginning, then live chunks, then
//! the terminal state. Dropping a reader never affects the writer.

use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::TranslateError;

/// Terminal failure of a stream, as seen by its readers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream failed: {0}")]
pub struct StreamFailure(pub String);

#[derive(Default)]
struct StreamState {
    chunks: Vec<String>,
    outcome: Option<Result<(), StreamFailure>>,
}

struct Shared {
    id: Uuid,
    state: Mutex<StreamState>,
    notify: Notify,
}

enum ReadStep {
    Chunk(String),
    Fail(StreamFailure),
    End,
    Wait,
}

/// Cheap-to-clone reference to a stream. Clones share identity.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

/// Producer side. Dropping it unfinished fails the stream.
pub struct StreamWriter {
    shared: Arc<Shared>,
    closed: bool,
}

impl StreamHandle {
    /// Create a linked writer/handle pair.
    pub fn channel() -> (StreamWriter, StreamHandle) {
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            state: Mutex::new(StreamState::default()),
            notify: Notify::new(),
        });
        (
            StreamWriter {
                shared: Arc::clone(&shared),
                closed: false,
            },
            StreamHandle { shared },
        )
    }

    /// Already-completed stream holding `text` as a single chunk.
    pub fn from_text(text: impl Into<String>) -> StreamHandle {
        let (writer, handle) = Self::channel();
        writer.push(text);
        writer.finish();
        handle
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// True when both handles refer to the same underlying stream.
    pub fn same_stream(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Everything emitted so far, concatenated.
    pub fn text_so_far(&self) -> String {
        self.shared.state.lock().chunks.concat()
    }

    /// Subscribe from the first chunk. Yields `Err` at most once, as the last item.
    pub fn reader(&self) -> impl Stream<Item = Result<String, StreamFailure>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        stream::unfold((shared, 0usize, false), |(shared, pos, done)| async move {
            if done {
                return None;
            }
            let step = loop {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                // Register before inspecting state so a push in between is not missed.
                notified.as_mut().enable();
                let step = {
                    let state = shared.state.lock();
                    match (state.chunks.get(pos), &state.outcome) {
                        (Some(chunk), _) => ReadStep::Chunk(chunk.clone()),
                        (None, Some(Ok(()))) => ReadStep::End,
                        (None, Some(Err(failure))) => ReadStep::Fail(failure.clone()),
                        (None, None) => ReadStep::Wait,
                    }
                };
                match step {
                    ReadStep::Wait => notified.await,
                    step => break step,
                }
            };
            match step {
                ReadStep::Chunk(chunk) => Some((Ok(chunk), (shared, pos + 1, false))),
                ReadStep::Fail(failure) => Some((Err(failure), (shared, pos, true))),
                ReadStep::End | ReadStep::Wait => None,
            }
        })
    }

    /// Wait for the terminal state without consuming chunks.
    pub async fn closed(&self) -> Result<(), StreamFailure> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let outcome = self.shared.state.lock().outcome.clone();
            if let Some(outcome) = outcome {
                return outcome;
            }
            notified.await;
        }
    }

    /// Wait for the stream to end and return the full text.
    pub async fn collect_text(&self) -> Result<String, TranslateError> {
        let mut reader = Box::pin(self.reader());
        let mut text = String::new();
        while let Some(item) = reader.next().await {
            match item {
                Ok(chunk) => text.push_str(&chunk),
                Err(StreamFailure(msg)) => return Err(TranslateError::ProviderError(msg)),
            }
        }
        if text.is_empty() {
            return Err(TranslateError::NoResult);
        }
        Ok(text)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl StreamWriter {
    pub fn push(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        if state.outcome.is_some() {
            return;
        }
        state.chunks.push(chunk);
        drop(state);
        self.shared.notify.notify_waiters();
    }

    pub fn finish(mut self) {
        self.close(Ok(()));
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.close(Err(StreamFailure(message.into())));
    }

    fn close(&mut self, outcome: Result<(), StreamFailure>) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.shared.state.lock();
        if state.outcome.is_none() {
            state.outcome = Some(outcome);
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.close(Err(StreamFailure("stream closed before completion".into())));
    }
}
