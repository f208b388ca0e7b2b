//! Runner seam between the conversation driver and the agent backend.
//!
//! A [`Runner`] executes one delegated turn: it receives the active persona
//! handle and the full conversation history, streams response text back as
//! it is produced, and finally reports the canonical post-run state (the
//! superseding history and the persona that actually handled the turn,
//! which may differ from the input persona after a handoff).
//!
//! [`StreamedRun`] / [`RunProducer`] are the two halves of that exchange,
//! built on a bounded chunk channel plus a oneshot outcome channel.
//! Dropping the consumer half closes both channels, so a producer task
//! observes send failure and stops; early abandonment therefore releases
//! the underlying stream without any extra bookkeeping.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::conversation::Turn;
use crate::error::Result;
use crate::persona::PersonaId;

/// Default chunk channel capacity for [`StreamedRun::channel`].
pub const DEFAULT_CHUNK_BUFFER: usize = 32;

/// Canonical state reported by a runner after a delegated turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// The authoritative history snapshot. Supersedes the driver's local
    /// history wholesale; it is never merged.
    pub history: Vec<Turn>,
    /// The persona that produced the final response.
    pub last_persona: PersonaId,
}

/// Executes delegated turns against an agent backend.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Starts a streamed run for the given persona and history.
    ///
    /// The returned handle yields response text chunks in production
    /// order and, once the stream is exhausted, the run's outcome.
    async fn run_streamed(&self, persona: &PersonaId, history: &[Turn]) -> Result<StreamedRun>;
}

/// Consumer half of a streamed run.
///
/// Chunks are delivered in the exact order the producer emitted them and
/// each chunk is observed at most once. The handle is not restartable.
pub struct StreamedRun {
    chunks: mpsc::Receiver<Result<String>>,
    outcome: oneshot::Receiver<RunOutcome>,
}

impl StreamedRun {
    /// Creates a connected producer/consumer pair with the given chunk
    /// buffer capacity.
    pub fn channel(buffer: usize) -> (RunProducer, StreamedRun) {
        let (chunk_tx, chunk_rx) = mpsc::channel(buffer);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let producer = RunProducer {
            chunks: chunk_tx,
            outcome: outcome_tx,
        };
        let run = StreamedRun {
            chunks: chunk_rx,
            outcome: outcome_rx,
        };
        (producer, run)
    }

    /// Receives the next text chunk.
    ///
    /// Returns `None` once the producer has finished (successfully or
    /// not). An `Err` item is terminal: the producer stops after
    /// reporting one.
    pub async fn next_chunk(&mut self) -> Option<Result<String>> {
        self.chunks.recv().await
    }

    /// Resolves the run outcome after the chunk stream has ended.
    ///
    /// Returns `None` when the producer failed before any result object
    /// existed.
    pub async fn into_outcome(self) -> Option<RunOutcome> {
        // recv() must have returned None first; awaiting the oneshot here
        // otherwise blocks until the producer finishes.
        drop(self.chunks);
        self.outcome.await.ok()
    }
}

/// Producer half of a streamed run, held by runner implementations.
pub struct RunProducer {
    chunks: mpsc::Sender<Result<String>>,
    outcome: oneshot::Sender<RunOutcome>,
}

impl RunProducer {
    /// Sends one text chunk to the consumer.
    ///
    /// Returns `false` when the consumer abandoned the run; the producer
    /// should stop all work in that case.
    pub async fn send(&self, chunk: impl Into<String>) -> bool {
        self.chunks.send(Ok(chunk.into())).await.is_ok()
    }

    /// Whether the consumer has abandoned the run.
    pub fn is_abandoned(&self) -> bool {
        self.chunks.is_closed()
    }

    /// Completes the run, reporting the canonical outcome.
    pub fn complete(self, outcome: RunOutcome) {
        // Ignore send failures: the consumer may already be gone.
        let _ = self.outcome.send(outcome);
        // Dropping the chunk sender closes the stream.
    }

    /// Fails the run with no result object.
    ///
    /// The error is delivered as the terminal chunk; no outcome is
    /// reported, so the consumer keeps its pre-run state.
    pub async fn fail(self, err: crate::ParlanceError) {
        let _ = self.chunks.send(Err(err)).await;
    }

    /// Fails the run but reports the partial result accumulated so far.
    pub async fn fail_with_partial(self, err: crate::ParlanceError, outcome: RunOutcome) {
        let _ = self.chunks.send(Err(err)).await;
        let _ = self.outcome.send(outcome);
    }
}
