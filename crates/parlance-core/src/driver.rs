//! Conversation driver.
//!
//! The driver receives one transcribed utterance per turn, maintains the
//! conversation history, and either answers with the fixed secret-word
//! confirmation or delegates the turn to a [`Runner`] and re-yields its
//! streamed response text.
//!
//! State rules:
//!
//! - The history is superseded wholesale by the runner's canonical
//!   history after each delegation; it is never merged.
//! - The active persona is an opaque handle updated only from the
//!   runner's reported result, never computed locally.
//! - Turns must be serialized; `process` borrows the driver mutably, so
//!   the borrow checker enforces that a second turn cannot start while a
//!   [`TurnStream`] from the previous one is still alive.

use std::sync::Arc;

use tracing::error;

use crate::conversation::Turn;
use crate::error::Result;
use crate::persona::PersonaId;
use crate::runner::{Runner, StreamedRun};

/// Fixed confirmation emitted when the transcription contains the secret
/// word.
pub const SECRET_WORD_REPLY: &str = "You guessed the secret word!";

/// Fixed warning emitted when consuming the delegated stream fails.
pub const STREAM_FAILURE_REPLY: &str = "⚠️ An error occurred while processing the response.";

/// Callback invoked with the raw transcription at the start of each turn.
///
/// Errors returned here are caller bugs by definition; the driver never
/// swallows them.
pub type StartCallback = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Drives one conversation session.
///
/// Created once per session; holds no resources requiring explicit
/// release.
pub struct ConversationDriver {
    runner: Arc<dyn Runner>,
    history: Vec<Turn>,
    active_persona: PersonaId,
    secret_word: String,
    on_start: StartCallback,
}

impl ConversationDriver {
    /// Creates a driver for a new session.
    ///
    /// # Arguments
    ///
    /// * `runner` - Backend that executes delegated turns
    /// * `initial_persona` - Handle of the persona that handles the first turn
    /// * `secret_word` - Non-empty secret word; stored lower-cased and
    ///   compared case-insensitively against each transcription
    /// * `on_start` - Callback invoked with the raw transcription at the
    ///   beginning of each turn
    pub fn new(
        runner: Arc<dyn Runner>,
        initial_persona: impl Into<PersonaId>,
        secret_word: impl Into<String>,
        on_start: StartCallback,
    ) -> Self {
        Self {
            runner,
            history: Vec::new(),
            active_persona: initial_persona.into(),
            secret_word: secret_word.into().to_lowercase(),
            on_start,
        }
    }

    /// Returns the conversation history.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Returns the handle of the persona that will handle the next turn.
    pub fn active_persona(&self) -> &PersonaId {
        &self.active_persona
    }

    /// Returns the normalized secret word.
    pub fn secret_word(&self) -> &str {
        &self.secret_word
    }

    /// Processes one transcribed utterance.
    ///
    /// Invokes the start callback, appends the user turn, and returns a
    /// stream of response chunks. A callback error propagates and aborts
    /// the turn before the user turn is appended; every other failure is
    /// degraded into the fixed warning chunk inside the returned stream.
    pub async fn process(&mut self, transcription: &str) -> Result<TurnStream<'_>> {
        (self.on_start)(transcription)?;

        self.history.push(Turn::user(transcription));

        // Secret-word shortcut: answer locally, no delegation, persona
        // unchanged.
        if transcription.to_lowercase().contains(&self.secret_word) {
            self.history.push(Turn::assistant(SECRET_WORD_REPLY));
            return Ok(TurnStream {
                driver: self,
                state: TurnState::Fixed(SECRET_WORD_REPLY.to_string()),
            });
        }

        let state = match self
            .runner
            .run_streamed(&self.active_persona, &self.history)
            .await
        {
            Ok(run) => TurnState::Streaming(run),
            Err(err) => {
                error!(error = %err, "failed to start delegated run");
                TurnState::Fixed(STREAM_FAILURE_REPLY.to_string())
            }
        };

        Ok(TurnStream {
            driver: self,
            state,
        })
    }
}

/// Lazy, single-consumer stream of response chunks for one turn.
///
/// Chunks are delivered in the order the underlying stream produced
/// them. Dropping the stream before exhaustion releases the delegated
/// run; the runner's producer observes the closed channel and stops.
pub struct TurnStream<'a> {
    driver: &'a mut ConversationDriver,
    state: TurnState,
}

enum TurnState {
    /// One canned chunk, then done.
    Fixed(String),
    /// Pass-through of a delegated run.
    Streaming(StreamedRun),
    Done,
}

impl TurnStream<'_> {
    /// Yields the next response chunk, or `None` when the turn is over.
    ///
    /// A mid-stream runner failure is logged and converted into the fixed
    /// warning chunk; the stream terminates after it.
    pub async fn next_chunk(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, TurnState::Done) {
            TurnState::Fixed(text) => Some(text),
            TurnState::Streaming(mut run) => match run.next_chunk().await {
                Some(Ok(chunk)) => {
                    self.state = TurnState::Streaming(run);
                    Some(chunk)
                }
                Some(Err(err)) => {
                    error!(error = %err, "delegated stream failed");
                    self.supersede(run).await;
                    Some(STREAM_FAILURE_REPLY.to_string())
                }
                None => {
                    self.supersede(run).await;
                    None
                }
            },
            TurnState::Done => None,
        }
    }

    /// Replaces driver state with the run's canonical result, if one
    /// exists. A run that failed before producing any result leaves the
    /// driver untouched.
    async fn supersede(&mut self, run: StreamedRun) {
        if let Some(outcome) = run.into_outcome().await {
            self.driver.history = outcome.history;
            self.driver.active_persona = outcome.last_persona;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::TurnRole;
    use crate::error::ParlanceError;
    use crate::runner::RunOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Runner stub that replays a fixed script and records every call.
    struct ScriptedRunner {
        chunks: Vec<String>,
        outcome: Option<RunOutcome>,
        fail: bool,
        calls: Mutex<Vec<(PersonaId, Vec<Turn>)>>,
    }

    impl ScriptedRunner {
        fn completing(chunks: &[&str], outcome: RunOutcome) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                outcome: Some(outcome),
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_after(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                outcome: None,
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_with_partial(chunks: &[&str], outcome: RunOutcome) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                outcome: Some(outcome),
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(PersonaId, Vec<Turn>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn run_streamed(
            &self,
            persona: &PersonaId,
            history: &[Turn],
        ) -> Result<StreamedRun> {
            self.calls
                .lock()
                .unwrap()
                .push((persona.clone(), history.to_vec()));

            let (producer, run) = StreamedRun::channel(8);
            let chunks = self.chunks.clone();
            let outcome = self.outcome.clone();
            let fail = self.fail;
            tokio::spawn(async move {
                for chunk in chunks {
                    if !producer.send(chunk).await {
                        return;
                    }
                }
                match (fail, outcome) {
                    (false, Some(outcome)) => producer.complete(outcome),
                    (true, Some(outcome)) => {
                        producer
                            .fail_with_partial(
                                ParlanceError::runner("scripted failure"),
                                outcome,
                            )
                            .await
                    }
                    (_, None) => {
                        producer.fail(ParlanceError::runner("scripted failure")).await
                    }
                }
            });
            Ok(run)
        }
    }

    fn noop_callback() -> StartCallback {
        Box::new(|_| Ok(()))
    }

    async fn collect(stream: &mut TurnStream<'_>) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_secret_word_yields_single_fixed_chunk() {
        let runner = Arc::new(ScriptedRunner::completing(
            &[],
            RunOutcome {
                history: vec![],
                last_persona: PersonaId::new("other"),
            },
        ));
        let mut driver = ConversationDriver::new(
            runner.clone(),
            "assistant",
            "banana",
            noop_callback(),
        );

        let persona_before = driver.active_persona().clone();
        let mut stream = driver.process("the secret is banana").await.unwrap();
        let chunks = collect(&mut stream).await;
        drop(stream);

        assert_eq!(chunks, vec![SECRET_WORD_REPLY.to_string()]);
        assert_eq!(driver.active_persona(), &persona_before);
        assert!(runner.calls().is_empty(), "no delegation on the secret path");
    }

    #[tokio::test]
    async fn test_case_insensitive_secret_match() {
        let runner = Arc::new(ScriptedRunner::completing(
            &[],
            RunOutcome {
                history: vec![],
                last_persona: PersonaId::new("assistant"),
            },
        ));
        let mut driver =
            ConversationDriver::new(runner.clone(), "assistant", "Banana", noop_callback());

        let mut stream = driver.process("I found a BANANA today").await.unwrap();
        let chunks = collect(&mut stream).await;
        drop(stream);

        assert_eq!(chunks, vec![SECRET_WORD_REPLY.to_string()]);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delegation_passes_chunks_through_in_order() {
        let canonical = vec![Turn::user("hello"), Turn::assistant("c1c2c3")];
        let runner = Arc::new(ScriptedRunner::completing(
            &["c1", "c2", "c3"],
            RunOutcome {
                history: canonical.clone(),
                last_persona: PersonaId::new("english"),
            },
        ));
        let mut driver =
            ConversationDriver::new(runner.clone(), "assistant", "banana", noop_callback());

        let mut stream = driver.process("hello").await.unwrap();
        let chunks = collect(&mut stream).await;
        drop(stream);

        assert_eq!(chunks, vec!["c1", "c2", "c3"]);
        // Canonical history supersedes, not raw turns appended locally.
        assert_eq!(driver.history(), canonical.as_slice());
        assert_eq!(driver.active_persona(), &PersonaId::new("english"));

        // The runner saw the pre-delegation history including the new
        // user turn.
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PersonaId::new("assistant"));
        assert_eq!(calls[0].1, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn test_callback_runs_once_before_any_chunk() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        let callback: StartCallback = Box::new(move |transcription| {
            seen_in_callback
                .lock()
                .unwrap()
                .push(transcription.to_string());
            Ok(())
        });

        let runner = Arc::new(ScriptedRunner::completing(
            &["reply"],
            RunOutcome {
                history: vec![],
                last_persona: PersonaId::new("assistant"),
            },
        ));
        let mut driver = ConversationDriver::new(runner, "assistant", "banana", callback);

        let mut stream = driver.process("What Is The Weather?").await.unwrap();
        // Callback already ran, before the first chunk was requested.
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["What Is The Weather?".to_string()]
        );

        let _ = collect(&mut stream).await;
        drop(stream);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_callback_error_propagates_and_leaves_history_untouched() {
        let callback: StartCallback =
            Box::new(|_| Err(ParlanceError::callback("instrumentation bug")));
        let runner = Arc::new(ScriptedRunner::completing(
            &["never"],
            RunOutcome {
                history: vec![],
                last_persona: PersonaId::new("assistant"),
            },
        ));
        let mut driver = ConversationDriver::new(runner.clone(), "assistant", "banana", callback);

        let err = match driver.process("hello").await {
            Ok(_) => panic!("callback error must abort the turn"),
            Err(err) => err,
        };
        assert!(err.is_callback());
        assert!(driver.history().is_empty(), "user turn must not be appended");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_degrades_to_warning_chunk() {
        let runner = Arc::new(ScriptedRunner::failing_after(&["c1"]));
        let mut driver =
            ConversationDriver::new(runner.clone(), "assistant", "banana", noop_callback());

        let mut stream = driver.process("hello").await.unwrap();
        let chunks = collect(&mut stream).await;
        drop(stream);

        assert_eq!(chunks, vec!["c1".to_string(), STREAM_FAILURE_REPLY.to_string()]);
        // No result object existed, so local state stays as it was after
        // the user turn was appended.
        assert_eq!(driver.history().to_vec(), vec![Turn::user("hello")]);
        assert_eq!(driver.active_persona(), &PersonaId::new("assistant"));
    }

    #[tokio::test]
    async fn test_partial_outcome_supersedes_state_on_failure() {
        let partial = vec![Turn::user("hello"), Turn::assistant("c1")];
        let runner = Arc::new(ScriptedRunner::failing_with_partial(
            &["c1"],
            RunOutcome {
                history: partial.clone(),
                last_persona: PersonaId::new("english"),
            },
        ));
        let mut driver =
            ConversationDriver::new(runner, "assistant", "banana", noop_callback());

        let mut stream = driver.process("hello").await.unwrap();
        let chunks = collect(&mut stream).await;
        drop(stream);

        assert_eq!(chunks, vec!["c1".to_string(), STREAM_FAILURE_REPLY.to_string()]);
        // A partial result still supersedes wholesale, same as a
        // successful run.
        assert_eq!(driver.history(), partial.as_slice());
        assert_eq!(driver.active_persona(), &PersonaId::new("english"));
    }

    #[tokio::test]
    async fn test_repeated_secret_turns_append_chronologically() {
        let runner = Arc::new(ScriptedRunner::completing(
            &[],
            RunOutcome {
                history: vec![],
                last_persona: PersonaId::new("assistant"),
            },
        ));
        let mut driver =
            ConversationDriver::new(runner, "assistant", "banana", noop_callback());
        let persona_before = driver.active_persona().clone();

        for input in ["banana one", "banana two"] {
            let mut stream = driver.process(input).await.unwrap();
            let chunks = collect(&mut stream).await;
            drop(stream);
            assert_eq!(chunks, vec![SECRET_WORD_REPLY.to_string()]);
        }

        let roles: Vec<TurnRole> = driver.history().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                TurnRole::User,
                TurnRole::Assistant,
                TurnRole::User,
                TurnRole::Assistant
            ]
        );
        assert_eq!(driver.history()[0].content, "banana one");
        assert_eq!(driver.history()[2].content, "banana two");
        assert_eq!(driver.active_persona(), &persona_before);
    }

    #[tokio::test]
    async fn test_empty_transcription_still_delegates() {
        let runner = Arc::new(ScriptedRunner::completing(
            &["ok"],
            RunOutcome {
                history: vec![Turn::user(""), Turn::assistant("ok")],
                last_persona: PersonaId::new("assistant"),
            },
        ));
        let mut driver =
            ConversationDriver::new(runner.clone(), "assistant", "banana", noop_callback());

        let mut stream = driver.process("").await.unwrap();
        let chunks = collect(&mut stream).await;
        drop(stream);

        assert_eq!(chunks, vec!["ok".to_string()]);
        let calls = runner.calls();
        assert_eq!(calls[0].1, vec![Turn::user("")]);
    }

    #[tokio::test]
    async fn test_early_drop_abandons_the_run() {
        let runner = Arc::new(ScriptedRunner::completing(
            &["c1", "c2", "c3"],
            RunOutcome {
                history: vec![],
                last_persona: PersonaId::new("assistant"),
            },
        ));
        let mut driver =
            ConversationDriver::new(runner, "assistant", "banana", noop_callback());

        let mut stream = driver.process("hello").await.unwrap();
        assert_eq!(stream.next_chunk().await.as_deref(), Some("c1"));
        drop(stream);

        // The run never completed, so the local user turn is still there.
        assert_eq!(driver.history().to_vec(), vec![Turn::user("hello")]);
    }
}
