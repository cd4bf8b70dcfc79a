//! Chat orchestration: sequences one user turn across storage, the model
//! provider and the log extractor.
//!
//! Buffered turn:
//! ```text
//! user msg → store(user) → complete → store(assistant) → workout? → food? → reply
//! ```
//! Streaming turn:
//! ```text
//! user msg → store(user) → workout? → food? → stream tokens ──► client
//!                                                   └─ accumulate → store(assistant) on completion
//! ```
//! The two variants extract logs at different points; both scan only the
//! user's own text, so the extracted records are the same either way.
//! A failing step aborts the rest of the turn; earlier writes stay committed.
//!
//! Store calls go through [`run_blocking`] and never run on a runtime worker.
//!
//! Client disconnect during a streaming turn drops the relay, and with it
//! the upstream token stream, which closes the model connection. The
//! generation is therefore aborted rather than left to finish unobserved;
//! the assistant write is skipped either way.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::extract::{self, ExtractedLogs, FoodFacts, WorkoutFacts};
use crate::llm::{DEFAULT_SYSTEM_PROMPT, LlmProvider, ProviderError, TokenStream};
use crate::store::{
    DEFAULT_USER_ID, FoodEntry, Message, Role, Store, WorkoutEntry, new_id, run_blocking,
};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("generation failed: {0}")]
    Generation(#[from] ProviderError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] AppError),
}

/// Raw reply bytes for the HTTP body, one chunk per token fragment.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

pub struct ChatService {
    store: Arc<Store>,
    llm: LlmProvider,
    system_prompt: String,
}

impl ChatService {
    /// `system_prompt` of `None` selects [`DEFAULT_SYSTEM_PROMPT`].
    pub fn new(store: Arc<Store>, llm: LlmProvider, system_prompt: Option<String>) -> Self {
        Self {
            store,
            llm,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn provider_name(&self) -> &'static str {
        self.llm.name()
    }

    /// Full conversation history, oldest first.
    pub async fn history(&self) -> Result<Vec<Message>, ChatError> {
        Ok(run_blocking(&self.store, "list_messages", |s| s.list_messages()).await?)
    }

    pub async fn workouts(&self) -> Result<Vec<WorkoutEntry>, ChatError> {
        Ok(run_blocking(&self.store, "list_workouts", |s| s.list_workouts()).await?)
    }

    pub async fn food_logs(&self) -> Result<Vec<FoodEntry>, ChatError> {
        Ok(run_blocking(&self.store, "list_food_logs", |s| s.list_food_logs()).await?)
    }

    /// Run one turn with a buffered generation and return the reply text.
    pub async fn buffered_turn(&self, message: &str) -> Result<String, ChatError> {
        require_message(message)?;
        info!(message_len = message.len(), "chat turn received");

        save_message(&self.store, Message::new(Role::User, message)).await?;

        let reply = self.llm.complete(message, &self.system_prompt).await?;
        debug!(reply_len = reply.len(), "reply generated");

        save_message(&self.store, Message::new(Role::Assistant, reply.as_str())).await?;
        self.record_logs(message).await?;

        Ok(reply)
    }

    /// Run one turn with a streaming generation.
    ///
    /// Everything up to opening the upstream stream happens before this
    /// returns, so those failures can still become an error response. The
    /// assistant message is written once the returned stream is drained; if
    /// it is dropped early (client gone) nothing is written.
    pub async fn streaming_turn(&self, message: &str) -> Result<ReplyStream, ChatError> {
        require_message(message)?;
        info!(message_len = message.len(), "streaming chat turn received");

        save_message(&self.store, Message::new(Role::User, message)).await?;
        self.record_logs(message).await?;

        let tokens = self.llm.stream(message, &self.system_prompt).await?;
        Ok(relay(tokens, self.store.clone()))
    }

    /// Scan the user's text and append whichever log records it yields.
    async fn record_logs(&self, text: &str) -> Result<(), ChatError> {
        let ExtractedLogs { workout, food } = extract::scan(text);

        if let Some(facts) = workout {
            info!(
                exercise = %facts.exercise,
                sets = ?facts.sets,
                reps = ?facts.reps,
                weight = ?facts.weight,
                weight_unit = ?facts.weight_unit,
                "detected workout"
            );
            let entry = workout_entry(facts);
            run_blocking(&self.store, "append_workout", move |s| s.append_workout(&entry)).await?;
        }

        if let Some(facts) = food {
            info!(
                food_name = %facts.food_name,
                calories = ?facts.calories,
                protein = ?facts.protein,
                carbs = ?facts.carbs,
                fat = ?facts.fat,
                "detected food"
            );
            let entry = food_entry(facts);
            run_blocking(&self.store, "append_food", move |s| s.append_food(&entry)).await?;
        }

        Ok(())
    }
}

async fn save_message(store: &Arc<Store>, msg: Message) -> Result<(), AppError> {
    run_blocking(store, "append_message", move |s| s.append_message(&msg)).await
}

fn require_message(message: &str) -> Result<(), ChatError> {
    if message.is_empty() {
        return Err(ChatError::Validation("Message is required".into()));
    }
    Ok(())
}

fn workout_entry(facts: WorkoutFacts) -> WorkoutEntry {
    WorkoutEntry {
        id: new_id(),
        user_id: DEFAULT_USER_ID.to_string(),
        exercise: facts.exercise,
        sets: facts.sets,
        reps: facts.reps,
        weight: facts.weight,
        weight_unit: facts.weight_unit,
        duration: facts.duration,
        timestamp: Utc::now(),
    }
}

fn food_entry(facts: FoodFacts) -> FoodEntry {
    FoodEntry {
        id: new_id(),
        user_id: DEFAULT_USER_ID.to_string(),
        food_name: facts.food_name,
        calories: facts.calories,
        protein: facts.protein,
        carbs: facts.carbs,
        fat: facts.fat,
        timestamp: Utc::now(),
    }
}

// ── Streaming relay ───────────────────────────────────────────────────────────

struct Relay {
    tokens: TokenStream,
    reply: String,
    store: Arc<Store>,
    finished: bool,
}

/// Write the accumulated reply. Takes owned values so the relay future
/// stays `Send` across the write.
async fn persist_reply(store: Arc<Store>, reply: String) -> Result<(), ChatError> {
    if reply.is_empty() {
        info!("stream completed with an empty reply, nothing to persist");
        return Ok(());
    }
    let reply_len = reply.len();
    save_message(&store, Message::new(Role::Assistant, reply)).await?;
    info!(reply_len, "stream completed, reply persisted");
    Ok(())
}

impl Drop for Relay {
    fn drop(&mut self) {
        if !self.finished {
            info!(partial_len = self.reply.len(), "reply stream cancelled by client, not persisted");
        }
    }
}

/// Forward each token as a body chunk while accumulating the full reply;
/// persist it when the upstream ends cleanly.
///
/// An upstream failure is passed through as the final `Err` item (aborting
/// the response body) and nothing is persisted.
fn relay(tokens: TokenStream, store: Arc<Store>) -> ReplyStream {
    let state = Relay { tokens, reply: String::new(), store, finished: false };

    let body = futures::stream::unfold(Some(state), |state| async move {
        let mut relay = state?;
        match relay.tokens.next().await {
            Some(Ok(token)) => {
                relay.reply.push_str(&token);
                Some((Ok(Bytes::from(token)), Some(relay)))
            }
            Some(Err(e)) => {
                relay.finished = true;
                error!(error = %e, delivered_len = relay.reply.len(), "reply stream aborted");
                Some((Err(ChatError::from(e)), None))
            }
            None => {
                relay.finished = true;
                let store = Arc::clone(&relay.store);
                match persist_reply(store, std::mem::take(&mut relay.reply)).await {
                    Ok(()) => None,
                    Err(e) => {
                        error!(error = %e, "failed to persist streamed reply");
                        Some((Err(e), None))
                    }
                }
            }
        }
    });

    Box::pin(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;

    fn service(reply: &str) -> ChatService {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let llm = LlmProvider::Dummy(DummyProvider::new(Some(reply.to_string())));
        ChatService::new(store, llm, None)
    }

    async fn drain(mut stream: ReplyStream) -> Result<String, ChatError> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn buffered_turn_persists_turn_and_logs() {
        let svc = service("Great job!");
        let reply = svc
            .buffered_turn("I did workout: bench press, sets: 3, reps: 10, weight: 60kg")
            .await
            .unwrap();
        assert_eq!(reply, "Great job!");

        let messages = svc.history().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Great job!");

        let workouts = svc.store().list_workouts().unwrap();
        assert_eq!(workouts.len(), 1);
        assert_eq!(workouts[0].exercise, "bench press");
        assert_eq!(workouts[0].user_id, DEFAULT_USER_ID);
        assert!(svc.store().list_food_logs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_writes() {
        let svc = service("unused");
        let err = svc.buffered_turn("").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        let err = svc.streaming_turn("").await.err().unwrap();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(svc.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn streaming_turn_forwards_and_persists() {
        let svc = service("Nice meal choice");
        let stream = svc
            .streaming_turn("food: oatmeal, calories: 300, protein: 10g")
            .await
            .unwrap();

        // user message and food log are written before any token
        assert_eq!(svc.history().await.unwrap().len(), 1);
        assert_eq!(svc.store().list_food_logs().unwrap()[0].food_name, "oatmeal");

        assert_eq!(drain(stream).await.unwrap(), "Nice meal choice");

        let messages = svc.history().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Nice meal choice");
    }

    #[tokio::test]
    async fn dropped_stream_skips_assistant_write() {
        let svc = service("one two three");
        let mut stream = svc.streaming_turn("hi").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"one ");
        drop(stream);

        let messages = svc.history().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn relay_accumulates_tokens() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens: TokenStream = Box::pin(futures::stream::iter(vec![
            Ok("A".to_string()),
            Ok("B".to_string()),
        ]));
        assert_eq!(drain(relay(tokens, store.clone())).await.unwrap(), "AB");
        assert_eq!(store.list_messages().unwrap()[0].content, "AB");
    }

    #[tokio::test]
    async fn relay_upstream_error_aborts_without_persisting() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens: TokenStream = Box::pin(futures::stream::iter(vec![
            Ok("A".to_string()),
            Err(ProviderError::Stream("connection reset".into())),
        ]));
        let mut body = relay(tokens, store.clone());
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"A");
        assert!(matches!(body.next().await, Some(Err(ChatError::Generation(_)))));
        assert!(body.next().await.is_none());
        assert!(store.list_messages().unwrap().is_empty());
    }

    #[tokio::test]
    async fn relay_empty_reply_is_not_persisted() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens: TokenStream = Box::pin(futures::stream::iter(vec![Ok(String::new())]));
        assert_eq!(drain(relay(tokens, store.clone())).await.unwrap(), "");
        assert!(store.list_messages().unwrap().is_empty());
    }

    #[test]
    fn custom_system_prompt_overrides_default() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let svc = ChatService::new(store, LlmProvider::Dummy(DummyProvider::default()), Some("x".into()));
        assert_eq!(svc.system_prompt, "x");
        assert_eq!(svc.provider_name(), "dummy");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_turns_share_one_store() {
        let svc = Arc::new(service("ok"));
        let turns = (0..8).map(|i| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.buffered_turn(&format!("workout: row {i}")).await })
        });
        for turn in futures::future::join_all(turns).await {
            assert_eq!(turn.unwrap().unwrap(), "ok");
        }

        assert_eq!(svc.history().await.unwrap().len(), 16);
        assert_eq!(svc.workouts().await.unwrap().len(), 8);
        assert!(svc.food_logs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_relay_drops_upstream_stream() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Upstream(Arc<AtomicBool>);
        impl Drop for Upstream {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let closed = Arc::new(AtomicBool::new(false));
        let guard = Upstream(Arc::clone(&closed));
        let tokens: TokenStream = Box::pin(
            futures::stream::iter(vec![Ok("A".to_string())])
                .chain(futures::stream::pending())
                .map(move |t| {
                    let _held = &guard;
                    t
                }),
        );

        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut body = relay(tokens, store.clone());
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"A");
        assert!(!closed.load(Ordering::SeqCst));

        drop(body);
        assert!(closed.load(Ordering::SeqCst));
        assert!(store.list_messages().unwrap().is_empty());
    }
}
