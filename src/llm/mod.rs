//! Model client abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations; add a
//! variant + module in `providers/` for each additional backend.
//!
//! Two modes per provider:
//! - [`LlmProvider::complete`]: buffered, one request, one complete string.
//! - [`LlmProvider::stream`]: a lazy [`TokenStream`] of text fragments in
//!   arrival order. Dropping the stream closes the upstream connection, which
//!   aborts the generation on the model server instead of letting it finish.

pub mod providers;

use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

/// Model requested from the inference service. Not configurable.
pub const MODEL_NAME: &str = "llama3.2";

/// System prompt used when the caller does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Workout Buddi, an AI fitness assistant. \
You help users track their workouts and diet. You provide motivational advice and fitness tips. \
You can log workouts and food intake when users mention them.";

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    /// Transport failure before a response arrived.
    #[error("provider request failed: {0}")]
    Request(String),
    /// Non-success HTTP status. `body` is kept for logs only.
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Buffered response body was not the expected JSON document.
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    /// The token stream broke off: transport error or an upstream error line.
    #[error("token stream failed: {0}")]
    Stream(String),
}

/// Finite, non-restartable sequence of token fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends. Cheap to clone.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Ollama(providers::ollama::OllamaProvider),
    Dummy(providers::dummy::DummyProvider),
}

impl LlmProvider {
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Ollama(_) => "ollama",
            LlmProvider::Dummy(_) => "dummy",
        }
    }

    /// Send `prompt` with `system` and return the full reply text verbatim.
    pub async fn complete(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Ollama(p) => p.complete(prompt, system).await,
            LlmProvider::Dummy(p) => p.complete(prompt, system).await,
        }
    }

    /// Start a streaming generation. Errors here happen before any token is
    /// produced; later failures arrive as an `Err` item that ends the stream.
    pub async fn stream(&self, prompt: &str, system: &str) -> Result<TokenStream, ProviderError> {
        match self {
            LlmProvider::Ollama(p) => p.stream(prompt, system).await,
            LlmProvider::Dummy(p) => p.stream(prompt, system).await,
        }
    }

    /// Lightweight reachability probe.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            LlmProvider::Ollama(p) => p.ping().await,
            LlmProvider::Dummy(_) => Ok(()),
        }
    }
}
