//! Ollama `/api/generate` provider.
//!
//! Buffered mode posts with `stream: false` and returns the `response` field.
//! Streaming mode posts with `stream: true` and decodes the newline-delimited
//! JSON body into a [`TokenStream`]: one token per parsed line, malformed
//! lines skipped, stream end = transport end. No timeout and no retry.

use std::io;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::StreamReader;
use tracing::{debug, error, trace, warn};

use crate::llm::{MODEL_NAME, ProviderError, TokenStream};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    api_base_url: String,
    temperature: f32,
    top_p: f32,
}

impl OllamaProvider {
    /// `api_base_url` is the server root, e.g. `http://localhost:11434`.
    pub fn new(api_base_url: String, temperature: f32, top_p: f32) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        Ok(Self { client, api_base_url, temperature, top_p })
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.api_base_url)
    }

    fn payload<'a>(&self, prompt: &'a str, system: &'a str, stream: bool) -> GenerateRequest<'a> {
        GenerateRequest {
            model: MODEL_NAME,
            prompt,
            system,
            stream,
            options: GenerateOptions { temperature: self.temperature, top_p: self.top_p },
        }
    }

    /// Any HTTP answer from `/api/tags` counts as reachable.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.client
            .get(format!("{}/api/tags", self.api_base_url))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Request(format!("unreachable: {e}")))
    }

    pub async fn complete(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        let url = self.generate_url();
        debug!(%url, model = MODEL_NAME, prompt_len = prompt.len(), "sending generate request");

        let response = self
            .client
            .post(&url)
            .json(&self.payload(prompt, system, false))
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "generate request failed (transport)");
                ProviderError::Request(e.to_string())
            })?;

        let response = check_status(response).await?;

        let parsed = response.json::<GenerateResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize generate response");
            ProviderError::Decode(e.to_string())
        })?;

        debug!(reply_len = parsed.response.len(), done = parsed.done, "received generate response");
        Ok(parsed.response)
    }

    pub async fn stream(&self, prompt: &str, system: &str) -> Result<TokenStream, ProviderError> {
        let url = self.generate_url();
        debug!(%url, model = MODEL_NAME, prompt_len = prompt.len(), "sending streaming generate request");

        let response = self
            .client
            .post(&url)
            .json(&self.payload(prompt, system, true))
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "streaming generate request failed (transport)");
                ProviderError::Request(e.to_string())
            })?;

        let response = check_status(response).await?;
        Ok(decode_token_stream(response.bytes_stream()))
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

/// One NDJSON line of a streamed generation.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// Return the response if successful, or `Status` carrying the body text.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    error!(%status, %body, "generate request returned HTTP error");
    Err(ProviderError::Status { status: status.as_u16(), body })
}

// ── NDJSON token decoding ─────────────────────────────────────────────────────

enum LineOutcome {
    Token(String),
    Skip,
    Failed(String),
}

fn decode_line(line: &[u8]) -> LineOutcome {
    if line.iter().all(u8::is_ascii_whitespace) {
        return LineOutcome::Skip;
    }
    match serde_json::from_slice::<GenerateChunk>(line) {
        Ok(GenerateChunk { error: Some(msg), .. }) => LineOutcome::Failed(msg),
        Ok(GenerateChunk { response: Some(token), done, .. }) => {
            trace!(token_len = token.len(), done, "stream token");
            LineOutcome::Token(token)
        }
        Ok(_) => {
            warn!(line = %String::from_utf8_lossy(line), "stream line without response field, skipping");
            LineOutcome::Skip
        }
        Err(e) => {
            warn!(error = %e, line = %String::from_utf8_lossy(line), "malformed stream line, skipping");
            LineOutcome::Skip
        }
    }
}

/// Turn a raw NDJSON byte stream into a [`TokenStream`].
///
/// Chunk boundaries need not align with lines; a final line without a
/// trailing newline is still decoded. A transport error or an upstream
/// `{"error": ..}` line yields one `Err` and ends the stream; tokens already
/// yielded stay delivered and no completion marker is synthesized.
pub fn decode_token_stream<S, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let reader = StreamReader::new(Box::pin(bytes.map_err(io::Error::other)));
    let lines = FramedRead::new(reader, AnyDelimiterCodec::new(b"\n".to_vec(), Vec::new()));

    let tokens = futures::stream::unfold(Some(lines), |state| async move {
        let mut lines = state?;
        loop {
            match lines.next().await? {
                Ok(line) => match decode_line(&line) {
                    LineOutcome::Token(token) => return Some((Ok(token), Some(lines))),
                    LineOutcome::Skip => continue,
                    LineOutcome::Failed(msg) => {
                        error!(error = %msg, "upstream reported an error mid-stream");
                        return Some((Err(ProviderError::Stream(msg)), None));
                    }
                },
                Err(e) => {
                    error!(error = %e, "token stream transport error");
                    return Some((Err(ProviderError::Stream(e.to_string())), None));
                }
            }
        }
    });

    Box::pin(tokens)
}
