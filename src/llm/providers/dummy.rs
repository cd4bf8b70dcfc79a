//! Dummy provider. Replies with fixed text, or echoes the prompt prefixed
//! with `[echo]`. Streams its reply word by word. Used to exercise the chat
//! pipeline without a model server.

use crate::llm::{ProviderError, TokenStream};

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    reply: Option<String>,
}

impl DummyProvider {
    pub fn new(reply: Option<String>) -> Self {
        Self { reply }
    }

    fn reply_for(&self, prompt: &str) -> String {
        match &self.reply {
            Some(text) => text.clone(),
            None => format!("[echo] {prompt}"),
        }
    }

    pub async fn complete(&self, prompt: &str, _system: &str) -> Result<String, ProviderError> {
        Ok(self.reply_for(prompt))
    }

    pub async fn stream(&self, prompt: &str, _system: &str) -> Result<TokenStream, ProviderError> {
        let tokens: Vec<Result<String, ProviderError>> = self
            .reply_for(prompt)
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(tokens)))
    }
}
