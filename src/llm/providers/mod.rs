//! Provider implementations.
//!
//! `build(config)` is the factory, called once at startup.

pub mod dummy;
pub mod ollama;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct the configured `LlmProvider`.
pub fn build(config: &LlmConfig) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "ollama" => {
            let o = &config.ollama;
            let p = ollama::OllamaProvider::new(o.api_base_url.clone(), o.temperature, o.top_p)?;
            Ok(LlmProvider::Ollama(p))
        }
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider::new(config.dummy.reply.clone()))),
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn builds_dummy_and_ollama() {
        let mut cfg = Config::test_default(std::path::Path::new("/tmp"), None).llm;
        assert_eq!(build(&cfg).unwrap().name(), "dummy");

        cfg.provider = "ollama".into();
        assert_eq!(build(&cfg).unwrap().name(), "ollama");
    }

    #[test]
    fn unknown_provider_errors() {
        let mut cfg = Config::test_default(std::path::Path::new("/tmp"), None).llm;
        cfg.provider = "gpt".into();
        let err = build(&cfg).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(ref p) if p == "gpt"));
    }
}
