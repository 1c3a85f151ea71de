//! Backend selection: the closed set of model backends and how the
//! configuration picks one.

use agentflux_config::AppConfig;
use agentflux_core::adapter::{Adapter, ChatOptions, ChatRequest, ChunkReceiver, Embed, Summarize};
use agentflux_core::error::AdapterError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::anthropic::AnthropicAdapter;
use crate::openai_compat::OpenAiCompatAdapter;

/// Every backend the runtime can drive.
pub enum Backend {
    OpenAiCompat(OpenAiCompatAdapter),
    Anthropic(AnthropicAdapter),
}

impl Backend {
    fn inner(&self) -> &dyn Adapter {
        match self {
            Self::OpenAiCompat(adapter) => adapter,
            Self::Anthropic(adapter) => adapter,
        }
    }
}

#[async_trait]
impl Adapter for Backend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, AdapterError> {
        self.inner().chat_stream(request, cancel).await
    }

    fn summarizer(&self) -> Option<&dyn Summarize> {
        self.inner().summarizer()
    }

    fn embedder(&self) -> Option<&dyn Embed> {
        self.inner().embedder()
    }
}

/// Build the configured backend.
pub fn build_from_config(config: &AppConfig) -> Result<Backend, AdapterError> {
    let adapter = &config.adapter;
    let provider = adapter.provider.as_str();
    let defaults = ChatOptions {
        model: None,
        temperature: Some(adapter.temperature),
        max_tokens: Some(adapter.max_tokens),
        stop: Vec::new(),
    };
    let capacity = config.agent.channel_capacity;

    let api_key = match (&adapter.api_key, requires_key(provider)) {
        (Some(key), _) => key.clone(),
        (None, false) => provider.to_string(),
        (None, true) => {
            return Err(AdapterError::NotConfigured(format!(
                "no API key for provider '{provider}'"
            )));
        }
    };

    let backend = if provider == "anthropic" {
        let mut anthropic = AnthropicAdapter::new(api_key, &adapter.model)?;
        if let Some(base_url) = &adapter.base_url {
            anthropic = anthropic.with_base_url(base_url);
        }
        Backend::Anthropic(anthropic.with_defaults(defaults).with_channel_capacity(capacity))
    } else {
        let base_url = match &adapter.base_url {
            Some(url) => url.clone(),
            None => default_base_url(provider)
                .ok_or_else(|| {
                    AdapterError::NotConfigured(format!(
                        "unknown provider '{provider}' and no base_url set"
                    ))
                })?
                .to_string(),
        };
        Backend::OpenAiCompat(
            OpenAiCompatAdapter::new(provider, base_url, api_key, &adapter.model)?
                .with_defaults(defaults)
                .with_channel_capacity(capacity),
        )
    };

    info!(provider = %backend.name(), model = %adapter.model, "Model backend ready");
    Ok(backend)
}

/// Local servers accept any key.
fn requires_key(provider: &str) -> bool {
    !matches!(provider, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    Some(match provider_name {
        "openai" => crate::openai_compat::OPENAI_BASE_URL,
        "openrouter" => crate::openai_compat::OPENROUTER_BASE_URL,
        "ollama" => crate::openai_compat::OLLAMA_BASE_URL,
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, key: Option<&str>) -> AppConfig {
        let mut config = AppConfig::default();
        config.adapter.provider = provider.into();
        config.adapter.api_key = key.map(str::to_string);
        config
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("made-up").is_none());
    }

    #[test]
    fn builds_openai_backend() {
        let backend = build_from_config(&config("openai", Some("sk-test"))).unwrap();
        assert!(matches!(backend, Backend::OpenAiCompat(_)));
        assert_eq!(backend.name(), "openai");
        assert!(backend.capabilities().embed);
    }

    #[test]
    fn builds_anthropic_backend_with_base_url() {
        let mut cfg = config("anthropic", Some("sk-ant"));
        cfg.adapter.base_url = Some("http://proxy.local".into());
        match build_from_config(&cfg).unwrap() {
            Backend::Anthropic(adapter) => assert_eq!(adapter.base_url(), "http://proxy.local"),
            _ => panic!("expected anthropic backend"),
        }
    }

    #[test]
    fn missing_key_is_rejected_except_for_local_servers() {
        assert!(matches!(
            build_from_config(&config("openai", None)),
            Err(AdapterError::NotConfigured(_))
        ));
        assert!(build_from_config(&config("ollama", None)).is_ok());
    }

    #[test]
    fn unknown_provider_needs_base_url() {
        assert!(build_from_config(&config("acme", Some("k"))).is_err());

        let mut cfg = config("acme", Some("k"));
        cfg.adapter.base_url = Some("https://llm.acme.test/v1".into());
        let backend = build_from_config(&cfg).unwrap();
        assert_eq!(backend.name(), "acme");
    }
}
