//! External interpretation providers and the fallback chain in front of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::budget::CallBudget;
use super::prompt::Prompt;
use crate::config::{InterpreterConfig, ProviderConfig};
use crate::context::CancelToken;
use crate::error::{ConfigError, ProviderError};

/// Raw text returned by a provider, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub provider: String,
    pub text: String,
}

/// An injected completion backend.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<RawResponse, ProviderError>;
}

/// Any server speaking the `/chat/completions` protocol.
pub struct OpenAiCompatibleProvider {
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, base_url: &str, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: None,
            system_prompt: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Build from a config entry, resolving the API key from the environment.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let mut provider = Self::new(&config.name, &config.base_url, &config.model);
        if let Some(var) = &config.api_key_env {
            let key = std::env::var(var).map_err(|_| {
                ConfigError::invalid(
                    format!("providers.{}.api_key_env", config.name),
                    format!("environment variable {} is not set", var),
                )
            })?;
            provider = provider.with_api_key(key);
        }
        if let Some(prompt) = &config.system_prompt {
            provider = provider.with_system_prompt(prompt);
        }
        Ok(provider)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth,
        429 => ProviderError::RateLimited,
        _ => {
            let snippet: String = body.chars().take(200).collect();
            ProviderError::Unavailable(format!("{}: {}", status, snippet))
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &Prompt) -> Result<RawResponse, ProviderError> {
        let system = self.system_prompt.as_deref().unwrap_or(&prompt.system);
        let messages = vec![
            json!({"role": "system", "content": system}),
            json!({"role": "user", "content": prompt.user}),
        ];
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "response_format": {"type": "json_object"},
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Unavailable(format!("malformed completion envelope: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::Unavailable("completion had no content".to_string()))?;

        Ok(RawResponse {
            provider: self.name.clone(),
            text: content,
        })
    }
}

/// Ordered providers sharing one call budget.
///
/// Each provider gets `max_retries` extra attempts with doubling backoff on
/// retryable errors before the next provider is tried.
pub struct ProviderChain {
    providers: Vec<Arc<dyn AiProvider>>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    budget: CallBudget,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn AiProvider>>, config: &InterpreterConfig) -> Self {
        Self {
            providers,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff: config.backoff(),
            budget: CallBudget::new(config.max_calls_per_run, config.max_concurrent_calls),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    /// Call providers in order until one answers.
    pub async fn complete(
        &self,
        prompt: &Prompt,
        cancel: &CancelToken,
    ) -> Result<RawResponse, ProviderError> {
        if self.providers.is_empty() {
            return Err(ProviderError::NoProviders);
        }
        let _slot = tokio::select! {
            slot = self.budget.acquire() => slot?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let mut last_error = ProviderError::NoProviders;
        for provider in &self.providers {
            for attempt in 0..=self.max_retries {
                if cancel.is_cancelled() {
                    return Err(ProviderError::Cancelled);
                }
                self.budget.try_spend()?;
                debug!(provider = provider.name(), attempt, "calling provider");

                let result = tokio::select! {
                    r = tokio::time::timeout(self.timeout, provider.complete(prompt)) => {
                        r.unwrap_or(Err(ProviderError::Timeout(self.timeout)))
                    }
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                };

                let error = match result {
                    Ok(response) => return Ok(response),
                    Err(e) => e,
                };
                warn!(provider = provider.name(), attempt, error = %error, "provider call failed");

                let retry = error.is_retryable() && attempt < self.max_retries;
                last_error = error;
                if !retry {
                    break;
                }
                let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                }
            }
        }
        Err(last_error)
    }
}
