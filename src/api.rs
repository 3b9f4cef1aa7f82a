//! Chat-completion client for the two supported LLM providers.
//!
//! Provider selection is a tagged switch on the endpoint: any endpoint
//! containing `"siliconflow"` is treated as SiliconFlow, everything else as
//! DeepSeek. Each provider has its own key environment variable, default
//! model, and extra payload fields:
//!
//! | Provider | Key env | Default model | Extra payload |
//! |----------|---------|---------------|---------------|
//! | SiliconFlow | `SF_KEY` | `moonshotai/Kimi-K2-Instruct` | `temperature: 0.2, top_p: 0.7` |
//! | DeepSeek | `DS_KEY` | `deepseek-chat` (`DS_MODEL`) | — |
//!
//! The client performs exactly one request per call with a 300-second
//! wall-clock budget and never retries; callers own retry policy. Errors
//! are classified into a typed taxonomy so callers can distinguish
//! transient conditions (retryable) from permanent ones.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Default DeepSeek endpoint when `DS_EP` is unset.
pub const DEFAULT_DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/v1";

/// Per-call wall-clock budget.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// The supported chat-completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    SiliconFlow,
    DeepSeek,
}

impl Provider {
    /// Detect the provider from an endpoint URL.
    pub fn detect(endpoint: &str) -> Provider {
        if endpoint.contains("siliconflow") {
            Provider::SiliconFlow
        } else {
            Provider::DeepSeek
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::SiliconFlow => "SiliconFlow",
            Provider::DeepSeek => "DeepSeek",
        }
    }

    /// Environment variable holding the bearer key.
    pub fn key_env(&self) -> &'static str {
        match self {
            Provider::SiliconFlow => "SF_KEY",
            Provider::DeepSeek => "DS_KEY",
        }
    }

    fn default_model(&self) -> String {
        match self {
            Provider::SiliconFlow => "moonshotai/Kimi-K2-Instruct".to_string(),
            Provider::DeepSeek => {
                std::env::var("DS_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string())
            }
        }
    }
}

/// Typed failure taxonomy for one chat-completion call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No key configured for the selected provider. Raised before any
    /// HTTP request is attempted.
    #[error("no API key configured for {provider}: set the {env_var} environment variable")]
    MissingKey {
        provider: &'static str,
        env_var: &'static str,
    },

    /// HTTP 401 — the configured key was rejected.
    #[error("{provider} rejected the API key (HTTP 401): check {env_var}")]
    Auth {
        provider: &'static str,
        env_var: &'static str,
    },

    /// HTTP 402 — insufficient balance.
    #[error("{provider} reports insufficient balance (HTTP 402): {detail}")]
    Quota {
        provider: &'static str,
        detail: String,
    },

    /// HTTP 400/422 — the request itself was rejected.
    #[error("{provider} rejected the request: {detail}")]
    InvalidArgument {
        provider: &'static str,
        detail: String,
    },

    /// HTTP 429 — rate limited; back off before retrying.
    #[error("{provider} rate limit hit (HTTP 429): back off before retrying")]
    RateLimit { provider: &'static str },

    /// HTTP 503/504 — transient overload; the caller may retry.
    #[error("{provider} is overloaded (HTTP {status}): retry later")]
    Overloaded {
        provider: &'static str,
        status: u16,
    },

    /// HTTP 500 — transient server error; the caller may retry.
    #[error("{provider} server error (HTTP 500): {detail}")]
    Server {
        provider: &'static str,
        detail: String,
    },

    /// No response within the wall-clock budget.
    #[error("no response from {provider} within {budget_secs} s")]
    Timeout {
        provider: &'static str,
        budget_secs: u64,
    },

    /// Any other network or protocol failure.
    #[error("transport failure talking to {provider}: {detail}")]
    Transport {
        provider: &'static str,
        detail: String,
    },
}

impl ApiError {
    /// Whether the caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimit { .. }
                | ApiError::Overloaded { .. }
                | ApiError::Server { .. }
                | ApiError::Timeout { .. }
                | ApiError::Transport { .. }
        )
    }
}

/// One configured chat-completion client.
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    provider: Provider,
    model: String,
    key: Option<String>,
}

impl ApiClient {
    /// Build a client from the environment, optionally overriding the
    /// endpoint. Key presence is checked at call time, not here, so that
    /// read-only operations never require credentials.
    pub fn from_env(endpoint: Option<String>) -> anyhow::Result<ApiClient> {
        let endpoint = endpoint
            .or_else(|| std::env::var("DS_EP").ok())
            .unwrap_or_else(|| DEFAULT_DEEPSEEK_ENDPOINT.to_string());
        let provider = Provider::detect(&endpoint);
        let model = provider.default_model();
        let key = std::env::var(provider.key_env()).ok().filter(|k| !k.is_empty());

        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;

        Ok(ApiClient {
            http,
            endpoint,
            provider,
            model,
            key,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Verify a key is configured for the selected provider without
    /// touching the network.
    pub fn ensure_key(&self) -> Result<(), ApiError> {
        if self.key.is_some() {
            Ok(())
        } else {
            Err(ApiError::MissingKey {
                provider: self.provider.name(),
                env_var: self.provider.key_env(),
            })
        }
    }

    /// Send one prompt as a single user message and return the reply text.
    ///
    /// `model` overrides the provider default for this call only. Providers
    /// that split reasoning from the answer (`reasoning_content`) fall back
    /// to the reasoning text when the answer field is empty.
    pub async fn call(
        &self,
        prompt: &str,
        model: Option<&str>,
        max_tokens: usize,
    ) -> Result<String, ApiError> {
        let provider = self.provider.name();
        let key = self.key.as_deref().ok_or(ApiError::MissingKey {
            provider,
            env_var: self.provider.key_env(),
        })?;

        let use_model = model.unwrap_or(&self.model);
        let mut payload = json!({
            "model": use_model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "stream": false,
        });
        if self.provider == Provider::SiliconFlow {
            payload["temperature"] = json!(0.2);
            payload["top_p"] = json!(0.7);
        }

        tracing::debug!(provider, model = use_model, max_tokens, "chat completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout {
                        provider,
                        budget_secs: CALL_TIMEOUT.as_secs(),
                    }
                } else {
                    ApiError::Transport {
                        provider,
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(self.provider, status.as_u16(), detail));
        }

        let body: Value = response.json().await.map_err(|e| ApiError::Transport {
            provider,
            detail: format!("invalid JSON response: {}", e),
        })?;
        extract_reply(self.provider, &body)
    }
}

fn classify_status(provider: Provider, status: u16, detail: String) -> ApiError {
    let name = provider.name();
    match status {
        401 => ApiError::Auth {
            provider: name,
            env_var: provider.key_env(),
        },
        402 => ApiError::Quota {
            provider: name,
            detail,
        },
        400 | 422 => ApiError::InvalidArgument {
            provider: name,
            detail,
        },
        429 => ApiError::RateLimit { provider: name },
        503 | 504 => ApiError::Overloaded {
            provider: name,
            status,
        },
        500 => ApiError::Server {
            provider: name,
            detail,
        },
        _ => ApiError::Transport {
            provider: name,
            detail: format!("unexpected HTTP {}: {}", status, detail),
        },
    }
}

/// Pull the reply text out of an OpenAI-compatible response body.
fn extract_reply(provider: Provider, body: &Value) -> Result<String, ApiError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| ApiError::Transport {
            provider: provider.name(),
            detail: format!(
                "response missing choices[0].message: {}",
                truncate(&body.to_string(), 400)
            ),
        })?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    if !content.is_empty() {
        return Ok(content.to_string());
    }

    // Reasoning models may put everything in the reasoning sidecar.
    let reasoning = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    if !reasoning.is_empty() {
        return Ok(reasoning.to_string());
    }

    Err(ApiError::Transport {
        provider: provider.name(),
        detail: format!(
            "empty reply; check endpoint/key/model. Response: {}",
            truncate(&body.to_string(), 400)
        ),
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
