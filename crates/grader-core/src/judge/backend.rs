//! Model backends for the rubric judge.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::error::JudgeError;
use super::JudgeConfig;

/// A chat model that turns a system and user prompt into a completion.
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    /// Model identifier recorded in the result.
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, JudgeError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleBackend {
    http_client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleBackend {
    /// Build the client. Missing endpoint or API key means the judge is
    /// unavailable.
    pub fn new(config: &JudgeConfig) -> Result<Self, JudgeError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| JudgeError::Unavailable("no judge endpoint configured".to_string()))?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| JudgeError::Unavailable("no judge API key configured".to_string()))?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("agent-grader/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| JudgeError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            url: chat_completions_url(endpoint),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
        })
    }
}

/// Accept either a base URL or the full `/chat/completions` URL.
fn chat_completions_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with("/chat/completions") {
        endpoint.to_string()
    } else {
        format!("{endpoint}/chat/completions")
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl JudgeBackend for OpenAiCompatibleBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, JudgeError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        debug!(url = %self.url, model = %self.model, "sending judgment request");
        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JudgeError::Timeout(self.timeout_secs)
                } else {
                    JudgeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::Status {
                status: status.as_u16(),
                body: crate::text::truncate_utf8(&body, 500).to_string(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::MalformedOutput(format!("invalid completion body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| JudgeError::MalformedOutput("completion has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_endpoint_is_unavailable() {
        let config = JudgeConfig {
            api_key: Some("sk-test".to_string()),
            ..JudgeConfig::default()
        };
        let err = OpenAiCompatibleBackend::new(&config).err().unwrap();
        assert!(matches!(err, JudgeError::Unavailable(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_missing_api_key_is_unavailable() {
        let config = JudgeConfig {
            endpoint: Some("http://localhost:1".to_string()),
            api_key: Some(String::new()),
            ..JudgeConfig::default()
        };
        let err = OpenAiCompatibleBackend::new(&config).err().unwrap();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            chat_completions_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://localhost:8080/v1/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let config = JudgeConfig {
            endpoint: Some("http://127.0.0.1:1/v1".to_string()),
            api_key: Some("sk-test".to_string()),
            request_timeout_secs: 5,
            ..JudgeConfig::default()
        };
        let backend = OpenAiCompatibleBackend::new(&config).unwrap();
        assert_eq!(backend.model(), config.model);
        let err = backend.complete("sys", "user").await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
