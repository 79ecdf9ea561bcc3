//! AI-completion collaborator: a prompt in, generated text plus an artifact
//! id out. The HTTP client targets an OpenAI-style chat-completions endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::AiConfig;
use crate::error::AiError;

/// One completed answer. `artifact_id` identifies the generation on the
/// backend side for later diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub artifact_id: String,
}

#[async_trait]
pub trait AiClient: Send + Sync {
    /// `extra` carries caller-specific metadata passed through to the
    /// backend verbatim.
    async fn answer(
        &self,
        content: &str,
        persona: &str,
        user: &str,
        biz_code: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<Completion, AiError>;
}

pub struct HttpAiClient {
    config: AiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpAiClient {
    pub fn new(config: AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn answer(
        &self,
        content: &str,
        persona: &str,
        user: &str,
        biz_code: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<Completion, AiError> {
        let mut metadata = json!({"biz_code": biz_code});
        if let Some(extra) = extra {
            metadata["extra"] = extra;
        }
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": persona},
                {"role": "user", "content": content},
            ],
            "user": user,
            "metadata": metadata,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AiError::Timeout
                } else {
                    AiError::Http(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(AiError::Http)?;
        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AiError::Malformed("no completion text in response".to_string()))?
            .to_string();

        Ok(Completion {
            text,
            artifact_id: parsed.id.unwrap_or_default(),
        })
    }
}
