use async_trait::async_trait;
use reqwest::Client;

use crate::config::ChatSettings;
use crate::error::{FailureKind, RagResult, ServiceError};
use crate::models::{ChatRequest, ChatResponse, Message};

/// A chat-completion backend: one user prompt in, generated text out.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ChatClient {
    pub fn new(settings: &ChatSettings) -> RagResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ServiceError::new(FailureKind::Network, e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_answer_tokens,
        })
    }

    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self.client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| ServiceError::from_transport(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, &error_text));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ServiceError::from_transport(&e))
    }
}

#[async_trait]
impl ChatCompletion for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
        };
        let response = self.chat_completion(&request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ServiceError::new(FailureKind::Decode, "completion contained no choices"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::user("hello")],
            temperature: Some(0.0),
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":" Login errors. "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.trim(), "Login errors.");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let settings = ChatSettings {
            base_url: "http://127.0.0.1:9/v1/".to_string(),
            timeout_secs: 2,
            ..ChatSettings::default()
        };
        let client = ChatClient::new(&settings).unwrap();
        let err = client.complete("hi").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
