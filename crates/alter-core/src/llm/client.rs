//! LLM API HTTP Client
//!
//! Supports both Claude API and OpenAI-compatible APIs

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::conversation::ChatMessage;
use crate::error::{Error, Result};

use super::types::*;

/// Generates an alter's reply to one user message
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `history` is chronological and already bounded by the caller
    async fn generate_reply(
        &self,
        persona: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<String>;
}

/// LLM API client (supports Claude and OpenAI-compatible APIs)
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u64,
    base_url: String,
    provider: LlmProvider,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;

        // Determine base URL based on provider
        let base_url = match &config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match config.provider {
                LlmProvider::Claude => "https://api.anthropic.com/v1".to_string(),
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            },
        };

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            base_url,
            provider: config.provider.clone(),
        })
    }

    /// Send a message to the LLM API
    pub async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse> {
        match self.provider {
            LlmProvider::Claude => self.send_claude_request(request).await,
            LlmProvider::OpenAi => self.send_openai_request(request).await,
        }
    }

    /// Send request to Claude API
    async fn send_claude_request(&self, request: MessagesRequest) -> Result<MessagesResponse> {
        let url = format!("{}/messages", self.base_url);

        debug!("Sending request to Claude API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "Claude API response: stop_reason={:?}, tokens={}",
            parsed.stop_reason,
            parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed)
    }

    /// Send request to OpenAI-compatible API
    async fn send_openai_request(&self, request: MessagesRequest) -> Result<MessagesResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!("Sending request to OpenAI-compatible API: {}", url);

        let openai_request = ChatCompletionRequest::from_claude_request(&request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let openai_response: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        let parsed = openai_response.to_claude_response();

        info!(
            "OpenAI API response: stop_reason={:?}, tokens={}",
            parsed.stop_reason,
            parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed)
    }

    /// Create a messages request builder
    pub fn request_builder(&self) -> MessagesRequestBuilder {
        MessagesRequestBuilder::new(self.model.clone()).max_tokens(self.max_tokens)
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request for one reply: persona as system prompt, prior
    /// messages in order, then the new user message.
    pub fn reply_request(
        &self,
        persona: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> MessagesRequest {
        let mut builder = self.request_builder();
        if !persona.trim().is_empty() {
            builder = builder.system(persona);
        }
        for prior in history {
            builder = builder.message(Message::from(prior));
        }
        builder.user(message).build()
    }
}

#[async_trait]
impl ReplyGenerator for LlmClient {
    async fn generate_reply(
        &self,
        persona: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let request = self.reply_request(persona, message, history);
        let response = self.messages(request).await?;

        let text = response.text().trim().to_string();
        if text.is_empty() {
            return Err(Error::LlmApi("empty reply".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(provider: LlmProvider, base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: "test_key".to_string(),
            model: "test-model".to_string(),
            provider,
            base_url: Some(base_url),
            max_tokens: 256,
        }
    }

    #[test]
    fn test_reply_request_layout() {
        let client = LlmClient::new(&config(LlmProvider::Claude, "http://x".to_string())).unwrap();
        let history = vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello!")];

        let request = client.reply_request("You are Ada.", "How are you?", &history);
        assert_eq!(request.system.as_deref(), Some("You are Ada."));
        assert_eq!(request.max_tokens, 256);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0], Message::user("Hi"));
        assert_eq!(request.messages[1], Message::assistant("Hello!"));
        assert_eq!(request.messages[2], Message::user("How are you?"));
    }

    #[test]
    fn test_blank_persona_has_no_system_prompt() {
        let client = LlmClient::new(&config(LlmProvider::Claude, "http://x".to_string())).unwrap();
        let request = client.reply_request("  ", "Hi", &[]);
        assert!(request.system.is_none());
    }

    #[tokio::test]
    async fn test_generate_reply_claude() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "  I'm great!  "}],
                "model": "test-model",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::Claude, server.uri())).unwrap();
        let reply = client.generate_reply("persona", "How are you?", &[]).await.unwrap();
        assert_eq!(reply, "I'm great!");
    }

    #[tokio::test]
    async fn test_generate_reply_openai() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "c1",
                "model": "test-model",
                "choices": [{"message": {"role": "assistant", "content": "Sure."}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::OpenAi, server.uri())).unwrap();
        let reply = client.generate_reply("", "Help?", &[]).await.unwrap();
        assert_eq!(reply, "Sure.");
    }

    #[tokio::test]
    async fn test_api_error_and_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::Claude, server.uri())).unwrap();
        let result = client.generate_reply("", "Hi", &[]).await;
        assert!(matches!(result, Err(Error::LlmApi(_))));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": []
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::Claude, server.uri())).unwrap();
        let result = client.generate_reply("", "Hi", &[]).await;
        assert!(matches!(result, Err(Error::LlmApi(_))));
    }
}
