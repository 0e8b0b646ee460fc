//! Language model client (OpenAI-compatible chat completions)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::collaborators::LanguageModel;
use crate::error::status_error;
use crate::http;
use crate::{Error, Result};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat completion client
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    system_prompt: Option<String>,
    temperature: f32,
}

impl ChatClient {
    /// Create a client for `base_url`
    ///
    /// A key is optional so local OpenAI-compatible servers can be used.
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<SecretString>) -> Self {
        Self {
            client: http::client(http::DEFAULT_REQUEST_TIMEOUT),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            system_prompt: None,
            temperature: 0.0,
        }
    }

    /// Prepend a system message to every request
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// Fail requests that take longer than `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http::client(timeout);
        self
    }

    /// Sampling temperature (0 gives reproducible answers)
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn messages<'a>(&'a self, prompt: &'a str) -> Vec<Message<'a>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: prompt,
        });
        messages
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        tracing::debug!(model, prompt_len = prompt.len(), "sending chat completion");

        let request = ChatCompletionRequest {
            model,
            messages: self.messages(prompt),
            temperature: self.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat completion request failed");
            Error::ServiceUnavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(status_error("chat completion", status, &body));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("failed to parse completion: {e}")))?;

        let answer = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if answer.is_empty() {
            return Err(Error::ServiceUnavailable(
                "completion contained no answer".to_string(),
            ));
        }

        tracing::debug!(answer_len = answer.len(), "chat completion received");
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
