use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CopyRequest, GeneratorError, TextGenerator};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat completions client.
pub struct OpenAiGenerator {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl OpenAiGenerator {
    pub fn new(
        api_key: String,
        model: String,
        endpoint: String,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model,
            endpoint,
            client,
        })
    }

    fn headers(&self) -> Result<HeaderMap, GeneratorError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| GeneratorError::Malformed("invalid API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn complete(&self, request: &CopyRequest) -> Result<String, GeneratorError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GeneratorError::Status { status, body });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GeneratorError::Malformed(e.to_string()))?;

        extract_content(parsed)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

fn extract_content(resp: ChatResponse) -> Result<String, GeneratorError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GeneratorError::Malformed("response has no message content".into()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
