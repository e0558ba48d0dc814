//! OpenRouter (OpenAI-compatible chat completions) adapter.

use serde_json::{Value, json};

use super::{Adapter, ProviderConfig, ProviderKind};
use crate::http::{OutboundRequest, RawResponse};
use crate::request::{ChatPayload, Generated, Payload};

/// Vision-capable model used when the provider names none.
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Chat completion response types (internal).
mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct ChatResponse {
        #[serde(default)]
        pub choices: Vec<Choice>,
        pub error: Option<ErrorBody>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Choice {
        pub message: Message,
    }

    #[derive(Deserialize, Debug)]
    pub struct Message {
        pub content: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct ErrorBody {
        pub message: Option<String>,
    }
}

pub struct OpenRouterAdapter;

impl OpenRouterAdapter {
    fn messages(chat: &ChatPayload) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(system) = &chat.system {
            messages.push(json!({"role": "system", "content": system}));
        }

        let content = match &chat.image {
            Some(image) => json!([
                {"type": "text", "text": chat.prompt},
                {"type": "image_url", "image_url": {"url": image}},
            ]),
            None => json!(chat.prompt),
        };
        messages.push(json!({"role": "user", "content": content}));
        messages
    }
}

impl Adapter for OpenRouterAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    fn build(
        &self,
        provider: &ProviderConfig,
        payload: &Payload,
    ) -> Result<OutboundRequest, String> {
        let Payload::Chat(chat) = payload else {
            return Err("openrouter providers only accept chat payloads".to_string());
        };

        let body = json!({
            "model": provider.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "messages": Self::messages(chat),
            "temperature": chat.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "max_tokens": chat.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        Ok(
            OutboundRequest::post_json(provider.endpoint("chat/completions"), body)
                .bearer(provider.credential.as_deref()),
        )
    }

    fn parse(&self, response: &RawResponse) -> Result<Generated, String> {
        let parsed: api::ChatResponse = serde_json::from_slice(&response.body)
            .map_err(|e| format!("invalid chat completion body: {}", e))?;

        // OpenRouter can report upstream model errors inside a 200 body.
        if let Some(error) = parsed.error {
            return Err(format!(
                "error in response body: {}",
                error.message.unwrap_or_else(|| "unknown".to_string())
            ));
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(Generated::Text)
            .ok_or_else(|| "response contained no choices".to_string())
    }

    fn probe(&self, provider: &ProviderConfig) -> OutboundRequest {
        OutboundRequest::get(provider.endpoint("models")).bearer(provider.credential.as_deref())
    }
}
