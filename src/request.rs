//! Request payloads and typed results shared by every provider family.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::Capability;

/// Text or vision prompt for an analysis model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub prompt: String,
    /// Image as a `data:` URL or a plain http(s) URL
    pub image: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatPayload {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn vision(prompt: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Self::text(prompt)
        }
    }
}

/// Parameters for an image generation backend. Setting `init_image` turns
/// the request into image-to-image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    /// `None` lets the backend pick a random seed
    pub seed: Option<i64>,
    /// Base64-encoded reference image
    pub init_image: Option<String>,
    /// How far the result may drift from `init_image`, 0.0 to 1.0
    pub denoising_strength: Option<f64>,
}

impl ImagePayload {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: 512,
            height: 512,
            steps: 30,
            cfg_scale: 7.5,
            seed: None,
            init_image: None,
            denoising_strength: None,
        }
    }

    pub fn is_img2img(&self) -> bool {
        self.init_image.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Chat(ChatPayload),
    Image(ImagePayload),
}

impl Payload {
    /// The capability a provider needs to serve this payload.
    pub fn capability(&self) -> Capability {
        match self {
            Payload::Chat(_) => Capability::Analyze,
            Payload::Image(_) => Capability::Generate,
        }
    }
}

/// Per-call overrides of the configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Bound on the whole call, retries and backoff included
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub payload: Payload,
    pub options: CallOptions,
}

impl Request {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            options: CallOptions::default(),
        }
    }

    pub fn chat(payload: ChatPayload) -> Self {
        Self::new(Payload::Chat(payload))
    }

    pub fn image(payload: ImagePayload) -> Self {
        Self::new(Payload::Image(payload))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = Some(max_retries);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.options.deadline = Some(deadline);
        self
    }
}

/// A generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Image {
    /// File extension matching the mime type.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Typed payload of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    Text(String),
    Images(Vec<Image>),
}

impl Generated {
    pub fn into_text(self) -> Option<String> {
        match self {
            Generated::Text(text) => Some(text),
            Generated::Images(_) => None,
        }
    }

    pub fn into_images(self) -> Option<Vec<Image>> {
        match self {
            Generated::Images(images) => Some(images),
            Generated::Text(_) => None,
        }
    }
}
