//! Provider descriptors and per-family wire adapters.
//!
//! A provider is a configured endpoint (name, base URL, credential,
//! capability). The wire shape it speaks is decided by its [`ProviderKind`],
//! and each kind has one [`Adapter`] that builds requests and parses
//! successful responses. The retry and fallback logic in
//! [`crate::client`] never looks at provider-specific JSON.

mod huggingface;
mod openrouter;
mod registry;
mod webui;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::{OutboundRequest, RawResponse};
use crate::request::{Generated, Payload};

pub use huggingface::HuggingFaceAdapter;
pub use openrouter::OpenRouterAdapter;
pub use registry::ProviderRegistry;
pub use webui::WebUiAdapter;

/// Provider family identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (OpenRouter)
    OpenRouter,
    /// AUTOMATIC1111-compatible Stable Diffusion web UI
    WebUi,
    /// Hugging Face inference API
    HuggingFace,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenRouter => write!(f, "openrouter"),
            ProviderKind::WebUi => write!(f, "webui"),
            ProviderKind::HuggingFace => write!(f, "huggingface"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "webui" => Ok(ProviderKind::WebUi),
            "huggingface" => Ok(ProviderKind::HuggingFace),
            _ => anyhow::bail!(
                "Unknown provider kind: {}. Expected openrouter, webui, or huggingface.",
                s
            ),
        }
    }
}

/// What a provider can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Analyze,
    Generate,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Analyze => write!(f, "analyze"),
            Capability::Generate => write!(f, "generate"),
        }
    }
}

/// A configured external endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Resolved credential. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,
    /// Environment variable to read the credential from when `credential`
    /// is not given inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Extra client-identification headers sent with every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        base_url: impl Into<String>,
        capability: Capability,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: base_url.into(),
            capability,
            model: None,
            credential: None,
            credential_env: None,
            timeout_secs: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env = Some(var.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Joins `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Whether the family rejects unauthenticated requests.
    pub fn requires_credential(&self) -> bool {
        !matches!(self.kind, ProviderKind::WebUi)
    }

    /// Adds the configured identification headers to a request.
    pub fn decorate(&self, mut request: OutboundRequest) -> OutboundRequest {
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.clone());
        }
        request
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("capability", &self.capability)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("credential_env", &self.credential_env)
            .field("timeout_secs", &self.timeout_secs)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Request builder and response parser for one provider family.
pub trait Adapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Builds the request for one attempt. An error means the payload
    /// cannot be expressed for this family.
    fn build(&self, provider: &ProviderConfig, payload: &Payload)
    -> Result<OutboundRequest, String>;

    /// Parses a 2xx response into the typed result.
    fn parse(&self, response: &RawResponse) -> Result<Generated, String>;

    /// Cheap request used to check that the provider is reachable.
    fn probe(&self, provider: &ProviderConfig) -> OutboundRequest;
}

/// Returns the adapter for a provider family.
pub fn adapter(kind: ProviderKind) -> &'static dyn Adapter {
    match kind {
        ProviderKind::OpenRouter => &OpenRouterAdapter,
        ProviderKind::WebUi => &WebUiAdapter,
        ProviderKind::HuggingFace => &HuggingFaceAdapter,
    }
}
