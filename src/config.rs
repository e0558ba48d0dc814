//! Load-once configuration: file, environment overrides, credentials.
//!
//! Resolution order:
//! 1. explicit path (`--config` / `MINTCALL_CONFIG`), which must exist
//! 2. `<config_dir>/mintcall/config.json` when present
//! 3. built-in defaults
//!
//! Fields missing from a file keep their built-in value, so a file holding
//! only `{"max_retries": 1}` still gets the default providers and chains.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::http::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS,
    RetryPolicy,
};
use crate::provider::{Capability, ProviderConfig, ProviderKind, ProviderRegistry};
use crate::runtime::Runtime;

pub const DEFAULT_USER_AGENT: &str = concat!("mintcall/", env!("MINTCALL_VERSION"));

const CONFIG_DIR_NAME: &str = "mintcall";
const CONFIG_FILE_NAME: &str = "config.json";

const ENV_TIMEOUT_SECS: &str = "MINTCALL_TIMEOUT_SECS";
const ENV_MAX_RETRIES: &str = "MINTCALL_MAX_RETRIES";
const ENV_BACKOFF_BASE_MS: &str = "MINTCALL_BACKOFF_BASE_MS";
const ENV_BACKOFF_CAP_MS: &str = "MINTCALL_BACKOFF_CAP_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Per-attempt timeout unless the provider or request overrides it
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub user_agent: String,
    pub providers: Vec<ProviderConfig>,
    /// Chain name to ordered provider names
    pub chains: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        let providers = vec![
            ProviderConfig::new(
                "openrouter",
                ProviderKind::OpenRouter,
                "https://openrouter.ai/api/v1",
                Capability::Analyze,
            )
            .credential_env("OPENROUTER_API_KEY")
            .header("HTTP-Referer", "http://localhost:3000")
            .header("X-Title", "mintcall"),
            ProviderConfig::new(
                "webui",
                ProviderKind::WebUi,
                "http://localhost:7860",
                Capability::Generate,
            ),
            ProviderConfig::new(
                "huggingface",
                ProviderKind::HuggingFace,
                "https://api-inference.huggingface.co",
                Capability::Generate,
            )
            .credential_env("HUGGINGFACE_API_KEY"),
        ];

        let mut chains = BTreeMap::new();
        chains.insert("analyze".to_string(), vec!["openrouter".to_string()]);
        chains.insert(
            "generate".to_string(),
            vec!["webui".to_string(), "huggingface".to_string()],
        );

        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            providers,
            chains,
        }
    }
}

impl Settings {
    /// Loads, overrides, resolves credentials and validates.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: Option<&Path>) -> Result<Self> {
        let mut settings = match Self::locate(runtime, path) {
            Some(path) => Self::from_file(runtime, &path)?,
            None => {
                debug!("No configuration file found, using built-in defaults");
                Self::default()
            }
        };

        settings.apply_env(runtime)?;
        settings.resolve_credentials(runtime);
        settings.validate()?;
        Ok(settings)
    }

    /// Path of the file to read, if any.
    fn locate<R: Runtime>(runtime: &R, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let path = runtime
            .config_dir()?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME);
        runtime.exists(&path).then_some(path)
    }

    fn from_file<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        debug!("Loading configuration from {:?}", path);
        let content = runtime.read_to_string(path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    fn apply_env<R: Runtime>(&mut self, runtime: &R) -> Result<()> {
        override_from_env(runtime, ENV_TIMEOUT_SECS, &mut self.timeout_secs)?;
        override_from_env(runtime, ENV_MAX_RETRIES, &mut self.max_retries)?;
        override_from_env(runtime, ENV_BACKOFF_BASE_MS, &mut self.backoff_base_ms)?;
        override_from_env(runtime, ENV_BACKOFF_CAP_MS, &mut self.backoff_cap_ms)?;
        Ok(())
    }

    fn resolve_credentials<R: Runtime>(&mut self, runtime: &R) {
        for provider in &mut self.providers {
            if provider.credential.is_none()
                && let Some(var) = &provider.credential_env
                && let Ok(value) = runtime.env_var(var)
                && !value.trim().is_empty()
            {
                debug!("Using {} for provider {}", var, provider.name);
                provider.credential = Some(value.trim().to_string());
            }

            if provider.credential.is_none() && provider.requires_credential() {
                match &provider.credential_env {
                    Some(var) => warn!(
                        "Provider {} has no credential; set {} to enable it",
                        provider.name, var
                    ),
                    None => warn!("Provider {} has no credential", provider.name),
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            bail!(
                "backoff_cap_ms ({}) must not be smaller than backoff_base_ms ({})",
                self.backoff_cap_ms,
                self.backoff_base_ms
            );
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                bail!("Duplicate provider name: {}", provider.name);
            }
            reqwest::Url::parse(&provider.base_url).with_context(|| {
                format!(
                    "Invalid base_url for provider {}: {}",
                    provider.name, provider.base_url
                )
            })?;
            if provider.timeout_secs == Some(0) {
                bail!("Provider {} has a zero timeout", provider.name);
            }
        }

        for (chain, members) in &self.chains {
            if members.is_empty() {
                bail!("Chain '{}' has no providers", chain);
            }
            if let Some(unknown) = members.iter().find(|m| !names.contains(m.as_str())) {
                bail!("Chain '{}' references unknown provider '{}'", chain, unknown);
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Builds the provider registry from the configured providers and chains.
    pub fn registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for provider in &self.providers {
            registry.register(provider.clone())?;
        }
        for (name, members) in &self.chains {
            registry.define_chain(name.clone(), members.clone())?;
        }
        Ok(registry)
    }
}

fn override_from_env<R, T>(runtime: &R, key: &str, target: &mut T) -> Result<()>
where
    R: Runtime,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(value) = runtime.env_var(key) {
        *target = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value))?;
        debug!("{} overridden from environment", key);
    }
    Ok(())
}
